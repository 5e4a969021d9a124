// src/core/clients/network_units.rs

//! Writes `systemd-networkd` `.network`/`.netdev` unit files atomically
//! (write to a sibling temp file, `fsync`, rename over the target) and
//! best-effort reloads the daemon through the command executor. Reload
//! failures are logged, never returned as an error: the files on disk are
//! the durable source of truth, and networkd will pick them up on its own
//! next restart even if this particular reload attempt is lost.

use crate::core::DPlaneError;
use crate::core::exec::{CommandExecutor, ExecClass};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A rendered `.netdev` unit (creates a virtual device: bond or VLAN).
pub struct NetdevUnit {
    pub name: String,
    pub contents: String,
}

/// A rendered `.network` unit (binds addressing/routes to a device name or match).
pub struct NetworkUnit {
    pub name: String,
    pub contents: String,
}

pub fn render_bond_netdev(bond_name: &str, mode: &str) -> NetdevUnit {
    let contents = format!(
        "[NetDev]\nName={bond_name}\nKind=bond\n\n[Bond]\nMode={mode}\n"
    );
    NetdevUnit {
        name: format!("10-{bond_name}.netdev"),
        contents,
    }
}

pub fn render_vlan_netdev(vlan_name: &str, vlan_id: u16) -> NetdevUnit {
    let contents = format!("[NetDev]\nName={vlan_name}\nKind=vlan\n\n[VLAN]\nId={vlan_id}\n");
    NetdevUnit {
        name: format!("20-{vlan_name}.netdev"),
        contents,
    }
}

pub fn render_bond_slave_network(slave_name: &str, bond_name: &str) -> NetworkUnit {
    let contents = format!("[Match]\nName={slave_name}\n\n[Network]\nBond={bond_name}\n");
    NetworkUnit {
        name: format!("10-{slave_name}.network"),
        contents,
    }
}

pub fn render_vlan_parent_network(parent_name: &str, vlan_name: &str) -> NetworkUnit {
    let contents = format!("[Match]\nName={parent_name}\n\n[Network]\nVLAN={vlan_name}\n");
    NetworkUnit {
        name: format!("15-{parent_name}.network"),
        contents,
    }
}

/// Address/route-bearing unit for a plain or bonded/VLAN interface.
pub fn render_addressed_network(
    iface_name: &str,
    cidr: Option<&str>,
    gateway: Option<&str>,
    dhcp: bool,
) -> NetworkUnit {
    let mut contents = format!("[Match]\nName={iface_name}\n\n[Network]\n");
    if dhcp {
        contents.push_str("DHCP=yes\n");
    } else if let Some(cidr) = cidr {
        contents.push_str(&format!("Address={cidr}\n"));
    }
    if let Some(gw) = gateway {
        contents.push_str(&format!("Gateway={gw}\n"));
    }
    NetworkUnit {
        name: format!("30-{iface_name}.network"),
        contents,
    }
}

/// Writes and reloads systemd-networkd unit files under `unit_dir`.
pub struct NetworkUnitWriter {
    unit_dir: PathBuf,
    exec: CommandExecutor,
}

impl NetworkUnitWriter {
    pub fn new(unit_dir: impl Into<PathBuf>, exec: CommandExecutor) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            exec,
        }
    }

    pub fn write_netdev(&self, unit: &NetdevUnit) -> Result<(), DPlaneError> {
        self.write_atomic(&unit.name, &unit.contents)
    }

    pub fn write_network(&self, unit: &NetworkUnit) -> Result<(), DPlaneError> {
        self.write_atomic(&unit.name, &unit.contents)
    }

    pub fn remove_unit(&self, file_name: &str) -> Result<(), DPlaneError> {
        let path = self.unit_dir.join(file_name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, file_name: &str, contents: &str) -> Result<(), DPlaneError> {
        std::fs::create_dir_all(&self.unit_dir)?;
        let target = self.unit_dir.join(file_name);
        let tmp_path = tmp_sibling(&target);

        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &target)?;
        Ok(())
    }

    /// Best-effort `systemctl reload-or-restart systemd-networkd`. Logs and
    /// swallows failures rather than propagating them: the unit files
    /// written to disk are already durable.
    pub async fn reload(&self) {
        match self
            .exec
            .run(
                ExecClass::Medium,
                "systemctl",
                &["reload-or-restart", "systemd-networkd"],
            )
            .await
        {
            Ok(out) if out.success() => {}
            Ok(out) => warn!(output = %out.combined_output, "systemd-networkd reload returned non-zero"),
            Err(e) => warn!(error = %e, "systemd-networkd reload failed"),
        }
    }
}

fn tmp_sibling(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;

    fn exec() -> CommandExecutor {
        CommandExecutor::new(ExecConfig {
            fast_timeout_secs: 1,
            medium_timeout_secs: 1,
            zfs_timeout_secs: 1,
            slow_timeout_secs: 1,
        })
    }

    #[test]
    fn renders_bond_netdev_with_mode() {
        let unit = render_bond_netdev("bond0", "active-backup");
        assert_eq!(unit.name, "10-bond0.netdev");
        assert!(unit.contents.contains("Mode=active-backup"));
    }

    #[test]
    fn write_atomic_creates_file_and_no_leftover_tmp() {
        let dir = std::env::temp_dir().join(format!(
            "dplaneos-nettest-{}",
            std::process::id()
        ));
        let writer = NetworkUnitWriter::new(&dir, exec());
        let unit = render_vlan_netdev("vlan100", 100);
        writer.write_netdev(&unit).unwrap();

        let written = std::fs::read_to_string(dir.join("20-vlan100.netdev")).unwrap();
        assert!(written.contains("Id=100"));
        assert!(!dir.join(".20-vlan100.netdev.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn remove_unit_is_idempotent_when_missing() {
        let dir = std::env::temp_dir().join(format!(
            "dplaneos-nettest-missing-{}",
            std::process::id()
        ));
        let writer = NetworkUnitWriter::new(&dir, exec());
        assert!(writer.remove_unit("nope.network").is_ok());
    }
}
