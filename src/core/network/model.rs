// src/core/network/model.rs

//! The persisted network-desired-state data model: three disjoint
//! collections keyed by interface name.
//! Invariants (bond names disjoint from slave names, unique VLAN names,
//! VLAN id range) are enforced by [`NetworkDesiredState::validate`], called
//! before anything is persisted.

use crate::core::DPlaneError;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Dhcp,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub kind: InterfaceKind,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondConfig {
    pub name: String,
    pub slaves: Vec<String>,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanConfig {
    pub name: String,
    pub parent: String,
    pub vlan_id: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDesiredState {
    pub interfaces: Vec<InterfaceConfig>,
    pub bonds: Vec<BondConfig>,
    pub vlans: Vec<VlanConfig>,
}

impl NetworkDesiredState {
    /// Enforces: bond names disjoint from any slave name; VLAN names
    /// unique; VLAN id within `[1, 4094]`.
    pub fn validate(&self) -> Result<(), DPlaneError> {
        let bond_names: HashSet<&str> = self.bonds.iter().map(|b| b.name.as_str()).collect();
        for bond in &self.bonds {
            for slave in &bond.slaves {
                if bond_names.contains(slave.as_str()) {
                    return Err(DPlaneError::InvalidInput(format!(
                        "bond '{}' cannot slave another bond ('{slave}')",
                        bond.name
                    )));
                }
            }
        }

        let mut vlan_names = HashSet::new();
        for vlan in &self.vlans {
            if !vlan_names.insert(vlan.name.as_str()) {
                return Err(DPlaneError::InvalidInput(format!(
                    "duplicate VLAN name '{}'",
                    vlan.name
                )));
            }
            if vlan.vlan_id == 0 || vlan.vlan_id > 4094 {
                return Err(DPlaneError::InvalidInput(format!(
                    "VLAN id {} out of range [1, 4094]",
                    vlan.vlan_id
                )));
            }
        }
        Ok(())
    }

    pub async fn load(store: &Store) -> Result<Self, DPlaneError> {
        store
            .with_conn(|conn| {
                let mut interfaces = Vec::new();
                let mut stmt = conn.prepare("SELECT name, kind, cidr, gateway FROM net_interfaces")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let kind_str: String = row.get(1)?;
                    interfaces.push(InterfaceConfig {
                        name: row.get(0)?,
                        kind: if kind_str == "static" { InterfaceKind::Static } else { InterfaceKind::Dhcp },
                        cidr: row.get(2)?,
                        gateway: row.get(3)?,
                    });
                }
                drop(rows);
                drop(stmt);

                let mut bonds = Vec::new();
                let mut stmt = conn.prepare("SELECT name, slaves, mode FROM net_bonds")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let slaves_csv: String = row.get(1)?;
                    bonds.push(BondConfig {
                        name: row.get(0)?,
                        slaves: slaves_csv.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
                        mode: row.get(2)?,
                    });
                }
                drop(rows);
                drop(stmt);

                let mut vlans = Vec::new();
                let mut stmt = conn.prepare("SELECT name, parent, vlan_id FROM net_vlans")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    vlans.push(VlanConfig {
                        name: row.get(0)?,
                        parent: row.get(1)?,
                        vlan_id: row.get::<_, i64>(2)? as u16,
                    });
                }

                Ok(NetworkDesiredState { interfaces, bonds, vlans })
            })
            .await
    }

    pub async fn save_bond(store: &Store, bond: BondConfig) -> Result<(), DPlaneError> {
        store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO net_bonds (name, slaves, mode) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET slaves = excluded.slaves, mode = excluded.mode",
                    rusqlite::params![bond.name, bond.slaves.join(","), bond.mode],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn save_vlan(store: &Store, vlan: VlanConfig) -> Result<(), DPlaneError> {
        store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO net_vlans (name, parent, vlan_id) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET parent = excluded.parent, vlan_id = excluded.vlan_id",
                    rusqlite::params![vlan.name, vlan.parent, vlan.vlan_id as i64],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn save_interface(store: &Store, iface: InterfaceConfig) -> Result<(), DPlaneError> {
        let kind_str = match iface.kind {
            InterfaceKind::Dhcp => "dhcp",
            InterfaceKind::Static => "static",
        };
        store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO net_interfaces (name, kind, cidr, gateway) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(name) DO UPDATE SET kind = excluded.kind, cidr = excluded.cidr, gateway = excluded.gateway",
                    rusqlite::params![iface.name, kind_str, iface.cidr, iface.gateway],
                )?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bond_slaving_another_bond() {
        let state = NetworkDesiredState {
            bonds: vec![
                BondConfig { name: "bond0".into(), slaves: vec!["eth0".into()], mode: "802.3ad".into() },
                BondConfig { name: "bond1".into(), slaves: vec!["bond0".into()], mode: "802.3ad".into() },
            ],
            ..Default::default()
        };
        assert!(state.validate().is_err());
    }

    #[test]
    fn rejects_vlan_id_out_of_range() {
        let state = NetworkDesiredState {
            vlans: vec![VlanConfig { name: "vlan0".into(), parent: "eth0".into(), vlan_id: 4095 }],
            ..Default::default()
        };
        assert!(state.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_vlan_names() {
        let state = NetworkDesiredState {
            vlans: vec![
                VlanConfig { name: "vlan0".into(), parent: "eth0".into(), vlan_id: 10 },
                VlanConfig { name: "vlan0".into(), parent: "eth1".into(), vlan_id: 20 },
            ],
            ..Default::default()
        };
        assert!(state.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_state() {
        let state = NetworkDesiredState {
            interfaces: vec![InterfaceConfig {
                name: "eth2".into(),
                kind: InterfaceKind::Static,
                cidr: Some("10.0.0.5/24".into()),
                gateway: Some("10.0.0.1".into()),
            }],
            bonds: vec![BondConfig { name: "bond0".into(), slaves: vec!["eth0".into(), "eth1".into()], mode: "802.3ad".into() }],
            vlans: vec![VlanConfig { name: "vlan100".into(), parent: "bond0".into(), vlan_id: 100 }],
        };
        assert!(state.validate().is_ok());
    }
}
