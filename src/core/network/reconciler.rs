// src/core/network/reconciler.rs

//! Executed once at daemon start, after schema creation. Diffs
//! the persisted desired network state against the kernel and re-applies
//! whatever is missing. Ordered bonds → VLANs → addresses (a VLAN may
//! parent on a bond; an address may sit on a bond or VLAN). Errors on
//! individual restorations are logged and do not abort the pass — partial
//! reconciliation is correct behavior, and a pass with nothing to do is a
//! silent no-op.

use crate::core::DPlaneError;
use crate::core::clients::netlink::{BondMode, Link, NetlinkClient};
use crate::core::clients::network_units::{self, NetworkUnitWriter};
use crate::core::network::model::{InterfaceKind, NetworkDesiredState};
use crate::core::store::Store;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{error, info, warn};

fn parse_mode(mode: &str) -> BondMode {
    match mode {
        "active-backup" => BondMode::ActiveBackup,
        "balance-rr" => BondMode::BalanceRr,
        _ => BondMode::Lacp8023ad,
    }
}

fn parse_cidr(cidr: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    Some((addr.parse().ok()?, prefix.parse().ok()?))
}

/// Runs the full reconciliation pass. Returns the number of items restored.
pub async fn reconcile(
    store: &Store,
    netlink: &NetlinkClient,
    unit_writer: &NetworkUnitWriter,
) -> Result<usize, DPlaneError> {
    let desired = NetworkDesiredState::load(store).await?;
    desired.validate()?;

    let mut restored = 0usize;

    let mut links = link_map(netlink)?;

    for bond in &desired.bonds {
        if links.contains_key(&bond.name) {
            continue;
        }
        match restore_bond(netlink, unit_writer, bond, &links).await {
            Ok(()) => {
                info!(bond = %bond.name, "restored missing bond");
                restored += 1;
            }
            Err(e) => error!(bond = %bond.name, error = %e, "failed to restore bond"),
        }
    }

    // Refresh the link map: bonds just created now have kernel ifindexes
    // that VLANs may need to parent on.
    links = link_map(netlink)?;

    for vlan in &desired.vlans {
        if links.contains_key(&vlan.name) {
            continue;
        }
        match restore_vlan(netlink, unit_writer, vlan, &links).await {
            Ok(()) => {
                info!(vlan = %vlan.name, "restored missing VLAN");
                restored += 1;
            }
            Err(e) => error!(vlan = %vlan.name, error = %e, "failed to restore VLAN"),
        }
    }

    links = link_map(netlink)?;
    let existing_addrs = netlink.list_addresses().unwrap_or_default();

    for iface in desired.interfaces.iter().filter(|i| i.kind == InterfaceKind::Static) {
        let Some(cidr) = &iface.cidr else { continue };
        let Some(link) = links.get(&iface.name) else {
            warn!(interface = %iface.name, "static interface desired but kernel link absent, skipping");
            continue;
        };
        let Some((addr, prefix_len)) = parse_cidr(cidr) else {
            warn!(interface = %iface.name, cidr, "unparseable desired CIDR, skipping");
            continue;
        };

        let already_present = existing_addrs
            .iter()
            .any(|a| a.index == link.index && a.addr == addr && a.prefix_len == prefix_len);
        if already_present {
            continue;
        }

        match restore_address(netlink, unit_writer, iface, link, addr, prefix_len).await {
            Ok(()) => {
                info!(interface = %iface.name, cidr, "restored missing address");
                restored += 1;
            }
            Err(e) => error!(interface = %iface.name, error = %e, "failed to restore address"),
        }
    }

    info!(restored, "network reconciliation pass complete");
    Ok(restored)
}

fn link_map(netlink: &NetlinkClient) -> Result<HashMap<String, Link>, DPlaneError> {
    Ok(netlink
        .list_links()?
        .into_iter()
        .map(|l| (l.name.clone(), l))
        .collect())
}

async fn restore_bond(
    netlink: &NetlinkClient,
    unit_writer: &NetworkUnitWriter,
    bond: &crate::core::network::model::BondConfig,
    links: &HashMap<String, Link>,
) -> Result<(), DPlaneError> {
    netlink.add_bond(&bond.name, parse_mode(&bond.mode))?;
    let bond_link = netlink
        .find_link(&bond.name)?
        .ok_or_else(|| DPlaneError::Internal(format!("bond '{}' missing immediately after creation", bond.name)))?;

    for slave in &bond.slaves {
        let Some(slave_link) = links.get(slave) else {
            warn!(bond = %bond.name, slave, "slave interface not present in kernel, skipping");
            continue;
        };
        netlink.set_link_updown(slave_link.index, false)?;
        netlink.set_master(slave_link.index, bond_link.index)?;
    }
    netlink.set_link_updown(bond_link.index, true)?;

    let netdev = network_units::render_bond_netdev(&bond.name, &bond.mode);
    unit_writer.write_netdev(&netdev)?;
    for slave in &bond.slaves {
        let unit = network_units::render_bond_slave_network(slave, &bond.name);
        unit_writer.write_network(&unit)?;
    }
    unit_writer.reload().await;
    Ok(())
}

async fn restore_vlan(
    netlink: &NetlinkClient,
    unit_writer: &NetworkUnitWriter,
    vlan: &crate::core::network::model::VlanConfig,
    links: &HashMap<String, Link>,
) -> Result<(), DPlaneError> {
    let parent = links
        .get(&vlan.parent)
        .ok_or_else(|| DPlaneError::NotFound(format!("VLAN parent interface '{}'", vlan.parent)))?;
    netlink.add_vlan(&vlan.name, parent.index, vlan.vlan_id)?;
    let vlan_link = netlink
        .find_link(&vlan.name)?
        .ok_or_else(|| DPlaneError::Internal(format!("VLAN '{}' missing immediately after creation", vlan.name)))?;
    netlink.set_link_updown(vlan_link.index, true)?;

    let netdev = network_units::render_vlan_netdev(&vlan.name, vlan.vlan_id);
    unit_writer.write_netdev(&netdev)?;
    let unit = network_units::render_vlan_parent_network(&vlan.parent, &vlan.name);
    unit_writer.write_network(&unit)?;
    unit_writer.reload().await;
    Ok(())
}

async fn restore_address(
    netlink: &NetlinkClient,
    unit_writer: &NetworkUnitWriter,
    iface: &crate::core::network::model::InterfaceConfig,
    link: &Link,
    addr: Ipv4Addr,
    prefix_len: u8,
) -> Result<(), DPlaneError> {
    netlink.add_address(link.index, addr, prefix_len, false)?;
    if let Some(gateway) = iface.gateway.as_deref().and_then(|g| g.parse::<Ipv4Addr>().ok()) {
        netlink.replace_default_route(gateway, link.index)?;
    }

    let unit = network_units::render_addressed_network(
        &iface.name,
        iface.cidr.as_deref(),
        iface.gateway.as_deref(),
        false,
    );
    unit_writer.write_network(&unit)?;
    unit_writer.reload().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::network::model::{BondConfig, VlanConfig};

    #[test]
    fn parses_well_formed_cidr() {
        assert_eq!(parse_cidr("10.0.0.5/24"), Some((Ipv4Addr::new(10, 0, 0, 5), 24)));
    }

    #[test]
    fn rejects_malformed_cidr() {
        assert_eq!(parse_cidr("not-a-cidr"), None);
        assert_eq!(parse_cidr("10.0.0.5"), None);
    }

    #[test]
    fn bond_mode_maps_known_strings() {
        assert!(matches!(parse_mode("active-backup"), BondMode::ActiveBackup));
        assert!(matches!(parse_mode("802.3ad"), BondMode::Lacp8023ad));
        assert!(matches!(parse_mode("balance-rr"), BondMode::BalanceRr));
    }

    #[test]
    fn bond_and_vlan_configs_carry_expected_fields() {
        let bond = BondConfig { name: "bond0".into(), slaves: vec!["eth0".into()], mode: "802.3ad".into() };
        assert_eq!(bond.slaves.len(), 1);
        let vlan = VlanConfig { name: "vlan10".into(), parent: "bond0".into(), vlan_id: 10 };
        assert_eq!(vlan.vlan_id, 10);
    }
}
