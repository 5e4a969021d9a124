// src/core/exec/whitelist.rs

//! Strict regular-expression whitelists for every external-name argument
//! accepted from an HTTP request before it reaches the Command Executor.
//! Anything failing its whitelist is rejected with `DPlaneError::
//! WhitelistRejected` and a security audit event — never concatenated into
//! a shell string, never passed through unexamined.

use crate::core::metrics::EXEC_WHITELIST_REJECTIONS_TOTAL;
use once_cell::sync::Lazy;
use regex::Regex;

static POOL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,254}$").unwrap());

static DATASET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_./-]{0,254}$").unwrap());

static SNAPSHOT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_./-]{0,254}@[A-Za-z0-9_.-]{1,128}$").unwrap());

static INTERFACE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,14}$").unwrap());

static CONTAINER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").unwrap());

static IPV4_CIDR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3}\.){3}\d{1,3}/(\d|[12]\d|3[0-2])$").unwrap()
});

static IPV4_ADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").unwrap());

/// Name of a value-kind accepted by [`check`], used in rejection errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    PoolName,
    DatasetName,
    SnapshotName,
    InterfaceName,
    ContainerName,
    Ipv4Cidr,
    Ipv4Addr,
}

impl Kind {
    fn field_name(self) -> &'static str {
        match self {
            Kind::PoolName => "pool",
            Kind::DatasetName => "dataset",
            Kind::SnapshotName => "snapshot",
            Kind::InterfaceName => "interface",
            Kind::ContainerName => "container",
            Kind::Ipv4Cidr => "cidr",
            Kind::Ipv4Addr => "address",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Kind::PoolName => &POOL_NAME,
            Kind::DatasetName => &DATASET_NAME,
            Kind::SnapshotName => &SNAPSHOT_NAME,
            Kind::InterfaceName => &INTERFACE_NAME,
            Kind::ContainerName => &CONTAINER_NAME,
            Kind::Ipv4Cidr => &IPV4_CIDR,
            Kind::Ipv4Addr => &IPV4_ADDR,
        }
    }
}

/// Validates `value` against the whitelist for `kind`, returning a
/// `WhitelistRejected` error (never echoing the offending value) on failure.
pub fn check(kind: Kind, value: &str) -> Result<(), crate::core::DPlaneError> {
    if kind.pattern().is_match(value) {
        Ok(())
    } else {
        EXEC_WHITELIST_REJECTIONS_TOTAL.inc();
        Err(crate::core::DPlaneError::WhitelistRejected {
            field: kind.field_name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_name_accepts_normal_names() {
        assert!(check(Kind::PoolName, "tank").is_ok());
        assert!(check(Kind::PoolName, "tank-01.backup").is_ok());
    }

    #[test]
    fn pool_name_rejects_injection_attempts() {
        assert!(check(Kind::PoolName, "tank; rm -rf /").is_err());
        assert!(check(Kind::PoolName, "$(reboot)").is_err());
        assert!(check(Kind::PoolName, "").is_err());
        assert!(check(Kind::PoolName, "-x").is_err());
    }

    #[test]
    fn snapshot_name_requires_at_sign() {
        assert!(check(Kind::SnapshotName, "tank/data@daily-1").is_ok());
        assert!(check(Kind::SnapshotName, "tank/data").is_err());
    }

    #[test]
    fn interface_name_enforces_linux_ifname_limit() {
        assert!(check(Kind::InterfaceName, "eth0").is_ok());
        assert!(check(Kind::InterfaceName, "bond0.100").is_ok());
        assert!(check(Kind::InterfaceName, "a_name_that_is_too_long_for_linux").is_err());
    }

    #[test]
    fn ipv4_cidr_validates_prefix_range() {
        assert!(check(Kind::Ipv4Cidr, "10.0.0.1/24").is_ok());
        assert!(check(Kind::Ipv4Cidr, "10.0.0.1/33").is_err());
    }
}
