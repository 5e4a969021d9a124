// src/core/cluster/mod.rs

//! The active/standby cluster manager. There is no gossip
//! protocol, slot map, or consensus here. Promotion between roles is
//! explicit, via `SetPeerRole`.

pub mod manager;

pub use manager::{ClusterManager, ClusterStatus, PeerInfo, PeerRole, PeerState};
