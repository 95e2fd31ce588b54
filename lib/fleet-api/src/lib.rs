//! Fleet API types and CRDs for Kubernetes integration
//!
//! This library defines the custom resources of the fleet orchestrator:
//! - ServerSet: a replicated set of cloud servers sharing one template
//! - StatefulServerSet: a ServerSet with shared LANs and per-replica data volumes
//!
//! and the dependent resources the orchestrator provisions on their behalf
//! (volumes, servers, NICs, firewall rules, LANs and volume selectors).

pub mod resources;
pub mod v1alpha1;

pub use resources::{FirewallRule, Lan, Managed, Nic, Server, Volume, VolumeSelector};
pub use v1alpha1::{ServerSet, StatefulServerSet};
