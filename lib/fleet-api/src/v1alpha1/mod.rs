/// API version v1alpha1 for fleet CRDs

pub mod common;
pub mod server_set;
pub mod stateful_server_set;

pub use common::{ReplicaHealth, ReplicaRole, ReplicaStatus};
pub use server_set::{
    BootVolumeTemplate, FirewallRuleTemplate, IdentityRef, NicTemplate, PlacementMode,
    ServerSet, ServerSetSpec, ServerSetStatus, ServerTemplate, ZonePlacement,
};
pub use stateful_server_set::{
    DataVolumeTemplate, LanTemplate, StatefulServerSet, StatefulServerSetSpec,
    StatefulServerSetStatus, IPV6_CIDR_AUTO,
};

/// API group for fleet resources
pub const API_GROUP: &str = "compute.fleet.dev";
/// API version for fleet resources
pub const API_VERSION: &str = "v1alpha1";
