use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::server_set::{ServerSetSpec, ServerSetStatus};

/// Sentinel for `ipv6Cidr` letting the provider pick the IPv6 block
pub const IPV6_CIDR_AUTO: &str = "AUTO";

/// StatefulServerSet is a ServerSet that also owns the LANs its NICs attach
/// to and a set of named data volumes per replica that survive rollouts
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "StatefulServerSet",
    plural = "statefulserversets",
    namespaced,
    derive = "Default",
    status = "StatefulServerSetStatus",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Reconciled","type":"boolean","jsonPath":".status.reconciled"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct StatefulServerSetSpec {
    #[serde(flatten)]
    pub fleet: ServerSetSpec,

    /// LANs shared by every replica of the fleet
    #[serde(default)]
    pub lans: Vec<LanTemplate>,

    /// Data volumes created for every replica
    #[serde(default)]
    pub volumes: Vec<DataVolumeTemplate>,
}

/// LAN owned by a StatefulServerSet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LanTemplate {
    /// Name NIC templates use to reference this LAN
    pub name: String,

    #[serde(default)]
    pub public: bool,

    /// "AUTO" for a provider-assigned block, empty for no IPv6, otherwise a CIDR
    #[serde(default)]
    pub ipv6_cidr: String,
}

/// Data volume attached to every replica
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeTemplate {
    pub name: String,

    /// Size in GB
    pub size: u32,

    #[serde(rename = "type")]
    pub volume_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Status of a StatefulServerSet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatefulServerSetStatus {
    #[serde(flatten)]
    pub fleet: ServerSetStatus,

    /// Number of LANs observed available
    #[serde(default)]
    pub lans_ready: u32,

    /// Number of data volumes observed available
    #[serde(default)]
    pub data_volumes_ready: u32,
}
