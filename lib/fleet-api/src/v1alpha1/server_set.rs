use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::ReplicaStatus;

/// ServerSet keeps a fixed number of identical cloud servers running, each
/// with its own boot volume, NICs and firewall rules, and replaces them with
/// create-before-destroy when the template changes
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "ServerSet",
    plural = "serversets",
    namespaced,
    derive = "Default",
    status = "ServerSetStatus",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Reconciled","type":"boolean","jsonPath":".status.reconciled"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSetSpec {
    /// Number of replicas (at least 1)
    pub replicas: u32,

    /// Provider datacenter hosting every dependent resource
    pub datacenter_id: String,

    /// Availability zone placement of the servers
    #[serde(default)]
    pub placement: ZonePlacement,

    /// Template every replica is built from
    pub template: ServerTemplate,

    /// Optional reference to the record naming the active replica
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityRef>,
}

/// Zone placement configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZonePlacement {
    #[serde(default)]
    pub mode: PlacementMode,

    /// Zone used for every replica when mode is Fixed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

/// How servers are spread across zones
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PlacementMode {
    /// Even indices go to the first zone, odd ones to the second
    #[default]
    RoundRobin,
    /// Every replica goes to the configured zone
    Fixed,
}

/// Machine template shared by all replicas
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerTemplate {
    pub cores: u32,

    /// Memory in MB
    pub ram: u32,

    pub cpu_family: String,

    pub boot_volume: BootVolumeTemplate,

    /// Network attachments, at least one
    pub nics: Vec<NicTemplate>,

    /// Informational labels copied onto servers; never trigger a rollout
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Boot volume template
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BootVolumeTemplate {
    /// Size in GB
    pub size: u32,

    #[serde(rename = "type")]
    pub volume_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// Network attachment of every replica
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NicTemplate {
    pub name: String,

    /// Name of the LAN record this NIC attaches to
    pub lan: String,

    /// Fixed IPv4 address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,

    #[serde(default = "default_dhcp")]
    pub dhcp: bool,

    #[serde(default)]
    pub firewall_active: bool,

    /// INGRESS, EGRESS or BIDIRECTIONAL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_type: Option<String>,

    #[serde(default)]
    pub firewall_rules: Vec<FirewallRuleTemplate>,
}

/// Firewall rule applied to a NIC
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleTemplate {
    pub name: String,

    /// TCP, UDP, ICMP, ICMPv6, GRE, VRRP, ESP, AH or ANY
    pub protocol: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_start: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_end: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<u8>,
}

/// Reference to a ConfigMap key naming the active replica
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    pub name: String,

    /// Defaults to the ServerSet namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub key: String,
}

/// Status of a ServerSet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerSetStatus {
    /// Number of live replicas
    #[serde(default)]
    pub replicas: u32,

    /// Whether every replica matches the template and is available
    #[serde(default)]
    pub reconciled: bool,

    #[serde(default)]
    pub replica_status: Vec<ReplicaStatus>,

    /// Description of what is still out of date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<String>,
}

fn default_dhcp() -> bool {
    true
}
