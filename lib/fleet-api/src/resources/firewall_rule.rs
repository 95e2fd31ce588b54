use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{impl_managed, ObservedState};

/// Firewall rule on one NIC
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "FirewallRule",
    plural = "firewallrules",
    namespaced,
    derive = "Default",
    status = "FirewallRuleStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleSpec {
    pub datacenter_id: String,

    pub name: String,

    pub server_id: String,

    pub nic_id: String,

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

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleStatus {
    #[serde(flatten)]
    pub observed: ObservedState,
}

impl_managed!(FirewallRule, FirewallRuleStatus);
