use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{impl_managed, ObservedState};

/// Network interface connecting a server to a LAN
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "Nic",
    plural = "nics",
    namespaced,
    derive = "Default",
    status = "NicStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct NicSpec {
    pub datacenter_id: String,

    pub name: String,

    /// Provider id of the server this NIC is plugged into
    pub server_id: String,

    /// Provider id of the LAN
    pub lan_id: String,

    /// Name of the LAN record, kept for topology comparison
    pub lan_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,

    pub dhcp: bool,

    /// Derived from the LAN having an IPv6 block
    pub dhcpv6: bool,

    pub firewall_active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NicStatus {
    #[serde(flatten)]
    pub observed: ObservedState,

    #[serde(default)]
    pub ips: Vec<String>,
}

impl_managed!(Nic, NicStatus, |status, fields| {
    if let Some(ips) = fields.get("ips").and_then(|v| v.as_array()) {
        status.ips = ips
            .iter()
            .filter_map(|ip| ip.as_str().map(str::to_string))
            .collect();
    }
});
