use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{impl_managed, ObservedState};

/// Provider LAN that NICs attach to
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "Lan",
    plural = "lans",
    namespaced,
    derive = "Default",
    status = "LanStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"IPv6","type":"string","jsonPath":".status.ipv6Cidr"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct LanSpec {
    pub datacenter_id: String,

    pub name: String,

    #[serde(default)]
    pub public: bool,

    /// "AUTO", empty, or a literal CIDR
    #[serde(default)]
    pub ipv6_cidr: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LanStatus {
    #[serde(flatten)]
    pub observed: ObservedState,

    /// IPv6 block the provider assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_cidr: Option<String>,
}

impl_managed!(Lan, LanStatus, |status, fields| {
    status.ipv6_cidr = fields
        .get("ipv6CidrBlock")
        .and_then(|v| v.as_str())
        .filter(|cidr| !cidr.is_empty())
        .map(str::to_string);
});
