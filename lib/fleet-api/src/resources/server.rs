use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{impl_managed, ObservedState};

/// Cloud server booting from a volume of the same generation
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "Server",
    plural = "servers",
    namespaced,
    derive = "Default",
    status = "ServerStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"VM","type":"string","jsonPath":".status.vmState"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    pub datacenter_id: String,

    pub name: String,

    pub cores: u32,

    /// Memory in MB
    pub ram: u32,

    pub cpu_family: String,

    pub availability_zone: String,

    /// Provider id of the boot volume
    pub boot_volume_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(flatten)]
    pub observed: ObservedState,

    /// Hypervisor state reported by the provider (RUNNING, SHUTOFF, CRASHED, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_state: Option<String>,
}

impl_managed!(Server, ServerStatus, |status, fields| {
    if let Some(vm_state) = fields.get("vmState").and_then(|v| v.as_str()) {
        status.vm_state = Some(vm_state.to_string());
    }
});
