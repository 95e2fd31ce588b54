use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{impl_managed, ObservedState};

/// Block storage volume, used both as a server boot volume and as a
/// replica data volume
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "Volume",
    plural = "volumes",
    namespaced,
    derive = "Default",
    status = "VolumeStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub datacenter_id: String,

    /// Name at the provider
    pub name: String,

    /// Size in GB, mutable in place
    pub size: u32,

    /// HDD, SSD, SSD Standard or SSD Premium; mutable in place
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

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_unit_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    #[serde(flatten)]
    pub observed: ObservedState,
}

impl_managed!(Volume, VolumeStatus);
