use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{impl_managed, ObservedState};

/// Attaches each replica's data volumes to the server with the same index.
///
/// For every index below `replicas` the selector attaches the volumes
/// matching `volume_labels` plus the index label to the server matching
/// `server_labels` plus the index label.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "compute.fleet.dev",
    version = "v1alpha1",
    kind = "VolumeSelector",
    plural = "volumeselectors",
    namespaced,
    derive = "Default",
    status = "VolumeSelectorStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSelectorSpec {
    pub datacenter_id: String,

    pub replicas: u32,

    pub server_labels: BTreeMap<String, String>,

    pub volume_labels: BTreeMap<String, String>,

    /// Label key carrying the replica index on servers
    pub server_index_label: String,

    /// Label key carrying the replica index on data volumes
    pub volume_index_label: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSelectorStatus {
    #[serde(flatten)]
    pub observed: ObservedState,
}

impl_managed!(VolumeSelector, VolumeSelectorStatus);
