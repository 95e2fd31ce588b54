use async_trait::async_trait;
use fleet_api::resources::{VolumeSelector, VolumeSelectorSpec};
use fleet_core::naming::{kind_selector, volume_selector_name};
use fleet_core::{LabelSelector, ReplicaSlot, ResourceKind, Result};

use crate::context::FleetContext;
use crate::controller::RecordBuilder;

/// Binds each replica's data volumes to the server with the same index.
/// The input is the replica count.
pub struct VolumeSelectorBuilder;

#[async_trait]
impl RecordBuilder for VolumeSelectorBuilder {
    type Record = VolumeSelector;
    type Input = u32;

    fn kind(&self) -> ResourceKind {
        ResourceKind::VolumeSelector
    }

    fn slot(&self, _input: &u32) -> ReplicaSlot {
        ReplicaSlot::new(0, 0)
    }

    fn identity(&self, fleet: &FleetContext, _input: &u32) -> LabelSelector {
        kind_selector(&fleet.name, ResourceKind::VolumeSelector)
    }

    async fn build_desired(&self, fleet: &FleetContext, replicas: &u32) -> Result<VolumeSelector> {
        let name = volume_selector_name(&fleet.name);
        Ok(VolumeSelector {
            metadata: fleet.record_meta(&name, &self.identity(fleet, replicas)),
            spec: VolumeSelectorSpec {
                datacenter_id: fleet.spec.datacenter_id.clone(),
                replicas: *replicas,
                server_labels: kind_selector(&fleet.name, ResourceKind::Server).to_labels(),
                volume_labels: kind_selector(&fleet.name, ResourceKind::DataVolume).to_labels(),
                server_index_label: ResourceKind::Server.index_label(),
                volume_index_label: ResourceKind::DataVolume.index_label(),
            },
            status: None,
        })
    }
}
