use async_trait::async_trait;
use fleet_api::resources::{Lan, LanSpec};
use fleet_api::v1alpha1::LanTemplate;
use fleet_core::naming::{kind_selector, lan_name, LABEL_LAN_NAME};
use fleet_core::{LabelSelector, ReplicaSlot, ResourceKind, Result};

use crate::context::FleetContext;
use crate::controller::RecordBuilder;

/// LAN shared by every replica of a stateful fleet
pub struct LanBuilder;

#[async_trait]
impl RecordBuilder for LanBuilder {
    type Record = Lan;
    type Input = LanTemplate;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Lan
    }

    fn slot(&self, _input: &LanTemplate) -> ReplicaSlot {
        ReplicaSlot::new(0, 0)
    }

    fn identity(&self, fleet: &FleetContext, input: &LanTemplate) -> LabelSelector {
        kind_selector(&fleet.name, ResourceKind::Lan).with(LABEL_LAN_NAME, input.name.clone())
    }

    async fn build_desired(&self, fleet: &FleetContext, input: &LanTemplate) -> Result<Lan> {
        let name = lan_name(&fleet.name, &input.name);
        Ok(Lan {
            metadata: fleet.record_meta(&name, &self.identity(fleet, input)),
            spec: LanSpec {
                datacenter_id: fleet.spec.datacenter_id.clone(),
                name,
                public: input.public,
                ipv6_cidr: input.ipv6_cidr.clone(),
            },
            status: None,
        })
    }
}
