use async_trait::async_trait;
use fleet_api::resources::{Lan, Managed, Nic, NicSpec};
use fleet_api::v1alpha1::NicTemplate;
use fleet_core::naming::{label_selector, nic_name, LABEL_NIC_ORDINAL};
use fleet_core::{FleetError, LabelSelector, ObjectStore, ReplicaSlot, ResourceKind, Result};
use std::sync::Arc;

use crate::context::FleetContext;
use crate::controller::RecordBuilder;

#[derive(Clone, Debug)]
pub struct NicInput {
    pub slot: ReplicaSlot,
    pub ordinal: usize,
    /// Provider id of the server of the same generation
    pub server_id: String,
    pub template: NicTemplate,
}

/// Builds NICs against the LAN records they attach to
pub struct NicBuilder {
    lans: Arc<dyn ObjectStore<Lan>>,
}

impl NicBuilder {
    pub fn new(lans: Arc<dyn ObjectStore<Lan>>) -> Self {
        Self { lans }
    }
}

#[async_trait]
impl RecordBuilder for NicBuilder {
    type Record = Nic;
    type Input = NicInput;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Nic
    }

    fn slot(&self, input: &NicInput) -> ReplicaSlot {
        input.slot
    }

    fn identity(&self, fleet: &FleetContext, input: &NicInput) -> LabelSelector {
        label_selector(&fleet.name, ResourceKind::Nic, input.slot)
            .with(LABEL_NIC_ORDINAL, input.ordinal.to_string())
    }

    async fn build_desired(&self, fleet: &FleetContext, input: &NicInput) -> Result<Nic> {
        let lan_ref = &input.template.lan;
        let lan = self
            .lans
            .get(&fleet.namespace, lan_ref)
            .await?
            .ok_or_else(|| FleetError::not_found("Lan", lan_ref))?;
        let lan_id = lan
            .external_id()
            .ok_or_else(|| FleetError::not_found("Lan", lan_ref))?
            .to_string();

        let name = nic_name(&fleet.name, input.slot, input.ordinal);
        Ok(Nic {
            metadata: fleet.record_meta(&name, &self.identity(fleet, input)),
            spec: NicSpec {
                datacenter_id: fleet.spec.datacenter_id.clone(),
                name,
                server_id: input.server_id.clone(),
                lan_id,
                lan_ref: lan_ref.clone(),
                ipv4: input.template.ipv4.clone(),
                dhcp: input.template.dhcp,
                dhcpv6: !lan.spec.ipv6_cidr.is_empty(),
                firewall_active: input.template.firewall_active,
                firewall_type: input.template.firewall_type.clone(),
            },
            status: None,
        })
    }
}
