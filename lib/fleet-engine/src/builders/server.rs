use async_trait::async_trait;
use fleet_api::resources::{Server, ServerSpec};
use fleet_api::v1alpha1::NicTemplate;
use fleet_core::hash::spec_hash;
use fleet_core::naming::{label_selector, resource_name};
use fleet_core::{LabelSelector, ReplicaSlot, ResourceKind, Result};
use std::collections::BTreeMap;

use crate::context::FleetContext;
use crate::controller::RecordBuilder;

/// Annotation on a server recording the NIC topology it was built for
pub const TOPOLOGY_ANNOTATION: &str = "compute.fleet.dev/nic-topology";

/// Hash of the network attachments of a template
pub fn topology_hash(nics: &[NicTemplate]) -> String {
    spec_hash(&serde_json::to_value(nics).unwrap_or(serde_json::Value::Null))
}

#[derive(Clone, Debug)]
pub struct ServerInput {
    pub slot: ReplicaSlot,
    /// Provider id of the boot volume of the same generation
    pub boot_volume_id: String,
}

pub struct ServerBuilder;

#[async_trait]
impl RecordBuilder for ServerBuilder {
    type Record = Server;
    type Input = ServerInput;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Server
    }

    fn slot(&self, input: &ServerInput) -> ReplicaSlot {
        input.slot
    }

    fn identity(&self, fleet: &FleetContext, input: &ServerInput) -> LabelSelector {
        label_selector(&fleet.name, ResourceKind::Server, input.slot)
    }

    async fn build_desired(&self, fleet: &FleetContext, input: &ServerInput) -> Result<Server> {
        let name = resource_name(&fleet.name, ResourceKind::Server, input.slot);
        let template = &fleet.spec.template;

        let mut metadata = fleet.record_meta(&name, &self.identity(fleet, input));
        // Template labels are informational; identity labels win
        let labels = metadata.labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in &template.labels {
            labels.entry(key.clone()).or_insert_with(|| value.clone());
        }
        metadata.annotations = Some(BTreeMap::from([(
            TOPOLOGY_ANNOTATION.to_string(),
            topology_hash(&template.nics),
        )]));

        Ok(Server {
            metadata,
            spec: ServerSpec {
                datacenter_id: fleet.spec.datacenter_id.clone(),
                name,
                cores: template.cores,
                ram: template.ram,
                cpu_family: template.cpu_family.clone(),
                availability_zone: fleet.zone.zone(input.slot.index),
                boot_volume_id: input.boot_volume_id.clone(),
            },
            status: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api::v1alpha1::{PlacementMode, ServerSetSpec, ServerTemplate, ZonePlacement};
    use kube::ResourceExt;

    #[tokio::test]
    async fn test_server_desired() {
        let spec = ServerSetSpec {
            replicas: 1,
            datacenter_id: "dc-1".to_string(),
            placement: ZonePlacement {
                mode: PlacementMode::Fixed,
                zone: Some("ZONE_3".to_string()),
            },
            template: ServerTemplate {
                cores: 4,
                ram: 8192,
                labels: BTreeMap::from([("team".to_string(), "db".to_string())]),
                ..Default::default()
            },
            identity: None,
        };
        let fleet = FleetContext::new("db", "default", spec);
        let input = ServerInput {
            slot: ReplicaSlot::new(0, 1),
            boot_volume_id: "vol-9".to_string(),
        };

        let server = ServerBuilder.build_desired(&fleet, &input).await.unwrap();
        assert_eq!(server.name_any(), "db-server-0-1");
        assert_eq!(server.spec.boot_volume_id, "vol-9");
        assert_eq!(server.spec.availability_zone, "ZONE_3");
        assert_eq!(server.labels().get("team").map(String::as_str), Some("db"));
        assert!(server.annotations().contains_key(TOPOLOGY_ANNOTATION));
    }
}
