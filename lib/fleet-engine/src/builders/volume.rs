use async_trait::async_trait;
use fleet_api::resources::{Volume, VolumeSpec};
use fleet_api::v1alpha1::DataVolumeTemplate;
use fleet_core::naming::{
    data_volume_name, index_selector, label_selector, resource_name, LABEL_DATA_VOLUME_NAME,
};
use fleet_core::{FleetError, LabelSelector, ReplicaSlot, ResourceKind, Result};
use kube::ResourceExt;

use crate::context::FleetContext;
use crate::controller::RecordBuilder;

/// Image, credentials and user data are fixed once a volume exists
pub fn check_volume_mutable(current: &Volume, desired: &Volume) -> Result<()> {
    let fields = [
        ("image", &current.spec.image, &desired.spec.image),
        ("imageAlias", &current.spec.image_alias, &desired.spec.image_alias),
        ("imagePassword", &current.spec.image_password, &desired.spec.image_password),
        ("userData", &current.spec.user_data, &desired.spec.user_data),
        ("backupUnitId", &current.spec.backup_unit_id, &desired.spec.backup_unit_id),
    ];
    for (field, before, after) in fields {
        if before != after {
            return Err(FleetError::ImmutableField {
                kind: "Volume".to_string(),
                name: current.name_any(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

/// Boot volume of one replica generation
pub struct BootVolumeBuilder;

#[async_trait]
impl RecordBuilder for BootVolumeBuilder {
    type Record = Volume;
    type Input = ReplicaSlot;

    fn kind(&self) -> ResourceKind {
        ResourceKind::BootVolume
    }

    fn slot(&self, input: &ReplicaSlot) -> ReplicaSlot {
        *input
    }

    fn identity(&self, fleet: &FleetContext, input: &ReplicaSlot) -> LabelSelector {
        label_selector(&fleet.name, ResourceKind::BootVolume, *input)
    }

    async fn build_desired(&self, fleet: &FleetContext, input: &ReplicaSlot) -> Result<Volume> {
        let name = resource_name(&fleet.name, ResourceKind::BootVolume, *input);
        let template = &fleet.spec.template.boot_volume;

        Ok(Volume {
            metadata: fleet.record_meta(&name, &self.identity(fleet, input)),
            spec: VolumeSpec {
                datacenter_id: fleet.spec.datacenter_id.clone(),
                name,
                size: template.size,
                volume_type: template.volume_type.clone(),
                image: template.image.clone(),
                image_alias: template.image_alias.clone(),
                image_password: template.image_password.clone(),
                user_data: template.user_data.clone(),
                backup_unit_id: None,
                availability_zone: Some(fleet.zone.zone(input.index)),
            },
            status: None,
        })
    }

    fn check_mutable(&self, current: &Volume, desired: &Volume) -> Result<()> {
        check_volume_mutable(current, desired)
    }
}

/// Named data volume of one replica, shared by all its generations
#[derive(Clone, Debug)]
pub struct DataVolumeInput {
    pub index: u32,
    pub template: DataVolumeTemplate,
}

pub struct DataVolumeBuilder;

#[async_trait]
impl RecordBuilder for DataVolumeBuilder {
    type Record = Volume;
    type Input = DataVolumeInput;

    fn kind(&self) -> ResourceKind {
        ResourceKind::DataVolume
    }

    fn slot(&self, input: &DataVolumeInput) -> ReplicaSlot {
        ReplicaSlot::new(input.index, 0)
    }

    fn identity(&self, fleet: &FleetContext, input: &DataVolumeInput) -> LabelSelector {
        index_selector(&fleet.name, ResourceKind::DataVolume, input.index)
            .with(LABEL_DATA_VOLUME_NAME, input.template.name.clone())
    }

    async fn build_desired(&self, fleet: &FleetContext, input: &DataVolumeInput) -> Result<Volume> {
        let name = data_volume_name(&fleet.name, input.index, &input.template.name);

        Ok(Volume {
            metadata: fleet.record_meta(&name, &self.identity(fleet, input)),
            spec: VolumeSpec {
                datacenter_id: fleet.spec.datacenter_id.clone(),
                name,
                size: input.template.size,
                volume_type: input.template.volume_type.clone(),
                image: input.template.image.clone(),
                availability_zone: Some(fleet.zone.zone(input.index)),
                ..Default::default()
            },
            status: None,
        })
    }

    fn check_mutable(&self, current: &Volume, desired: &Volume) -> Result<()> {
        check_volume_mutable(current, desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api::v1alpha1::{BootVolumeTemplate, ServerSetSpec, ServerTemplate};

    fn fleet() -> FleetContext {
        let spec = ServerSetSpec {
            replicas: 2,
            datacenter_id: "dc-1".to_string(),
            template: ServerTemplate {
                boot_volume: BootVolumeTemplate {
                    size: 20,
                    volume_type: "HDD".to_string(),
                    image: Some("debian-12".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        FleetContext::new("web", "default", spec)
    }

    #[tokio::test]
    async fn test_boot_volume_desired() {
        let volume = BootVolumeBuilder
            .build_desired(&fleet(), &ReplicaSlot::new(1, 3))
            .await
            .unwrap();
        assert_eq!(volume.name_any(), "web-bootvolume-1-3");
        assert_eq!(volume.spec.size, 20);
        assert_eq!(volume.spec.availability_zone.as_deref(), Some("ZONE_2"));
        assert_eq!(
            volume.labels().get("compute.fleet.dev/bootvolume-index").map(String::as_str),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_data_volume_ignores_generation() {
        let input = DataVolumeInput {
            index: 0,
            template: DataVolumeTemplate {
                name: "pgdata".to_string(),
                size: 100,
                volume_type: "SSD".to_string(),
                image: None,
            },
        };
        let volume = DataVolumeBuilder.build_desired(&fleet(), &input).await.unwrap();
        assert_eq!(volume.name_any(), "web-datavolume-0-pgdata");
        assert!(!volume
            .labels()
            .contains_key("compute.fleet.dev/datavolume-generation"));
    }

    #[tokio::test]
    async fn test_immutable_fields() {
        let current = BootVolumeBuilder
            .build_desired(&fleet(), &ReplicaSlot::new(0, 0))
            .await
            .unwrap();

        let mut resized = current.clone();
        resized.spec.size = 40;
        resized.spec.volume_type = "SSD".to_string();
        assert!(check_volume_mutable(&current, &resized).is_ok());

        let mut reimaged = current.clone();
        reimaged.spec.image = Some("ubuntu-24.04".to_string());
        assert!(matches!(
            check_volume_mutable(&current, &reimaged),
            Err(FleetError::ImmutableField { ref field, .. }) if field == "image"
        ));
    }
}
