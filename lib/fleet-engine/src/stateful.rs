//! Stateful fleets
//!
//! A stateful fleet owns the LANs its NICs attach to and a set of named data
//! volumes per replica index. LANs are ensured before any replica, data
//! volumes survive rollouts, and a volume selector binds each index's data
//! volumes to whichever generation of its server is current.

use fleet_api::resources::{Managed, Volume};
use fleet_api::v1alpha1::{ReplicaStatus, StatefulServerSet, StatefulServerSetSpec, StatefulServerSetStatus};
use fleet_core::naming::{index_of, index_selector, kind_selector, lan_name};
use fleet_core::validation::validate_stateful;
use fleet_core::{ActiveReplicaSource, FleetError, ResourceKind, Result, StaticIdentity};
use futures::future::join_all;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::builders::{DataVolumeBuilder, DataVolumeInput, LanBuilder, VolumeSelectorBuilder};
use crate::config::EngineConfig;
use crate::context::{FleetContext, FleetStores};
use crate::controller::ResourceController;
use crate::drift::lan_needs_update;
use crate::metrics::FleetMetrics;
use crate::reconciler::{Observation, ReplicaSetReconciler};

/// A stateful fleet as seen by one pass
pub struct StatefulFleet {
    /// Replica context with NIC LAN references pointing at owned LANs
    pub context: FleetContext,
    pub spec: StatefulServerSetSpec,
}

impl StatefulFleet {
    pub fn new(fleet: &StatefulServerSet) -> Self {
        Self::from_context(FleetContext::for_stateful(fleet), fleet.spec.clone())
    }

    /// NIC templates naming one of the fleet's own LANs are pointed at the
    /// LAN record; other references are left alone
    pub fn from_context(mut context: FleetContext, spec: StatefulServerSetSpec) -> Self {
        for nic in &mut context.spec.template.nics {
            if spec.lans.iter().any(|lan| lan.name == nic.lan) {
                nic.lan = lan_name(&context.name, &nic.lan);
            }
        }
        Self { context, spec }.with_identity(None)
    }

    /// Stateful replicas always carry a role: without an identity record
    /// every replica is passive
    pub fn with_identity(mut self, identity: Option<Arc<dyn ActiveReplicaSource>>) -> Self {
        let identity: Arc<dyn ActiveReplicaSource> =
            match identity.or_else(|| self.context.identity.take()) {
                Some(identity) => identity,
                None => Arc::new(StaticIdentity::absent()),
            };
        self.context.identity = Some(identity);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatefulObservation {
    pub resource_exists: bool,
    pub resource_up_to_date: bool,
    pub diff: Vec<String>,
    pub status: StatefulServerSetStatus,
}

pub struct StatefulReconciler {
    inner: Arc<ReplicaSetReconciler>,
    lans: ResourceController<LanBuilder>,
    data_volumes: ResourceController<DataVolumeBuilder>,
    selectors: ResourceController<VolumeSelectorBuilder>,
}

impl StatefulReconciler {
    pub fn new(
        stores: &FleetStores,
        config: EngineConfig,
        cancel: CancellationToken,
        metrics: FleetMetrics,
    ) -> Self {
        let readiness = config.readiness;
        Self {
            lans: ResourceController::new(
                LanBuilder,
                stores.lans.clone(),
                readiness,
                cancel.clone(),
                metrics.clone(),
            ),
            data_volumes: ResourceController::new(
                DataVolumeBuilder,
                stores.volumes.clone(),
                readiness,
                cancel.clone(),
                metrics.clone(),
            ),
            selectors: ResourceController::new(
                VolumeSelectorBuilder,
                stores.volume_selectors.clone(),
                readiness,
                cancel.clone(),
                metrics.clone(),
            ),
            inner: Arc::new(ReplicaSetReconciler::new(stores, config, cancel, metrics)),
        }
    }

    pub fn replica_sets(&self) -> &ReplicaSetReconciler {
        &self.inner
    }

    #[instrument(skip_all, fields(fleet = %fleet.context.name))]
    pub async fn reconcile(
        &self,
        fleet: &StatefulFleet,
        previous: &[ReplicaStatus],
    ) -> Result<StatefulObservation> {
        validate_stateful(&fleet.spec)?;
        let ctx = &fleet.context;

        self.ensure_lans(fleet).await?;
        let held = self.ensure_data_volumes(fleet).await;

        let mut replicas = self.inner.reconcile_holding(ctx, previous, held).await?;
        if let Err(e) = self.remove_surplus_data_volumes(ctx).await {
            warn!("Removing data volumes of surplus replicas failed: {}", e);
            replicas.diff.push(format!("data volumes: {}", e));
        }

        self.ensure_selector(ctx).await?;
        self.observe_with(fleet, replicas).await
    }

    pub async fn observe(
        &self,
        fleet: &StatefulFleet,
        previous: &[ReplicaStatus],
    ) -> Result<StatefulObservation> {
        let replicas = self.inner.observe(&fleet.context, previous).await?;
        self.observe_with(fleet, replicas).await
    }

    /// Delete replicas, then the selector, data volumes and LANs
    #[instrument(skip_all, fields(fleet = %fleet.context.name))]
    pub async fn delete(&self, fleet: &StatefulFleet) -> Result<()> {
        let ctx = &fleet.context;
        let ns = &ctx.namespace;

        self.inner.delete(ctx).await?;
        self.selectors
            .delete_matching(ns, &kind_selector(&ctx.name, ResourceKind::VolumeSelector))
            .await?;
        self.data_volumes
            .delete_matching(ns, &kind_selector(&ctx.name, ResourceKind::DataVolume))
            .await?;
        self.lans
            .delete_matching(ns, &kind_selector(&ctx.name, ResourceKind::Lan))
            .await?;
        info!("Stateful fleet deleted");
        Ok(())
    }

    async fn ensure_lans(&self, fleet: &StatefulFleet) -> Result<()> {
        for template in &fleet.spec.lans {
            let lan = self.lans.ensure(&fleet.context, template).await?;
            if lan_needs_update(&lan, template) {
                let mut desired = self.lans.build_desired(&fleet.context, template).await?;
                if desired.spec == lan.spec {
                    info!(lan = %template.name, "LAN changed at the provider, re-applying");
                    self.lans.resync(&lan).await?;
                } else {
                    info!(lan = %template.name, "Updating LAN");
                    desired.metadata = lan.metadata.clone();
                    self.lans.update_in_place(&desired).await?;
                }
            }
        }
        Ok(())
    }

    /// Ensure every wanted index's data volumes, index by index in
    /// parallel. Indices whose volumes are not ready are returned with the
    /// error that holds them back.
    async fn ensure_data_volumes(&self, fleet: &StatefulFleet) -> BTreeMap<u32, FleetError> {
        let passes = (0..fleet.spec.fleet.replicas).map(|index| async move {
            (index, self.ensure_replica_volumes(fleet, index).await)
        });

        let mut held = BTreeMap::new();
        for (index, result) in join_all(passes).await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_transitional() => {
                    debug!(index, "Data volumes not ready: {}", e);
                    held.insert(index, e);
                }
                Err(e) => {
                    warn!(index, "Data volumes failed: {}", e);
                    held.insert(index, e);
                }
            }
        }
        held
    }

    async fn ensure_replica_volumes(&self, fleet: &StatefulFleet, index: u32) -> Result<()> {
        for template in &fleet.spec.volumes {
            let input = DataVolumeInput {
                index,
                template: template.clone(),
            };
            let volume = self.data_volumes.ensure(&fleet.context, &input).await?;
            let mut desired = self.data_volumes.build_desired(&fleet.context, &input).await?;
            if volume.spec != desired.spec {
                info!(index, volume = %template.name, "Updating data volume");
                desired.metadata = volume.metadata.clone();
                self.data_volumes.update_in_place(&desired).await?;
            }
        }
        Ok(())
    }

    /// Data volumes of indices past the replica count go once nothing else
    /// of that index is left
    async fn remove_surplus_data_volumes(&self, ctx: &FleetContext) -> Result<()> {
        let volumes = self
            .data_volumes
            .list(&ctx.namespace, &kind_selector(&ctx.name, ResourceKind::DataVolume))
            .await?;
        let surplus: BTreeSet<u32> = volumes
            .iter()
            .filter_map(|v| index_of(v.labels(), ResourceKind::DataVolume))
            .filter(|index| *index >= ctx.spec.replicas)
            .collect();
        if surplus.is_empty() {
            return Ok(());
        }

        let snapshot = self.inner.replicas().snapshot(ctx).await?;
        for index in surplus {
            if snapshot.generations(index).is_some() {
                debug!(index, "Replica still present, keeping its data volumes");
                continue;
            }
            info!(index, "Removing data volumes of surplus replica");
            self.data_volumes
                .delete_matching(
                    &ctx.namespace,
                    &index_selector(&ctx.name, ResourceKind::DataVolume, index),
                )
                .await?;
        }
        Ok(())
    }

    async fn ensure_selector(&self, ctx: &FleetContext) -> Result<()> {
        let replicas = ctx.spec.replicas;
        let selector = self.selectors.ensure(ctx, &replicas).await?;
        if selector.spec.replicas != replicas {
            let mut desired = self.selectors.build_desired(ctx, &replicas).await?;
            desired.metadata = selector.metadata.clone();
            self.selectors.update_in_place(&desired).await?;
        }
        Ok(())
    }

    async fn observe_with(
        &self,
        fleet: &StatefulFleet,
        replicas: Observation,
    ) -> Result<StatefulObservation> {
        let ctx = &fleet.context;
        let mut diff = replicas.diff;

        let lans = self
            .lans
            .list(&ctx.namespace, &kind_selector(&ctx.name, ResourceKind::Lan))
            .await?;
        for template in &fleet.spec.lans {
            let name = lan_name(&ctx.name, &template.name);
            match lans.iter().find(|l| l.spec.name == name) {
                None => diff.push(format!("lan {}: missing", template.name)),
                Some(lan) if !lan.is_available() => {
                    diff.push(format!("lan {}: {}", template.name, lan.state()))
                }
                Some(lan) if lan_needs_update(lan, template) => {
                    diff.push(format!("lan {}: out of date", template.name))
                }
                Some(_) => {}
            }
        }

        let volumes: Vec<Volume> = self
            .data_volumes
            .list(&ctx.namespace, &kind_selector(&ctx.name, ResourceKind::DataVolume))
            .await?;
        let expected_volumes = fleet.spec.volumes.len() * fleet.spec.fleet.replicas as usize;
        let wanted: Vec<&Volume> = volumes
            .iter()
            .filter(|v| {
                index_of(v.labels(), ResourceKind::DataVolume)
                    .is_some_and(|i| i < fleet.spec.fleet.replicas)
            })
            .collect();
        if wanted.len() != expected_volumes {
            diff.push(format!(
                "data volumes: {} of {} present",
                wanted.len(),
                expected_volumes
            ));
        }
        let surplus = volumes.len() - wanted.len();
        if surplus > 0 {
            diff.push(format!("data volumes: {} of surplus replicas remain", surplus));
        }

        let selector = self
            .selectors
            .list(&ctx.namespace, &kind_selector(&ctx.name, ResourceKind::VolumeSelector))
            .await?;
        match selector.first() {
            None => diff.push("volume selector: missing".to_string()),
            Some(s) if s.spec.replicas != ctx.spec.replicas => diff.push(format!(
                "volume selector: replicas {} -> {}",
                s.spec.replicas, ctx.spec.replicas
            )),
            Some(_) => {}
        }

        let lans_ready = lans.iter().filter(|l| l.is_available()).count() as u32;
        let data_volumes_ready = wanted.iter().filter(|v| v.is_available()).count() as u32;

        let mut status = replicas.status;
        status.reconciled = diff.is_empty();
        status.message = (!diff.is_empty()).then(|| diff.join("; "));

        Ok(StatefulObservation {
            resource_exists: replicas.resource_exists || !lans.is_empty() || !volumes.is_empty(),
            resource_up_to_date: diff.is_empty(),
            diff,
            status: StatefulServerSetStatus {
                fleet: status,
                lans_ready,
                data_volumes_ready,
            },
        })
    }
}
