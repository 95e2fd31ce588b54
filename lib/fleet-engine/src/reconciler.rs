//! Replica set reconciliation
//!
//! A pass lists the fleet's records by label, brings every wanted replica
//! index to its latest generation (creating, resuming or replacing it),
//! tears down surplus indices and recomputes the status. Replica indices
//! are handled concurrently and fail independently.

use chrono::Utc;
use fleet_api::resources::Managed;
use fleet_api::v1alpha1::{ReplicaHealth, ReplicaStatus, ServerSetStatus};
use fleet_core::validation::validate_server_set;
use fleet_core::{FleetError, ReplicaSlot, Result};
use futures::future::join_all;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::context::{FleetContext, FleetStores};
use crate::drift::replica_diff;
use crate::metrics::FleetMetrics;
use crate::replica::{FleetSnapshot, ReplicaBundle, ReplicaControllers};
use crate::status::{replica_health, replica_status, ActiveReplica};
use crate::updater::CreateBeforeDestroy;

/// Result of observing or reconciling a fleet
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    /// Any dependent record of the fleet exists
    pub resource_exists: bool,
    /// Every wanted replica is complete, ready and free of drift
    pub resource_up_to_date: bool,
    /// Human-readable reasons the fleet is not up to date
    pub diff: Vec<String>,
    pub status: ServerSetStatus,
}

pub struct ReplicaSetReconciler {
    replicas: Arc<ReplicaControllers>,
    updater: CreateBeforeDestroy,
    config: EngineConfig,
    metrics: FleetMetrics,
}

impl ReplicaSetReconciler {
    pub fn new(
        stores: &FleetStores,
        config: EngineConfig,
        cancel: CancellationToken,
        metrics: FleetMetrics,
    ) -> Self {
        let replicas = Arc::new(ReplicaControllers::new(stores, &config, &cancel, &metrics));
        Self {
            updater: CreateBeforeDestroy::new(replicas.clone()),
            replicas,
            config,
            metrics,
        }
    }

    pub fn replicas(&self) -> &ReplicaControllers {
        &self.replicas
    }

    /// Compare observed records with the spec without changing anything
    #[instrument(skip_all, fields(fleet = %fleet.name))]
    pub async fn observe(&self, fleet: &FleetContext, previous: &[ReplicaStatus]) -> Result<Observation> {
        self.observe_with(fleet, previous, &BTreeMap::new()).await
    }

    pub async fn create(&self, fleet: &FleetContext, previous: &[ReplicaStatus]) -> Result<Observation> {
        self.reconcile(fleet, previous).await
    }

    pub async fn update(&self, fleet: &FleetContext, previous: &[ReplicaStatus]) -> Result<Observation> {
        self.reconcile(fleet, previous).await
    }

    /// Delete every replica of the fleet. Tolerates records that are
    /// already gone.
    #[instrument(skip_all, fields(fleet = %fleet.name))]
    pub async fn delete(&self, fleet: &FleetContext) -> Result<()> {
        info!("Deleting fleet replicas");
        self.replicas.teardown_fleet(fleet).await?;
        self.metrics.record_replicas(&fleet.name, 0, 0);
        Ok(())
    }

    /// One full pass, bounded by the rollout timeout
    pub async fn reconcile(&self, fleet: &FleetContext, previous: &[ReplicaStatus]) -> Result<Observation> {
        self.reconcile_holding(fleet, previous, BTreeMap::new()).await
    }

    /// A pass that leaves the indices in `held` alone. Their errors are
    /// reported as failures of those replicas; every other index is
    /// reconciled as usual.
    #[instrument(skip_all, fields(fleet = %fleet.name, held = held.len()))]
    pub async fn reconcile_holding(
        &self,
        fleet: &FleetContext,
        previous: &[ReplicaStatus],
        held: BTreeMap<u32, FleetError>,
    ) -> Result<Observation> {
        validate_server_set(&fleet.spec)?;

        let pass = self.run_pass(fleet, held);
        let failures = tokio::time::timeout(self.config.rollout_timeout, pass)
            .await
            .map_err(|_| FleetError::Timeout {
                what: format!("rollout of fleet {}", fleet.name),
                elapsed: self.config.rollout_timeout,
            })??;

        self.observe_with(fleet, previous, &failures).await
    }

    async fn run_pass(
        &self,
        fleet: &FleetContext,
        held: BTreeMap<u32, FleetError>,
    ) -> Result<BTreeMap<u32, FleetError>> {
        let snapshot = self.replicas.snapshot(fleet).await?;
        let desired = fleet.spec.replicas;

        let wanted = (0..desired).filter(|index| !held.contains_key(index)).map(|index| {
            let generations = snapshot.generations(index);
            async move { (index, self.reconcile_replica(fleet, index, generations).await) }
        });
        let surplus = snapshot
            .indices()
            .into_iter()
            .filter(|index| *index >= desired)
            .map(|index| {
                let generations = snapshot.generations(index);
                async move { (index, self.remove_replica(fleet, index, generations).await) }
            });

        let mut results = join_all(wanted).await;
        results.extend(join_all(surplus).await);

        let mut failures = held;
        for (index, result) in results {
            match result {
                Ok(()) => {}
                Err(e) if e.is_transitional() => {
                    debug!(index, "Replica deferred: {}", e);
                    failures.insert(index, e);
                }
                Err(e) => {
                    warn!(index, "Replica failed: {}", e);
                    failures.insert(index, e);
                }
            }
        }
        Ok(failures)
    }

    #[instrument(skip(self, fleet, generations), fields(fleet = %fleet.name))]
    async fn reconcile_replica(
        &self,
        fleet: &FleetContext,
        index: u32,
        generations: Option<&BTreeMap<u32, ReplicaBundle>>,
    ) -> Result<()> {
        let Some((&latest, bundle)) = generations.and_then(|g| g.iter().next_back()) else {
            info!("Creating replica");
            self.replicas.ensure_slot(fleet, ReplicaSlot::new(index, 0)).await?;
            return Ok(());
        };
        let slot = ReplicaSlot::new(index, latest);
        let older: Vec<u32> = generations
            .map(|g| g.keys().copied().filter(|g| *g < latest).collect())
            .unwrap_or_default();

        if older.is_empty() && bundle.server.is_some() {
            let diff = replica_diff(&fleet.spec.template, bundle);
            if !diff.is_empty() {
                info!(generation = latest, ?diff, "Replica drifted, replacing");
                self.metrics.record_rollout(&fleet.name);
                self.updater.update(fleet, slot).await?;
                return Ok(());
            }
        }

        // The newest generation is the target; older ones only go once it is whole
        self.replicas.ensure_slot(fleet, slot).await?;
        for generation in older {
            info!(generation, "Removing superseded generation");
            self.replicas
                .teardown_slot(fleet, ReplicaSlot::new(index, generation))
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, fleet, generations), fields(fleet = %fleet.name))]
    async fn remove_replica(
        &self,
        fleet: &FleetContext,
        index: u32,
        generations: Option<&BTreeMap<u32, ReplicaBundle>>,
    ) -> Result<()> {
        info!("Scaling down replica");
        for &generation in generations.into_iter().flat_map(|g| g.keys()) {
            self.replicas
                .teardown_slot(fleet, ReplicaSlot::new(index, generation))
                .await?;
        }
        Ok(())
    }

    async fn observe_with(
        &self,
        fleet: &FleetContext,
        previous: &[ReplicaStatus],
        failures: &BTreeMap<u32, FleetError>,
    ) -> Result<Observation> {
        let snapshot = self.replicas.snapshot(fleet).await?;
        let diff = self.diff(fleet, &snapshot, failures);
        let up_to_date = diff.is_empty();
        let status = self
            .status(fleet, &snapshot, previous, failures, up_to_date, &diff)
            .await;

        let ready = status
            .replica_status
            .iter()
            .filter(|r| r.status == ReplicaHealth::Ready)
            .count() as u32;
        self.metrics
            .record_replicas(&fleet.name, fleet.spec.replicas, ready);

        Ok(Observation {
            resource_exists: !snapshot.is_empty(),
            resource_up_to_date: up_to_date,
            diff,
            status,
        })
    }

    fn diff(
        &self,
        fleet: &FleetContext,
        snapshot: &FleetSnapshot,
        failures: &BTreeMap<u32, FleetError>,
    ) -> Vec<String> {
        let desired = fleet.spec.replicas;
        let mut diff = Vec::new();

        for index in 0..desired {
            let Some(generations) = snapshot.generations(index) else {
                diff.push(format!("replica {}: missing", index));
                continue;
            };
            if generations.len() > 1 {
                diff.push(format!(
                    "replica {}: {} generations present",
                    index,
                    generations.len()
                ));
            }
            if let Some(bundle) = snapshot.latest(index) {
                for field in replica_diff(&fleet.spec.template, bundle) {
                    diff.push(format!("replica {}: {}", index, field));
                }
                if !bundle.is_complete(fleet) {
                    diff.push(format!(
                        "replica {}: generation {} not ready",
                        index, bundle.slot.generation
                    ));
                }
            }
        }

        for index in snapshot.indices().into_iter().filter(|i| *i >= desired) {
            diff.push(format!("replica {}: surplus", index));
        }
        for (index, error) in failures {
            diff.push(format!("replica {}: {}", index, error));
        }
        diff
    }

    async fn status(
        &self,
        fleet: &FleetContext,
        snapshot: &FleetSnapshot,
        previous: &[ReplicaStatus],
        failures: &BTreeMap<u32, FleetError>,
        up_to_date: bool,
        diff: &[String],
    ) -> ServerSetStatus {
        let active = ActiveReplica::read(fleet.identity.as_ref()).await;
        let now = Utc::now().to_rfc3339();

        let mut replica_statuses = Vec::new();
        for index in 0..fleet.spec.replicas {
            let server = snapshot
                .latest(index)
                .and_then(|b| b.server.as_ref())
                .filter(|s| s.meta().deletion_timestamp.is_none());
            let Some(server) = server else {
                continue;
            };
            let name = server.name_any();
            let error_message = failures
                .get(&index)
                .filter(|e| !e.is_transitional())
                .map(|e| e.to_string())
                .or_else(|| server.failure_message().map(str::to_string));

            replica_statuses.push(replica_status(
                name.clone(),
                active.role_of(&name),
                replica_health(Some(server)),
                error_message,
                previous,
                &now,
            ));
        }

        ServerSetStatus {
            replicas: replica_statuses.len() as u32,
            reconciled: up_to_date,
            replica_status: replica_statuses,
            message: (!diff.is_empty()).then(|| diff.join("; ")),
            last_reconcile_time: Some(now),
        }
    }
}
