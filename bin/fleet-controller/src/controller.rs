//! Shared state and helpers of the fleet controllers

use fleet_api::v1alpha1::IdentityRef;
use fleet_core::{ActiveReplicaSource, ConfigMapIdentity, FleetError};
use fleet_engine::{FleetMetrics, ReplicaSetReconciler, StatefulReconciler};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use kube_runtime::controller::Action;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Finalizer holding a fleet until its dependent records are torn down
pub const FLEET_FINALIZER: &str = "compute.fleet.dev/fleet-cleanup";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube_runtime::finalizer::Error<ReconcileError>>),
}

impl ReconcileError {
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Fleet(e) if e.is_transitional())
    }
}

pub struct Context {
    pub client: Client,
    pub server_sets: ReplicaSetReconciler,
    pub stateful: StatefulReconciler,
    pub metrics: FleetMetrics,
    /// Requeue delay once a fleet is up to date
    pub requeue: Duration,
    /// Requeue delay while a fleet is converging
    pub retry: Duration,
}

impl Context {
    /// Identity source for a fleet, resolved against the fleet's namespace
    pub fn identity(
        &self,
        identity: Option<&IdentityRef>,
        namespace: &str,
    ) -> Option<Arc<dyn ActiveReplicaSource>> {
        identity.map(|r| {
            let source: Arc<dyn ActiveReplicaSource> = Arc::new(ConfigMapIdentity::new(
                self.client.clone(),
                r.namespace.clone().unwrap_or_else(|| namespace.to_string()),
                r.name.clone(),
                r.key.clone(),
            ));
            source
        })
    }

    pub fn requeue_after(&self, up_to_date: bool) -> Action {
        if up_to_date {
            Action::requeue(self.requeue)
        } else {
            Action::requeue(self.retry)
        }
    }
}

/// Merge-patch the status subresource
pub async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<(), ReconcileError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    let status = serde_json::to_value(status).map_err(FleetError::from)?;
    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    debug!("Patched status of {}", name);
    Ok(())
}

/// Record a pass that failed before any status could be computed
pub async fn report_failure<K>(api: &Api<K>, name: &str, error: &FleetError)
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let status = json!({ "reconciled": false, "message": error.to_string() });
    if let Err(e) = patch_status(api, name, &status).await {
        warn!("Failed to report error on {}: {}", name, e);
    }
}

pub fn error_policy<K>(fleet: Arc<K>, error: &ReconcileError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let name = fleet.meta().name.clone().unwrap_or_default();
    if error.is_transitional() {
        debug!("{} {} not ready yet: {}", K::kind(&()), name, error);
        Action::requeue(ctx.retry)
    } else {
        warn!("Reconciling {} {} failed: {}", K::kind(&()), name, error);
        Action::requeue(ctx.retry * 4)
    }
}
