//! ServerSet controller

use fleet_api::resources::Server;
use fleet_api::ServerSet;
use fleet_engine::FleetContext;
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Controller};
use kube_runtime::finalizer::{finalizer, Event};
use kube_runtime::watcher;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::controller::{
    error_policy, patch_status, report_failure, Context, ReconcileError, FLEET_FINALIZER,
};

pub async fn run(client: Client, namespace: Option<String>, ctx: Arc<Context>) {
    info!("Starting ServerSet reconciliation");

    let (fleets, servers): (Api<ServerSet>, Api<Server>) = match &namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    Controller::new(fleets, watcher::Config::default())
        .owns(servers, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((fleet, _)) => debug!("Reconciled ServerSet {}", fleet.name),
                Err(e) => error!("Error in ServerSet reconciliation stream: {}", e),
            }
        })
        .await;

    info!("ServerSet controller stopped");
}

async fn reconcile(fleet: Arc<ServerSet>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = fleet.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ServerSet> = Api::namespaced(ctx.client.clone(), &namespace);

    let (api_ref, ctx_ref) = (&api, ctx.as_ref());
    finalizer(&api, FLEET_FINALIZER, fleet, |event| async move {
        match event {
            Event::Apply(fleet) => apply(api_ref, &fleet, ctx_ref).await,
            Event::Cleanup(fleet) => cleanup(&fleet, ctx_ref).await,
        }
    })
    .await
    .map_err(|e| ReconcileError::Finalizer(Box::new(e)))
}

#[instrument(skip_all, fields(fleet = %fleet.name_any()))]
async fn apply(api: &Api<ServerSet>, fleet: &ServerSet, ctx: &Context) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let name = fleet.name_any();
    let namespace = fleet.namespace().unwrap_or_default();
    let context = FleetContext::for_server_set(fleet)
        .with_identity(ctx.identity(fleet.spec.identity.as_ref(), &namespace));
    let previous = fleet
        .status
        .as_ref()
        .map(|s| s.replica_status.clone())
        .unwrap_or_default();

    let result = ctx.server_sets.reconcile(&context, &previous).await;
    ctx.metrics
        .record_reconcile("ServerSet", result.is_ok(), started.elapsed());

    let observation = match result {
        Ok(observation) => observation,
        Err(e) => {
            report_failure(api, &name, &e).await;
            return Err(e.into());
        }
    };

    patch_status(api, &name, &observation.status).await?;
    if !observation.resource_up_to_date {
        info!(diff = ?observation.diff, "ServerSet converging");
    }
    Ok(ctx.requeue_after(observation.resource_up_to_date))
}

#[instrument(skip_all, fields(fleet = %fleet.name_any()))]
async fn cleanup(fleet: &ServerSet, ctx: &Context) -> Result<Action, ReconcileError> {
    info!("ServerSet deleted, tearing down replicas");
    ctx.server_sets
        .delete(&FleetContext::for_server_set(fleet))
        .await?;
    Ok(Action::await_change())
}
