//! StatefulServerSet controller

use fleet_api::resources::{Lan, Server};
use fleet_api::StatefulServerSet;
use fleet_engine::StatefulFleet;
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
    info!("Starting StatefulServerSet reconciliation");

    let (fleets, servers, lans): (Api<StatefulServerSet>, Api<Server>, Api<Lan>) = match &namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client, ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone()), Api::all(client)),
    };

    Controller::new(fleets, watcher::Config::default())
        .owns(servers, watcher::Config::default())
        .owns(lans, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((fleet, _)) => debug!("Reconciled StatefulServerSet {}", fleet.name),
                Err(e) => error!("Error in StatefulServerSet reconciliation stream: {}", e),
            }
        })
        .await;

    info!("StatefulServerSet controller stopped");
}

async fn reconcile(
    fleet: Arc<StatefulServerSet>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let namespace = fleet.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulServerSet> = Api::namespaced(ctx.client.clone(), &namespace);

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
async fn apply(
    api: &Api<StatefulServerSet>,
    fleet: &StatefulServerSet,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let name = fleet.name_any();
    let namespace = fleet.namespace().unwrap_or_default();

    let stateful = StatefulFleet::new(fleet)
        .with_identity(ctx.identity(fleet.spec.fleet.identity.as_ref(), &namespace));
    let previous = fleet
        .status
        .as_ref()
        .map(|s| s.fleet.replica_status.clone())
        .unwrap_or_default();

    let result = ctx.stateful.reconcile(&stateful, &previous).await;
    ctx.metrics
        .record_reconcile("StatefulServerSet", result.is_ok(), started.elapsed());

    let observation = match result {
        Ok(observation) => observation,
        Err(e) => {
            report_failure(api, &name, &e).await;
            return Err(e.into());
        }
    };

    patch_status(api, &name, &observation.status).await?;
    if !observation.resource_up_to_date {
        info!(diff = ?observation.diff, "StatefulServerSet converging");
    }
    Ok(ctx.requeue_after(observation.resource_up_to_date))
}

#[instrument(skip_all, fields(fleet = %fleet.name_any()))]
async fn cleanup(fleet: &StatefulServerSet, ctx: &Context) -> Result<Action, ReconcileError> {
    info!("StatefulServerSet deleted, tearing down replicas, volumes and LANs");
    ctx.stateful.delete(&StatefulFleet::new(fleet)).await?;
    Ok(Action::await_change())
}
