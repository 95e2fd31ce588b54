use anyhow::Result;
use fleet_api::resources::{FirewallRule, Lan, Nic, Server, Volume, VolumeSelector};
use fleet_api::{ServerSet, StatefulServerSet};
use fleet_core::{KubeStore, ObjectStore};
use fleet_engine::{FleetMetrics, FleetStores, ReplicaSetReconciler, StatefulReconciler};
use fleet_provider::{CloudProvider, RestProvider, SyncDriver};
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod metrics_server;
mod server_set_controller;
mod stateful_controller;

use config::{ControllerConfig, LogFormat};
use controller::Context;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().nth(1).as_deref() == Some("crds") {
        return print_crds();
    }

    let config = ControllerConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Starting fleet-controller...");

    let client = Client::try_default().await?;
    let cancel = CancellationToken::new();
    let metrics = FleetMetrics::new()?;

    let stores = FleetStores {
        volumes: kube_store::<Volume>(&client),
        servers: kube_store::<Server>(&client),
        nics: kube_store::<Nic>(&client),
        firewall_rules: kube_store::<FirewallRule>(&client),
        lans: kube_store::<Lan>(&client),
        volume_selectors: kube_store::<VolumeSelector>(&client),
    };

    let sync = match &config.provider_url {
        Some(url) => {
            let provider: Arc<dyn CloudProvider> =
                Arc::new(RestProvider::new(url.clone(), config.provider_token.clone()));
            let driver = SyncDriver::new()
                .with_kind(stores.volumes.clone(), provider.clone())
                .with_kind(stores.servers.clone(), provider.clone())
                .with_kind(stores.nics.clone(), provider.clone())
                .with_kind(stores.firewall_rules.clone(), provider.clone())
                .with_kind(stores.lans.clone(), provider.clone())
                .with_kind(stores.volume_selectors.clone(), provider);
            Some(tokio::spawn(driver.run(cancel.clone(), config.sync_interval)))
        }
        None => {
            warn!("FLEET_PROVIDER_URL not set, provider sync is disabled");
            None
        }
    };

    let metrics_server = {
        let (addr, metrics, cancel) = (config.metrics_addr, metrics.clone(), cancel.clone());
        tokio::spawn(async move {
            if let Err(e) = metrics_server::serve(addr, metrics, cancel).await {
                error!("Metrics server error: {}", e);
            }
        })
    };

    let ctx = Arc::new(Context {
        client: client.clone(),
        server_sets: ReplicaSetReconciler::new(
            &stores,
            config.engine,
            cancel.clone(),
            metrics.clone(),
        ),
        stateful: StatefulReconciler::new(
            &stores,
            config.engine,
            cancel.clone(),
            metrics.clone(),
        ),
        metrics,
        requeue: config.requeue,
        retry: config.retry,
    });

    let controllers = [
        tokio::spawn(server_set_controller::run(
            client.clone(),
            config.namespace.clone(),
            ctx.clone(),
        )),
        tokio::spawn(stateful_controller::run(client, config.namespace.clone(), ctx)),
    ];

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping...");
    cancel.cancel();

    for handle in controllers {
        if let Err(e) = handle.await {
            error!("Controller task failed: {}", e);
        }
    }
    if let Some(sync) = sync {
        let _ = sync.await;
    }
    let _ = metrics_server.await;

    info!("fleet-controller stopped");
    Ok(())
}

fn kube_store<K: fleet_api::Managed>(client: &Client) -> Arc<dyn ObjectStore<K>> {
    Arc::new(KubeStore::<K>::new(client.clone()))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Print every custom resource definition as a JSON list
fn print_crds() -> Result<()> {
    let crds = vec![
        ServerSet::crd(),
        StatefulServerSet::crd(),
        Volume::crd(),
        Server::crd(),
        Nic::crd(),
        FirewallRule::crd(),
        Lan::crd(),
        VolumeSelector::crd(),
    ];
    println!("{}", serde_json::to_string_pretty(&crds)?);
    Ok(())
}
