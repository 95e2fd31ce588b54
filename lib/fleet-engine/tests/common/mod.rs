#![allow(dead_code)]

use fleet_api::resources::{FirewallRule, Lan, LanSpec, Managed, Nic, Server, Volume, VolumeSelector};
use fleet_api::v1alpha1::{
    BootVolumeTemplate, FirewallRuleTemplate, NicTemplate, ServerSetSpec, ServerTemplate,
};
use fleet_core::naming::LABEL_FLEET;
use fleet_core::{Journal, MemoryStore, ObjectStore, WaitConfig};
use fleet_engine::{
    EngineConfig, FleetContext, FleetMetrics, FleetStores, Observation, ReplicaSetReconciler,
    StatefulFleet, StatefulObservation, StatefulReconciler,
};
use fleet_provider::{CloudProvider, InMemoryCloud, SyncDriver};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "default";
pub const DATACENTER: &str = "dc-1";
pub const PUBLIC_LAN: &str = "public-lan";

/// Memory stores, an in-memory cloud and a background sync driver
pub struct Sim {
    pub journal: Journal,
    pub volumes: MemoryStore<Volume>,
    pub servers: MemoryStore<Server>,
    pub nics: MemoryStore<Nic>,
    pub firewall_rules: MemoryStore<FirewallRule>,
    pub lans: MemoryStore<Lan>,
    pub volume_selectors: MemoryStore<VolumeSelector>,
    pub cloud: InMemoryCloud,
    pub cancel: CancellationToken,
    pub metrics: FleetMetrics,
}

impl Sim {
    pub fn start() -> Self {
        let journal = Journal::new();
        let sim = Self {
            volumes: MemoryStore::with_journal(journal.clone()),
            servers: MemoryStore::with_journal(journal.clone()),
            nics: MemoryStore::with_journal(journal.clone()),
            firewall_rules: MemoryStore::with_journal(journal.clone()),
            lans: MemoryStore::with_journal(journal.clone()),
            volume_selectors: MemoryStore::with_journal(journal.clone()),
            journal,
            cloud: InMemoryCloud::default(),
            cancel: CancellationToken::new(),
            metrics: FleetMetrics::new().expect("metrics"),
        };

        let provider: Arc<dyn CloudProvider> = Arc::new(sim.cloud.clone());
        let driver = SyncDriver::new()
            .with_kind::<Volume>(Arc::new(sim.volumes.clone()), provider.clone())
            .with_kind::<Server>(Arc::new(sim.servers.clone()), provider.clone())
            .with_kind::<Nic>(Arc::new(sim.nics.clone()), provider.clone())
            .with_kind::<FirewallRule>(Arc::new(sim.firewall_rules.clone()), provider.clone())
            .with_kind::<Lan>(Arc::new(sim.lans.clone()), provider.clone())
            .with_kind::<VolumeSelector>(Arc::new(sim.volume_selectors.clone()), provider);
        tokio::spawn(driver.run(sim.cancel.clone(), Duration::from_secs(1)));
        sim
    }

    pub fn stores(&self) -> FleetStores {
        FleetStores {
            volumes: Arc::new(self.volumes.clone()),
            servers: Arc::new(self.servers.clone()),
            nics: Arc::new(self.nics.clone()),
            firewall_rules: Arc::new(self.firewall_rules.clone()),
            lans: Arc::new(self.lans.clone()),
            volume_selectors: Arc::new(self.volume_selectors.clone()),
        }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_readiness(WaitConfig::new(Duration::from_secs(60), Duration::from_secs(1)))
            .with_rollout_timeout(Duration::from_secs(3600))
    }

    pub fn reconciler(&self) -> ReplicaSetReconciler {
        ReplicaSetReconciler::new(
            &self.stores(),
            self.config(),
            self.cancel.clone(),
            self.metrics.clone(),
        )
    }

    pub fn stateful_reconciler(&self) -> StatefulReconciler {
        StatefulReconciler::new(
            &self.stores(),
            self.config(),
            self.cancel.clone(),
            self.metrics.clone(),
        )
    }

    /// A LAN record created outside any fleet, waited until available
    pub async fn shared_lan(&self, name: &str) -> Lan {
        let mut lan = Lan::new(
            name,
            LanSpec {
                datacenter_id: DATACENTER.to_string(),
                name: name.to_string(),
                public: true,
                ipv6_cidr: String::new(),
            },
        );
        lan.metadata.namespace = Some(NAMESPACE.to_string());
        self.lans.create(&lan).await.expect("create lan");

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if let Some(lan) = self.lans.get(NAMESPACE, name).await.expect("get lan") {
                if lan.is_available() {
                    return lan;
                }
            }
        }
        panic!("lan {} never became available", name);
    }

    /// Let the sync driver run a few passes
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    /// Record names of a fleet's records in a store
    pub async fn names<K: Managed>(store: &MemoryStore<K>, fleet: &str) -> Vec<String> {
        store
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.labels().get(LABEL_FLEET).map(String::as_str) == Some(fleet))
            .map(|r| r.name_any())
            .collect()
    }
}

impl Drop for Sim {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn template() -> ServerTemplate {
    ServerTemplate {
        cores: 2,
        ram: 4096,
        cpu_family: "INTEL_SKYLAKE".to_string(),
        boot_volume: BootVolumeTemplate {
            size: 20,
            volume_type: "SSD".to_string(),
            image: Some("debian-12".to_string()),
            ..Default::default()
        },
        nics: vec![NicTemplate {
            name: "public".to_string(),
            lan: PUBLIC_LAN.to_string(),
            dhcp: true,
            firewall_active: true,
            firewall_type: Some("INGRESS".to_string()),
            firewall_rules: vec![FirewallRuleTemplate {
                name: "ssh".to_string(),
                protocol: "TCP".to_string(),
                port_range_start: Some(22),
                port_range_end: Some(22),
                ..Default::default()
            }],
            ..Default::default()
        }],
        labels: BTreeMap::new(),
    }
}

pub fn spec(replicas: u32) -> ServerSetSpec {
    ServerSetSpec {
        replicas,
        datacenter_id: DATACENTER.to_string(),
        template: template(),
        ..Default::default()
    }
}

pub fn fleet(name: &str, spec: ServerSetSpec) -> FleetContext {
    FleetContext::new(name, NAMESPACE, spec)
}

/// Reconcile until the fleet reports up to date
pub async fn converge(reconciler: &ReplicaSetReconciler, fleet: &FleetContext) -> Observation {
    let mut previous = Vec::new();
    for _ in 0..10 {
        let observation = reconciler
            .reconcile(fleet, &previous)
            .await
            .expect("reconcile");
        if observation.resource_up_to_date {
            return observation;
        }
        previous = observation.status.replica_status.clone();
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    panic!("fleet {} did not converge", fleet.name);
}

pub async fn converge_stateful(
    reconciler: &StatefulReconciler,
    fleet: &StatefulFleet,
) -> StatefulObservation {
    let mut previous = Vec::new();
    for _ in 0..10 {
        let observation = reconciler
            .reconcile(fleet, &previous)
            .await;
        match observation {
            Ok(observation) if observation.resource_up_to_date => return observation,
            Ok(observation) => previous = observation.status.fleet.replica_status.clone(),
            Err(e) if e.is_transitional() => {}
            Err(e) => panic!("stateful reconcile failed: {}", e),
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    panic!("stateful fleet {} did not converge", fleet.context.name);
}
