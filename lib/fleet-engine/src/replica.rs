//! One replica's dependent-resource bundle
//!
//! A bundle is everything labelled with one (index, generation): boot
//! volume, server, NICs and firewall rules. Bundles are only ever derived
//! from label-indexed lookups, so a pass interrupted at any point can be
//! picked up by the next one.

use fleet_api::resources::{FirewallRule, Managed, Nic, Server, Volume};
use fleet_core::naming::{
    generation_of, index_of, kind_selector, label_selector, ordinal_of, LABEL_NIC_ORDINAL,
    LABEL_RULE_ORDINAL,
};
use fleet_core::{FleetError, ReplicaSlot, ResourceKind, Result};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::builders::{
    BootVolumeBuilder, FirewallRuleBuilder, NicBuilder, NicInput, ServerBuilder, ServerInput,
};
use crate::config::EngineConfig;
use crate::context::{FleetContext, FleetStores};
use crate::controller::ResourceController;
use crate::metrics::FleetMetrics;

/// Records of one (index, generation)
#[derive(Clone, Debug)]
pub struct ReplicaBundle {
    pub slot: ReplicaSlot,
    pub boot_volume: Option<Volume>,
    pub server: Option<Server>,
    /// Sorted by NIC ordinal
    pub nics: Vec<Nic>,
    pub firewall_rules: Vec<FirewallRule>,
}

impl ReplicaBundle {
    pub fn new(slot: ReplicaSlot) -> Self {
        Self {
            slot,
            boot_volume: None,
            server: None,
            nics: Vec::new(),
            firewall_rules: Vec::new(),
        }
    }

    /// Whether every record the template asks for exists and is available
    pub fn is_complete(&self, fleet: &FleetContext) -> bool {
        let template = &fleet.spec.template;
        let expected_rules: usize = template
            .nics
            .iter()
            .filter(|n| n.firewall_active)
            .map(|n| n.firewall_rules.len())
            .sum();

        self.boot_volume.as_ref().is_some_and(|v| v.is_available())
            && self.server.as_ref().is_some_and(|s| s.is_available())
            && self.nics.len() == template.nics.len()
            && self.nics.iter().all(|n| n.is_available())
            && self.firewall_rules.len() == expected_rules
            && self.firewall_rules.iter().all(|r| r.is_available())
    }
}

/// Every bundle of a fleet, by replica index and then generation
#[derive(Clone, Debug, Default)]
pub struct FleetSnapshot {
    replicas: BTreeMap<u32, BTreeMap<u32, ReplicaBundle>>,
}

impl FleetSnapshot {
    fn bundle_mut(&mut self, index: u32, generation: u32) -> &mut ReplicaBundle {
        self.replicas
            .entry(index)
            .or_default()
            .entry(generation)
            .or_insert_with(|| ReplicaBundle::new(ReplicaSlot::new(index, generation)))
    }

    fn slot_of<K: Managed>(record: &K, kind: ResourceKind) -> Option<(u32, u32)> {
        let labels = record.labels();
        Some((index_of(labels, kind)?, generation_of(labels, kind)?))
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Replica indices with at least one record
    pub fn indices(&self) -> Vec<u32> {
        self.replicas.keys().copied().collect()
    }

    pub fn generations(&self, index: u32) -> Option<&BTreeMap<u32, ReplicaBundle>> {
        self.replicas.get(&index).filter(|g| !g.is_empty())
    }

    /// Highest generation of a replica
    pub fn latest(&self, index: u32) -> Option<&ReplicaBundle> {
        self.generations(index)?.values().next_back()
    }
}

/// The four per-replica controllers and the ordered operations over them
pub struct ReplicaControllers {
    pub boot_volumes: ResourceController<BootVolumeBuilder>,
    pub servers: ResourceController<ServerBuilder>,
    pub nics: ResourceController<NicBuilder>,
    pub firewall_rules: ResourceController<FirewallRuleBuilder>,
}

fn provider_id<K: Managed>(record: &K) -> Result<String> {
    record
        .external_id()
        .map(str::to_string)
        .ok_or_else(|| FleetError::busy(K::kind(&()), record.name_any(), record.state()))
}

impl ReplicaControllers {
    pub fn new(
        stores: &FleetStores,
        config: &EngineConfig,
        cancel: &CancellationToken,
        metrics: &FleetMetrics,
    ) -> Self {
        Self {
            boot_volumes: ResourceController::new(
                BootVolumeBuilder,
                stores.volumes.clone(),
                config.readiness,
                cancel.clone(),
                metrics.clone(),
            ),
            servers: ResourceController::new(
                ServerBuilder,
                stores.servers.clone(),
                config.readiness,
                cancel.clone(),
                metrics.clone(),
            ),
            nics: ResourceController::new(
                NicBuilder::new(stores.lans.clone()),
                stores.nics.clone(),
                config.readiness,
                cancel.clone(),
                metrics.clone(),
            ),
            firewall_rules: ResourceController::new(
                FirewallRuleBuilder,
                stores.firewall_rules.clone(),
                config.readiness,
                cancel.clone(),
                metrics.clone(),
            ),
        }
    }

    /// Group every record of the fleet by (index, generation)
    pub async fn snapshot(&self, fleet: &FleetContext) -> Result<FleetSnapshot> {
        let ns = &fleet.namespace;
        let mut snapshot = FleetSnapshot::default();

        let volumes = kind_selector(&fleet.name, ResourceKind::BootVolume);
        for volume in self.boot_volumes.list(ns, &volumes).await? {
            if let Some((index, generation)) = FleetSnapshot::slot_of(&volume, ResourceKind::BootVolume) {
                snapshot.bundle_mut(index, generation).boot_volume.get_or_insert(volume);
            }
        }

        let servers = kind_selector(&fleet.name, ResourceKind::Server);
        for server in self.servers.list(ns, &servers).await? {
            if let Some((index, generation)) = FleetSnapshot::slot_of(&server, ResourceKind::Server) {
                snapshot.bundle_mut(index, generation).server.get_or_insert(server);
            }
        }

        let nics = kind_selector(&fleet.name, ResourceKind::Nic);
        for nic in self.nics.list(ns, &nics).await? {
            if let Some((index, generation)) = FleetSnapshot::slot_of(&nic, ResourceKind::Nic) {
                snapshot.bundle_mut(index, generation).nics.push(nic);
            }
        }

        let rules = kind_selector(&fleet.name, ResourceKind::FirewallRule);
        for rule in self.firewall_rules.list(ns, &rules).await? {
            if let Some((index, generation)) = FleetSnapshot::slot_of(&rule, ResourceKind::FirewallRule) {
                snapshot.bundle_mut(index, generation).firewall_rules.push(rule);
            }
        }

        for bundle in snapshot.replicas.values_mut().flat_map(|g| g.values_mut()) {
            bundle
                .nics
                .sort_by_key(|n| ordinal_of(n.labels(), LABEL_NIC_ORDINAL));
            bundle.firewall_rules.sort_by_key(|r| {
                (
                    ordinal_of(r.labels(), LABEL_NIC_ORDINAL),
                    ordinal_of(r.labels(), LABEL_RULE_ORDINAL),
                )
            });
        }
        Ok(snapshot)
    }

    /// Ensure a generation in dependency order: boot volume, server, NICs,
    /// firewall rules. Each step binds to the provider id of the previous
    /// one, all within the same generation.
    #[instrument(skip(self, fleet), fields(fleet = %fleet.name, index = slot.index, generation = slot.generation))]
    pub async fn ensure_slot(&self, fleet: &FleetContext, slot: ReplicaSlot) -> Result<ReplicaBundle> {
        let volume = self.boot_volumes.ensure(fleet, &slot).await?;
        let boot_volume_id = provider_id(&volume)?;

        let server = self
            .servers
            .ensure(fleet, &ServerInput { slot, boot_volume_id })
            .await?;
        let server_id = provider_id(&server)?;

        let mut nics = Vec::with_capacity(fleet.spec.template.nics.len());
        for (ordinal, template) in fleet.spec.template.nics.iter().enumerate() {
            let input = NicInput {
                slot,
                ordinal,
                server_id: server_id.clone(),
                template: template.clone(),
            };
            nics.push(self.nics.ensure(fleet, &input).await?);
        }

        let firewall_rules = self
            .firewall_rules
            .ensure_all(fleet, slot, &server_id, &nics)
            .await?;

        Ok(ReplicaBundle {
            slot,
            boot_volume: Some(volume),
            server: Some(server),
            nics,
            firewall_rules,
        })
    }

    /// Delete a generation: server, boot volume, firewall rules, NICs
    #[instrument(skip(self, fleet), fields(fleet = %fleet.name, index = slot.index, generation = slot.generation))]
    pub async fn teardown_slot(&self, fleet: &FleetContext, slot: ReplicaSlot) -> Result<()> {
        let ns = &fleet.namespace;
        info!("Tearing down replica generation");

        self.servers
            .delete_matching(ns, &label_selector(&fleet.name, ResourceKind::Server, slot))
            .await?;
        self.boot_volumes
            .delete_matching(ns, &label_selector(&fleet.name, ResourceKind::BootVolume, slot))
            .await?;
        self.firewall_rules
            .delete_matching(ns, &label_selector(&fleet.name, ResourceKind::FirewallRule, slot))
            .await?;
        self.nics
            .delete_matching(ns, &label_selector(&fleet.name, ResourceKind::Nic, slot))
            .await?;
        Ok(())
    }

    /// Delete every generation of every replica, kind by kind
    pub async fn teardown_fleet(&self, fleet: &FleetContext) -> Result<()> {
        let ns = &fleet.namespace;
        self.servers
            .delete_matching(ns, &kind_selector(&fleet.name, ResourceKind::Server))
            .await?;
        self.boot_volumes
            .delete_matching(ns, &kind_selector(&fleet.name, ResourceKind::BootVolume))
            .await?;
        self.firewall_rules
            .delete_matching(ns, &kind_selector(&fleet.name, ResourceKind::FirewallRule))
            .await?;
        self.nics
            .delete_matching(ns, &kind_selector(&fleet.name, ResourceKind::Nic))
            .await?;
        Ok(())
    }
}
