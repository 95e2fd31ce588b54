//! What every controller needs to know about the fleet it works for

use fleet_api::resources::{
    FirewallRule, Lan, Nic, Server, Volume, VolumeSelector, EXTERNAL_RESOURCE_FINALIZER,
};
use fleet_api::v1alpha1::{ServerSet, ServerSetSpec, StatefulServerSet};
use fleet_core::naming::LABEL_FLEET;
use fleet_core::{strategy_for, ActiveReplicaSource, LabelSelector, ObjectStore, ZoneStrategy};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stores for every dependent kind
#[derive(Clone)]
pub struct FleetStores {
    pub volumes: Arc<dyn ObjectStore<Volume>>,
    pub servers: Arc<dyn ObjectStore<Server>>,
    pub nics: Arc<dyn ObjectStore<Nic>>,
    pub firewall_rules: Arc<dyn ObjectStore<FirewallRule>>,
    pub lans: Arc<dyn ObjectStore<Lan>>,
    pub volume_selectors: Arc<dyn ObjectStore<VolumeSelector>>,
}

/// One fleet as seen by a reconciliation pass
pub struct FleetContext {
    pub name: String,
    pub namespace: String,
    pub owner: Option<OwnerReference>,
    pub spec: ServerSetSpec,
    pub zone: Box<dyn ZoneStrategy>,
    /// Active replica source; `None` when the fleet has no identity record
    pub identity: Option<Arc<dyn ActiveReplicaSource>>,
}

impl FleetContext {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: ServerSetSpec) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            owner: None,
            zone: strategy_for(&spec.placement),
            spec,
            identity: None,
        }
    }

    pub fn with_owner(mut self, owner: Option<OwnerReference>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_identity(mut self, identity: Option<Arc<dyn ActiveReplicaSource>>) -> Self {
        self.identity = identity;
        self
    }

    pub fn for_server_set(fleet: &ServerSet) -> Self {
        Self::new(
            fleet.name_any(),
            fleet.namespace().unwrap_or_else(|| "default".to_string()),
            fleet.spec.clone(),
        )
        .with_owner(fleet.controller_owner_ref(&()))
    }

    pub fn for_stateful(fleet: &StatefulServerSet) -> Self {
        Self::new(
            fleet.name_any(),
            fleet.namespace().unwrap_or_else(|| "default".to_string()),
            fleet.spec.fleet.clone(),
        )
        .with_owner(fleet.controller_owner_ref(&()))
    }

    /// Metadata for a dependent record: identity labels, owner and finalizer
    pub fn record_meta(&self, name: &str, identity: &LabelSelector) -> ObjectMeta {
        let mut labels: BTreeMap<String, String> = identity.to_labels();
        labels.insert(LABEL_FLEET.to_string(), self.name.clone());

        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            owner_references: self.owner.clone().map(|owner| vec![owner]),
            finalizers: Some(vec![EXTERNAL_RESOURCE_FINALIZER.to_string()]),
            ..Default::default()
        }
    }
}
