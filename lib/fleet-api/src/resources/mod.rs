//! Dependent resources provisioned on behalf of a fleet
//!
//! Every kind here mirrors one object at the cloud provider. The spec is the
//! desired provider configuration, the status carries what was last observed
//! at the provider.

pub mod firewall_rule;
pub mod lan;
pub mod nic;
pub mod server;
pub mod volume;
pub mod volume_selector;

pub use firewall_rule::{FirewallRule, FirewallRuleSpec, FirewallRuleStatus};
pub use lan::{Lan, LanSpec, LanStatus};
pub use nic::{Nic, NicSpec, NicStatus};
pub use server::{Server, ServerSpec, ServerStatus};
pub use volume::{Volume, VolumeSpec, VolumeStatus};
pub use volume_selector::{VolumeSelector, VolumeSelectorSpec, VolumeSelectorStatus};

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finalizer holding a record until its provider object is gone
pub const EXTERNAL_RESOURCE_FINALIZER: &str = "compute.fleet.dev/external-resource";

/// Provider-side state of a dependent resource
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    #[default]
    Unknown,
    Busy,
    Available,
    Error,
    Destroying,
}

impl ResourceState {
    /// Map a provider state string; anything unrecognized is `Unknown`
    pub fn from_provider(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "AVAILABLE" | "ACTIVE" | "RUNNING" => Self::Available,
            "BUSY" | "PROVISIONING" | "UPDATING" | "INACTIVE" => Self::Busy,
            "ERROR" | "FAILED" => Self::Error,
            "DESTROYING" | "DELETING" => Self::Destroying,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Busy => "BUSY",
            Self::Available => "AVAILABLE",
            Self::Error => "ERROR",
            Self::Destroying => "DESTROYING",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observation shared by every dependent kind
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservedState {
    #[serde(default)]
    pub state: ResourceState,

    /// Identifier assigned by the provider once created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Failure reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Hash of the spec last pushed to the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_hash: Option<String>,
}

/// A namespaced record mirroring one provider object
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn observed(&self) -> Option<&ObservedState>;

    fn observed_mut(&mut self) -> &mut ObservedState;

    /// Datacenter the provider object lives in
    fn datacenter_id(&self) -> &str;

    /// Parameters submitted to the provider
    fn provider_params(&self) -> serde_json::Value;

    /// Copy kind-specific provider fields into the status
    fn apply_provider_fields(&mut self, _fields: &serde_json::Value) {}

    fn state(&self) -> ResourceState {
        self.observed().map(|o| o.state).unwrap_or_default()
    }

    fn external_id(&self) -> Option<&str> {
        self.observed().and_then(|o| o.external_id.as_deref())
    }

    fn failure_message(&self) -> Option<&str> {
        self.observed().and_then(|o| o.message.as_deref())
    }

    /// Available with a provider id
    fn is_available(&self) -> bool {
        self.state() == ResourceState::Available && self.external_id().is_some()
    }
}

macro_rules! impl_managed {
    ($kind:ty, $status:ty) => {
        impl $crate::resources::Managed for $kind {
            fn observed(&self) -> Option<&$crate::resources::ObservedState> {
                self.status.as_ref().map(|s| &s.observed)
            }

            fn observed_mut(&mut self) -> &mut $crate::resources::ObservedState {
                &mut self.status.get_or_insert_with(<$status>::default).observed
            }

            fn datacenter_id(&self) -> &str {
                &self.spec.datacenter_id
            }

            fn provider_params(&self) -> serde_json::Value {
                serde_json::to_value(&self.spec).unwrap_or(serde_json::Value::Null)
            }
        }
    };
    ($kind:ty, $status:ty, |$record:ident, $fields:ident| $apply:block) => {
        impl $crate::resources::Managed for $kind {
            fn observed(&self) -> Option<&$crate::resources::ObservedState> {
                self.status.as_ref().map(|s| &s.observed)
            }

            fn observed_mut(&mut self) -> &mut $crate::resources::ObservedState {
                &mut self.status.get_or_insert_with(<$status>::default).observed
            }

            fn datacenter_id(&self) -> &str {
                &self.spec.datacenter_id
            }

            fn provider_params(&self) -> serde_json::Value {
                serde_json::to_value(&self.spec).unwrap_or(serde_json::Value::Null)
            }

            fn apply_provider_fields(&mut self, fields: &serde_json::Value) {
                let $record = self.status.get_or_insert_with(<$status>::default);
                let $fields = fields;
                $apply
            }
        }
    };
}

pub(crate) use impl_managed;
