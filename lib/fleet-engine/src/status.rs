//! Per-replica role and health

use fleet_api::resources::{Managed, ResourceState, Server};
use fleet_api::v1alpha1::{ReplicaHealth, ReplicaRole, ReplicaStatus};
use fleet_core::ActiveReplicaSource;
use std::sync::Arc;
use tracing::warn;

/// What the identity record says about the active replica
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActiveReplica {
    /// The fleet has no identity record
    NotConfigured,
    /// An identity record is configured but names nobody
    Absent,
    Named(String),
}

impl ActiveReplica {
    pub async fn read(source: Option<&Arc<dyn ActiveReplicaSource>>) -> Self {
        let Some(source) = source else {
            return Self::NotConfigured;
        };
        match source.active_replica().await {
            Ok(Some(name)) => Self::Named(name),
            Ok(None) => Self::Absent,
            Err(e) => {
                warn!("Failed to read identity record: {}", e);
                Self::Absent
            }
        }
    }

    pub fn role_of(&self, replica: &str) -> ReplicaRole {
        match self {
            Self::NotConfigured => ReplicaRole::Replica,
            Self::Named(active) if active == replica => ReplicaRole::Active,
            _ => ReplicaRole::Passive,
        }
    }
}

/// Health from the server's provider state and VM state
pub fn replica_health(server: Option<&Server>) -> ReplicaHealth {
    let Some(server) = server else {
        return ReplicaHealth::Unknown;
    };
    let vm_state = server.status.as_ref().and_then(|s| s.vm_state.as_deref());

    if server.state() == ResourceState::Error || matches!(vm_state, Some("CRASHED" | "FAILED")) {
        return ReplicaHealth::Error;
    }
    if server.state() == ResourceState::Available && matches!(vm_state, None | Some("RUNNING")) {
        return ReplicaHealth::Ready;
    }
    ReplicaHealth::Unknown
}

/// Status entry for a replica. `last_modified` only moves when role,
/// health or error change.
pub fn replica_status(
    name: String,
    role: ReplicaRole,
    status: ReplicaHealth,
    error_message: Option<String>,
    previous: &[ReplicaStatus],
    now: &str,
) -> ReplicaStatus {
    let unchanged = previous.iter().find(|p| {
        p.name == name && p.role == role && p.status == status && p.error_message == error_message
    });
    let last_modified = match unchanged {
        Some(p) if p.last_modified.is_some() => p.last_modified.clone(),
        _ => Some(now.to_string()),
    };

    ReplicaStatus {
        name,
        role,
        status,
        error_message,
        last_modified,
    }
}
