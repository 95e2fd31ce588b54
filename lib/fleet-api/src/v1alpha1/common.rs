use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a replica inside its fleet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaRole {
    /// Named by the identity record as the current active replica
    Active,
    /// Any other replica of a fleet with an identity record
    Passive,
    /// Replica of a fleet that has no identity record configured
    #[default]
    Replica,
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Passive => "PASSIVE",
            Self::Replica => "REPLICA",
        };
        f.write_str(s)
    }
}

/// Health of a replica derived from its server's provider state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaHealth {
    #[default]
    Unknown,
    Ready,
    Error,
}

impl fmt::Display for ReplicaHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Status of one live replica, recomputed on every reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    /// Name of the replica (the name of its current server)
    pub name: String,

    /// Role resolved from the identity record
    pub role: ReplicaRole,

    /// Health derived from the server's observed state
    pub status: ReplicaHealth,

    /// Last error seen while reconciling this replica
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Time of the last change of role, status or error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}
