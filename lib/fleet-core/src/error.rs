use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Error, Debug)]
pub enum FleetError {
    /// A referenced record does not exist yet
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// The record exists but is still transitioning
    #[error("{kind} {name} is busy ({state})")]
    Busy {
        kind: String,
        name: String,
        state: String,
    },

    /// The provider rejected the resource; it will not become available
    #[error("{kind} {name} failed to provision: {message}")]
    Provisioning {
        kind: String,
        name: String,
        message: String,
    },

    /// More than one record for what must be a unique (index, generation)
    #[error("found {count} {kind} records for replica {index} generation {generation}, expected one")]
    DuplicateResources {
        kind: String,
        index: u32,
        generation: u32,
        count: usize,
    },

    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("wait for {0} was cancelled")]
    Cancelled(String),

    #[error("{kind} {name}: field {field} cannot be changed in place")]
    ImmutableField {
        kind: String,
        name: String,
        field: String,
    },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("object store error: {0}")]
    Store(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl FleetError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn busy(kind: impl Into<String>, name: impl Into<String>, state: impl ToString) -> Self {
        Self::Busy {
            kind: kind.into(),
            name: name.into(),
            state: state.to_string(),
        }
    }

    /// Not-ready conditions that resolve on a later pass without intervention
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Busy { .. })
    }

    /// Failures that retrying the same wait will not fix
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Provisioning { .. }
                | Self::DuplicateResources { .. }
                | Self::ImmutableField { .. }
                | Self::InvalidSpec(_)
        )
    }
}
