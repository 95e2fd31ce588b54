//! Read-only accessor for the record naming the active replica

use async_trait::async_trait;

use crate::Result;

/// Source of the "currently active replica" signal
#[async_trait]
pub trait ActiveReplicaSource: Send + Sync {
    /// Name of the active replica, or `None` when the record is absent
    async fn active_replica(&self) -> Result<Option<String>>;
}

/// Fixed answer, for fleets whose active replica is known up front and for tests
#[derive(Clone, Debug, Default)]
pub struct StaticIdentity(pub Option<String>);

impl StaticIdentity {
    pub fn active(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    pub fn absent() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ActiveReplicaSource for StaticIdentity {
    async fn active_replica(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}
