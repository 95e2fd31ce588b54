//! Create-before-destroy replacement of one replica

use fleet_core::{ReplicaSlot, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::context::FleetContext;
use crate::replica::ReplicaControllers;

/// Replaces a replica by building its next generation completely before
/// the current one is torn down
pub struct CreateBeforeDestroy {
    replicas: Arc<ReplicaControllers>,
}

impl CreateBeforeDestroy {
    pub fn new(replicas: Arc<ReplicaControllers>) -> Self {
        Self { replicas }
    }

    /// Move the replica at `current` to the next generation.
    ///
    /// A failure while building the next generation leaves `current`
    /// untouched. A failure while tearing `current` down is returned as is;
    /// the next pass sees both generations and finishes the cleanup.
    #[instrument(skip(self, fleet), fields(fleet = %fleet.name, index = current.index, generation = current.generation))]
    pub async fn update(&self, fleet: &FleetContext, current: ReplicaSlot) -> Result<ReplicaSlot> {
        let next = current.next();
        info!(next = next.generation, "Building next generation");

        self.replicas.ensure_slot(fleet, next).await?;

        if let Err(e) = self.replicas.teardown_slot(fleet, current).await {
            warn!("Next generation is live but cleanup of {} failed: {}", current, e);
            return Err(e);
        }

        info!(next = next.generation, "Replica replaced");
        Ok(next)
    }
}
