//! Engine tuning

use fleet_core::WaitConfig;
use std::time::Duration;

/// Waits applied by every controller and the fleet-level ceiling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Per-resource readiness wait
    pub readiness: WaitConfig,
    /// Upper bound for one full reconciliation pass of a fleet
    pub rollout_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            readiness: WaitConfig::default(),
            rollout_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl EngineConfig {
    pub fn with_readiness(mut self, readiness: WaitConfig) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_rollout_timeout(mut self, timeout: Duration) -> Self {
        self.rollout_timeout = timeout;
        self
    }
}
