//! Process configuration read from the environment

use anyhow::{anyhow, Context, Result};
use fleet_core::WaitConfig;
use fleet_engine::EngineConfig;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Watch one namespace, or every namespace when unset
    pub namespace: Option<String>,
    /// Provider API base URL; provider sync is disabled without it
    pub provider_url: Option<String>,
    pub provider_token: Option<String>,
    pub engine: EngineConfig,
    pub sync_interval: Duration,
    /// Requeue delay for fleets that are up to date
    pub requeue: Duration,
    /// Requeue delay for fleets still converging
    pub retry: Duration,
    pub metrics_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            provider_url: None,
            provider_token: None,
            engine: EngineConfig::default(),
            sync_interval: Duration::from_secs(5),
            requeue: Duration::from_secs(300),
            retry: Duration::from_secs(15),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        config.namespace = non_empty("FLEET_NAMESPACE");
        config.provider_url = non_empty("FLEET_PROVIDER_URL");
        config.provider_token = non_empty("FLEET_PROVIDER_TOKEN");

        let defaults = config.engine.readiness;
        let readiness = WaitConfig::new(
            seconds(&lookup, "FLEET_READINESS_TIMEOUT_SECS")?.unwrap_or(defaults.timeout),
            seconds(&lookup, "FLEET_POLL_INTERVAL_SECS")?.unwrap_or(defaults.interval),
        );
        config.engine = config.engine.with_readiness(readiness);
        if let Some(timeout) = seconds(&lookup, "FLEET_ROLLOUT_TIMEOUT_SECS")? {
            config.engine = config.engine.with_rollout_timeout(timeout);
        }
        if let Some(interval) = seconds(&lookup, "FLEET_SYNC_INTERVAL_SECS")? {
            config.sync_interval = interval;
        }
        if let Some(requeue) = seconds(&lookup, "FLEET_REQUEUE_SECS")? {
            config.requeue = requeue;
        }
        if let Some(retry) = seconds(&lookup, "FLEET_RETRY_SECS")? {
            config.retry = retry;
        }
        if let Some(addr) = non_empty("FLEET_METRICS_ADDR") {
            config.metrics_addr = addr
                .parse()
                .with_context(|| format!("FLEET_METRICS_ADDR: invalid address {}", addr))?;
        }
        config.log_format = match non_empty("FLEET_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(anyhow!("FLEET_LOG_FORMAT: unknown format {}", other)),
        };

        if config.engine.readiness.interval.is_zero() {
            return Err(anyhow!("FLEET_POLL_INTERVAL_SECS must be greater than zero"));
        }
        Ok(config)
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{}: expected seconds, got {}", key, value))?;
    Ok(Some(Duration::from_secs(secs)))
}
