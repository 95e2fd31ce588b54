//! Poll-until-ready primitive shared by every dependent controller.
//!
//! The predicate answers `Ok(true)` when the condition holds and `Ok(false)`
//! when it should be asked again later. Any `Err` is terminal and ends the
//! wait immediately; predicates therefore map "not there yet" to
//! `Ok(false)` and reserve errors for conditions that will not fix
//! themselves.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{FleetError, Result};

/// Timeout and poll interval for a single wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitConfig {
    /// Give up after this long
    pub timeout: Duration,
    /// Delay between predicate evaluations
    pub interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20 * 60),
            interval: Duration::from_secs(5),
        }
    }
}

impl WaitConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Poll `predicate` until it returns true, fails, the timeout elapses or
/// `cancel` fires.
pub async fn wait_until<F, Fut>(
    cancel: &CancellationToken,
    config: WaitConfig,
    what: &str,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(FleetError::Cancelled(what.to_string()));
        }

        attempt += 1;
        if predicate().await? {
            trace!(what = %what, attempt, "Condition met");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(FleetError::Timeout {
                what: what.to_string(),
                elapsed: now - started,
            });
        }

        trace!(what = %what, attempt, "Condition not met, polling again");
        let pause = config.interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FleetError::Cancelled(what.to_string()));
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config() -> WaitConfig {
        WaitConfig::new(Duration::from_secs(30), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let cancel = CancellationToken::new();

        let result = wait_until(&cancel, config(), "volume", || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_aborts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let cancel = CancellationToken::new();

        let result = wait_until(&cancel, config(), "rule", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<bool, _>(FleetError::Provisioning {
                    kind: "FirewallRule".to_string(),
                    name: "r".to_string(),
                    message: "rejected".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(FleetError::Provisioning { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let result = wait_until(&cancel, config(), "server", || async { Ok(false) }).await;

        match result {
            Err(FleetError::Timeout { what, elapsed }) => {
                assert_eq!(what, "server");
                assert!(elapsed >= Duration::from_secs(30));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let result = wait_until(&cancel, config(), "nic", || async { Ok(false) }).await;
        assert!(matches!(result, Err(FleetError::Cancelled(_))));
    }
}
