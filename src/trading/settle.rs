//! Waiting for the exchange to reflect an action.
//!
//! Cancels and fills are eventually consistent on the exchange side. Instead of
//! sleeping a fixed time, state is polled on an exponential schedule until it
//! matches or the attempt budget runs out.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::{debug, warn};

use super::SettleConfig;

/// Bounded poll-until-confirmed loop.
#[derive(Debug, Clone)]
pub struct SettlePoller {
    config: SettleConfig,
}

impl SettlePoller {
    pub fn new(config: SettleConfig) -> Self {
        Self { config }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_delay_ms))
            .with_max_interval(Duration::from_millis(self.config.max_delay_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Poll `check` until it reports `true` or `max_attempts` checks have run.
    ///
    /// The first check runs immediately. A failing check counts as
    /// unconfirmed and is retried on the schedule.
    pub async fn wait_until<F, Fut>(&self, what: &str, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut schedule = self.schedule();
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match check().await {
                Ok(true) => {
                    debug!(what = what, attempt = attempt, "Confirmed");
                    return true;
                }
                Ok(false) => {
                    debug!(what = what, attempt = attempt, "Not settled yet");
                }
                Err(e) => {
                    warn!(what = what, attempt = attempt, error = %e, "Settlement check failed");
                }
            }

            if attempt < max_attempts {
                let delay = schedule
                    .next_backoff()
                    .unwrap_or(Duration::from_millis(self.config.max_delay_ms));
                tokio::time::sleep(delay).await;
            }
        }

        warn!(what = what, attempts = max_attempts, "Gave up waiting for confirmation");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> SettlePoller {
        SettlePoller::new(SettleConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            max_attempts: 4,
        })
    }

    #[tokio::test]
    async fn test_confirms_after_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let confirmed = fast()
            .wait_until("fill", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(n >= 3)
            })
            .await;

        assert!(confirmed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let confirmed = fast()
            .wait_until("close", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            })
            .await;

        assert!(!confirmed);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_errors_count_as_unconfirmed() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let confirmed = fast()
            .wait_until("cancel", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    anyhow::bail!("timeout");
                }
                Ok(true)
            })
            .await;

        assert!(confirmed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
