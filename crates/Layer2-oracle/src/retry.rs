//! Transport retry for oracle calls
//!
//! Only failures that never produced a reply are retried here. A reply that
//! arrives but fails validation is re-asked by [`OracleClient`](crate::OracleClient)
//! against its own `malformed_retries` budget.

use rand::Rng;
use skillforge_foundation::OracleConfig;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first call
    pub max_retries: u32,
    /// Wait before the first retry; doubled for each further one
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative spread applied to every wait, 0.0 disables it
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// A rate-limit hint may never push a wait past the request timeout
    pub fn from_oracle_config(config: &OracleConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: config.max_retries,
            max_delay: defaults.max_delay.min(config.timeout()),
            ..defaults
        }
    }

    /// Wait before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let wait = self.base_delay.saturating_mul(1 << exponent).min(self.max_delay);
        if self.jitter <= 0.0 {
            return wait;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        wait.mul_f64(factor.max(0.0))
    }

    fn wait_before(&self, classification: RetryClassification, retry: u32) -> Option<Duration> {
        if retry > self.max_retries {
            return None;
        }
        match classification {
            RetryClassification::NoRetry => None,
            RetryClassification::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(ms).min(self.max_delay)),
            RetryClassification::RateLimited { retry_after_ms: None }
            | RetryClassification::Retry => Some(self.backoff(retry)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// Transient: timeouts, 5xx, dropped connections
    Retry,
    /// Auth, bad request, unknown model
    NoRetry,
    /// Server asked to slow down, optionally saying for how long
    RateLimited { retry_after_ms: Option<u64> },
}

pub trait RetryableError {
    fn classify(&self) -> RetryClassification;
}

/// Call `operation` until it succeeds, fails permanently, or the budget runs out
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, label: &str, mut operation: F) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!("{}: reached the oracle after {} retry(ies)", label, retries);
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let Some(wait) = config.wait_before(error.classify(), retries + 1) else {
            if retries == config.max_retries && retries > 0 {
                warn!("{}: giving up after {} retry(ies): {}", label, retries, error);
            } else {
                debug!("{}: not retrying: {}", label, error);
            }
            return Err(error);
        };

        retries += 1;
        warn!(
            "{}: call failed ({}), retry {}/{} in {:?}",
            label, error, retries, config.max_retries, wait
        );
        sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn steady() -> RetryConfig {
        RetryConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = steady();
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_secs(1));
        assert_eq!(config.backoff(3), Duration::from_secs(2));
        assert_eq!(config.backoff(12), Duration::from_secs(20));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let config = RetryConfig::default();
        for _ in 0..20 {
            let wait = config.backoff(1).as_millis();
            assert!((400..=600).contains(&wait), "{wait}");
        }
    }

    #[test]
    fn test_rate_limit_hint_is_capped_by_timeout() {
        let oracle = OracleConfig {
            timeout_ms: 2_000,
            max_retries: 1,
            ..Default::default()
        };
        let config = RetryConfig::from_oracle_config(&oracle);
        let hinted = RetryClassification::RateLimited {
            retry_after_ms: Some(60_000),
        };
        assert_eq!(config.wait_before(hinted, 1), Some(Duration::from_secs(2)));
        assert_eq!(config.wait_before(hinted, 2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, OracleError> = with_retry(&steady(), "decomposition", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(OracleError::ServerError("busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_respected() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 2,
            ..steady()
        };
        let result: Result<(), OracleError> = with_retry(&config, "code_generation", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::ServerError("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), OracleError> = with_retry(&RetryConfig::default(), "routing", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::Authentication("bad key".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
