//! Bounded, jittered retry for transient log-transport failures

use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{RegistryError, Result, TransportError};

/// Retry policy applied uniformly to transient transport errors.
///
/// Fatal errors and validation errors are never retried; exhaustion of
/// transient retries surfaces as
/// [`RegistryError::Unavailable`](crate::error::RegistryError::Unavailable).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    multiplier: f64,
    max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_backoff: Duration,
        multiplier: f64,
        max_jitter: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            multiplier,
            max_jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            config.multiplier,
            Duration::from_millis(config.max_jitter_ms),
        )
    }

    /// Run `op`, retrying transient failures with exponential backoff
    /// plus uniform jitter.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> std::result::Result<T, TransportError>,
    ) -> Result<T> {
        let mut backoff = self.base_backoff;
        let mut last_detail = String::new();

        for attempt in 1..=self.max_attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e @ TransportError::Fatal(_)) => return Err(e.into()),
                Err(TransportError::Transient(detail)) => {
                    last_detail = detail;
                    if attempt < self.max_attempts {
                        let sleep = backoff + self.jitter();
                        warn!(
                            what,
                            attempt,
                            max_attempts = self.max_attempts,
                            backoff_ms = sleep.as_millis() as u64,
                            detail = %last_detail,
                            "transient transport failure, retrying"
                        );
                        thread::sleep(sleep);
                        backoff = backoff.mul_f64(self.multiplier);
                    }
                }
            }
        }

        Err(RegistryError::Unavailable {
            attempts: self.max_attempts,
            detail: last_detail,
        })
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=max))
        }
    }
}
