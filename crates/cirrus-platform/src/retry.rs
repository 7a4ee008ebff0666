//! Bounded retry with a fixed delay between attempts
//!
//! OS tools such as `wipefs` or `parted` fail transiently while udev or the
//! kernel still hold the device. Operations driven through a
//! [`RetryStrategy`] must be safe to run more than once.

use crate::error::{PlatformError, Result};
use crate::system::Clock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Failure of a single attempt, and whether another attempt may help
#[derive(Debug)]
pub struct AttemptError {
    pub retry: bool,
    pub error: PlatformError,
}

impl AttemptError {
    pub fn retryable(error: PlatformError) -> Self {
        Self { retry: true, error }
    }

    pub fn fatal(error: PlatformError) -> Self {
        Self {
            retry: false,
            error,
        }
    }
}

/// Result of a single attempt
pub type AttemptResult<T> = std::result::Result<T, AttemptError>;

/// Retry policy as it appears in configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    /// Partition tools: 20 attempts, 3 seconds apart.
    fn default() -> Self {
        Self {
            max_attempts: 20,
            delay_ms: 3_000,
        }
    }
}

/// Runs an operation until it succeeds, fails fatally, or runs out of attempts
pub struct RetryStrategy {
    max_attempts: u32,
    delay: Duration,
    clock: Arc<dyn Clock>,
}

impl RetryStrategy {
    pub fn new(max_attempts: u32, delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            clock,
        }
    }

    pub fn from_config(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.max_attempts, config.delay(), clock)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it returns `Ok`.
    ///
    /// A non-retryable error is returned unchanged. After the last attempt the
    /// final error is wrapped in [`PlatformError::RetriesExhausted`]. The delay
    /// only happens between attempts.
    pub async fn attempt<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AttemptResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(AttemptError { retry: false, error }) => return Err(error),
                Err(AttemptError { retry: true, error }) => {
                    if attempt >= self.max_attempts {
                        return Err(PlatformError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Attempt failed, retrying in {:?}",
                        self.delay
                    );
                    self.clock.sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
