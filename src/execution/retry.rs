use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::ExecutionConfig;
use crate::error::{ChaosError, Result};

/// Bounded retry with a fixed backoff for transient remote failures.
///
/// Non-transient errors are returned immediately; exhausting the attempts
/// yields `RetriesExhausted` carrying the last error.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.max_connection_retries, config.retry_backoff())
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = String::new();
        for number in 1..=self.max_attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() => {
                    warn!(
                        operation = %operation,
                        attempt = number,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    last_error = error.to_string();
                    if number < self.max_attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                Err(error) => return Err(error),
            }
        }

        Err(ChaosError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}
