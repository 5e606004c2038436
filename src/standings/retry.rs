use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, StandingsError};

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded timeout + retry policy applied to every store call
#[derive(Debug, Clone, Copy)]
pub struct StoreRetry {
    /// Per-attempt deadline
    pub timeout: Duration,
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubles each retry, plus jitter
    pub base_backoff: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        StoreRetry {
            timeout: Duration::from_secs(5),
            attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

impl StoreRetry {
    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// the attempts are used up.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut backoff = self.base_backoff;
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StandingsError::Timeout {
                    operation,
                    after: self.timeout,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                    let delay = backoff + Duration::from_millis(jitter_ms);
                    warn!(
                        "Store call '{}' failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
