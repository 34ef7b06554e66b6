use std::{fmt::Display, future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded retries with a fixed pause between attempts.
///
/// `attempts` counts retries, not tries: zero means a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Total number of tries the policy allows.
    #[must_use]
    pub const fn max_tries(&self) -> u32 {
        self.attempts.saturating_add(1)
    }

    /// Runs `op` until it succeeds or the policy is exhausted, returning the
    /// last error in the latter case. `op` receives the zero-based try index.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts => {
                    warn!(
                        attempt = attempt + 1,
                        max_tries = self.max_tries(),
                        error = %e,
                        "Connection attempt failed"
                    );
                    attempt += 1;
                    debug!(delay_ms = self.delay.as_millis() as u64, "Waiting before retry");
                    sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}
