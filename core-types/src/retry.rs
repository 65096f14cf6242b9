// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::time::Duration;
use tokio::time::sleep;

/// Fixed-delay retry policy for async operations.
///
/// Deliberately has no exponential backoff: the scheduling window already
/// bounds how long a job can keep retrying, so a flat delay between attempts
/// is all that is needed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn default_fetch() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    /// Runs `op` up to `max_attempts` times, sleeping `delay` between
    /// attempts. Returns the first success or the last error.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_fetch()
    }
}
