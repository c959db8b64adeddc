//! Randomized retry with an overall time budget

use crate::crawler::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Retry schedule for transient fetch failures
///
/// Each retry waits a random interval in `[min_wait, max_wait]`. Retrying
/// stops once the next wait would push the total past `max_elapsed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(min_wait: Duration, max_wait: Duration, max_elapsed: Duration) -> Self {
        Self {
            min_wait,
            max_wait: max_wait.max(min_wait),
            max_elapsed,
        }
    }

    /// Forum pages: 1-10 s waits, one minute in total
    pub fn documents() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(60),
        )
    }

    /// Binary downloads: 1-10 s waits, ten seconds in total
    pub fn assets() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(10),
        )
    }

    /// Picks the next wait
    pub fn next_wait(&self) -> Duration {
        if self.max_wait <= self.min_wait {
            return self.min_wait;
        }
        rand::thread_rng().gen_range(self.min_wait..=self.max_wait)
    }

    /// Returns the wait before the next attempt, or `None` when out of budget
    pub fn should_retry(&self, elapsed: Duration) -> Option<Duration> {
        let wait = self.next_wait();
        (elapsed + wait <= self.max_elapsed).then_some(wait)
    }

    /// Runs `attempt` until it succeeds, fails permanently or runs out of budget
    ///
    /// Only [`FetchError::Transient`] is retried; every other error is
    /// returned as is. Running out of budget yields
    /// [`FetchError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, url: &str, mut attempt: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            match self.should_retry(started.elapsed()) {
                Some(wait) => {
                    tracing::warn!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempts,
                        url,
                        error,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                None => {
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts,
                        last_error: error.to_string(),
                    });
                }
            }
        }
    }
}
