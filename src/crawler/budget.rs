//! Connection and request-rate budget shared by all workers

use crate::config::{CrawlerConfig, MIN_REQUESTS_PER_SECOND};
use crate::crawler::FetchError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, timeout, Instant};

/// Caps open HTTP connections and spaces requests to a target rate
///
/// Every request first takes a connection slot (waiting at most
/// `acquire_timeout`), then waits for its turn in the rate schedule. The slot
/// is released when the returned [`BudgetPermit`] is dropped.
#[derive(Debug)]
pub struct RequestBudget {
    connections: Arc<Semaphore>,
    acquire_timeout: Duration,
    interval: Duration,
    next_slot: Mutex<Instant>,
}

/// Held for the duration of one HTTP request
#[derive(Debug)]
pub struct BudgetPermit {
    _permit: OwnedSemaphorePermit,
}

impl RequestBudget {
    /// A non-positive rate disables spacing; positive rates below
    /// [`MIN_REQUESTS_PER_SECOND`] are clamped to it.
    pub fn new(connections: usize, requests_per_second: f64, acquire_timeout: Duration) -> Self {
        let interval = if requests_per_second > 0.0 && requests_per_second.is_finite() {
            let rate = requests_per_second.max(MIN_REQUESTS_PER_SECOND);
            Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        Self {
            connections: Arc::new(Semaphore::new(connections.max(1))),
            acquire_timeout,
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.http_connections as usize,
            config.requests_per_second,
            config.acquire_timeout(),
        )
    }

    /// Waits for a connection slot and a rate slot
    pub async fn acquire(&self) -> Result<BudgetPermit, FetchError> {
        let permit = match timeout(
            self.acquire_timeout,
            Arc::clone(&self.connections).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // the semaphore is never closed, so both arms mean "no slot"
            Ok(Err(_)) | Err(_) => return Err(FetchError::BudgetExhausted(self.acquire_timeout)),
        };

        let slot = self.reserve_slot();
        if slot > Instant::now() {
            sleep_until(slot).await;
        }

        Ok(BudgetPermit { _permit: permit })
    }

    /// Number of free connection slots
    pub fn available(&self) -> usize {
        self.connections.available_permits()
    }

    fn reserve_slot(&self) -> Instant {
        let mut next = self
            .next_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let slot = if *next > now { *next } else { now };
        *next = slot + self.interval;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let budget = RequestBudget::new(2, 1000.0, Duration::from_secs(1));

        let first = budget.acquire().await.unwrap();
        let _second = budget.acquire().await.unwrap();
        assert_eq!(budget.available(), 0);

        drop(first);
        assert_eq!(budget.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let budget = RequestBudget::new(1, 1000.0, Duration::from_millis(50));
        let _held = budget.acquire().await.unwrap();

        let result = budget.acquire().await;
        assert_eq!(
            result.unwrap_err(),
            FetchError::BudgetExhausted(Duration::from_millis(50))
        );
    }

    #[tokio::test]
    async fn test_requests_are_spaced() {
        let budget = RequestBudget::new(4, 20.0, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..3 {
            let _permit = budget.acquire().await.unwrap();
        }

        // three requests at 20/s need at least two 50ms gaps
        assert!(start.elapsed() >= Duration::from_millis(95));
    }

    #[test]
    fn test_tiny_rate_is_clamped() {
        let budget = RequestBudget::new(1, 1e-300, Duration::from_secs(1));
        assert!(budget.interval > Duration::from_secs(999));
        assert!(budget.interval < Duration::from_secs(1001));
    }

    #[test]
    fn test_non_positive_rate_disables_spacing() {
        let budget = RequestBudget::new(1, 0.0, Duration::from_secs(1));
        assert_eq!(budget.interval, Duration::ZERO);
    }
}
