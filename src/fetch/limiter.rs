//! Jittered rate limiting for outbound requests to one origin.
//!
//! A background producer emits one [`Permit`] at a time into a capacity-1
//! channel, then sleeps `base_interval + rand(0..jitter)` before producing
//! the next. At most one permit is ever buffered, so bursts are impossible
//! and automated polling keeps an organic-looking cadence.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Possession of a permit authorizes exactly one outbound request.
#[derive(Debug)]
pub struct Permit;

#[derive(Debug, Error)]
#[error("Rate limiter has been shut down")]
pub struct LimiterClosed;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Minimum spacing between produced permits.
    pub base_interval: Duration,
    /// Upper bound of the random extra delay added to each interval.
    pub jitter: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(3),
            jitter: Duration::from_secs(2),
        }
    }
}

/// Gate for all outbound fetches to one external origin.
///
/// The producer task is owned by the limiter: [`RateLimiter::shutdown`]
/// stops it explicitly, and dropping the limiter aborts it, so no schedule
/// loop outlives its owner.
pub struct RateLimiter {
    permits: Mutex<mpsc::Receiver<Permit>>,
    producer: JoinHandle<()>,
}

impl RateLimiter {
    /// Start the background producer and return the limiter.
    pub fn start(config: RateLimiterConfig) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let producer = tokio::spawn(async move {
            loop {
                // Blocks while the previous permit is still unconsumed, so
                // the channel never holds more than one.
                if tx.send(Permit).await.is_err() {
                    break;
                }
                tokio::time::sleep(next_interval(&config)).await;
            }
        });
        Self {
            permits: Mutex::new(rx),
            producer,
        }
    }

    /// Wait for the next permit.
    ///
    /// There is no cancellation here; callers bound their waiting through
    /// their own retry caps. Errors only after [`RateLimiter::shutdown`].
    pub async fn acquire(&self) -> Result<Permit, LimiterClosed> {
        let mut permits = self.permits.lock().await;
        permits.recv().await.ok_or(LimiterClosed)
    }

    /// Stop the producer. Pending and future `acquire` calls fail with
    /// [`LimiterClosed`].
    pub fn shutdown(&self) {
        self.producer.abort();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

fn next_interval(config: &RateLimiterConfig) -> Duration {
    let jitter_ms = config.jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return config.base_interval;
    }
    let extra = rand::thread_rng().gen_range(0..jitter_ms);
    config.base_interval + Duration::from_millis(extra)
}
