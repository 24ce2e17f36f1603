// Rate limiter enforcing a minimum spacing between outbound network calls.
// One limiter per requester instance; cache hits never touch it.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Default spacing between network calls: one second.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Pacing gate for actual network calls.
///
/// Tracks when the last call was admitted and blocks the next caller until
/// the configured interval has elapsed. The check, the sleep, and the stamp
/// of the new marker all happen under one lock, so concurrent callers
/// serialize through the gate and can never under-sleep.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// The configured minimum spacing.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until this caller may issue a network call, then record the
    /// admission time. The first call in a limiter's lifetime proceeds
    /// immediately.
    pub async fn wait_turn(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!(delay_ms = (ready_at - now).as_millis() as u64, "pacing delay");
                sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
