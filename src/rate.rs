use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Rate controller for open-loop request dispatch
pub struct RateController {
    interval: Duration,
    next_send: Option<Instant>,
}

impl RateController {
    /// Create new rate controller for target requests per second
    pub fn new(per_second: f64) -> Self {
        let interval = Duration::from_nanos((1_000_000_000.0 / per_second) as u64);
        Self {
            interval,
            next_send: None,
        }
    }

    /// Wait until it's time to send the next request.
    ///
    /// Slots are scheduled from the previous slot, not from when the caller
    /// woke up, so a slow iteration does not lower the achieved rate.
    pub async fn wait_for_next(&mut self) {
        let now = Instant::now();
        let slot = match self.next_send {
            Some(next) if next > now => {
                sleep_until(next).await;
                next
            }
            _ => now,
        };
        self.next_send = Some(slot + self.interval);
    }

    /// Get configured interval between requests
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
