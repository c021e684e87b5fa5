use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

/// Growing-interval schedule for waiting on an external flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
            max_attempts: 20,
        }
    }
}

impl PollSchedule {
    /// Wait after the `attempt`-th unsuccessful check (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let millis = (self.interval.as_millis() as f64 * factor)
            .min(self.max_interval.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    TimedOut { attempts: u32 },
}

/// Checks `condition` after the initial delay and then on the schedule's
/// growing interval, until it yields a value or attempts run out.
pub async fn poll_until<T, F, Fut>(schedule: PollSchedule, mut condition: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    sleep(schedule.initial_delay).await;

    for attempt in 1..=schedule.max_attempts {
        if let Some(value) = condition().await {
            return PollOutcome::Ready {
                value,
                attempts: attempt,
            };
        }

        if attempt < schedule.max_attempts {
            let delay = schedule.delay_after(attempt);
            debug!(
                attempt,
                wait_ms = delay.as_millis() as u64,
                "condition not met; polling again"
            );
            sleep(delay).await;
        }
    }

    PollOutcome::TimedOut {
        attempts: schedule.max_attempts,
    }
}
