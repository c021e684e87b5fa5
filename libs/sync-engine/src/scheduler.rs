use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::debug;

pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    Manual,
}

/// "A refresh is running" latch. Acquisition is non-blocking: a second
/// caller gets `None` instead of waiting.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: Arc<AtomicBool>,
}

impl InFlight {
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                active: Arc::clone(&self.active),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Releases the latch on drop, including when the refresh future is
/// cancelled mid-flight.
#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Trailing-edge debounce: every trigger pushes the deadline out by the
/// window, so a burst collapses into one firing.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consumes the pending firing if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Decides when refresh cycles run. The periodic timer only runs while
/// auto-refresh is enabled and the window is visible.
#[derive(Debug)]
pub struct RefreshScheduler {
    period: Duration,
    auto_refresh: bool,
    visible: bool,
    next_tick: Option<Instant>,
    manual: Debouncer,
    in_flight: InFlight,
}

impl RefreshScheduler {
    pub fn new(period: Duration, debounce_window: Duration, auto_refresh: bool) -> Self {
        let mut scheduler = Self {
            period,
            auto_refresh,
            visible: true,
            next_tick: None,
            manual: Debouncer::new(debounce_window),
            in_flight: InFlight::default(),
        };
        scheduler.rearm();
        scheduler
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn is_armed(&self) -> bool {
        self.next_tick.is_some()
    }

    fn rearm(&mut self) {
        self.next_tick = (self.auto_refresh && self.visible)
            .then(|| Instant::now() + self.period);
    }

    /// Hiding cancels the timer. Showing re-arms it for a full period
    /// without refreshing immediately.
    pub fn set_visible(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        self.rearm();
        debug!(visible, armed = self.is_armed(), "window visibility changed");
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        if self.auto_refresh == enabled {
            return;
        }
        self.auto_refresh = enabled;
        self.rearm();
        debug!(enabled, armed = self.is_armed(), "auto-refresh setting changed");
    }

    /// Queues a debounced manual refresh. Dropped, returning `false`, while
    /// a refresh is in flight.
    pub fn request_manual(&mut self) -> bool {
        if self.in_flight.is_active() {
            return false;
        }
        self.manual.trigger(Instant::now());
        true
    }

    /// Resolves at the next periodic tick or debounced manual request,
    /// whichever comes first. Cancel-safe: state only changes after the
    /// wait completes.
    pub async fn next_trigger(&mut self) -> Trigger {
        let target = match (self.next_tick, self.manual.deadline()) {
            (None, None) => return std::future::pending::<Trigger>().await,
            (Some(tick), None) => tick,
            (None, Some(manual)) => manual,
            (Some(tick), Some(manual)) => tick.min(manual),
        };

        sleep_until(target).await;

        if self.manual.take_due(target) {
            Trigger::Manual
        } else {
            self.next_tick = Some(target + self.period);
            Trigger::Periodic
        }
    }
}
