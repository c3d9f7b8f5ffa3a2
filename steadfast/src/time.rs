//! Time abstraction used by every strategy that reads a clock or arms a
//! deadline.
//!
//! Routing all time reads through [`TimeProvider`] keeps breaker windows and
//! timeout deadlines deterministic under test.

use crate::cancellation::{CancellationSource, CancellationTrigger};
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// Reason attached to cancellations fired by an armed deadline.
pub(crate) const DEADLINE_ELAPSED: &str = "the operation deadline elapsed";

/// Clock and deadline source injected into strategies.
pub trait TimeProvider: fmt::Debug + Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Arms `source` to cancel after `delay`.
    ///
    /// Arming is bound to the source's current lease: if the source is reset
    /// before the deadline, the deadline is disarmed.
    fn cancel_after(&self, source: &CancellationSource, delay: Duration);
}

/// The default provider backed by the system clock.
///
/// Inside a tokio runtime, deadlines are armed as timer tasks (and therefore
/// follow a paused test clock); outside a runtime a dedicated thread timer
/// serves synchronous executions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl SystemTimeProvider {
    /// Creates the default provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn cancel_after(&self, source: &CancellationSource, delay: Duration) {
        let trigger = source.trigger();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    trigger.fire(DEADLINE_ELAPSED);
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    trigger.fire(DEADLINE_ELAPSED);
                });
            }
        }
    }
}

struct ArmedDeadline {
    due: Duration,
    trigger: CancellationTrigger,
}

/// A manually advanced clock for deterministic tests.
///
/// `cancel_after` records the deadline; [`advance`](Self::advance) moves the
/// clock and fires every deadline it passes, in due order.
pub struct FakeTimeProvider {
    base: Instant,
    elapsed: Mutex<Duration>,
    armed: Mutex<Vec<ArmedDeadline>>,
}

impl FakeTimeProvider {
    /// Creates a fake clock starting at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            armed: Mutex::new(Vec::new()),
        }
    }

    /// Advances the clock, firing armed deadlines that fall due.
    pub fn advance(&self, delta: Duration) {
        let now = {
            let mut elapsed = self.elapsed.lock();
            *elapsed += delta;
            *elapsed
        };
        self.fire_due(now);
    }

    /// Returns the total advanced duration.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }

    fn fire_due(&self, now: Duration) {
        let mut due = Vec::new();
        {
            let mut armed = self.armed.lock();
            let mut remaining = Vec::with_capacity(armed.len());
            for deadline in armed.drain(..) {
                if deadline.due <= now {
                    due.push(deadline);
                } else {
                    remaining.push(deadline);
                }
            }
            *armed = remaining;
        }
        due.sort_by_key(|deadline| deadline.due);
        for deadline in due {
            deadline.trigger.fire(DEADLINE_ELAPSED);
        }
    }
}

impl Default for FakeTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FakeTimeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeTimeProvider")
            .field("elapsed", &self.elapsed())
            .field("armed", &self.armed.lock().len())
            .finish()
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now(&self) -> Instant {
        self.base + *self.elapsed.lock()
    }

    fn cancel_after(&self, source: &CancellationSource, delay: Duration) {
        let now = *self.elapsed.lock();
        let deadline = ArmedDeadline {
            due: now + delay,
            trigger: source.trigger(),
        };
        if delay.is_zero() {
            deadline.trigger.fire(DEADLINE_ELAPSED);
            return;
        }
        self.armed.lock().push(deadline);
    }
}
