//! Rolling health statistics for the advanced circuit breaker.
//!
//! All operations run under the state controller's lock, so no internal
//! synchronization is needed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of sub-windows in the rolling implementation.
pub(crate) const WINDOW_COUNT: u32 = 10;

/// Smallest sub-window worth tracking separately.
pub(crate) const TIMER_RESOLUTION: Duration = Duration::from_millis(20);

/// A snapshot of breaker health over the sampling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthInfo {
    /// Number of samples in the window.
    pub throughput: u32,
    /// Number of failures in the window.
    pub failure_count: u32,
    /// `failure_count / throughput`, or 0 when the window is empty.
    pub failure_rate: f64,
}

impl HealthInfo {
    /// An empty window.
    pub(crate) const EMPTY: Self = Self {
        throughput: 0,
        failure_count: 0,
        failure_rate: 0.0,
    };

    pub(crate) fn from_counts(successes: u32, failures: u32) -> Self {
        let throughput = successes + failures;
        let failure_rate = if throughput > 0 {
            f64::from(failures) / f64::from(throughput)
        } else {
            0.0
        };
        Self {
            throughput,
            failure_count: failures,
            failure_rate,
        }
    }
}

/// Counters aggregated over a sampling window.
pub(crate) trait HealthMetrics: Send {
    fn increment_success(&mut self, now: Instant);
    fn increment_failure(&mut self, now: Instant);
    fn health_info(&self, now: Instant) -> HealthInfo;
    fn reset(&mut self, now: Instant);
}

/// Picks the implementation for a sampling duration: short windows get a
/// single counter pair, longer ones a rolling set of sub-windows.
pub(crate) fn create_health_metrics(
    sampling_duration: Duration,
    now: Instant,
) -> Box<dyn HealthMetrics> {
    if sampling_duration < TIMER_RESOLUTION * WINDOW_COUNT {
        Box::new(SingleHealthMetrics::new(sampling_duration, now))
    } else {
        Box::new(RollingHealthMetrics::new(sampling_duration, now))
    }
}

/// One counter pair, reset when the window expires.
pub(crate) struct SingleHealthMetrics {
    sampling_duration: Duration,
    window_start: Instant,
    successes: u32,
    failures: u32,
}

impl SingleHealthMetrics {
    pub(crate) fn new(sampling_duration: Duration, now: Instant) -> Self {
        Self {
            sampling_duration,
            window_start: now,
            successes: 0,
            failures: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.sampling_duration {
            self.successes = 0;
            self.failures = 0;
            self.window_start = now;
        }
    }
}

impl HealthMetrics for SingleHealthMetrics {
    fn increment_success(&mut self, now: Instant) {
        self.roll(now);
        self.successes += 1;
    }

    fn increment_failure(&mut self, now: Instant) {
        self.roll(now);
        self.failures += 1;
    }

    fn health_info(&self, now: Instant) -> HealthInfo {
        if now.saturating_duration_since(self.window_start) >= self.sampling_duration {
            HealthInfo::EMPTY
        } else {
            HealthInfo::from_counts(self.successes, self.failures)
        }
    }

    fn reset(&mut self, now: Instant) {
        self.successes = 0;
        self.failures = 0;
        self.window_start = now;
    }
}

struct HealthWindow {
    start: Instant,
    successes: u32,
    failures: u32,
}

/// Ten equal sub-windows advanced by the clock; sub-windows older than the
/// sampling duration are discarded.
pub(crate) struct RollingHealthMetrics {
    sampling_duration: Duration,
    window_span: Duration,
    windows: VecDeque<HealthWindow>,
}

impl RollingHealthMetrics {
    pub(crate) fn new(sampling_duration: Duration, _now: Instant) -> Self {
        Self {
            sampling_duration,
            window_span: sampling_duration / WINDOW_COUNT,
            windows: VecDeque::with_capacity(WINDOW_COUNT as usize + 1),
        }
    }

    fn current(&mut self, now: Instant) -> &mut HealthWindow {
        while self
            .windows
            .front()
            .is_some_and(|w| now.saturating_duration_since(w.start) >= self.sampling_duration)
        {
            self.windows.pop_front();
        }

        let needs_new = match self.windows.back() {
            Some(window) => now.saturating_duration_since(window.start) >= self.window_span,
            None => true,
        };
        if needs_new {
            self.windows.push_back(HealthWindow {
                start: now,
                successes: 0,
                failures: 0,
            });
        }
        self.windows.back_mut().expect("window was just ensured")
    }
}

impl HealthMetrics for RollingHealthMetrics {
    fn increment_success(&mut self, now: Instant) {
        self.current(now).successes += 1;
    }

    fn increment_failure(&mut self, now: Instant) {
        self.current(now).failures += 1;
    }

    fn health_info(&self, now: Instant) -> HealthInfo {
        let mut successes = 0u32;
        let mut failures = 0u32;
        for window in &self.windows {
            if now.saturating_duration_since(window.start) < self.sampling_duration {
                successes += window.successes;
                failures += window.failures;
            }
        }
        HealthInfo::from_counts(successes, failures)
    }

    fn reset(&mut self, _now: Instant) {
        self.windows.clear();
    }
}
