//! Break-decision policies for the circuit breaker.

use super::health::{HealthInfo, HealthMetrics};
use super::CircuitState;
use std::time::Instant;

/// Decides when a failure should break the circuit.
///
/// Called only under the state controller's lock.
pub(crate) trait BreakerBehavior: Send {
    /// Records a successful action.
    fn on_action_success(&mut self, state: CircuitState, now: Instant);

    /// Records a failed action; returns true when the circuit should break.
    fn on_action_failure(&mut self, state: CircuitState, now: Instant) -> bool;

    /// Resets tracking when the circuit closes.
    fn on_circuit_closed(&mut self, now: Instant);

    /// Returns window health for behaviors that track it.
    fn health_info(&self, now: Instant) -> Option<HealthInfo>;
}

/// Breaks after a run of consecutive handled failures.
pub(crate) struct ConsecutiveFailuresBehavior {
    failure_threshold: u32,
    consecutive_failures: u32,
}

impl ConsecutiveFailuresBehavior {
    pub(crate) fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            consecutive_failures: 0,
        }
    }
}

impl BreakerBehavior for ConsecutiveFailuresBehavior {
    fn on_action_success(&mut self, state: CircuitState, _now: Instant) {
        if state == CircuitState::Closed {
            self.consecutive_failures = 0;
        }
    }

    fn on_action_failure(&mut self, state: CircuitState, _now: Instant) -> bool {
        if state == CircuitState::Closed {
            self.consecutive_failures += 1;
            self.consecutive_failures >= self.failure_threshold
        } else {
            false
        }
    }

    fn on_circuit_closed(&mut self, _now: Instant) {
        self.consecutive_failures = 0;
    }

    fn health_info(&self, _now: Instant) -> Option<HealthInfo> {
        None
    }
}

/// Breaks when the windowed failure rate crosses a threshold, once enough
/// samples have accumulated.
pub(crate) struct HealthMetricsBehavior {
    metrics: Box<dyn HealthMetrics>,
    failure_threshold: f64,
    minimum_throughput: u32,
}

impl HealthMetricsBehavior {
    pub(crate) fn new(
        metrics: Box<dyn HealthMetrics>,
        failure_threshold: f64,
        minimum_throughput: u32,
    ) -> Self {
        Self {
            metrics,
            failure_threshold,
            minimum_throughput,
        }
    }
}

impl BreakerBehavior for HealthMetricsBehavior {
    fn on_action_success(&mut self, _state: CircuitState, now: Instant) {
        self.metrics.increment_success(now);
    }

    fn on_action_failure(&mut self, _state: CircuitState, now: Instant) -> bool {
        self.metrics.increment_failure(now);
        let info = self.metrics.health_info(now);
        info.throughput >= self.minimum_throughput && info.failure_rate >= self.failure_threshold
    }

    fn on_circuit_closed(&mut self, now: Instant) {
        self.metrics.reset(now);
    }

    fn health_info(&self, now: Instant) -> Option<HealthInfo> {
        Some(self.metrics.health_info(now))
    }
}
