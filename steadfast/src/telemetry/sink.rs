//! Telemetry sink trait and implementations.

use super::event::{ExecutionMetric, TelemetryEvent};
use tracing::{debug, info, Level};

/// Trait for sinks that receive telemetry events and execution metrics.
///
/// Sinks must never fail and must never block the reporting strategy beyond
/// synchronous dispatch.
pub trait TelemetrySink: Send + Sync {
    /// Receives a strategy event.
    fn on_event(&self, event: &TelemetryEvent);

    /// Receives an execution metric.
    fn on_execution(&self, metric: &ExecutionMetric);
}

/// A sink that discards everything.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTelemetrySink;

impl TelemetrySink for NoOpTelemetrySink {
    fn on_event(&self, _event: &TelemetryEvent) {
        // Intentionally empty - discards all events
    }

    fn on_execution(&self, _metric: &ExecutionMetric) {
        // Intentionally empty - discards all metrics
    }
}

/// A sink that logs through the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingTelemetrySink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingTelemetrySink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingTelemetrySink {
    /// Creates a new logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

impl TelemetrySink for LoggingTelemetrySink {
    fn on_event(&self, event: &TelemetryEvent) {
        match self.level {
            Level::DEBUG => {
                debug!(
                    event_name = %event.event_name,
                    strategy = %event.strategy_name,
                    builder = %event.builder_name,
                    args = ?event.args,
                    "Resilience event: {}", event.event_name
                );
            }
            _ => {
                info!(
                    event_name = %event.event_name,
                    strategy = %event.strategy_name,
                    builder = %event.builder_name,
                    args = ?event.args,
                    "Resilience event: {}", event.event_name
                );
            }
        }
    }

    fn on_execution(&self, metric: &ExecutionMetric) {
        match self.level {
            Level::DEBUG => {
                debug!(
                    metric = %metric.name,
                    duration_ms = %metric.duration.as_millis(),
                    tags = ?metric.tags,
                    "Execution recorded"
                );
            }
            _ => {
                info!(
                    metric = %metric.name,
                    duration_ms = %metric.duration.as_millis(),
                    tags = ?metric.tags,
                    "Execution recorded"
                );
            }
        }
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingTelemetrySink {
    events: parking_lot::RwLock<Vec<TelemetryEvent>>,
    executions: parking_lot::RwLock<Vec<ExecutionMetric>>,
}

impl CollectingTelemetrySink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.read().clone()
    }

    /// Returns events with the given name.
    #[must_use]
    pub fn events_named(&self, event_name: &str) -> Vec<TelemetryEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.event_name == event_name)
            .cloned()
            .collect()
    }

    /// Returns the names of collected events in emission order.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|event| event.event_name.clone())
            .collect()
    }

    /// Returns all collected execution metrics.
    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionMetric> {
        self.executions.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events and metrics.
    pub fn clear(&self) {
        self.events.write().clear();
        self.executions.write().clear();
    }
}

impl TelemetrySink for CollectingTelemetrySink {
    fn on_event(&self, event: &TelemetryEvent) {
        self.events.write().push(event.clone());
    }

    fn on_execution(&self, metric: &ExecutionMetric) {
        self.executions.write().push(metric.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::event::names;
    use std::collections::HashMap;

    fn sample_event(name: &str) -> TelemetryEvent {
        TelemetryEvent {
            event_name: name.to_string(),
            builder_name: "b".to_string(),
            builder_properties: HashMap::new(),
            strategy_name: "s".to_string(),
            strategy_type: "timeout",
            timestamp: String::new(),
            args: serde_json::Value::Null,
            outcome: None,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn test_noop_sink() {
        let sink = NoOpTelemetrySink;
        sink.on_event(&sample_event("x"));
        // Should not panic
    }

    #[test]
    fn test_logging_sink() {
        let sink = LoggingTelemetrySink::debug();
        sink.on_event(&sample_event(names::ON_TIMEOUT));
        // Should not panic
    }

    #[test]
    fn test_collecting_sink_order_and_filter() {
        let sink = CollectingTelemetrySink::new();
        assert!(sink.is_empty());

        sink.on_event(&sample_event(names::ON_CIRCUIT_OPENED));
        sink.on_event(&sample_event(names::ON_CIRCUIT_HALF_OPENED));
        sink.on_event(&sample_event(names::ON_CIRCUIT_CLOSED));

        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.event_names(),
            vec![
                names::ON_CIRCUIT_OPENED.to_string(),
                names::ON_CIRCUIT_HALF_OPENED.to_string(),
                names::ON_CIRCUIT_CLOSED.to_string(),
            ]
        );
        assert_eq!(sink.events_named(names::ON_CIRCUIT_OPENED).len(), 1);
    }

    #[test]
    fn test_collecting_sink_clear() {
        let sink = CollectingTelemetrySink::new();
        sink.on_event(&sample_event("x"));
        sink.clear();
        assert!(sink.is_empty());
        assert!(sink.executions().is_empty());
    }
}
