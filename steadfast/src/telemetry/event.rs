//! Telemetry event and metric value types.

use crate::outcome::Outcome;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Well-known event names emitted by the built-in strategies.
pub mod names {
    /// The timeout strategy rejected an execution.
    pub const ON_TIMEOUT: &str = "OnTimeout";
    /// A circuit transitioned to open (or isolated).
    pub const ON_CIRCUIT_OPENED: &str = "OnCircuitOpened";
    /// A circuit transitioned to closed.
    pub const ON_CIRCUIT_CLOSED: &str = "OnCircuitClosed";
    /// A circuit transitioned to half-open.
    pub const ON_CIRCUIT_HALF_OPENED: &str = "OnCircuitHalfOpened";
    /// A user-supplied hook failed; the failure was swallowed.
    pub const ON_HOOK_FAILURE: &str = "OnHookFailure";
}

/// The execution metric recorded once per top-level pipeline execution.
pub const STRATEGY_EXECUTION_DURATION: &str = "strategy-execution-duration";

/// Metric tag keys.
pub mod tags {
    /// Name of the builder that produced the pipeline.
    pub const BUILDER_NAME: &str = "builder-name";
    /// Instance key distinguishing pipelines built from the same builder.
    pub const STRATEGY_KEY: &str = "strategy-key";
    /// Result type label of the execution.
    pub const RESULT_TYPE: &str = "result-type";
    /// Failure label when the execution failed.
    pub const EXCEPTION_NAME: &str = "exception-name";
    /// `"Healthy"` when no resilience event was reported, else `"Unhealthy"`.
    pub const EXECUTION_HEALTH: &str = "execution-health";
}

/// Value of the health tag for event-free executions.
pub const HEALTH_HEALTHY: &str = "Healthy";
/// Value of the health tag when resilience events were reported.
pub const HEALTH_UNHEALTHY: &str = "Unhealthy";

/// Returns an ISO-8601 timestamp for the current wall-clock time.
pub(crate) fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A compact summary of a callback outcome attached to telemetry events.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    /// Whether the callback succeeded.
    pub succeeded: bool,
    /// Failure label when the callback failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_name: Option<&'static str>,
}

impl OutcomeSummary {
    /// Summarizes an outcome.
    #[must_use]
    pub fn of<T>(outcome: &Outcome<T>) -> Self {
        Self {
            succeeded: outcome.is_success(),
            exception_name: outcome.exception_name(),
        }
    }
}

/// An event reported by a strategy through its telemetry source.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    /// The event name.
    pub event_name: String,
    /// Name of the builder that produced the pipeline.
    pub builder_name: String,
    /// Builder-level properties.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub builder_properties: HashMap<String, String>,
    /// Name of the reporting strategy.
    pub strategy_name: String,
    /// Kind of the reporting strategy.
    pub strategy_type: &'static str,
    /// When the event was reported (ISO 8601).
    pub timestamp: String,
    /// Event-specific payload.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub args: serde_json::Value,
    /// Outcome summary, when the event carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeSummary>,
    /// Enricher-added tags.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

/// The per-execution duration metric.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetric {
    /// Metric name.
    pub name: &'static str,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
    /// Metric tags, including enricher-added tags.
    pub tags: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResilienceError;

    #[test]
    fn test_outcome_summary_success() {
        let summary = OutcomeSummary::of(&Outcome::Success(1));
        assert!(summary.succeeded);
        assert!(summary.exception_name.is_none());
    }

    #[test]
    fn test_outcome_summary_failure() {
        let summary =
            OutcomeSummary::of(&Outcome::<u8>::Failure(ResilienceError::failure("boom")));
        assert!(!summary.succeeded);
        assert_eq!(summary.exception_name, Some("UserFailure"));
    }

    #[test]
    fn test_event_serialization() {
        let event = TelemetryEvent {
            event_name: names::ON_TIMEOUT.to_string(),
            builder_name: "checkout".to_string(),
            builder_properties: HashMap::new(),
            strategy_name: "timeout".to_string(),
            strategy_type: "timeout",
            timestamp: iso_timestamp(),
            args: serde_json::json!({"timeout_ms": 100}),
            outcome: None,
            tags: HashMap::new(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_name"], "OnTimeout");
        assert_eq!(json["args"]["timeout_ms"], 100);
        assert!(json.get("outcome").is_none());
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with('Z'));
    }
}
