//! Telemetry source for strategy events and execution metrics.
//!
//! Strategies report named events through a narrow source that binds builder
//! identity and strategy identity. The source is fan-out only: dispatch to
//! sinks is synchronous and sinks never fail. Enrichers may add tags before
//! an event or metric reaches the sinks.

mod enrichment;
mod event;
mod sink;

pub use enrichment::{Enricher, EnrichmentContext};
pub use event::{
    names, tags, ExecutionMetric, OutcomeSummary, TelemetryEvent, HEALTH_HEALTHY,
    HEALTH_UNHEALTHY, STRATEGY_EXECUTION_DURATION,
};
pub use sink::{CollectingTelemetrySink, LoggingTelemetrySink, NoOpTelemetrySink, TelemetrySink};

use crate::context::{ReportedResilienceEvent, ResilienceContext};
use crate::outcome::Outcome;
use std::collections::HashMap;
use std::sync::Arc;

/// The fan-out point binding builder identity to telemetry sinks.
pub struct TelemetrySource {
    builder_name: String,
    builder_properties: HashMap<String, String>,
    sinks: Vec<Arc<dyn TelemetrySink>>,
    enrichers: Vec<Arc<dyn Enricher>>,
}

impl TelemetrySource {
    /// Creates a source with no sinks or enrichers.
    #[must_use]
    pub fn new(builder_name: impl Into<String>) -> Self {
        Self {
            builder_name: builder_name.into(),
            builder_properties: HashMap::new(),
            sinks: Vec::new(),
            enrichers: Vec::new(),
        }
    }

    /// Adds a builder-level property carried on every event.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.builder_properties.insert(key.into(), value.into());
        self
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Adds an enricher.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    /// Returns the builder name.
    #[must_use]
    pub fn builder_name(&self) -> &str {
        &self.builder_name
    }

    /// Returns the builder-level properties.
    #[must_use]
    pub fn builder_properties(&self) -> &HashMap<String, String> {
        &self.builder_properties
    }

    /// Runs every enricher for the described dispatch.
    pub(crate) fn run_enrichers(
        &self,
        ectx: &EnrichmentContext<'_>,
        tags: &mut HashMap<String, String>,
    ) {
        for enricher in &self.enrichers {
            enricher.enrich(ectx, tags);
        }
    }

    /// Dispatches an event to every sink.
    pub(crate) fn emit(&self, event: &TelemetryEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }

    /// Dispatches an execution metric to every sink.
    pub(crate) fn record(&self, metric: &ExecutionMetric) {
        for sink in &self.sinks {
            sink.on_execution(metric);
        }
    }
}

impl std::fmt::Debug for TelemetrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySource")
            .field("builder_name", &self.builder_name)
            .field("sinks", &self.sinks.len())
            .field("enrichers", &self.enrichers.len())
            .finish()
    }
}

/// A telemetry handle bound to one strategy's identity.
///
/// Reporting appends a [`ReportedResilienceEvent`] to the execution context
/// (when one is in flight) and fans the enriched event out to every sink.
#[derive(Clone)]
pub struct StrategyTelemetry {
    source: Arc<TelemetrySource>,
    strategy_name: String,
    strategy_type: &'static str,
}

impl StrategyTelemetry {
    /// Binds a strategy identity to a source.
    #[must_use]
    pub fn new(
        source: Arc<TelemetrySource>,
        strategy_name: impl Into<String>,
        strategy_type: &'static str,
    ) -> Self {
        Self {
            source,
            strategy_name: strategy_name.into(),
            strategy_type,
        }
    }

    /// Returns the bound source.
    #[must_use]
    pub fn source(&self) -> &Arc<TelemetrySource> {
        &self.source
    }

    /// Returns the bound strategy name.
    #[must_use]
    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    /// Reports an event without an outcome.
    pub fn report(
        &self,
        event_name: &str,
        ctx: Option<&ResilienceContext>,
        args: serde_json::Value,
    ) {
        self.dispatch(event_name, ctx, args, None);
    }

    /// Reports an event carrying an outcome summary.
    pub fn report_outcome<T>(
        &self,
        event_name: &str,
        ctx: Option<&ResilienceContext>,
        args: serde_json::Value,
        outcome: &Outcome<T>,
    ) {
        self.dispatch(event_name, ctx, args, Some(OutcomeSummary::of(outcome)));
    }

    /// Reports an event with an already-built outcome summary.
    pub(crate) fn report_summary(
        &self,
        event_name: &str,
        ctx: Option<&ResilienceContext>,
        args: serde_json::Value,
        outcome: Option<OutcomeSummary>,
    ) {
        self.dispatch(event_name, ctx, args, outcome);
    }

    fn dispatch(
        &self,
        event_name: &str,
        ctx: Option<&ResilienceContext>,
        args: serde_json::Value,
        outcome: Option<OutcomeSummary>,
    ) {
        if let Some(ctx) = ctx {
            ctx.add_event(ReportedResilienceEvent::new(event_name));
        }

        let mut extra_tags = HashMap::new();
        let ectx = EnrichmentContext {
            event_name,
            builder_name: &self.source.builder_name,
            strategy_name: Some(&self.strategy_name),
            context: ctx,
            outcome: outcome.as_ref(),
        };
        self.source.run_enrichers(&ectx, &mut extra_tags);

        let telemetry_event = TelemetryEvent {
            event_name: event_name.to_string(),
            builder_name: self.source.builder_name.clone(),
            builder_properties: self.source.builder_properties.clone(),
            strategy_name: self.strategy_name.clone(),
            strategy_type: self.strategy_type,
            timestamp: event::iso_timestamp(),
            args,
            outcome,
            tags: extra_tags,
        };
        self.source.emit(&telemetry_event);
    }
}

impl std::fmt::Debug for StrategyTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyTelemetry")
            .field("strategy_name", &self.strategy_name)
            .field("strategy_type", &self.strategy_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResilienceError;

    #[test]
    fn test_report_appends_context_event_and_dispatches() {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let source = Arc::new(
            TelemetrySource::new("checkout")
                .with_property("env", "test")
                .with_sink(sink.clone()),
        );
        let telemetry = StrategyTelemetry::new(source, "timeout", "timeout");

        let ctx = ResilienceContext::new();
        telemetry.report(names::ON_TIMEOUT, Some(&ctx), serde_json::json!({"ms": 100}));

        let events = ctx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, names::ON_TIMEOUT);

        let collected = sink.events();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].builder_name, "checkout");
        assert_eq!(
            collected[0].builder_properties.get("env").map(String::as_str),
            Some("test")
        );
    }

    #[test]
    fn test_enrichers_run_before_sinks() {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let enricher = |_: &EnrichmentContext<'_>, tags: &mut HashMap<String, String>| {
            tags.insert("zone".to_string(), "a".to_string());
        };
        let source = Arc::new(
            TelemetrySource::new("checkout")
                .with_sink(sink.clone())
                .with_enricher(Arc::new(enricher)),
        );
        let telemetry = StrategyTelemetry::new(source, "breaker", "circuit-breaker");

        telemetry.report(names::ON_CIRCUIT_OPENED, None, serde_json::Value::Null);

        let collected = sink.events();
        assert_eq!(collected[0].tags.get("zone").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_report_outcome_summarizes_failure() {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let source = Arc::new(TelemetrySource::new("b").with_sink(sink.clone()));
        let telemetry = StrategyTelemetry::new(source, "breaker", "circuit-breaker");

        let outcome: Outcome<u8> = Outcome::Failure(ResilienceError::failure("down"));
        telemetry.report_outcome(
            names::ON_CIRCUIT_OPENED,
            None,
            serde_json::Value::Null,
            &outcome,
        );

        let collected = sink.events();
        let summary = collected[0].outcome.as_ref().unwrap();
        assert!(!summary.succeeded);
        assert_eq!(summary.exception_name, Some("UserFailure"));
    }
}
