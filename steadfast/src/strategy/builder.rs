//! Pipeline builder with option validation.

use super::{Pipeline, Strategy};
use crate::circuit_breaker::{
    AdvancedCircuitBreakerOptions, CircuitBreakerOptions, CircuitBreakerStrategy,
};
use crate::errors::ResilienceError;
use crate::telemetry::{Enricher, StrategyTelemetry, TelemetrySink, TelemetrySource};
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::timeout::{TimeoutOptions, TimeoutStrategy};
use std::collections::HashMap;
use std::sync::Arc;

enum PendingStrategy<T> {
    Timeout(TimeoutOptions),
    CircuitBreaker(CircuitBreakerOptions<T>),
    AdvancedCircuitBreaker(AdvancedCircuitBreakerOptions<T>),
    Custom(Arc<dyn Strategy<T>>),
}

/// Builds a [`Pipeline`] from an ordered list of strategy options.
///
/// Strategies run in the order they are added, outermost first. Every
/// options record is validated before any strategy is built; a validation
/// failure surfaces as `InvalidOptions` and nothing is constructed.
pub struct PipelineBuilder<T> {
    name: String,
    instance_key: Option<String>,
    properties: HashMap<String, String>,
    sinks: Vec<Arc<dyn TelemetrySink>>,
    enrichers: Vec<Arc<dyn Enricher>>,
    time_provider: Arc<dyn TimeProvider>,
    pending: Vec<PendingStrategy<T>>,
}

impl<T> PipelineBuilder<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a builder with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_key: None,
            properties: HashMap::new(),
            sinks: Vec::new(),
            enrichers: Vec::new(),
            time_provider: Arc::new(SystemTimeProvider::new()),
            pending: Vec::new(),
        }
    }

    /// Sets the instance key carried as the `strategy-key` metric tag.
    #[must_use]
    pub fn with_instance_key(mut self, key: impl Into<String>) -> Self {
        self.instance_key = Some(key.into());
        self
    }

    /// Adds a builder-level property carried on every telemetry event.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Adds a telemetry sink.
    #[must_use]
    pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Adds a telemetry enricher.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    /// Replaces the time provider used by time-based strategies.
    #[must_use]
    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Adds a timeout strategy.
    #[must_use]
    pub fn with_timeout(mut self, options: TimeoutOptions) -> Self {
        self.pending.push(PendingStrategy::Timeout(options));
        self
    }

    /// Adds a consecutive-failure circuit breaker.
    #[must_use]
    pub fn with_circuit_breaker(mut self, options: CircuitBreakerOptions<T>) -> Self {
        self.pending.push(PendingStrategy::CircuitBreaker(options));
        self
    }

    /// Adds a health-metric circuit breaker.
    #[must_use]
    pub fn with_advanced_circuit_breaker(
        mut self,
        options: AdvancedCircuitBreakerOptions<T>,
    ) -> Self {
        self.pending
            .push(PendingStrategy::AdvancedCircuitBreaker(options));
        self
    }

    /// Adds a caller-supplied strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy<T>>) -> Self {
        self.pending.push(PendingStrategy::Custom(strategy));
        self
    }

    /// Validates every options record, then builds the pipeline.
    pub fn build(self) -> Result<Pipeline<T>, ResilienceError> {
        let Self {
            name,
            instance_key,
            properties,
            sinks,
            enrichers,
            time_provider,
            pending,
        } = self;

        for strategy in &pending {
            match strategy {
                PendingStrategy::Timeout(options) => options.validate()?,
                PendingStrategy::CircuitBreaker(options) => options.validate()?,
                PendingStrategy::AdvancedCircuitBreaker(options) => options.validate()?,
                PendingStrategy::Custom(_) => {}
            }
        }

        let mut source = TelemetrySource::new(name.clone());
        for (key, value) in properties {
            source = source.with_property(key, value);
        }
        for sink in sinks {
            source = source.with_sink(sink);
        }
        for enricher in enrichers {
            source = source.with_enricher(enricher);
        }
        let source = Arc::new(source);

        let mut strategies: Vec<Arc<dyn Strategy<T>>> = Vec::with_capacity(pending.len());
        for strategy in pending {
            match strategy {
                PendingStrategy::Timeout(options) => {
                    let telemetry =
                        StrategyTelemetry::new(source.clone(), options.name.clone(), "timeout");
                    strategies.push(Arc::new(TimeoutStrategy::new(
                        options,
                        telemetry,
                        time_provider.clone(),
                    )));
                }
                PendingStrategy::CircuitBreaker(options) => {
                    strategies.push(Arc::new(CircuitBreakerStrategy::consecutive(
                        options,
                        source.clone(),
                        time_provider.clone(),
                    )));
                }
                PendingStrategy::AdvancedCircuitBreaker(options) => {
                    strategies.push(Arc::new(CircuitBreakerStrategy::advanced(
                        options,
                        source.clone(),
                        time_provider.clone(),
                    )));
                }
                PendingStrategy::Custom(strategy) => strategies.push(strategy),
            }
        }

        Ok(Pipeline::from_parts(
            name,
            instance_key,
            strategies,
            source,
            time_provider,
        ))
    }
}

impl<T> std::fmt::Debug for PipelineBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("strategies", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_empty_pipeline() {
        let pipeline = PipelineBuilder::<u32>::new("empty").build().unwrap();
        assert_eq!(pipeline.name(), "empty");
        assert_eq!(pipeline.strategy_count(), 0);
    }

    #[test]
    fn test_build_full_stack() {
        let pipeline = PipelineBuilder::<u32>::new("stack")
            .with_instance_key("stack-1")
            .with_property("env", "test")
            .with_timeout(TimeoutOptions::new(Duration::from_secs(1)))
            .with_circuit_breaker(CircuitBreakerOptions::new())
            .build()
            .unwrap();

        assert_eq!(pipeline.strategy_count(), 2);
    }

    #[test]
    fn test_invalid_timeout_surfaces_before_build() {
        let result = PipelineBuilder::<u32>::new("bad")
            .with_timeout(TimeoutOptions::new(Duration::ZERO))
            .build();

        assert!(matches!(
            result,
            Err(ResilienceError::InvalidOptions {
                field: "timeout",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_breaker_options_surface_before_build() {
        let result = PipelineBuilder::<u32>::new("bad")
            .with_circuit_breaker(
                CircuitBreakerOptions::new().with_break_duration(Duration::from_millis(10)),
            )
            .build();
        assert!(result.is_err());

        let result = PipelineBuilder::<u32>::new("bad")
            .with_advanced_circuit_breaker(
                AdvancedCircuitBreakerOptions::new().with_minimum_throughput(1),
            )
            .build();
        assert!(matches!(
            result,
            Err(ResilienceError::InvalidOptions {
                field: "minimum_throughput",
                ..
            })
        ));
    }
}
