//! # Steadfast
//!
//! A composable resilience library: pipelines of fault-handling strategies
//! that wrap user operations and apply transient-failure policies.
//!
//! Steadfast provides:
//!
//! - **Strategy pipelines**: Ordered composition of strategies, outermost
//!   first, each wrapping the callback of the next
//! - **Timeout strategy**: Deadline enforcement through cooperative
//!   cancellation, with per-call timeout generation
//! - **Circuit breaker strategy**: Consecutive-failure and rolling
//!   health-metric variants with manual control and state inspection
//! - **Execution contexts**: Pooled, per-call carriers of cancellation,
//!   execution mode, typed properties, and reported events
//! - **Telemetry**: Event reporting and execution metrics with pluggable
//!   sinks and tag enrichment
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use steadfast::prelude::*;
//! use std::time::Duration;
//!
//! let pipeline: Pipeline<String> = PipelineBuilder::new("checkout")
//!     .with_timeout(TimeoutOptions::new(Duration::from_secs(2)))
//!     .with_circuit_breaker(CircuitBreakerOptions::new().with_failure_threshold(5))
//!     .build()?;
//!
//! let result = pipeline.execute(|ctx| async move { fetch_cart(&ctx).await }).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod circuit_breaker;
pub mod context;
pub mod errors;
pub mod outcome;
pub mod strategy;
pub mod telemetry;
pub mod time;
pub mod timeout;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{
        CancellationRegistration, CancellationSource, CancellationSourcePool, CancellationToken,
    };
    pub use crate::circuit_breaker::{
        AdvancedCircuitBreakerOptions, CircuitBreakerManualControl, CircuitBreakerOptions,
        CircuitBreakerStateProvider, CircuitState, HealthInfo,
    };
    pub use crate::context::{
        ContextPool, PropertyKey, ReportedResilienceEvent, ResilienceContext, ResultTypeTag,
    };
    pub use crate::errors::ResilienceError;
    pub use crate::outcome::Outcome;
    pub use crate::strategy::{Pipeline, PipelineBuilder, Strategy, StrategyCallback};
    pub use crate::telemetry::{
        CollectingTelemetrySink, Enricher, EnrichmentContext, LoggingTelemetrySink,
        NoOpTelemetrySink, TelemetryEvent, TelemetrySink,
    };
    pub use crate::time::{FakeTimeProvider, SystemTimeProvider, TimeProvider};
    pub use crate::timeout::{TimeoutEventArgs, TimeoutOptions};
}
