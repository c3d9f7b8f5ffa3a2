//! Execution context for resilience pipelines.
//!
//! This module provides:
//! - Per-call mutable contexts carrying cancellation, mode, and properties
//! - A typed, key-indexed property bag
//! - A process-wide context pool with clear-on-release reuse

mod execution;
mod pool;
mod properties;

pub use execution::{ReportedResilienceEvent, ResilienceContext, ResultTypeTag};
pub use pool::ContextPool;
pub use properties::{ContextProperties, PropertyKey};
