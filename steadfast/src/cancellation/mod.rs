//! Cooperative cancellation sources and tokens.
//!
//! This module provides:
//! - Cancellation sources that own the right to cancel
//! - Cheap observer tokens with disposable callback registrations
//! - An awaitable cancellation future for async callbacks
//! - A process-wide source pool with reset-on-release reuse

mod pool;
mod source;

pub use pool::CancellationSourcePool;
pub use source::{
    CancellationRegistration, CancellationSource, CancellationToken, CancellationTrigger,
    Cancelled,
};
