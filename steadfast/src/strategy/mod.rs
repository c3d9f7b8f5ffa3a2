//! Strategy contract and pipeline composition.
//!
//! A strategy is a pluggable behavior wrapping a user callback; a pipeline
//! is an ordered composition of strategies, outermost first, and is itself a
//! strategy.

mod builder;
mod pipeline;

pub use builder::PipelineBuilder;
pub use pipeline::Pipeline;

use crate::context::ResilienceContext;
use crate::errors::ResilienceError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The boxed future produced by a strategy callback.
pub type StrategyFuture<T> = Pin<Box<dyn Future<Output = Result<T, ResilienceError>> + Send>>;

/// The callback handed to a strategy.
///
/// `FnOnce` makes the at-most-once contract structural: a strategy cannot
/// invoke the callback twice.
pub type StrategyCallback<T> =
    Box<dyn FnOnce(Arc<ResilienceContext>) -> StrategyFuture<T> + Send>;

/// A fault-handling strategy wrapping a user callback.
///
/// A strategy may swap the context's cancellation token (restoring the
/// previous token on every exit path), append resilience events, and inspect
/// the outcome; the callback's result flows back unchanged unless the
/// strategy's contract says otherwise.
#[async_trait]
pub trait Strategy<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Returns the configured strategy name.
    fn strategy_name(&self) -> &str;

    /// Returns the strategy kind label used in telemetry.
    fn strategy_type(&self) -> &'static str;

    /// Executes the callback under this strategy.
    ///
    /// The callback is invoked at most once.
    async fn execute_core(
        &self,
        callback: StrategyCallback<T>,
        ctx: Arc<ResilienceContext>,
    ) -> Result<T, ResilienceError>;
}

/// Boxes a plain async closure into a [`StrategyCallback`].
pub(crate) fn box_callback<T, F, Fut>(callback: F) -> StrategyCallback<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<ResilienceContext>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(callback(ctx)))
}
