//! Timeout strategy: deadline enforcement through cooperative cancellation.
//!
//! The strategy swaps the context's cancellation token for one armed to fire
//! at the deadline and linked to the outer token. A cancellation observed by
//! the callback is classified on exit: inner fired and outer did not means
//! the deadline elapsed; anything else propagates unchanged.

use crate::cancellation::CancellationSourcePool;
use crate::context::ResilienceContext;
use crate::errors::ResilienceError;
use crate::strategy::{Strategy, StrategyCallback};
use crate::telemetry::{names, StrategyTelemetry};
use crate::time::TimeProvider;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Sentinel meaning "no deadline applies".
pub const INFINITE_TIMEOUT: Duration = Duration::MAX;

/// The default timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns true when `timeout` denotes an enforceable deadline.
///
/// Non-positive and infinite values mean the strategy is disabled for the
/// call and simply forwards to the callback.
#[must_use]
pub fn is_valid_timeout(timeout: Duration) -> bool {
    timeout > Duration::ZERO && timeout < INFINITE_TIMEOUT
}

/// A per-call timeout generator.
pub type TimeoutGenerator =
    Arc<dyn Fn(Arc<ResilienceContext>) -> BoxFuture<'static, Duration> + Send + Sync>;

/// The hook invoked after a timeout rejection is reported.
pub type TimeoutHook =
    Arc<dyn Fn(TimeoutEventArgs) -> BoxFuture<'static, Result<(), ResilienceError>> + Send + Sync>;

/// Arguments handed to the `on_timeout` hook.
///
/// The previous cancellation token is already restored on the context when
/// the hook runs, so the hook observes the outer scope.
#[derive(Clone)]
pub struct TimeoutEventArgs {
    /// The execution context.
    pub context: Arc<ResilienceContext>,
    /// The deadline that elapsed.
    pub timeout: Duration,
    /// The cancellation cause observed by the callback.
    pub cause: String,
}

impl std::fmt::Debug for TimeoutEventArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutEventArgs")
            .field("timeout", &self.timeout)
            .field("cause", &self.cause)
            .finish()
    }
}

/// Options for the timeout strategy.
#[derive(Clone)]
pub struct TimeoutOptions {
    /// Strategy name used in telemetry.
    pub name: String,
    /// The default deadline.
    pub timeout: Duration,
    /// Optional per-call deadline generator; an invalid generated value
    /// disables the strategy for that call.
    pub timeout_generator: Option<TimeoutGenerator>,
    /// Optional hook invoked after a timeout rejection is reported.
    pub on_timeout: Option<TimeoutHook>,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            name: "timeout".to_string(),
            timeout: DEFAULT_TIMEOUT,
            timeout_generator: None,
            on_timeout: None,
        }
    }
}

impl TimeoutOptions {
    /// Creates options with the given default deadline.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Sets the strategy name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets a per-call deadline generator.
    #[must_use]
    pub fn with_timeout_generator<F, Fut>(mut self, generator: F) -> Self
    where
        F: Fn(Arc<ResilienceContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Duration> + Send + 'static,
    {
        self.timeout_generator = Some(Arc::new(move |ctx| Box::pin(generator(ctx))));
        self
    }

    /// Sets the `on_timeout` hook.
    #[must_use]
    pub fn with_on_timeout<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(TimeoutEventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        self.on_timeout = Some(Arc::new(move |args| Box::pin(hook(args))));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ResilienceError> {
        if !is_valid_timeout(self.timeout) {
            return Err(ResilienceError::invalid_options(
                "timeout",
                "must be a positive finite duration",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TimeoutOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutOptions")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("has_generator", &self.timeout_generator.is_some())
            .field("has_on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

/// The timeout strategy.
pub struct TimeoutStrategy {
    options: TimeoutOptions,
    telemetry: StrategyTelemetry,
    time_provider: Arc<dyn TimeProvider>,
}

impl TimeoutStrategy {
    pub(crate) fn new(
        options: TimeoutOptions,
        telemetry: StrategyTelemetry,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            options,
            telemetry,
            time_provider,
        }
    }
}

#[async_trait]
impl<T> Strategy<T> for TimeoutStrategy
where
    T: Send + 'static,
{
    fn strategy_name(&self) -> &str {
        &self.options.name
    }

    fn strategy_type(&self) -> &'static str {
        "timeout"
    }

    async fn execute_core(
        &self,
        callback: StrategyCallback<T>,
        ctx: Arc<ResilienceContext>,
    ) -> Result<T, ResilienceError> {
        let timeout = match &self.options.timeout_generator {
            Some(generator) => generator(ctx.clone()).await,
            None => self.options.timeout,
        };

        if !is_valid_timeout(timeout) {
            return callback(ctx).await;
        }

        let source = CancellationSourcePool::shared().acquire();
        let previous = ctx.cancellation();
        let registration = source.link_to(&previous);
        self.time_provider.cancel_after(&source, timeout);
        let _ = ctx.set_cancellation(source.token());

        let result = callback(ctx.clone()).await;

        // The previous token is restored before anything else runs so hooks
        // and later strategies observe the outer scope.
        let _ = ctx.set_cancellation(previous.clone());
        registration.dispose();
        let inner_fired = source.is_cancelled();
        CancellationSourcePool::shared().release(source);

        match result {
            Err(ResilienceError::OperationCancelled { reason })
                if inner_fired && !previous.is_cancelled() =>
            {
                let cause = reason;
                self.telemetry.report(
                    names::ON_TIMEOUT,
                    Some(&ctx),
                    serde_json::json!({
                        "timeout_ms": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "cause": cause,
                    }),
                );

                if let Some(hook) = &self.options.on_timeout {
                    let args = TimeoutEventArgs {
                        context: ctx.clone(),
                        timeout,
                        cause: cause.clone(),
                    };
                    if let Err(hook_error) = hook(args).await {
                        warn!(error = %hook_error, "on_timeout hook failed");
                        self.telemetry.report(
                            names::ON_HOOK_FAILURE,
                            Some(&ctx),
                            serde_json::json!({
                                "hook": "on_timeout",
                                "error": hook_error.to_string(),
                            }),
                        );
                    }
                }

                Err(ResilienceError::TimeoutRejected { timeout, cause })
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for TimeoutStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutStrategy")
            .field("options", &self.options)
            .finish()
    }
}
