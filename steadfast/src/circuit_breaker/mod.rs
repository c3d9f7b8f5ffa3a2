//! Circuit breaker strategy.
//!
//! The breaker is factored into three collaborating parts:
//! - A state controller owning the single critical section and the total
//!   order of transitions and their events
//! - A behavior policy deciding when failures break the circuit
//!   (consecutive-failure count or windowed failure rate)
//! - Health metrics aggregating samples over a sampling window
//!
//! The breaker observes outcomes: successes and failures flow back to the
//! caller unchanged; only blocked calls fail with `BrokenCircuit`.

mod behavior;
mod controller;
mod health;
mod manual;

pub use health::HealthInfo;
pub use manual::{CircuitBreakerManualControl, CircuitBreakerStateProvider};

use crate::context::ResilienceContext;
use crate::errors::ResilienceError;
use crate::outcome::Outcome;
use crate::strategy::{Strategy, StrategyCallback};
use crate::telemetry::{StrategyTelemetry, TelemetrySource};
use crate::time::TimeProvider;
use async_trait::async_trait;
use behavior::{BreakerBehavior, ConsecutiveFailuresBehavior, HealthMetricsBehavior};
use controller::{BreakerEventHooks, CircuitStateController, ControllerHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Smallest accepted break and sampling duration.
pub(crate) const MIN_DURATION: Duration = Duration::from_millis(500);

/// The state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Calls are blocked until the break expires.
    Open,
    /// A probe call is permitted to test recovery.
    HalfOpen,
    /// Manually blocked; only manual control leaves this state.
    Isolated,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
            Self::Isolated => "isolated",
        };
        f.write_str(label)
    }
}

/// Arguments handed to the `should_handle` predicate.
pub struct CircuitBreakerPredicateArguments {
    /// The execution context of the inspected call.
    pub context: Arc<ResilienceContext>,
}

/// Predicate deciding which outcomes count against the circuit.
pub type ShouldHandle<T> =
    Arc<dyn Fn(&Outcome<T>, &CircuitBreakerPredicateArguments) -> bool + Send + Sync>;

/// An async hook invoked on a circuit transition.
pub type BreakerHook<A> = Arc<
    dyn Fn(A) -> futures::future::BoxFuture<'static, Result<(), ResilienceError>> + Send + Sync,
>;

/// Arguments for the `on_opened` hook.
#[derive(Debug, Clone, Copy)]
pub struct CircuitOpenedArgs {
    /// How long the circuit stays open.
    pub break_duration: Duration,
    /// True when the transition came from manual control.
    pub is_manual: bool,
}

/// Arguments for the `on_closed` hook.
#[derive(Debug, Clone, Copy)]
pub struct CircuitClosedArgs {
    /// True when the transition came from manual control.
    pub is_manual: bool,
}

/// Arguments for the `on_half_opened` hook.
#[derive(Debug, Clone, Copy)]
pub struct CircuitHalfOpenedArgs;

fn default_should_handle<T>() -> ShouldHandle<T> {
    Arc::new(|outcome, _args| match outcome {
        Outcome::Failure(error) => !error.is_cancellation(),
        Outcome::Success(_) => false,
    })
}

/// Options for the consecutive-failure circuit breaker.
#[derive(Clone)]
pub struct CircuitBreakerOptions<T> {
    /// Strategy name used in telemetry.
    pub name: String,
    /// Consecutive handled failures that break the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open after breaking.
    pub break_duration: Duration,
    /// Which outcomes count against the circuit. Defaults to any failure
    /// other than a cancellation.
    pub should_handle: ShouldHandle<T>,
    /// Hook invoked after the circuit opens.
    pub on_opened: Option<BreakerHook<CircuitOpenedArgs>>,
    /// Hook invoked after the circuit closes.
    pub on_closed: Option<BreakerHook<CircuitClosedArgs>>,
    /// Hook invoked after the circuit half-opens.
    pub on_half_opened: Option<BreakerHook<CircuitHalfOpenedArgs>>,
    /// Manual control handle to attach.
    pub manual_control: Option<CircuitBreakerManualControl>,
    /// State provider handle to attach.
    pub state_provider: Option<CircuitBreakerStateProvider>,
}

impl<T> Default for CircuitBreakerOptions<T> {
    fn default() -> Self {
        Self {
            name: "circuit-breaker".to_string(),
            failure_threshold: 5,
            break_duration: Duration::from_secs(5),
            should_handle: default_should_handle(),
            on_opened: None,
            on_closed: None,
            on_half_opened: None,
            manual_control: None,
            state_provider: None,
        }
    }
}

impl<T> CircuitBreakerOptions<T> {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the consecutive failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the break duration.
    #[must_use]
    pub fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Sets the handled-outcome predicate.
    #[must_use]
    pub fn with_should_handle<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Outcome<T>, &CircuitBreakerPredicateArguments) -> bool + Send + Sync + 'static,
    {
        self.should_handle = Arc::new(predicate);
        self
    }

    /// Sets the `on_opened` hook.
    #[must_use]
    pub fn with_on_opened<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitOpenedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        self.on_opened = Some(Arc::new(move |args| Box::pin(hook(args))));
        self
    }

    /// Sets the `on_closed` hook.
    #[must_use]
    pub fn with_on_closed<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitClosedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        self.on_closed = Some(Arc::new(move |args| Box::pin(hook(args))));
        self
    }

    /// Sets the `on_half_opened` hook.
    #[must_use]
    pub fn with_on_half_opened<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitHalfOpenedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        self.on_half_opened = Some(Arc::new(move |args| Box::pin(hook(args))));
        self
    }

    /// Attaches a manual control handle.
    #[must_use]
    pub fn with_manual_control(mut self, control: CircuitBreakerManualControl) -> Self {
        self.manual_control = Some(control);
        self
    }

    /// Attaches a state provider handle.
    #[must_use]
    pub fn with_state_provider(mut self, provider: CircuitBreakerStateProvider) -> Self {
        self.state_provider = Some(provider);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ResilienceError> {
        if self.break_duration < MIN_DURATION {
            return Err(ResilienceError::invalid_options(
                "break_duration",
                "must be at least 500ms",
            ));
        }
        if self.failure_threshold < 1 {
            return Err(ResilienceError::invalid_options(
                "failure_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl<T> fmt::Debug for CircuitBreakerOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("break_duration", &self.break_duration)
            .finish()
    }
}

/// Options for the health-metric circuit breaker.
#[derive(Clone)]
pub struct AdvancedCircuitBreakerOptions<T> {
    /// Strategy name used in telemetry.
    pub name: String,
    /// Failure rate in `(0, 1]` that breaks the circuit.
    pub failure_threshold: f64,
    /// Minimum samples in the window before the rate is evaluated.
    pub minimum_throughput: u32,
    /// Length of the rolling sampling window.
    pub sampling_duration: Duration,
    /// How long the circuit stays open after breaking.
    pub break_duration: Duration,
    /// Which outcomes count against the circuit.
    pub should_handle: ShouldHandle<T>,
    /// Hook invoked after the circuit opens.
    pub on_opened: Option<BreakerHook<CircuitOpenedArgs>>,
    /// Hook invoked after the circuit closes.
    pub on_closed: Option<BreakerHook<CircuitClosedArgs>>,
    /// Hook invoked after the circuit half-opens.
    pub on_half_opened: Option<BreakerHook<CircuitHalfOpenedArgs>>,
    /// Manual control handle to attach.
    pub manual_control: Option<CircuitBreakerManualControl>,
    /// State provider handle to attach.
    pub state_provider: Option<CircuitBreakerStateProvider>,
}

impl<T> Default for AdvancedCircuitBreakerOptions<T> {
    fn default() -> Self {
        Self {
            name: "circuit-breaker".to_string(),
            failure_threshold: 0.1,
            minimum_throughput: 100,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(5),
            should_handle: default_should_handle(),
            on_opened: None,
            on_closed: None,
            on_half_opened: None,
            manual_control: None,
            state_provider: None,
        }
    }
}

impl<T> AdvancedCircuitBreakerOptions<T> {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the failure rate threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the minimum throughput.
    #[must_use]
    pub fn with_minimum_throughput(mut self, throughput: u32) -> Self {
        self.minimum_throughput = throughput;
        self
    }

    /// Sets the sampling duration.
    #[must_use]
    pub fn with_sampling_duration(mut self, duration: Duration) -> Self {
        self.sampling_duration = duration;
        self
    }

    /// Sets the break duration.
    #[must_use]
    pub fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Sets the handled-outcome predicate.
    #[must_use]
    pub fn with_should_handle<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Outcome<T>, &CircuitBreakerPredicateArguments) -> bool + Send + Sync + 'static,
    {
        self.should_handle = Arc::new(predicate);
        self
    }

    /// Sets the `on_opened` hook.
    #[must_use]
    pub fn with_on_opened<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitOpenedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        self.on_opened = Some(Arc::new(move |args| Box::pin(hook(args))));
        self
    }

    /// Sets the `on_closed` hook.
    #[must_use]
    pub fn with_on_closed<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitClosedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        self.on_closed = Some(Arc::new(move |args| Box::pin(hook(args))));
        self
    }

    /// Sets the `on_half_opened` hook.
    #[must_use]
    pub fn with_on_half_opened<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitHalfOpenedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        self.on_half_opened = Some(Arc::new(move |args| Box::pin(hook(args))));
        self
    }

    /// Attaches a manual control handle.
    #[must_use]
    pub fn with_manual_control(mut self, control: CircuitBreakerManualControl) -> Self {
        self.manual_control = Some(control);
        self
    }

    /// Attaches a state provider handle.
    #[must_use]
    pub fn with_state_provider(mut self, provider: CircuitBreakerStateProvider) -> Self {
        self.state_provider = Some(provider);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ResilienceError> {
        if self.break_duration < MIN_DURATION {
            return Err(ResilienceError::invalid_options(
                "break_duration",
                "must be at least 500ms",
            ));
        }
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(ResilienceError::invalid_options(
                "failure_threshold",
                "must be within (0, 1]",
            ));
        }
        if self.minimum_throughput < 2 {
            return Err(ResilienceError::invalid_options(
                "minimum_throughput",
                "must be at least 2",
            ));
        }
        if self.sampling_duration < MIN_DURATION {
            return Err(ResilienceError::invalid_options(
                "sampling_duration",
                "must be at least 500ms",
            ));
        }
        Ok(())
    }
}

impl<T> fmt::Debug for AdvancedCircuitBreakerOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvancedCircuitBreakerOptions")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("minimum_throughput", &self.minimum_throughput)
            .field("sampling_duration", &self.sampling_duration)
            .field("break_duration", &self.break_duration)
            .finish()
    }
}

/// The circuit breaker strategy.
pub struct CircuitBreakerStrategy<T> {
    name: String,
    controller: Arc<CircuitStateController<T>>,
    should_handle: ShouldHandle<T>,
}

impl<T> CircuitBreakerStrategy<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn consecutive(
        options: CircuitBreakerOptions<T>,
        source: Arc<TelemetrySource>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let behavior = Box::new(ConsecutiveFailuresBehavior::new(options.failure_threshold));
        Self::from_parts(
            options.name,
            options.break_duration,
            behavior,
            options.should_handle,
            BreakerEventHooks {
                on_opened: options.on_opened,
                on_closed: options.on_closed,
                on_half_opened: options.on_half_opened,
            },
            options.manual_control,
            options.state_provider,
            source,
            time_provider,
        )
    }

    pub(crate) fn advanced(
        options: AdvancedCircuitBreakerOptions<T>,
        source: Arc<TelemetrySource>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let metrics =
            health::create_health_metrics(options.sampling_duration, time_provider.now());
        let behavior = Box::new(HealthMetricsBehavior::new(
            metrics,
            options.failure_threshold,
            options.minimum_throughput,
        ));
        Self::from_parts(
            options.name,
            options.break_duration,
            behavior,
            options.should_handle,
            BreakerEventHooks {
                on_opened: options.on_opened,
                on_closed: options.on_closed,
                on_half_opened: options.on_half_opened,
            },
            options.manual_control,
            options.state_provider,
            source,
            time_provider,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        name: String,
        break_duration: Duration,
        behavior: Box<dyn BreakerBehavior>,
        should_handle: ShouldHandle<T>,
        hooks: BreakerEventHooks,
        manual_control: Option<CircuitBreakerManualControl>,
        state_provider: Option<CircuitBreakerStateProvider>,
        source: Arc<TelemetrySource>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let telemetry = StrategyTelemetry::new(source, name.clone(), "circuit-breaker");
        let controller = Arc::new(CircuitStateController::new(
            break_duration,
            behavior,
            time_provider,
            hooks,
            telemetry,
        ));

        if let Some(control) = manual_control {
            control.attach(Arc::new(ControllerHandle(controller.clone())));
        }
        if let Some(provider) = state_provider {
            provider.attach(Arc::new(ControllerHandle(controller.clone())));
        }

        Self {
            name,
            controller,
            should_handle,
        }
    }
}

#[async_trait]
impl<T> Strategy<T> for CircuitBreakerStrategy<T>
where
    T: Clone + Send + 'static,
{
    fn strategy_name(&self) -> &str {
        &self.name
    }

    fn strategy_type(&self) -> &'static str {
        "circuit-breaker"
    }

    async fn execute_core(
        &self,
        callback: StrategyCallback<T>,
        ctx: Arc<ResilienceContext>,
    ) -> Result<T, ResilienceError> {
        let permit = self.controller.on_action_pre_execute();
        self.controller.process_events(Some(&ctx)).await;
        permit?;

        let result = callback(ctx.clone()).await;
        let outcome = Outcome::from_result(result);

        let args = CircuitBreakerPredicateArguments {
            context: ctx.clone(),
        };
        if (self.should_handle)(&outcome, &args) {
            self.controller.on_action_failure(&outcome);
        } else {
            self.controller.on_action_success(&outcome);
        }
        self.controller.process_events(Some(&ctx)).await;

        outcome.into_result()
    }
}

impl<T> fmt::Debug for CircuitBreakerStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerStrategy")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_predicate_handles_user_failures_only() {
        let predicate = default_should_handle::<u32>();
        let args = CircuitBreakerPredicateArguments {
            context: Arc::new(ResilienceContext::new()),
        };

        assert!(predicate(
            &Outcome::Failure(ResilienceError::failure("boom")),
            &args
        ));
        assert!(!predicate(&Outcome::Success(1), &args));
        assert!(!predicate(
            &Outcome::Failure(ResilienceError::cancelled("stop")),
            &args
        ));
    }

    #[test]
    fn test_basic_options_validation() {
        assert!(CircuitBreakerOptions::<u32>::new().validate().is_ok());

        let short_break = CircuitBreakerOptions::<u32>::new()
            .with_break_duration(Duration::from_millis(100));
        assert!(matches!(
            short_break.validate(),
            Err(ResilienceError::InvalidOptions {
                field: "break_duration",
                ..
            })
        ));

        let zero_threshold = CircuitBreakerOptions::<u32>::new().with_failure_threshold(0);
        assert!(zero_threshold.validate().is_err());
    }

    #[test]
    fn test_advanced_options_validation() {
        assert!(AdvancedCircuitBreakerOptions::<u32>::new().validate().is_ok());

        let bad_rate =
            AdvancedCircuitBreakerOptions::<u32>::new().with_failure_threshold(1.5);
        assert!(matches!(
            bad_rate.validate(),
            Err(ResilienceError::InvalidOptions {
                field: "failure_threshold",
                ..
            })
        ));

        let low_throughput =
            AdvancedCircuitBreakerOptions::<u32>::new().with_minimum_throughput(1);
        assert!(low_throughput.validate().is_err());

        let short_sampling = AdvancedCircuitBreakerOptions::<u32>::new()
            .with_sampling_duration(Duration::from_millis(100));
        assert!(short_sampling.validate().is_err());
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(CircuitState::Isolated.to_string(), "isolated");
    }
}
