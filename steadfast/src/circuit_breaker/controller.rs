//! State controller owning the breaker's single critical section.

use super::behavior::BreakerBehavior;
use super::manual::BreakerHandle;
use super::{
    BreakerHook, CircuitClosedArgs, CircuitHalfOpenedArgs, CircuitOpenedArgs, CircuitState,
};
use crate::context::ResilienceContext;
use crate::errors::ResilienceError;
use crate::outcome::Outcome;
use crate::telemetry::{names, OutcomeSummary, StrategyTelemetry};
use crate::time::TimeProvider;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

/// Hooks invoked on circuit transitions.
pub(crate) struct BreakerEventHooks {
    pub on_opened: Option<BreakerHook<CircuitOpenedArgs>>,
    pub on_closed: Option<BreakerHook<CircuitClosedArgs>>,
    pub on_half_opened: Option<BreakerHook<CircuitHalfOpenedArgs>>,
}

/// A transition recorded under the state lock, dispatched afterwards.
#[derive(Clone)]
enum TransitionEvent {
    Opened {
        break_duration: Duration,
        is_manual: bool,
        outcome: Option<OutcomeSummary>,
    },
    Closed {
        is_manual: bool,
    },
    HalfOpened,
}

struct ControllerState<T> {
    circuit_state: CircuitState,
    break_until: Option<Instant>,
    last_outcome: Option<Outcome<T>>,
    behavior: Box<dyn BreakerBehavior>,
}

/// Owns all breaker state and the total order of its transitions.
///
/// Every transition happens under `state`; its event is queued under the
/// same lock and dispatched afterwards, so emission order always matches
/// transition order even when dispatch is deferred.
pub(crate) struct CircuitStateController<T> {
    state: Mutex<ControllerState<T>>,
    pending: Mutex<VecDeque<TransitionEvent>>,
    dispatch_lock: AsyncMutex<()>,
    break_duration: Duration,
    time_provider: Arc<dyn TimeProvider>,
    hooks: BreakerEventHooks,
    telemetry: StrategyTelemetry,
}

impl<T> CircuitStateController<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(
        break_duration: Duration,
        behavior: Box<dyn BreakerBehavior>,
        time_provider: Arc<dyn TimeProvider>,
        hooks: BreakerEventHooks,
        telemetry: StrategyTelemetry,
    ) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                circuit_state: CircuitState::Closed,
                break_until: None,
                last_outcome: None,
                behavior,
            }),
            pending: Mutex::new(VecDeque::new()),
            dispatch_lock: AsyncMutex::new(()),
            break_duration,
            time_provider,
            hooks,
            telemetry,
        }
    }

    /// Returns the current circuit state.
    pub(crate) fn circuit_state(&self) -> CircuitState {
        self.state.lock().circuit_state
    }

    /// Admits or rejects an action about to execute.
    ///
    /// An expired break transitions `Open` to `HalfOpen` and queues the
    /// half-open event exactly once.
    pub(crate) fn on_action_pre_execute(&self) -> Result<(), ResilienceError> {
        let state = &mut *self.state.lock();
        match state.circuit_state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Isolated => Err(Self::broken(state)),
            CircuitState::Open => {
                let now = self.time_provider.now();
                if state.break_until.is_some_and(|until| now >= until) {
                    state.circuit_state = CircuitState::HalfOpen;
                    state.break_until = None;
                    self.pending.lock().push_back(TransitionEvent::HalfOpened);
                    Ok(())
                } else {
                    Err(Self::broken(state))
                }
            }
        }
    }

    /// Records a successful action; a half-open success closes the circuit.
    pub(crate) fn on_action_success(&self, _outcome: &Outcome<T>) {
        let state = &mut *self.state.lock();
        let now = self.time_provider.now();
        let circuit_state = state.circuit_state;
        state.behavior.on_action_success(circuit_state, now);
        if circuit_state == CircuitState::HalfOpen {
            self.transition_closed(state, now, false);
        }
    }

    /// Records a failed action; breaks when the behavior says so or when
    /// the circuit was probing half-open.
    pub(crate) fn on_action_failure(&self, outcome: &Outcome<T>) {
        let state = &mut *self.state.lock();
        let now = self.time_provider.now();
        let circuit_state = state.circuit_state;
        let should_break = state.behavior.on_action_failure(circuit_state, now);

        let breaks = match circuit_state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => should_break,
            CircuitState::Open | CircuitState::Isolated => false,
        };
        if breaks {
            state.last_outcome = Some(outcome.clone());
            self.transition_open(state, CircuitState::Open, now, false);
        }
    }

    /// Forces the circuit into `Isolated`. Idempotent when already isolated.
    pub(crate) fn isolate(&self) {
        let state = &mut *self.state.lock();
        if state.circuit_state != CircuitState::Isolated {
            let now = self.time_provider.now();
            self.transition_open(state, CircuitState::Isolated, now, true);
        }
    }

    /// Forces the circuit into `Closed`. Idempotent when already closed.
    pub(crate) fn reset(&self) {
        let state = &mut *self.state.lock();
        if state.circuit_state != CircuitState::Closed {
            let now = self.time_provider.now();
            self.transition_closed(state, now, true);
        }
    }

    fn broken(state: &ControllerState<T>) -> ResilienceError {
        let cause = match &state.last_outcome {
            Some(Outcome::Failure(error)) => Some(Arc::new(error.clone())),
            _ => None,
        };
        ResilienceError::BrokenCircuit {
            state: state.circuit_state,
            cause,
        }
    }

    fn transition_open(
        &self,
        state: &mut ControllerState<T>,
        target: CircuitState,
        now: Instant,
        is_manual: bool,
    ) {
        state.circuit_state = target;
        state.break_until = if target == CircuitState::Open {
            Some(now + self.break_duration)
        } else {
            None
        };
        let outcome = state.last_outcome.as_ref().map(OutcomeSummary::of);
        self.pending.lock().push_back(TransitionEvent::Opened {
            break_duration: self.break_duration,
            is_manual,
            outcome,
        });
    }

    fn transition_closed(&self, state: &mut ControllerState<T>, now: Instant, is_manual: bool) {
        state.circuit_state = CircuitState::Closed;
        state.break_until = None;
        state.last_outcome = None;
        state.behavior.on_circuit_closed(now);
        self.pending
            .lock()
            .push_back(TransitionEvent::Closed { is_manual });
    }

    /// Dispatches queued transition events in order.
    ///
    /// Dispatch runs outside the state lock; hooks may therefore observe a
    /// circuit that has already moved on, but never out of order.
    pub(crate) async fn process_events(&self, ctx: Option<&Arc<ResilienceContext>>) {
        let _guard = self.dispatch_lock.lock().await;
        loop {
            let event = self.pending.lock().pop_front();
            let Some(event) = event else { break };
            self.dispatch_event(event, ctx.map(Arc::as_ref)).await;
        }
    }

    async fn dispatch_event(&self, event: TransitionEvent, ctx: Option<&ResilienceContext>) {
        match event {
            TransitionEvent::Opened {
                break_duration,
                is_manual,
                outcome,
            } => {
                self.telemetry.report_summary(
                    names::ON_CIRCUIT_OPENED,
                    ctx,
                    serde_json::json!({
                        "break_duration_ms":
                            u64::try_from(break_duration.as_millis()).unwrap_or(u64::MAX),
                        "is_manual": is_manual,
                    }),
                    outcome,
                );
                if let Some(hook) = &self.hooks.on_opened {
                    let args = CircuitOpenedArgs {
                        break_duration,
                        is_manual,
                    };
                    if let Err(error) = hook(args).await {
                        self.hook_failed("on_opened", &error, ctx);
                    }
                }
            }
            TransitionEvent::Closed { is_manual } => {
                self.telemetry.report(
                    names::ON_CIRCUIT_CLOSED,
                    ctx,
                    serde_json::json!({ "is_manual": is_manual }),
                );
                if let Some(hook) = &self.hooks.on_closed {
                    if let Err(error) = hook(CircuitClosedArgs { is_manual }).await {
                        self.hook_failed("on_closed", &error, ctx);
                    }
                }
            }
            TransitionEvent::HalfOpened => {
                self.telemetry
                    .report(names::ON_CIRCUIT_HALF_OPENED, ctx, serde_json::Value::Null);
                if let Some(hook) = &self.hooks.on_half_opened {
                    if let Err(error) = hook(CircuitHalfOpenedArgs).await {
                        self.hook_failed("on_half_opened", &error, ctx);
                    }
                }
            }
        }
    }

    fn hook_failed(&self, hook: &str, error: &ResilienceError, ctx: Option<&ResilienceContext>) {
        warn!(hook = hook, error = %error, "circuit breaker hook failed");
        self.telemetry.report(
            names::ON_HOOK_FAILURE,
            ctx,
            serde_json::json!({ "hook": hook, "error": error.to_string() }),
        );
    }
}

/// Type-erased handle adapting a controller to manual-control surfaces.
pub(crate) struct ControllerHandle<T>(pub(crate) Arc<CircuitStateController<T>>);

impl<T> BreakerHandle for ControllerHandle<T>
where
    T: Clone + Send + 'static,
{
    fn circuit_state(&self) -> CircuitState {
        self.0.circuit_state()
    }

    fn isolate(&self) -> BoxFuture<'static, ()> {
        let controller = self.0.clone();
        Box::pin(async move {
            controller.isolate();
            controller.process_events(None).await;
        })
    }

    fn reset(&self) -> BoxFuture<'static, ()> {
        let controller = self.0.clone();
        Box::pin(async move {
            controller.reset();
            controller.process_events(None).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::behavior::ConsecutiveFailuresBehavior;
    use super::*;
    use crate::telemetry::{CollectingTelemetrySink, TelemetrySource};
    use crate::time::FakeTimeProvider;

    fn controller_with_sink(
        threshold: u32,
        break_duration: Duration,
        clock: Arc<FakeTimeProvider>,
    ) -> (CircuitStateController<u32>, Arc<CollectingTelemetrySink>) {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let source = Arc::new(TelemetrySource::new("test").with_sink(sink.clone()));
        let telemetry = StrategyTelemetry::new(source, "breaker", "circuit-breaker");
        let controller = CircuitStateController::new(
            break_duration,
            Box::new(ConsecutiveFailuresBehavior::new(threshold)),
            clock,
            BreakerEventHooks {
                on_opened: None,
                on_closed: None,
                on_half_opened: None,
            },
            telemetry,
        );
        (controller, sink)
    }

    fn failure(message: &str) -> Outcome<u32> {
        Outcome::Failure(ResilienceError::failure(message))
    }

    #[tokio::test]
    async fn test_breaks_at_threshold_and_retains_outcome() {
        let clock = Arc::new(FakeTimeProvider::new());
        let (controller, _sink) = controller_with_sink(2, Duration::from_secs(5), clock);

        controller.on_action_failure(&failure("first"));
        assert_eq!(controller.circuit_state(), CircuitState::Closed);

        controller.on_action_failure(&failure("second"));
        assert_eq!(controller.circuit_state(), CircuitState::Open);

        let rejection = controller.on_action_pre_execute().unwrap_err();
        match rejection {
            ResilienceError::BrokenCircuit {
                state,
                cause: Some(cause),
            } => {
                assert_eq!(state, CircuitState::Open);
                assert_eq!(cause.to_string(), "second");
            }
            other => panic!("expected BrokenCircuit with cause, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_to_half_open_after_break_duration() {
        let clock = Arc::new(FakeTimeProvider::new());
        let (controller, sink) =
            controller_with_sink(1, Duration::from_secs(5), clock.clone());

        controller.on_action_failure(&failure("boom"));
        assert_eq!(controller.circuit_state(), CircuitState::Open);

        clock.advance(Duration::from_secs(5));
        controller.on_action_pre_execute().unwrap();
        assert_eq!(controller.circuit_state(), CircuitState::HalfOpen);

        controller.on_action_success(&Outcome::Success(1));
        assert_eq!(controller.circuit_state(), CircuitState::Closed);

        controller.process_events(None).await;
        assert_eq!(
            sink.event_names(),
            vec![
                names::ON_CIRCUIT_OPENED.to_string(),
                names::ON_CIRCUIT_HALF_OPENED.to_string(),
                names::ON_CIRCUIT_CLOSED.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = Arc::new(FakeTimeProvider::new());
        let (controller, _sink) =
            controller_with_sink(10, Duration::from_secs(5), clock.clone());

        // Reach half-open by direct transition through an open break.
        controller.on_action_failure(&failure("a"));
        for _ in 0..9 {
            controller.on_action_failure(&failure("again"));
        }
        assert_eq!(controller.circuit_state(), CircuitState::Open);

        clock.advance(Duration::from_secs(5));
        controller.on_action_pre_execute().unwrap();
        assert_eq!(controller.circuit_state(), CircuitState::HalfOpen);

        controller.on_action_failure(&failure("probe failed"));
        assert_eq!(controller.circuit_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_isolate_and_reset_idempotent() {
        let clock = Arc::new(FakeTimeProvider::new());
        let (controller, sink) = controller_with_sink(1, Duration::from_secs(5), clock);

        controller.isolate();
        controller.isolate();
        assert_eq!(controller.circuit_state(), CircuitState::Isolated);
        assert!(controller.on_action_pre_execute().is_err());

        controller.reset();
        controller.reset();
        assert_eq!(controller.circuit_state(), CircuitState::Closed);
        assert!(controller.on_action_pre_execute().is_ok());

        controller.process_events(None).await;
        assert_eq!(
            sink.event_names(),
            vec![
                names::ON_CIRCUIT_OPENED.to_string(),
                names::ON_CIRCUIT_CLOSED.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_event_order_matches_transition_order() {
        let clock = Arc::new(FakeTimeProvider::new());
        let (controller, sink) =
            controller_with_sink(1, Duration::from_secs(5), clock.clone());

        // Several transitions before any dispatch runs.
        controller.on_action_failure(&failure("x"));
        clock.advance(Duration::from_secs(5));
        controller.on_action_pre_execute().unwrap();
        controller.on_action_success(&Outcome::Success(1));

        assert!(sink.is_empty());
        controller.process_events(None).await;

        assert_eq!(
            sink.event_names(),
            vec![
                names::ON_CIRCUIT_OPENED.to_string(),
                names::ON_CIRCUIT_HALF_OPENED.to_string(),
                names::ON_CIRCUIT_CLOSED.to_string(),
            ]
        );
    }
}
