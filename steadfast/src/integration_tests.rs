//! End-to-end pipeline scenarios under controlled time.

use crate::cancellation::CancellationSource;
use crate::circuit_breaker::{
    AdvancedCircuitBreakerOptions, CircuitBreakerManualControl, CircuitBreakerOptions,
    CircuitBreakerStateProvider, CircuitState,
};
use crate::context::{ContextPool, ReportedResilienceEvent, ResilienceContext};
use crate::errors::ResilienceError;
use crate::strategy::{Pipeline, PipelineBuilder};
use crate::telemetry::{names, tags, CollectingTelemetrySink, HEALTH_UNHEALTHY};
use crate::time::FakeTimeProvider;
use crate::timeout::TimeoutOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type SleeperFuture = futures::future::BoxFuture<'static, Result<u32, ResilienceError>>;

fn sleeper(
    delay: Duration,
) -> impl Fn(Arc<ResilienceContext>) -> SleeperFuture + Send + Sync + Clone {
    move |ctx: Arc<ResilienceContext>| -> SleeperFuture {
        Box::pin(async move {
            let token = ctx.cancellation();
            token
                .guard(async move {
                    tokio::time::sleep(delay).await;
                    Ok(42)
                })
                .await
        })
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_and_restores_outer_signal() {
    let sink = Arc::new(CollectingTelemetrySink::new());
    let pipeline: Pipeline<u32> = PipelineBuilder::new("timeouts")
        .with_telemetry_sink(sink.clone())
        .with_timeout(TimeoutOptions::new(Duration::from_millis(100)))
        .build()
        .unwrap();

    let ctx = Arc::new(ResilienceContext::new());
    let callback = sleeper(Duration::from_millis(500));
    let result = pipeline
        .execute_with_context(ctx.clone(), move |ctx| callback(ctx))
        .await;

    match result {
        Err(ResilienceError::TimeoutRejected { timeout, .. }) => {
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected TimeoutRejected, got {other:?}"),
    }

    assert_eq!(sink.events_named(names::ON_TIMEOUT).len(), 1);
    // The outer signal is unchanged on exit.
    assert!(!ctx.is_cancelled());
    assert!(ctx
        .cancellation()
        .same_source(&crate::cancellation::CancellationToken::none()));
}

#[tokio::test(start_paused = true)]
async fn outer_cancellation_wins_over_timeout() {
    let sink = Arc::new(CollectingTelemetrySink::new());
    let pipeline: Pipeline<u32> = PipelineBuilder::new("timeouts")
        .with_telemetry_sink(sink.clone())
        .with_timeout(TimeoutOptions::new(Duration::from_secs(10)))
        .build()
        .unwrap();

    let ctx = Arc::new(ResilienceContext::new());
    let outer = CancellationSource::new();
    let _ = ctx.set_cancellation(outer.token());

    let outer_trigger = outer.trigger();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        outer_trigger.fire("caller cancelled");
    });

    let callback = sleeper(Duration::from_secs(60));
    let result = pipeline
        .execute_with_context(ctx.clone(), move |ctx| callback(ctx))
        .await;
    canceller.await.unwrap();

    assert!(matches!(
        result,
        Err(ResilienceError::OperationCancelled { .. })
    ));
    assert!(sink.events_named(names::ON_TIMEOUT).is_empty());
}

#[tokio::test]
async fn consecutive_breaker_trips_recovers_and_closes() {
    let sink = Arc::new(CollectingTelemetrySink::new());
    let clock = Arc::new(FakeTimeProvider::new());
    let state = CircuitBreakerStateProvider::new();

    let pipeline: Pipeline<u32> = PipelineBuilder::new("orders")
        .with_telemetry_sink(sink.clone())
        .with_time_provider(clock.clone())
        .with_circuit_breaker(
            CircuitBreakerOptions::new()
                .with_failure_threshold(3)
                .with_break_duration(Duration::from_secs(5))
                .with_state_provider(state.clone()),
        )
        .build()
        .unwrap();

    for attempt in 1..=3u32 {
        let result = pipeline
            .execute(move |_ctx| async move {
                Err::<u32, _>(ResilienceError::failure(format!("failure {attempt}")))
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(state.circuit_state(), Some(CircuitState::Open));

    // A blocked call carries the outcome that caused the break.
    let blocked = pipeline.execute(|_ctx| async move { Ok(1) }).await;
    match blocked {
        Err(ResilienceError::BrokenCircuit {
            state: CircuitState::Open,
            cause: Some(cause),
        }) => assert_eq!(cause.to_string(), "failure 3"),
        other => panic!("expected BrokenCircuit with cause, got {other:?}"),
    }

    // After the break the next call probes half-open, succeeds, and closes.
    clock.advance(Duration::from_secs(5));
    let result = pipeline.execute(|_ctx| async move { Ok(7) }).await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(state.circuit_state(), Some(CircuitState::Closed));

    assert_eq!(
        sink.event_names()
            .into_iter()
            .filter(|name| name.starts_with("OnCircuit"))
            .collect::<Vec<_>>(),
        vec![
            names::ON_CIRCUIT_OPENED.to_string(),
            names::ON_CIRCUIT_HALF_OPENED.to_string(),
            names::ON_CIRCUIT_CLOSED.to_string(),
        ]
    );
}

#[tokio::test]
async fn advanced_breaker_waits_for_minimum_throughput() {
    let state = CircuitBreakerStateProvider::new();
    let pipeline: Pipeline<u32> = PipelineBuilder::new("payments")
        .with_time_provider(Arc::new(FakeTimeProvider::new()))
        .with_advanced_circuit_breaker(
            AdvancedCircuitBreakerOptions::new()
                .with_minimum_throughput(100)
                .with_failure_threshold(0.5)
                .with_state_provider(state.clone()),
        )
        .build()
        .unwrap();

    for _ in 0..99 {
        let result = pipeline
            .execute(|_ctx| async move { Err::<u32, _>(ResilienceError::failure("down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(state.circuit_state(), Some(CircuitState::Closed));
    }

    let result = pipeline
        .execute(|_ctx| async move { Err::<u32, _>(ResilienceError::failure("down")) })
        .await;
    assert!(result.is_err());
    assert_eq!(state.circuit_state(), Some(CircuitState::Open));
}

#[tokio::test]
async fn isolate_blocks_and_reset_restores() {
    let sink = Arc::new(CollectingTelemetrySink::new());
    let control = CircuitBreakerManualControl::new();

    let pipeline: Pipeline<u32> = PipelineBuilder::new("inventory")
        .with_telemetry_sink(sink.clone())
        .with_circuit_breaker(
            CircuitBreakerOptions::new().with_manual_control(control.clone()),
        )
        .build()
        .unwrap();

    control.isolate().await;
    control.isolate().await;

    let blocked = pipeline.execute(|_ctx| async move { Ok(1) }).await;
    assert!(matches!(
        blocked,
        Err(ResilienceError::BrokenCircuit {
            state: CircuitState::Isolated,
            ..
        })
    ));

    control.reset().await;
    control.reset().await;

    let result = pipeline.execute(|_ctx| async move { Ok(2) }).await;
    assert_eq!(result.unwrap(), 2);

    // Repeated manual calls emit one event per actual transition.
    assert_eq!(
        sink.event_names()
            .into_iter()
            .filter(|name| name.starts_with("OnCircuit"))
            .collect::<Vec<_>>(),
        vec![
            names::ON_CIRCUIT_OPENED.to_string(),
            names::ON_CIRCUIT_CLOSED.to_string(),
        ]
    );
}

#[tokio::test]
async fn callback_reported_event_marks_execution_unhealthy() {
    let sink = Arc::new(CollectingTelemetrySink::new());
    let pipeline: Pipeline<u32> = PipelineBuilder::new("search")
        .with_telemetry_sink(sink.clone())
        .with_timeout(TimeoutOptions::new(Duration::from_secs(5)))
        .build()
        .unwrap();

    let result = pipeline
        .execute(|ctx| async move {
            ctx.add_event(ReportedResilienceEvent::new("fallback-used"));
            Ok(1)
        })
        .await;
    assert_eq!(result.unwrap(), 1);

    let metrics = sink.executions();
    assert_eq!(metrics.len(), 1);
    assert_eq!(
        metrics[0].tags.get(tags::EXECUTION_HEALTH).map(String::as_str),
        Some(HEALTH_UNHEALTHY)
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_generated_timeout_matches_absent_strategy() {
    let with_disabled_timeout: Pipeline<u32> = PipelineBuilder::new("a")
        .with_timeout(
            TimeoutOptions::new(Duration::from_millis(100))
                .with_timeout_generator(|_ctx| async move { Duration::ZERO }),
        )
        .build()
        .unwrap();
    let without_timeout: Pipeline<u32> = PipelineBuilder::new("b").build().unwrap();

    let callback = sleeper(Duration::from_millis(300));
    let first = with_disabled_timeout
        .execute({
            let callback = callback.clone();
            move |ctx| callback(ctx)
        })
        .await;
    let second = without_timeout.execute(move |ctx| callback(ctx)).await;

    assert_eq!(first.unwrap(), 42);
    assert_eq!(second.unwrap(), 42);
}

#[tokio::test]
async fn callback_runs_at_most_once_through_the_full_stack() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let pipeline: Pipeline<u32> = PipelineBuilder::new("stack")
        .with_timeout(TimeoutOptions::new(Duration::from_secs(5)))
        .with_circuit_breaker(CircuitBreakerOptions::new())
        .build()
        .unwrap();

    let counter = invocations.clone();
    let result = pipeline
        .execute(move |_ctx| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[test]
fn released_contexts_come_back_with_defaults() {
    let pool = ContextPool::new();

    for _ in 0..8 {
        let ctx = pool.acquire();
        assert!(ctx.is_default());

        ctx.initialize::<u32>(false);
        ctx.add_event(ReportedResilienceEvent::new("noise"));
        ctx.set_operation_key("op");
        pool.release(ctx).unwrap();
    }
}

#[test]
fn synchronous_execution_honors_breaker_state() {
    let state = CircuitBreakerStateProvider::new();
    let pipeline: Pipeline<u32> = PipelineBuilder::new("sync")
        .with_circuit_breaker(
            CircuitBreakerOptions::new()
                .with_failure_threshold(2)
                .with_state_provider(state.clone()),
        )
        .build()
        .unwrap();

    for _ in 0..2 {
        let result =
            pipeline.execute_sync(|_ctx| Err::<u32, _>(ResilienceError::failure("down")));
        assert!(result.is_err());
    }
    assert_eq!(state.circuit_state(), Some(CircuitState::Open));

    let blocked = pipeline.execute_sync(|_ctx| Ok(1));
    assert!(matches!(
        blocked,
        Err(ResilienceError::BrokenCircuit { .. })
    ));
}
