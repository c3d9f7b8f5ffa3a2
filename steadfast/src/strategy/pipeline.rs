//! Ordered strategy composition.

use super::{box_callback, Strategy, StrategyCallback, StrategyFuture};
use crate::context::{ContextPool, ResilienceContext};
use crate::errors::ResilienceError;
use crate::telemetry::{
    tags, EnrichmentContext, ExecutionMetric, TelemetrySource, HEALTH_HEALTHY, HEALTH_UNHEALTHY,
    STRATEGY_EXECUTION_DURATION,
};
use crate::time::TimeProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// An ordered composition of strategies wrapping a user callback.
///
/// Strategies form an onion: the first strategy runs outermost and receives
/// a callback that delegates to the second, and so on; the last strategy
/// receives the user callback. A pipeline is itself a strategy and can be
/// nested inside another pipeline.
pub struct Pipeline<T> {
    name: String,
    instance_key: Option<String>,
    strategies: Arc<[Arc<dyn Strategy<T>>]>,
    telemetry: Arc<TelemetrySource>,
    time_provider: Arc<dyn TimeProvider>,
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    pub(crate) fn from_parts(
        name: String,
        instance_key: Option<String>,
        strategies: Vec<Arc<dyn Strategy<T>>>,
        telemetry: Arc<TelemetrySource>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            name,
            instance_key,
            strategies: strategies.into(),
            telemetry,
            time_provider,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of composed strategies.
    #[must_use]
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Executes the callback asynchronously with a pooled context.
    ///
    /// The context is acquired from the shared pool, initialized for `T`,
    /// and released when the execution completes.
    pub async fn execute<F, Fut>(&self, callback: F) -> Result<T, ResilienceError>
    where
        F: FnOnce(Arc<ResilienceContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
    {
        let ctx = ContextPool::shared().acquire();
        ctx.initialize::<T>(false);
        let result = self.run(ctx.clone(), box_callback(callback)).await;
        if let Err(error) = ContextPool::shared().release(ctx) {
            warn!(error = %error, "failed to release execution context");
        }
        result
    }

    /// Executes a synchronous callback on the calling thread.
    ///
    /// The same core drives both modes; in synchronous mode every suspension
    /// point completes inline.
    pub fn execute_sync<F>(&self, callback: F) -> Result<T, ResilienceError>
    where
        F: FnOnce(Arc<ResilienceContext>) -> Result<T, ResilienceError> + Send + 'static,
    {
        let ctx = ContextPool::shared().acquire();
        ctx.initialize::<T>(true);
        let boxed: StrategyCallback<T> = Box::new(move |ctx| Box::pin(async move { callback(ctx) }));
        let result = futures::executor::block_on(self.run(ctx.clone(), boxed));
        if let Err(error) = ContextPool::shared().release(ctx) {
            warn!(error = %error, "failed to release execution context");
        }
        result
    }

    /// Executes the callback with a caller-owned context.
    ///
    /// The context is initialized for `T` if the caller has not already done
    /// so; the caller remains responsible for releasing it.
    pub async fn execute_with_context<F, Fut>(
        &self,
        ctx: Arc<ResilienceContext>,
        callback: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce(Arc<ResilienceContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
    {
        if !ctx.is_initialized() {
            ctx.initialize::<T>(false);
        }
        self.run(ctx, box_callback(callback)).await
    }

    /// Runs the strategy chain and records the execution metric.
    async fn run(
        &self,
        ctx: Arc<ResilienceContext>,
        callback: StrategyCallback<T>,
    ) -> Result<T, ResilienceError> {
        let started = self.time_provider.now();
        let result = Self::run_from(self.strategies.clone(), 0, callback, ctx.clone()).await;
        let duration = self.time_provider.now().saturating_duration_since(started);
        self.record_execution(&ctx, duration, result.as_ref().err());
        result
    }

    /// Delegates to the strategy at `index`, handing it a callback that
    /// continues at `index + 1`. The user callback sits past the last index.
    fn run_from(
        strategies: Arc<[Arc<dyn Strategy<T>>]>,
        index: usize,
        callback: StrategyCallback<T>,
        ctx: Arc<ResilienceContext>,
    ) -> StrategyFuture<T> {
        Box::pin(async move {
            match strategies.get(index).cloned() {
                None => callback(ctx).await,
                Some(strategy) => {
                    let rest = strategies.clone();
                    let next: StrategyCallback<T> =
                        Box::new(move |ctx| Self::run_from(rest, index + 1, callback, ctx));
                    strategy.execute_core(next, ctx).await
                }
            }
        })
    }

    fn record_execution(
        &self,
        ctx: &ResilienceContext,
        duration: Duration,
        error: Option<&ResilienceError>,
    ) {
        let mut tag_map = HashMap::new();
        tag_map.insert(
            tags::BUILDER_NAME.to_string(),
            self.telemetry.builder_name().to_string(),
        );
        if let Some(key) = &self.instance_key {
            tag_map.insert(tags::STRATEGY_KEY.to_string(), key.clone());
        }
        tag_map.insert(
            tags::RESULT_TYPE.to_string(),
            ctx.result_type().label().to_string(),
        );
        if let Some(error) = error {
            tag_map.insert(
                tags::EXCEPTION_NAME.to_string(),
                error.exception_name().to_string(),
            );
        }
        let health = if ctx.has_events() {
            HEALTH_UNHEALTHY
        } else {
            HEALTH_HEALTHY
        };
        tag_map.insert(tags::EXECUTION_HEALTH.to_string(), health.to_string());

        let ectx = EnrichmentContext {
            event_name: STRATEGY_EXECUTION_DURATION,
            builder_name: self.telemetry.builder_name(),
            strategy_name: None,
            context: Some(ctx),
            outcome: None,
        };
        self.telemetry.run_enrichers(&ectx, &mut tag_map);

        self.telemetry.record(&ExecutionMetric {
            name: STRATEGY_EXECUTION_DURATION,
            duration,
            tags: tag_map,
        });
    }
}

#[async_trait]
impl<T> Strategy<T> for Pipeline<T>
where
    T: Send + 'static,
{
    fn strategy_name(&self) -> &str {
        &self.name
    }

    fn strategy_type(&self) -> &'static str {
        "pipeline"
    }

    async fn execute_core(
        &self,
        callback: StrategyCallback<T>,
        ctx: Arc<ResilienceContext>,
    ) -> Result<T, ResilienceError> {
        // Nested pipelines compose without re-recording the top-level metric.
        Self::run_from(self.strategies.clone(), 0, callback, ctx).await
    }
}

impl<T> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::CollectingTelemetrySink;
    use parking_lot::Mutex;

    /// A strategy that records entry and exit markers around the callback.
    struct RecordingStrategy {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Strategy<u32> for RecordingStrategy {
        fn strategy_name(&self) -> &str {
            &self.name
        }

        fn strategy_type(&self) -> &'static str {
            "recording"
        }

        async fn execute_core(
            &self,
            callback: StrategyCallback<u32>,
            ctx: Arc<ResilienceContext>,
        ) -> Result<u32, ResilienceError> {
            self.log.lock().push(format!("{}:enter", self.name));
            let result = callback(ctx).await;
            self.log.lock().push(format!("{}:exit", self.name));
            result
        }
    }

    fn pipeline_of(
        strategies: Vec<Arc<dyn Strategy<u32>>>,
        sink: Arc<CollectingTelemetrySink>,
    ) -> Pipeline<u32> {
        let source = Arc::new(TelemetrySource::new("test-builder").with_sink(sink));
        Pipeline::from_parts(
            "test-pipeline".to_string(),
            Some("instance-1".to_string()),
            strategies,
            source,
            Arc::new(crate::time::SystemTimeProvider::new()),
        )
    }

    #[tokio::test]
    async fn test_onion_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let outer = Arc::new(RecordingStrategy {
            name: "outer".to_string(),
            log: log.clone(),
        });
        let inner = Arc::new(RecordingStrategy {
            name: "inner".to_string(),
            log: log.clone(),
        });

        let sink = Arc::new(CollectingTelemetrySink::new());
        let pipeline = pipeline_of(vec![outer, inner], sink);

        let log_in_callback = log.clone();
        let result = pipeline
            .execute(move |_ctx| async move {
                log_in_callback.lock().push("callback".to_string());
                Ok(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(
            *log.lock(),
            vec![
                "outer:enter".to_string(),
                "inner:enter".to_string(),
                "callback".to_string(),
                "inner:exit".to_string(),
                "outer:exit".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_pipeline_invokes_callback() {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let pipeline = pipeline_of(Vec::new(), sink);

        let result = pipeline.execute(|_ctx| async move { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_execution_metric_tags() {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let pipeline = pipeline_of(Vec::new(), sink.clone());

        pipeline.execute(|_ctx| async move { Ok(1) }).await.unwrap();

        let metrics = sink.executions();
        assert_eq!(metrics.len(), 1);
        let metric = &metrics[0];
        assert_eq!(metric.name, STRATEGY_EXECUTION_DURATION);
        assert_eq!(
            metric.tags.get(tags::BUILDER_NAME).map(String::as_str),
            Some("test-builder")
        );
        assert_eq!(
            metric.tags.get(tags::STRATEGY_KEY).map(String::as_str),
            Some("instance-1")
        );
        assert_eq!(
            metric.tags.get(tags::EXECUTION_HEALTH).map(String::as_str),
            Some(HEALTH_HEALTHY)
        );
        assert_eq!(metric.tags.get(tags::EXCEPTION_NAME), None);
    }

    #[tokio::test]
    async fn test_failed_execution_tags_exception() {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let pipeline = pipeline_of(Vec::new(), sink.clone());

        let result = pipeline
            .execute(|_ctx| async move { Err::<u32, _>(ResilienceError::failure("down")) })
            .await;
        assert!(result.is_err());

        let metrics = sink.executions();
        assert_eq!(
            metrics[0].tags.get(tags::EXCEPTION_NAME).map(String::as_str),
            Some("UserFailure")
        );
    }

    #[test]
    fn test_execute_sync_shares_the_async_core() {
        let sink = Arc::new(CollectingTelemetrySink::new());
        let pipeline = pipeline_of(Vec::new(), sink.clone());

        let result = pipeline.execute_sync(|ctx| {
            assert!(ctx.is_synchronous());
            Ok(9)
        });

        assert_eq!(result.unwrap(), 9);
        assert_eq!(sink.executions().len(), 1);
    }
}
