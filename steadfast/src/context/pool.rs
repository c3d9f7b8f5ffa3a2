//! Process-wide pool of execution contexts.

use super::ResilienceContext;
use crate::errors::ResilienceError;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

/// A concurrent pool of reusable execution contexts.
///
/// `acquire` never fails and always hands back a context satisfying the
/// default predicate. `release` resets the context and repools it; releasing
/// then immediately acquiring may return the same instance. A release is
/// safe even if the context is never reused.
#[derive(Default)]
pub struct ContextPool {
    contexts: Mutex<Vec<Arc<ResilienceContext>>>,
}

impl ContextPool {
    /// Creates a new empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide shared pool.
    pub fn shared() -> &'static ContextPool {
        static SHARED: OnceLock<ContextPool> = OnceLock::new();
        SHARED.get_or_init(ContextPool::new)
    }

    /// Acquires a context with all fields at their defaults.
    #[must_use]
    pub fn acquire(&self) -> Arc<ResilienceContext> {
        self.contexts
            .lock()
            .pop()
            .unwrap_or_else(|| Arc::new(ResilienceContext::new()))
    }

    /// Resets a context and returns it to the pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the context is still shared elsewhere:
    /// a context can only be released by its sole remaining holder.
    pub fn release(&self, ctx: Arc<ResilienceContext>) -> Result<(), ResilienceError> {
        if Arc::strong_count(&ctx) != 1 {
            return Err(ResilienceError::invalid_argument(
                "context is still shared and cannot be released",
            ));
        }

        ctx.reset();
        self.contexts.lock().push(ctx);
        Ok(())
    }

    /// Returns the number of pooled contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns true if the pool holds no contexts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("pooled", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReportedResilienceEvent;

    #[test]
    fn test_acquire_returns_default_context() {
        let pool = ContextPool::new();
        let ctx = pool.acquire();
        assert!(ctx.is_default());
    }

    #[test]
    fn test_release_then_acquire_restores_defaults() {
        let pool = ContextPool::new();
        let ctx = pool.acquire();

        ctx.initialize::<u64>(true);
        ctx.add_event(ReportedResilienceEvent::new("probe"));
        pool.release(ctx).unwrap();

        let reused = pool.acquire();
        assert!(reused.is_default());
    }

    #[test]
    fn test_release_shared_context_fails() {
        let pool = ContextPool::new();
        let ctx = pool.acquire();
        let extra = ctx.clone();

        let result = pool.release(ctx);
        assert!(matches!(
            result,
            Err(ResilienceError::InvalidArgument { .. })
        ));
        drop(extra);
    }

    #[test]
    fn test_acquire_release_sequences_keep_default_predicate() {
        let pool = ContextPool::new();

        // Mixed hold-and-release patterns; every acquire must observe a
        // context satisfying the default predicate.
        for round in 0..20 {
            let first = pool.acquire();
            assert!(first.is_default());
            first.initialize::<String>(round % 2 == 0);
            first.set_operation_key(format!("round-{round}"));

            let second = pool.acquire();
            assert!(second.is_default());

            pool.release(first).unwrap();
            pool.release(second).unwrap();
        }
    }
}
