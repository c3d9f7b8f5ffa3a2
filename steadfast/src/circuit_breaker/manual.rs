//! Manual control and read-only state inspection handles.

use super::CircuitState;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;

/// Type-erased view of a breaker used by the external handles.
pub(crate) trait BreakerHandle: Send + Sync {
    fn circuit_state(&self) -> CircuitState;
    fn isolate(&self) -> BoxFuture<'static, ()>;
    fn reset(&self) -> BoxFuture<'static, ()>;
}

/// An external handle that routes `isolate` and `reset` to every breaker it
/// is attached to.
///
/// Both operations are idempotent with respect to the state they target.
#[derive(Clone, Default)]
pub struct CircuitBreakerManualControl {
    breakers: Arc<RwLock<Vec<Arc<dyn BreakerHandle>>>>,
}

impl CircuitBreakerManualControl {
    /// Creates an unattached handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, handle: Arc<dyn BreakerHandle>) {
        self.breakers.write().push(handle);
    }

    /// Returns true once at least one breaker is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.breakers.read().is_empty()
    }

    /// Forces every attached breaker into the isolated state.
    pub async fn isolate(&self) {
        let handles: Vec<Arc<dyn BreakerHandle>> = self.breakers.read().clone();
        for handle in handles {
            handle.isolate().await;
        }
    }

    /// Forces every attached breaker back to the closed state.
    pub async fn reset(&self) {
        let handles: Vec<Arc<dyn BreakerHandle>> = self.breakers.read().clone();
        for handle in handles {
            handle.reset().await;
        }
    }
}

impl std::fmt::Debug for CircuitBreakerManualControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerManualControl")
            .field("attached", &self.breakers.read().len())
            .finish()
    }
}

/// A read-only view of one breaker's circuit state.
#[derive(Clone, Default)]
pub struct CircuitBreakerStateProvider {
    inner: Arc<RwLock<Option<Arc<dyn BreakerHandle>>>>,
}

impl CircuitBreakerStateProvider {
    /// Creates an unattached provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, handle: Arc<dyn BreakerHandle>) {
        *self.inner.write() = Some(handle);
    }

    /// Returns the current circuit state, or `None` before the provider is
    /// attached to a breaker.
    #[must_use]
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.inner.read().as_ref().map(|handle| handle.circuit_state())
    }
}

impl std::fmt::Debug for CircuitBreakerStateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerStateProvider")
            .field("attached", &self.inner.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeBreaker {
        state: Mutex<CircuitState>,
    }

    impl FakeBreaker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(CircuitState::Closed),
            })
        }
    }

    impl BreakerHandle for Arc<FakeBreaker> {
        fn circuit_state(&self) -> CircuitState {
            *self.state.lock()
        }

        fn isolate(&self) -> BoxFuture<'static, ()> {
            let breaker = self.clone();
            Box::pin(async move {
                *breaker.state.lock() = CircuitState::Isolated;
            })
        }

        fn reset(&self) -> BoxFuture<'static, ()> {
            let breaker = self.clone();
            Box::pin(async move {
                *breaker.state.lock() = CircuitState::Closed;
            })
        }
    }

    #[tokio::test]
    async fn test_manual_control_routes_to_attached_breakers() {
        let control = CircuitBreakerManualControl::new();
        assert!(!control.is_attached());

        let breaker = FakeBreaker::new();
        control.attach(Arc::new(breaker.clone()));
        assert!(control.is_attached());

        control.isolate().await;
        assert_eq!(*breaker.state.lock(), CircuitState::Isolated);

        control.reset().await;
        assert_eq!(*breaker.state.lock(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_state_provider_reads_current_state() {
        let provider = CircuitBreakerStateProvider::new();
        assert_eq!(provider.circuit_state(), None);

        let breaker = FakeBreaker::new();
        provider.attach(Arc::new(breaker.clone()));
        assert_eq!(provider.circuit_state(), Some(CircuitState::Closed));

        *breaker.state.lock() = CircuitState::Open;
        assert_eq!(provider.circuit_state(), Some(CircuitState::Open));
    }
}
