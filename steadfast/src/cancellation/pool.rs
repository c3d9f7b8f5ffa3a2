//! Process-wide pool of cancellation sources.

use super::CancellationSource;
use parking_lot::Mutex;
use std::sync::OnceLock;

/// A concurrent pool of reusable cancellation sources.
///
/// Strategies acquire a source per execution and must release it before
/// returning; `release` resets the source so the next acquirer observes the
/// default state.
#[derive(Default)]
pub struct CancellationSourcePool {
    sources: Mutex<Vec<CancellationSource>>,
}

impl CancellationSourcePool {
    /// Creates a new empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide shared pool.
    pub fn shared() -> &'static CancellationSourcePool {
        static SHARED: OnceLock<CancellationSourcePool> = OnceLock::new();
        SHARED.get_or_init(CancellationSourcePool::new)
    }

    /// Acquires a source, reusing a pooled one when available.
    #[must_use]
    pub fn acquire(&self) -> CancellationSource {
        self.sources
            .lock()
            .pop()
            .unwrap_or_else(CancellationSource::new)
    }

    /// Resets a source and returns it to the pool.
    pub fn release(&self, source: CancellationSource) {
        source.reset();
        self.sources.lock().push(source);
    }

    /// Returns the number of pooled sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    /// Returns true if the pool holds no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.lock().is_empty()
    }
}

impl std::fmt::Debug for CancellationSourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSourcePool")
            .field("pooled", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_from_empty_pool() {
        let pool = CancellationSourcePool::new();
        let source = pool.acquire();
        assert!(!source.is_cancelled());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_release_resets_state() {
        let pool = CancellationSourcePool::new();
        let source = pool.acquire();
        source.cancel("used up");
        pool.release(source);

        let reused = pool.acquire();
        assert!(!reused.is_cancelled());
        assert!(reused.reason().is_none());
    }

    #[test]
    fn test_release_then_acquire_reuses() {
        let pool = CancellationSourcePool::new();
        let source = pool.acquire();
        pool.release(source);
        assert_eq!(pool.len(), 1);

        let _reused = pool.acquire();
        assert!(pool.is_empty());
    }
}
