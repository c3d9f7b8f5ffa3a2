//! Cancellation source and token for cooperative cancellation.

use crate::errors::ResilienceError;
use futures::future::{select, Either};
use futures::pin_mut;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use tracing::warn;

/// A callback type for cancellation notifications.
type CancelCallback = Box<dyn Fn() + Send + Sync>;

struct CancelState {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation, keyed by registration id.
    callbacks: Mutex<Vec<(u64, CancelCallback)>>,
    /// Wakers for tasks awaiting cancellation.
    wakers: Mutex<Vec<Waker>>,
    /// Registration id counter.
    next_registration: AtomicU64,
    /// Bumped on reset; disarms timers targeting a previous lease.
    generation: AtomicU64,
}

impl CancelState {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            reason: RwLock::new(None),
            callbacks: Mutex::new(Vec::new()),
            wakers: Mutex::new(Vec::new()),
            next_registration: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        }
    }
}

/// Cancels the state if not already cancelled. Returns true on the first
/// cancellation only.
fn cancel_state(state: &Arc<CancelState>, reason: &str) -> bool {
    if state
        .cancelled
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return false;
    }

    *state.reason.write() = Some(reason.to_string());

    let wakers: Vec<Waker> = std::mem::take(&mut *state.wakers.lock());
    for waker in wakers {
        waker.wake();
    }

    let callbacks: Vec<(u64, CancelCallback)> = std::mem::take(&mut *state.callbacks.lock());
    for (_, callback) in callbacks {
        invoke_callback(&callback);
    }

    true
}

fn invoke_callback(callback: &CancelCallback) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())).is_err() {
        warn!("cancellation callback panicked");
    }
}

/// The owning side of a cancellation pair.
///
/// A source cancels; its tokens observe. Sources are poolable: `reset`
/// restores the default state and disarms any outstanding timer.
pub struct CancellationSource {
    state: Arc<CancelState>,
}

impl CancellationSource {
    /// Creates a new, un-cancelled source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelState::new()),
        }
    }

    /// Returns an observer token for this source.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: Some(self.state.clone()),
        }
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept. Waiting tasks are
    /// woken and callbacks are invoked inline; a panicking callback is logged
    /// and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        cancel_state(&self.state, &reason.into());
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.reason.read().clone()
    }

    /// Returns a detached trigger bound to the source's current lease.
    ///
    /// Firing a trigger after `reset` has no effect.
    #[must_use]
    pub fn trigger(&self) -> CancellationTrigger {
        CancellationTrigger {
            state: Arc::downgrade(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
        }
    }

    /// Links this source to an outer token: when the outer token cancels,
    /// this source cancels with the outer reason.
    ///
    /// The returned registration unlinks on drop.
    #[must_use]
    pub fn link_to(&self, outer: &CancellationToken) -> CancellationRegistration {
        let trigger = self.trigger();
        let outer_view = outer.clone();
        outer.on_cancel(move || {
            let reason = outer_view
                .reason()
                .unwrap_or_else(|| "linked cancellation".to_string());
            trigger.fire(&reason);
        })
    }

    /// Restores the default state for reuse.
    ///
    /// Pending callbacks and wakers are discarded and outstanding triggers
    /// are disarmed.
    pub fn reset(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.cancelled.store(false, Ordering::SeqCst);
        *self.state.reason.write() = None;
        self.state.callbacks.lock().clear();
        self.state.wakers.lock().clear();
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// A trigger that cancels a source only while its lease is current.
#[derive(Debug, Clone)]
pub struct CancellationTrigger {
    state: Weak<CancelState>,
    generation: u64,
}

impl CancellationTrigger {
    /// Fires the trigger. Returns true if this call cancelled the source.
    pub fn fire(&self, reason: &str) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        if state.generation.load(Ordering::SeqCst) != self.generation {
            return false;
        }
        cancel_state(&state, reason)
    }
}

/// The observing side of a cancellation pair.
///
/// Tokens are cheap clones. A token created with [`CancellationToken::none`]
/// never cancels.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Option<Arc<CancelState>>,
}

impl CancellationToken {
    /// Returns a token that never cancels.
    #[must_use]
    pub fn none() -> Self {
        Self { state: None }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.cancelled.load(Ordering::SeqCst))
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.as_ref().and_then(|s| s.reason.read().clone())
    }

    /// Returns true when both tokens observe the same source.
    #[must_use]
    pub fn same_source(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately. The
    /// returned registration unregisters the callback on drop.
    pub fn on_cancel<F>(&self, callback: F) -> CancellationRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let Some(state) = &self.state else {
            return CancellationRegistration { state: None, id: 0 };
        };

        let boxed: CancelCallback = Box::new(callback);
        {
            // Checked under the callbacks lock: a concurrent cancel drains
            // the list under the same lock, so the callback either lands in
            // the drain or is invoked here, never neither.
            let mut callbacks = state.callbacks.lock();
            if !state.cancelled.load(Ordering::SeqCst) {
                let id = state.next_registration.fetch_add(1, Ordering::SeqCst);
                callbacks.push((id, boxed));
                return CancellationRegistration {
                    state: Some(Arc::downgrade(state)),
                    id,
                };
            }
        }

        invoke_callback(&boxed);
        CancellationRegistration { state: None, id: 0 }
    }

    /// Returns a future that completes when the token is cancelled.
    ///
    /// A token with no source stays pending forever.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            state: self.state.clone(),
        }
    }

    /// Runs a future, failing with `OperationCancelled` if this token
    /// cancels first.
    pub async fn guard<T, F>(&self, future: F) -> Result<T, ResilienceError>
    where
        F: Future<Output = Result<T, ResilienceError>>,
    {
        if self.is_cancelled() {
            return Err(self.cancellation_error());
        }

        let cancelled = self.cancelled();
        pin_mut!(future);
        pin_mut!(cancelled);

        match select(future, cancelled).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => Err(self.cancellation_error()),
        }
    }

    fn cancellation_error(&self) -> ResilienceError {
        ResilienceError::cancelled(
            self.reason()
                .unwrap_or_else(|| "cancellation requested".to_string()),
        )
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// A future that completes when its token is cancelled.
pub struct Cancelled {
    state: Option<Arc<CancelState>>,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(state) = &self.state else {
            return Poll::Pending;
        };

        if state.cancelled.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        let mut wakers = state.wakers.lock();
        // Re-check under the lock so a concurrent cancel cannot slip between
        // the flag read and the waker registration.
        if state.cancelled.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// A disposable handle to a cancellation callback registration.
///
/// Dropping the registration (or calling [`dispose`](Self::dispose))
/// unregisters the callback if it has not fired.
pub struct CancellationRegistration {
    state: Option<Weak<CancelState>>,
    id: u64,
}

impl CancellationRegistration {
    /// Unregisters the callback.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let Some(state) = self.state.take().and_then(|w| w.upgrade()) {
            state.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for CancellationRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistration")
            .field("id", &self.id)
            .finish()
    }
}
