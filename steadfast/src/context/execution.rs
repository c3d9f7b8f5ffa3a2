//! Mutable execution context threaded through strategy pipelines.

use super::ContextProperties;
use crate::cancellation::CancellationToken;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// The static result type of the current execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultTypeTag {
    /// No execution has been initialized on this context yet.
    Unknown,
    /// The execution produces no result.
    Void,
    /// The execution produces a value of the tagged type.
    Typed {
        /// Type identity of the result.
        type_id: TypeId,
        /// Human-readable type name, used as a telemetry tag.
        type_name: &'static str,
    },
}

impl ResultTypeTag {
    /// Returns the telemetry label for this tag.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Void => "void",
            Self::Typed { type_name, .. } => type_name,
        }
    }
}

/// An event reported against a context during execution.
///
/// Order of insertion is the order of emission; equality is by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedResilienceEvent {
    /// The event name.
    pub event_name: String,
}

impl ReportedResilienceEvent {
    /// Creates a new event record.
    #[must_use]
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
        }
    }
}

/// The per-call mutable context carried through a pipeline.
///
/// Contexts are acquired from a [`ContextPool`](super::ContextPool), mutated
/// only by the pipeline and its strategies, and released back with all fields
/// restored to defaults. All mutation goes through interior mutability so the
/// context can be shared across strategy layers.
pub struct ResilienceContext {
    /// Swappable cancellation signal.
    cancellation: RwLock<CancellationToken>,
    /// Whether this execution runs synchronously.
    is_synchronous: AtomicBool,
    /// Whether continuations should return to a captured scheduling context.
    /// No such context exists here, so this stays false unless a caller
    /// explicitly sets it for interoperability.
    continue_on_captured_context: AtomicBool,
    /// Result type of the current execution.
    result_type: RwLock<ResultTypeTag>,
    /// Whether `initialize` has run.
    is_initialized: AtomicBool,
    /// Optional caller-supplied correlation label.
    operation_key: RwLock<Option<String>>,
    /// Unique id stamped at initialization.
    execution_id: RwLock<Option<Uuid>>,
    /// Typed property bag.
    properties: ContextProperties,
    /// Ordered events reported during execution.
    resilience_events: RwLock<Vec<ReportedResilienceEvent>>,
}

impl ResilienceContext {
    /// Creates a context with all fields at their defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancellation: RwLock::new(CancellationToken::none()),
            is_synchronous: AtomicBool::new(false),
            continue_on_captured_context: AtomicBool::new(false),
            result_type: RwLock::new(ResultTypeTag::Unknown),
            is_initialized: AtomicBool::new(false),
            operation_key: RwLock::new(None),
            execution_id: RwLock::new(None),
            properties: ContextProperties::new(),
            resilience_events: RwLock::new(Vec::new()),
        }
    }

    /// Initializes the context for an execution producing `T`.
    ///
    /// `()` is treated as the void result.
    pub fn initialize<T: 'static>(&self, is_synchronous: bool) {
        let tag = if TypeId::of::<T>() == TypeId::of::<()>() {
            ResultTypeTag::Void
        } else {
            ResultTypeTag::Typed {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            }
        };
        *self.result_type.write() = tag;
        self.is_synchronous.store(is_synchronous, Ordering::SeqCst);
        self.is_initialized.store(true, Ordering::SeqCst);
        *self.execution_id.write() = Some(Uuid::new_v4());
    }

    /// Returns whether `initialize` has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized.load(Ordering::SeqCst)
    }

    /// Returns whether this execution runs synchronously.
    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.is_synchronous.load(Ordering::SeqCst)
    }

    /// Returns whether the execution produces no result.
    #[must_use]
    pub fn is_void(&self) -> bool {
        *self.result_type.read() == ResultTypeTag::Void
    }

    /// Returns the result type tag.
    #[must_use]
    pub fn result_type(&self) -> ResultTypeTag {
        *self.result_type.read()
    }

    /// Returns whether continuations should return to a captured context.
    #[must_use]
    pub fn continue_on_captured_context(&self) -> bool {
        self.continue_on_captured_context.load(Ordering::SeqCst)
    }

    /// Sets the captured-context flag.
    pub fn set_continue_on_captured_context(&self, value: bool) {
        self.continue_on_captured_context
            .store(value, Ordering::SeqCst);
    }

    /// Returns the operation key, if set.
    #[must_use]
    pub fn operation_key(&self) -> Option<String> {
        self.operation_key.read().clone()
    }

    /// Sets the operation key.
    pub fn set_operation_key(&self, key: impl Into<String>) {
        *self.operation_key.write() = Some(key.into());
    }

    /// Returns the execution id stamped at initialization.
    #[must_use]
    pub fn execution_id(&self) -> Option<Uuid> {
        *self.execution_id.read()
    }

    /// Returns the current cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.read().clone()
    }

    /// Replaces the cancellation token, returning the previous one.
    ///
    /// A strategy that swaps the token must restore the previous token on
    /// every exit path.
    pub fn set_cancellation(&self, token: CancellationToken) -> CancellationToken {
        std::mem::replace(&mut *self.cancellation.write(), token)
    }

    /// Returns whether the current cancellation token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.read().is_cancelled()
    }

    /// Returns the typed property bag.
    #[must_use]
    pub fn properties(&self) -> &ContextProperties {
        &self.properties
    }

    /// Appends a reported event.
    pub fn add_event(&self, event: ReportedResilienceEvent) {
        self.resilience_events.write().push(event);
    }

    /// Returns a snapshot of reported events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<ReportedResilienceEvent> {
        self.resilience_events.read().clone()
    }

    /// Returns true if any event has been reported.
    #[must_use]
    pub fn has_events(&self) -> bool {
        !self.resilience_events.read().is_empty()
    }

    /// Restores every field to its default.
    pub fn reset(&self) {
        *self.cancellation.write() = CancellationToken::none();
        self.is_synchronous.store(false, Ordering::SeqCst);
        self.continue_on_captured_context.store(false, Ordering::SeqCst);
        *self.result_type.write() = ResultTypeTag::Unknown;
        self.is_initialized.store(false, Ordering::SeqCst);
        *self.operation_key.write() = None;
        *self.execution_id.write() = None;
        self.properties.clear();
        self.resilience_events.write().clear();
    }

    /// Returns true when every field is at its default.
    #[must_use]
    pub fn is_default(&self) -> bool {
        !self.is_initialized()
            && self.result_type() == ResultTypeTag::Unknown
            && !self.is_cancelled()
            && self.cancellation().same_source(&CancellationToken::none())
            && !self.is_synchronous()
            && !self.continue_on_captured_context()
            && self.operation_key().is_none()
            && self.execution_id().is_none()
            && self.properties.is_empty()
            && !self.has_events()
    }
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("is_initialized", &self.is_initialized())
            .field("is_synchronous", &self.is_synchronous())
            .field("result_type", &self.result_type())
            .field("operation_key", &self.operation_key())
            .field("events", &self.events().len())
            .finish()
    }
}
