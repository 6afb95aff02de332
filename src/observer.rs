//! Scope lifecycle observers.
//!
//! Observers are notified when a scope context is initialized and when it has
//! been destroyed, mirroring the `@Initialized` / `@Destroyed` lifecycle
//! events of the scopes.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::ScopeContext;
use crate::scope::ScopeKind;

/// Observer of scope context lifecycle events.
///
/// Observer calls are made synchronously on the thread that starts or ends
/// the scope. Keep implementations lightweight.
///
/// # Examples
///
/// ```
/// use ferrous_cdi::{ContainerConfig, ContextsService, ScopeContext, ScopeKind, ScopeObserver, ScopeParams};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct RequestCounter {
///     started: AtomicUsize,
/// }
///
/// impl ScopeObserver for RequestCounter {
///     fn initialized(&self, kind: ScopeKind, _context: &ScopeContext) {
///         if kind == ScopeKind::Request {
///             self.started.fetch_add(1, Ordering::SeqCst);
///         }
///     }
///
///     fn destroyed(&self, _kind: ScopeKind, _context: &ScopeContext) {}
/// }
///
/// let counter = Arc::new(RequestCounter::default());
/// let contexts = ContextsService::new(ContainerConfig::default()).with_observer(counter.clone());
///
/// contexts.start_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
/// contexts.end_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
/// assert_eq!(counter.started.load(Ordering::SeqCst), 1);
/// ```
pub trait ScopeObserver: Send + Sync {
    /// Called after a scope context has been started and attached.
    fn initialized(&self, kind: ScopeKind, context: &ScopeContext);

    /// Called after every entry of a scope context has been destroyed.
    ///
    /// This is also called when some entries failed to destroy.
    fn destroyed(&self, kind: ScopeKind, context: &ScopeContext);
}

/// Container for registered observers.
#[derive(Default, Clone)]
pub struct ScopeObservers {
    observers: Vec<Arc<dyn ScopeObserver>>,
}

impl ScopeObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Arc<dyn ScopeObserver>) {
        self.observers.push(observer);
    }

    #[inline]
    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    #[inline]
    pub(crate) fn initialized(&self, kind: ScopeKind, context: &ScopeContext) {
        for observer in &self.observers {
            observer.initialized(kind, context);
        }
    }

    #[inline]
    pub(crate) fn destroyed(&self, kind: ScopeKind, context: &ScopeContext) {
        for observer in &self.observers {
            observer.destroyed(kind, context);
        }
    }
}

impl std::fmt::Debug for ScopeObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeObservers")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Built-in observer that reports scope lifecycle through `tracing`.
///
/// Request and dependent scopes are reported at `debug` level, longer-lived
/// scopes at `info` level.
///
/// ```
/// use ferrous_cdi::{ContainerConfig, ContextsService, LoggingObserver};
/// use std::sync::Arc;
///
/// let contexts = ContextsService::new(ContainerConfig::default())
///     .with_observer(Arc::new(LoggingObserver::with_prefix("orders")));
/// ```
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    prefix: String,
}

impl LoggingObserver {
    pub fn new() -> Self {
        Self {
            prefix: "ferrous-cdi".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn is_chatty(kind: ScopeKind) -> bool {
        matches!(kind, ScopeKind::Request | ScopeKind::Dependent)
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeObserver for LoggingObserver {
    fn initialized(&self, kind: ScopeKind, context: &ScopeContext) {
        if Self::is_chatty(kind) {
            debug!(prefix = %self.prefix, scope = %kind, context = context.id(), "scope initialized");
        } else {
            info!(prefix = %self.prefix, scope = %kind, context = context.id(), "scope initialized");
        }
    }

    fn destroyed(&self, kind: ScopeKind, context: &ScopeContext) {
        if Self::is_chatty(kind) {
            debug!(prefix = %self.prefix, scope = %kind, context = context.id(), "scope destroyed");
        } else {
            info!(prefix = %self.prefix, scope = %kind, context = context.id(), "scope destroyed");
        }
    }
}
