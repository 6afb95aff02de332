//! Error types for contextual lifecycle management.

use thiserror::Error;

use crate::scope::ScopeKind;

/// Lifecycle errors
///
/// Represents the failure conditions of creational contexts, scope storage
/// and the scope registry. Errors fall into three groups:
///
/// - **Consistency errors** are fatal and indicate a defect in the component
///   graph or its configuration (`TeardownLoop`, `NotPassivationCapable`,
///   `Circular`, ...).
/// - **Context errors** are recoverable. A busy or nonexistent conversation is
///   replaced by a fresh transient one and the condition is reported so web-tier
///   code can react.
/// - **Wrapped errors** carry the failure of a contextual's own `create` or
///   `destroy` as their cause.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{DiError, ScopeKind};
///
/// let err = DiError::ContextNotActive { scope: ScopeKind::Request };
/// assert_eq!(err.to_string(), "request context is not active");
///
/// // Wrapping is idempotent
/// let wrapped = err.into_context(ScopeKind::Request).into_context(ScopeKind::Session);
/// match wrapped {
///     DiError::Context { scope, .. } => assert_eq!(scope, ScopeKind::Request),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Error)]
pub enum DiError {
    /// Dependent teardown did not converge within the circuit-breaker budget
    #[error("teardown of {bean} exceeded {limit} destroy attempts: destruction cycle in dependent graph")]
    TeardownLoop { bean: String, limit: usize },

    /// A creational context or instance could not be passivated
    #[error("{bean} is not passivation capable")]
    NotPassivationCapable { bean: String },

    /// Passivated state refers to a contextual the registry does not know
    #[error("no contextual registered for passivation id {0}")]
    UnknownPassivationId(String),

    /// Caller expected an entry that is absent from the scope context
    #[error("no {scope} instance of {contextual}")]
    MissingEntry { scope: ScopeKind, contextual: String },

    /// A contextual was re-entered while being created in the same context
    #[error("circular creation: {}", .path.join(" -> "))]
    Circular { path: Vec<String> },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The scope context is not active (or not started on this thread)
    #[error("{scope} context is not active")]
    ContextNotActive { scope: ScopeKind },

    /// Propagated conversation id does not name a long-running conversation
    #[error("conversation {propagated_id} does not exist, started transient conversation {transient_id}")]
    NonexistentConversation {
        propagated_id: String,
        transient_id: String,
    },

    /// Propagated conversation is in use by a concurrent request
    #[error("conversation {propagated_id} is busy, started transient conversation {transient_id}")]
    BusyConversation {
        propagated_id: String,
        transient_id: String,
    },

    /// A contextual's `create` failed
    #[error("failed to create {contextual}: {message}")]
    Creation { contextual: String, message: String },

    /// A contextual's `destroy` failed
    #[error("failed to destroy {contextual}: {message}")]
    Destruction { contextual: String, message: String },

    /// One or more failures collected while tearing down a batch
    #[error("{} failure(s) while destroying {owner}", .failures.len())]
    Teardown { owner: String, failures: Vec<DiError> },

    /// Failure raised while starting or ending a scope
    #[error("{scope} context failure: {source}")]
    Context {
        scope: ScopeKind,
        #[source]
        source: Box<DiError>,
    },

    /// Passivated state could not be encoded or decoded
    #[cfg(feature = "serde_json")]
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiError {
    /// Builds a creation failure for the named contextual.
    pub fn creation(contextual: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        DiError::Creation {
            contextual: contextual.to_string(),
            message: message.to_string(),
        }
    }

    /// Builds a destruction failure for the named contextual.
    pub fn destruction(contextual: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        DiError::Destruction {
            contextual: contextual.to_string(),
            message: message.to_string(),
        }
    }

    /// Wraps this error as a context failure of `scope` unless it already is one.
    pub fn into_context(self, scope: ScopeKind) -> Self {
        match self {
            wrapped @ DiError::Context { .. } => wrapped,
            other => DiError::Context {
                scope,
                source: Box::new(other),
            },
        }
    }

    /// Returns true for configuration/consistency defects that must not be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            DiError::TeardownLoop { .. }
            | DiError::NotPassivationCapable { .. }
            | DiError::UnknownPassivationId(_)
            | DiError::MissingEntry { .. }
            | DiError::Circular { .. }
            | DiError::Config(_) => true,
            DiError::Context { source, .. } => source.is_fatal(),
            DiError::Teardown { failures, .. } => failures.iter().any(DiError::is_fatal),
            _ => false,
        }
    }

    /// Returns true for the recoverable busy/nonexistent conversation signals.
    pub fn is_conversation_failure(&self) -> bool {
        match self {
            DiError::NonexistentConversation { .. } | DiError::BusyConversation { .. } => true,
            DiError::Context { source, .. } => source.is_conversation_failure(),
            _ => false,
        }
    }
}

/// Result type for lifecycle operations
pub type DiResult<T> = Result<T, DiError>;
