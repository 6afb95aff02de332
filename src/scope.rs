//! Scope kind definitions.

use std::fmt;

/// Scope kinds controlling where contextual instances live
///
/// Each kind maps to one slot in the [`ContextsService`](crate::ContextsService).
/// Every kind except `Application` is thread-confined: the calling thread sees
/// only the context it started. `Application` is a single process-wide context.
///
/// # Nesting
///
/// - **Request**: one unit of work, shortest lived
/// - **Session**: spans requests, holds the session's conversations
/// - **Conversation**: spans requests within one session, explicitly begun/ended
/// - **Singleton**: pseudo-scope, one instance per context, never proxied
/// - **Dependent**: pseudo-scope, instance bound to whoever created it
/// - **Application**: shared by every thread, longest lived
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::ScopeKind;
///
/// assert!(ScopeKind::Request.is_normal());
/// assert!(!ScopeKind::Dependent.is_normal());
/// assert!(ScopeKind::Session.is_passivating());
/// assert!(!ScopeKind::Application.is_thread_confined());
///
/// // Global teardown walks shorter-lived scopes first
/// assert_eq!(ScopeKind::TEARDOWN_ORDER.first(), Some(&ScopeKind::Request));
/// assert_eq!(ScopeKind::TEARDOWN_ORDER.last(), Some(&ScopeKind::Application));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScopeKind {
    /// One context per request/unit of work on the current thread
    Request,
    /// One context per user session, attached to the servicing thread
    Session,
    /// One context per conversation, nested under the session
    Conversation,
    /// One context per thread start, instances are not proxied
    Singleton,
    /// Instances are never stored; their lifetime follows the creator
    Dependent,
    /// One context for the whole process
    Application,
}

impl ScopeKind {
    /// Order used when every scope is torn down at once.
    pub const TEARDOWN_ORDER: [ScopeKind; 6] = [
        ScopeKind::Request,
        ScopeKind::Session,
        ScopeKind::Conversation,
        ScopeKind::Singleton,
        ScopeKind::Dependent,
        ScopeKind::Application,
    ];

    /// Normal scopes hand out client proxies; pseudo-scopes hand out raw instances.
    pub fn is_normal(self) -> bool {
        !matches!(self, ScopeKind::Singleton | ScopeKind::Dependent)
    }

    pub fn is_thread_confined(self) -> bool {
        self != ScopeKind::Application
    }

    /// Scopes whose state may be serialized and restored elsewhere.
    pub fn is_passivating(self) -> bool {
        matches!(self, ScopeKind::Session | ScopeKind::Conversation)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScopeKind::Request => "request",
            ScopeKind::Session => "session",
            ScopeKind::Conversation => "conversation",
            ScopeKind::Singleton => "singleton",
            ScopeKind::Dependent => "dependent",
            ScopeKind::Application => "application",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
