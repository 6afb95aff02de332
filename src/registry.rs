//! Per-thread scope registry.
//!
//! [`ContextsService`] starts, looks up and ends the scope contexts of the
//! calling thread. Request, session, conversation, singleton and dependent
//! contexts are confined to the thread that started them; the application
//! context is shared by all threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::config::{ContainerConfig, RestartPolicy};
use crate::context::{Conversation, ScopeContext};
use crate::error::{DiError, DiResult};
use crate::observer::{ScopeObserver, ScopeObservers};
use crate::scope::ScopeKind;

#[cfg(feature = "passivation")]
use crate::context::PassivatedScopeContext;
#[cfg(feature = "passivation")]
use crate::creational::{CreationalContextFactory, PassivationRegistry};

static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(1);

// Thread-confined scopes, keyed by registry id so that several registries can
// coexist on one thread.
thread_local! {
    static SCOPE_TLS: RefCell<HashMap<u64, ThreadScopes>> = RefCell::new(HashMap::new());
}

#[derive(Default)]
struct ThreadScopes {
    request: Option<Arc<ScopeContext>>,
    session: Option<Arc<ScopeContext>>,
    singleton: Option<Arc<ScopeContext>>,
    dependent: Option<Arc<ScopeContext>>,
    conversation: ConversationSlot,
}

impl ThreadScopes {
    fn slot(&mut self, kind: ScopeKind) -> Option<&mut Option<Arc<ScopeContext>>> {
        match kind {
            ScopeKind::Request => Some(&mut self.request),
            ScopeKind::Session => Some(&mut self.session),
            ScopeKind::Singleton => Some(&mut self.singleton),
            ScopeKind::Dependent => Some(&mut self.dependent),
            ScopeKind::Conversation | ScopeKind::Application => None,
        }
    }
}

/// Conversation state of one thread.
///
/// Starting the conversation scope only records the propagated id; the
/// conversation is resolved against the session on first lookup.
#[derive(Default)]
enum ConversationSlot {
    #[default]
    NotStarted,
    Pending {
        propagated_id: Option<String>,
    },
    Active {
        conversation: Arc<Conversation>,
        session: Arc<ScopeContext>,
    },
}

enum ConversationLookup {
    NotStarted,
    Pending(Option<String>),
    Active(Arc<ScopeContext>),
}

/// Parameters for starting or ending a scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeParams {
    /// Conversation id propagated by the caller
    pub conversation_id: Option<String>,
    /// Existing session context to re-attach instead of creating a new one
    pub session: Option<Arc<ScopeContext>>,
}

impl ScopeParams {
    pub fn with_conversation_id(id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id.into()),
            session: None,
        }
    }

    pub fn with_session(session: Arc<ScopeContext>) -> Self {
        Self {
            conversation_id: None,
            session: Some(session),
        }
    }
}

/// Registry of the active scope contexts.
///
/// Each thread sees only the thread-confined contexts it started itself.
/// Starting a scope that is already active on the thread replaces the current
/// context as configured by [`RestartPolicy`]. Ending a scope that is not
/// active is a no-op.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{ContainerConfig, ContextsService, ScopeKind, ScopeParams};
///
/// let contexts = ContextsService::new(ContainerConfig::default());
/// assert!(contexts.current_context(ScopeKind::Request).unwrap().is_none());
///
/// contexts.start_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
/// let request = contexts.current_context(ScopeKind::Request).unwrap().unwrap();
/// assert!(request.is_active());
///
/// // Other threads do not see this thread's request.
/// let contexts = std::sync::Arc::new(contexts);
/// let remote = contexts.clone();
/// let seen = std::thread::spawn(move || remote.current_context(ScopeKind::Request).unwrap().is_some())
///     .join()
///     .unwrap();
/// assert!(!seen);
///
/// contexts.end_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
/// assert!(!request.is_active());
/// ```
pub struct ContextsService {
    id: u64,
    config: ContainerConfig,
    application: RwLock<Option<Arc<ScopeContext>>>,
    observers: ScopeObservers,
    next_conversation: AtomicU64,
}

impl ContextsService {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            config,
            application: RwLock::new(None),
            observers: ScopeObservers::new(),
            next_conversation: AtomicU64::new(1),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScopeObserver>) -> Self {
        self.observers.add(observer);
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ScopeObserver>) {
        self.observers.add(observer);
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn observers(&self) -> &ScopeObservers {
        &self.observers
    }

    /// Runs `f` against this registry's scopes on the current thread.
    ///
    /// `f` must not call back into the registry or into contextual code.
    fn with_scopes<R>(&self, f: impl FnOnce(&mut ThreadScopes) -> R) -> R {
        SCOPE_TLS.with(|tls| {
            let mut scopes = tls.borrow_mut();
            f(scopes.entry(self.id).or_default())
        })
    }

    /// Starts `kind` on the calling thread (or process-wide for the
    /// application scope).
    ///
    /// Starting the application scope while it is active does nothing.
    /// Starting a session with [`ScopeParams::session`] re-attaches that
    /// session. Starting the conversation scope records the propagated
    /// conversation id; it is resolved on the next
    /// [`current_context`](Self::current_context) call.
    pub fn start_context(&self, kind: ScopeKind, params: &ScopeParams) -> DiResult<()> {
        self.start(kind, params).map_err(|err| err.into_context(kind))
    }

    fn start(&self, kind: ScopeKind, params: &ScopeParams) -> DiResult<()> {
        match kind {
            ScopeKind::Application => {
                let mut application = self.application.write();
                if application.is_some() {
                    trace!("application context already active");
                    return Ok(());
                }
                let context = Arc::new(ScopeContext::new(kind));
                context.set_active(true);
                *application = Some(context.clone());
                drop(application);
                self.observers.initialized(kind, &context);
                Ok(())
            }
            ScopeKind::Conversation => {
                let pending = ConversationSlot::Pending {
                    propagated_id: params.conversation_id.clone(),
                };
                let previous = self.with_scopes(|s| std::mem::replace(&mut s.conversation, pending));
                match previous {
                    ConversationSlot::Active { conversation, session } => self.finish_conversation(conversation, &session),
                    _ => Ok(()),
                }
            }
            _ => {
                let context = match (kind, &params.session) {
                    (ScopeKind::Session, Some(session)) => {
                        debug!(context = session.id(), "re-attaching session");
                        session.clone()
                    }
                    _ => Arc::new(ScopeContext::new(kind)),
                };
                context.set_active(true);

                let previous = self.with_scopes(|s| s.slot(kind).and_then(|slot| slot.replace(context.clone())));
                if let Some(previous) = previous {
                    if !Arc::ptr_eq(&previous, &context) {
                        self.retire(kind, previous)?;
                    }
                }
                self.observers.initialized(kind, &context);
                Ok(())
            }
        }
    }

    /// Handles a context replaced by a restart of its scope.
    fn retire(&self, kind: ScopeKind, previous: Arc<ScopeContext>) -> DiResult<()> {
        match self.config.restart_policy {
            RestartPolicy::Abandon => {
                if !previous.is_empty() {
                    warn!(
                        scope = %kind,
                        context = previous.id(),
                        entries = previous.len(),
                        "scope restarted; previous context abandoned without destroying its instances"
                    );
                }
                Ok(())
            }
            RestartPolicy::DestroyPrevious => self.teardown(kind, &previous),
        }
    }

    /// Ends `kind` on the calling thread and destroys its context.
    ///
    /// Ending a scope that is not active does nothing. A long-running
    /// conversation is only released; a transient one is destroyed.
    pub fn end_context(&self, kind: ScopeKind, _params: &ScopeParams) -> DiResult<()> {
        self.end(kind).map_err(|err| err.into_context(kind))
    }

    fn end(&self, kind: ScopeKind) -> DiResult<()> {
        match kind {
            ScopeKind::Application => {
                let application = self.application.write().take();
                match application {
                    Some(context) => self.teardown(kind, &context),
                    None => Ok(()),
                }
            }
            ScopeKind::Conversation => {
                let slot = self.with_scopes(|s| std::mem::take(&mut s.conversation));
                match slot {
                    ConversationSlot::Active { conversation, session } => self.finish_conversation(conversation, &session),
                    _ => Ok(()),
                }
            }
            _ => {
                let context = self.with_scopes(|s| s.slot(kind).and_then(Option::take));
                match context {
                    Some(context) => self.teardown(kind, &context),
                    None => {
                        trace!(scope = %kind, "scope not active, nothing to end");
                        Ok(())
                    }
                }
            }
        }
    }

    fn teardown(&self, kind: ScopeKind, context: &ScopeContext) -> DiResult<()> {
        debug!(scope = %kind, context = context.id(), entries = context.len(), "destroying scope context");
        let mut failures = Vec::new();
        if kind == ScopeKind::Session {
            for conversation in context.conversations().drain() {
                if conversation.is_destroyed() {
                    continue;
                }
                if let Err(err) = self.teardown(ScopeKind::Conversation, conversation.context()) {
                    failures.push(err);
                }
            }
        }
        if let Err(err) = context.destroy_all() {
            failures.push(err);
        }
        self.observers.destroyed(kind, context);

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(DiError::Teardown {
                owner: format!("{} context #{}", kind, context.id()),
                failures,
            }),
        }
    }

    fn finish_conversation(&self, conversation: Arc<Conversation>, session: &ScopeContext) -> DiResult<()> {
        conversation.release();
        if !conversation.is_transient() {
            debug!(conversation = %conversation.id(), "long-running conversation released");
            return Ok(());
        }
        session.conversations().remove(conversation.id());
        if conversation.is_destroyed() {
            return Ok(());
        }
        self.teardown(ScopeKind::Conversation, conversation.context())
    }

    /// Current context of `kind` for the calling thread.
    ///
    /// Returns `Ok(None)` when the scope is not active. For the conversation
    /// scope the propagated id is resolved here: a missing or transient
    /// conversation fails with [`DiError::NonexistentConversation`] and a
    /// conversation held by another request with [`DiError::BusyConversation`].
    /// In both cases a new transient conversation is installed first, so the
    /// next call returns its context.
    pub fn current_context(&self, kind: ScopeKind) -> DiResult<Option<Arc<ScopeContext>>> {
        match kind {
            ScopeKind::Application => Ok(self.application.read().clone()),
            ScopeKind::Conversation => self.conversation_context(),
            _ => Ok(self.with_scopes(|s| s.slot(kind).and_then(|slot| slot.clone()))),
        }
    }

    fn conversation_context(&self) -> DiResult<Option<Arc<ScopeContext>>> {
        let lookup = self.with_scopes(|s| match &s.conversation {
            ConversationSlot::NotStarted => ConversationLookup::NotStarted,
            ConversationSlot::Pending { propagated_id } => ConversationLookup::Pending(propagated_id.clone()),
            ConversationSlot::Active { conversation, .. } => ConversationLookup::Active(conversation.context().clone()),
        });
        let propagated = match lookup {
            ConversationLookup::NotStarted => return Ok(None),
            ConversationLookup::Active(context) => return Ok(Some(context)),
            ConversationLookup::Pending(propagated) => propagated,
        };

        let Some(session) = self.current_context(ScopeKind::Session)? else {
            warn!("conversation scope started without an active session");
            return Ok(None);
        };

        let (conversation, failure) = match propagated {
            None => (self.begin_transient(&session), None),
            Some(propagated_id) => match session.conversations().get(&propagated_id) {
                Some(existing) if !existing.is_transient() => {
                    if existing.try_acquire() {
                        debug!(conversation = %propagated_id, "resuming long-running conversation");
                        (existing, None)
                    } else {
                        let transient = self.begin_transient(&session);
                        let err = DiError::BusyConversation {
                            propagated_id,
                            transient_id: transient.id().to_string(),
                        };
                        (transient, Some(err))
                    }
                }
                _ => {
                    let transient = self.begin_transient(&session);
                    let err = DiError::NonexistentConversation {
                        propagated_id,
                        transient_id: transient.id().to_string(),
                    };
                    (transient, Some(err))
                }
            },
        };

        let context = conversation.context().clone();
        self.with_scopes(|s| s.conversation = ConversationSlot::Active { conversation, session });
        match failure {
            Some(err) => {
                warn!(error = %err, "conversation propagation failed");
                Err(err)
            }
            None => Ok(Some(context)),
        }
    }

    fn begin_transient(&self, session: &ScopeContext) -> Arc<Conversation> {
        let conversation = session.conversations().insert_transient(
            || self.next_conversation.fetch_add(1, Ordering::Relaxed).to_string(),
            self.config.conversation_timeout(),
        );
        conversation.try_acquire();
        self.observers.initialized(ScopeKind::Conversation, conversation.context());
        conversation
    }

    /// Conversation resolved for the calling thread, if any.
    pub fn current_conversation(&self) -> Option<Arc<Conversation>> {
        self.with_scopes(|s| match &s.conversation {
            ConversationSlot::Active { conversation, .. } => Some(conversation.clone()),
            _ => None,
        })
    }

    /// Removes `kind`'s context from the calling thread without destroying it.
    ///
    /// The returned context can be handed to another thread, e.g. a session
    /// via [`ScopeParams::with_session`]. A detached conversation is released
    /// so that another request can resume it. The application scope is not
    /// thread-confined and cannot be detached.
    pub fn detach_context(&self, kind: ScopeKind) -> Option<Arc<ScopeContext>> {
        match kind {
            ScopeKind::Application => None,
            ScopeKind::Conversation => {
                let slot = self.with_scopes(|s| std::mem::take(&mut s.conversation));
                match slot {
                    ConversationSlot::Active { conversation, .. } => {
                        conversation.release();
                        Some(conversation.context().clone())
                    }
                    _ => None,
                }
            }
            _ => self.with_scopes(|s| s.slot(kind).and_then(Option::take)),
        }
    }

    /// Destroys the long-running conversations of the current session that
    /// have been idle past their timeout. Returns how many were destroyed.
    pub fn destroy_expired_conversations(&self) -> DiResult<usize> {
        let Some(session) = self.current_context(ScopeKind::Session)? else {
            return Ok(0);
        };
        let expired = session.conversations().take_expired();
        let mut failures = Vec::new();
        for conversation in &expired {
            if let Err(err) = self.teardown(ScopeKind::Conversation, conversation.context()) {
                failures.push(err);
            }
        }
        if failures.is_empty() {
            Ok(expired.len())
        } else {
            Err(DiError::Teardown {
                owner: "expired conversations".to_string(),
                failures,
            })
        }
    }

    /// Ends every scope of the calling thread and the application scope.
    ///
    /// Scopes are ended in [`ScopeKind::TEARDOWN_ORDER`]. Failures are
    /// collected; every scope is ended regardless.
    pub fn destroy(&self) -> DiResult<()> {
        let mut failures = Vec::new();
        for kind in ScopeKind::TEARDOWN_ORDER {
            if let Err(err) = self.end_context(kind, &ScopeParams::default()) {
                failures.push(err);
            }
        }
        SCOPE_TLS.with(|tls| tls.borrow_mut().remove(&self.id));
        debug!(registry = self.id, failures = failures.len(), "contexts destroyed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DiError::Teardown {
                owner: "contexts service".to_string(),
                failures,
            })
        }
    }

    /// Restores a passivated session and attaches it to the calling thread.
    #[cfg(feature = "passivation")]
    pub fn activate_session(
        &self,
        snapshot: PassivatedScopeContext,
        registry: &dyn PassivationRegistry,
    ) -> DiResult<Arc<ScopeContext>> {
        if snapshot.kind != ScopeKind::Session {
            return Err(DiError::Config(format!("cannot activate a {} context as a session", snapshot.kind)));
        }
        let factory = CreationalContextFactory::new(&self.config);
        let session = Arc::new(ScopeContext::activate(snapshot, registry, &factory)?);
        self.start_context(ScopeKind::Session, &ScopeParams::with_session(session.clone()))?;
        Ok(session)
    }
}

impl std::fmt::Debug for ContextsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextsService")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("observers", &self.observers)
            .finish()
    }
}
