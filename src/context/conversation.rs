//! Conversations: session-nested contexts that can span several requests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{DiError, DiResult};
use crate::scope::ScopeKind;

use super::ScopeContext;

/// A conversation and its context.
///
/// Every conversation starts transient and lives for one request. Calling
/// [`begin`](Self::begin) promotes it to long-running: it then stays in its
/// session's [`ConversationStore`] and can be resumed by later requests that
/// propagate its id, one request at a time.
pub struct Conversation {
    id: String,
    transient: AtomicBool,
    in_use: AtomicBool,
    last_access: Mutex<Instant>,
    timeout: Mutex<Duration>,
    context: Arc<ScopeContext>,
}

impl Conversation {
    /// New transient conversation with an active context.
    pub(crate) fn transient(id: String, timeout: Duration) -> Self {
        let context = ScopeContext::new(ScopeKind::Conversation);
        context.set_active(true);
        Self::with_context(id, timeout, Arc::new(context))
    }

    pub(crate) fn with_context(id: String, timeout: Duration, context: Arc<ScopeContext>) -> Self {
        Self {
            id,
            transient: AtomicBool::new(true),
            in_use: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
            timeout: Mutex::new(timeout),
            context,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &Arc<ScopeContext> {
        &self.context
    }

    pub fn is_transient(&self) -> bool {
        self.transient.load(Ordering::Acquire)
    }

    /// Promotes the conversation to long-running.
    pub fn begin(&self) {
        if self.transient.swap(false, Ordering::AcqRel) {
            debug!(conversation = %self.id, "conversation promoted to long-running");
        }
    }

    /// Demotes the conversation to transient; it is destroyed when its
    /// current request ends.
    pub fn end(&self) {
        if !self.transient.swap(true, Ordering::AcqRel) {
            debug!(conversation = %self.id, "conversation marked transient");
        }
    }

    pub fn timeout(&self) -> Duration {
        *self.timeout.lock()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    /// Whether a request currently holds the conversation.
    pub fn is_busy(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub(crate) fn try_acquire(&self) -> bool {
        let acquired = self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if acquired {
            self.touch();
        }
        acquired
    }

    pub(crate) fn release(&self) {
        self.touch();
        self.in_use.store(false, Ordering::Release);
    }

    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.idle_time() > self.timeout()
    }

    /// Whether the conversation's context has already been destroyed.
    pub fn is_destroyed(&self) -> bool {
        !self.context.is_active()
    }

    pub(crate) fn destroy(&self) -> DiResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        debug!(conversation = %self.id, "destroying conversation");
        self.context.destroy_all()
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("transient", &self.is_transient())
            .field("busy", &self.is_busy())
            .field("context", &self.context.id())
            .finish()
    }
}

/// Conversations of one session, by id.
#[derive(Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Arc<Conversation>>>,
}

impl ConversationStore {
    pub fn get(&self, id: &str) -> Option<Arc<Conversation>> {
        self.conversations.lock().get(id).cloned()
    }

    /// Adds a conversation; an id that is already taken is rejected.
    pub(crate) fn insert(&self, conversation: Arc<Conversation>) -> DiResult<()> {
        let mut conversations = self.conversations.lock();
        if conversations.contains_key(conversation.id()) {
            return Err(DiError::Config(format!(
                "conversation id {} is already in use",
                conversation.id()
            )));
        }
        conversations.insert(conversation.id().to_string(), conversation);
        Ok(())
    }

    /// Creates and adds a transient conversation under the first id from
    /// `next_id` not already in the store.
    pub(crate) fn insert_transient(
        &self,
        mut next_id: impl FnMut() -> String,
        timeout: Duration,
    ) -> Arc<Conversation> {
        let mut conversations = self.conversations.lock();
        let id = loop {
            let id = next_id();
            if !conversations.contains_key(&id) {
                break id;
            }
            debug!(conversation = %id, "conversation id taken, skipping");
        };
        let conversation = Arc::new(Conversation::transient(id.clone(), timeout));
        conversations.insert(id, conversation.clone());
        conversation
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Conversation>> {
        self.conversations.lock().remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.conversations.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.conversations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.lock().is_empty()
    }

    /// Removes every conversation; the caller destroys them.
    pub(crate) fn drain(&self) -> Vec<Arc<Conversation>> {
        self.conversations.lock().drain().map(|(_, c)| c).collect()
    }

    /// Removes idle long-running conversations past their timeout.
    ///
    /// Busy conversations are never taken.
    pub(crate) fn take_expired(&self) -> Vec<Arc<Conversation>> {
        let mut conversations = self.conversations.lock();
        let expired: Vec<String> = conversations
            .iter()
            .filter(|(_, c)| !c.is_transient() && !c.is_busy() && c.is_expired())
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                warn!(conversation = %id, "conversation timed out");
                conversations.remove(&id)
            })
            .collect()
    }
}

impl fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.ids())
            .finish()
    }
}
