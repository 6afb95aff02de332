//! Scope storage.
//!
//! A [`ScopeContext`] holds the instances of one scope instance (one request,
//! one session, ...), each paired with the creational context that built it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::contextual::{ContextualId, ContextualUnit, Instance};
use crate::creational::CreationalContext;
use crate::error::{DiError, DiResult};
use crate::internal::CreationGuard;
use crate::scope::ScopeKind;

mod bag;
mod conversation;
#[cfg(feature = "passivation")]
mod passivation;

pub use bag::BeanInstanceBag;
pub use conversation::{Conversation, ConversationStore};
#[cfg(feature = "passivation")]
pub use passivation::{PassivatedConversation, PassivatedEntry, PassivatedScopeContext};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Creates a dependent instance inside `cc` and registers it there.
pub(crate) fn create_dependent(unit: &ContextualUnit, cc: &CreationalContext) -> DiResult<Instance> {
    let instance = unit.create(cc)?;
    cc.add_dependent(unit, Some(instance.clone()));
    Ok(instance)
}

/// Instance storage for one scope instance.
///
/// An entry exists for a contextual exactly when an instance of it was created
/// here and not yet destroyed. Each entry is created at most once: concurrent
/// `get_or_create` calls for the same contextual wait for the first one, while
/// different contextuals are created without contending.
///
/// A `Dependent` context never stores anything. Each `get_or_create` creates
/// a new instance and registers it as a dependent of the supplied creational
/// context.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{CreationalContextFactory, FactoryBean, ScopeContext, ScopeKind};
/// use std::sync::Arc;
///
/// let counter = FactoryBean::new("counter", ScopeKind::Application, |_| Ok(Arc::new(0u64)))
///     .into_unit();
/// let factory = CreationalContextFactory::default();
///
/// let context = ScopeContext::new(ScopeKind::Application);
/// context.set_active(true);
///
/// let first = context.get_or_create(&counter, factory.creational_context(Some(&counter))).unwrap();
/// let second = context.get_or_create(&counter, factory.creational_context(Some(&counter))).unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
///
/// assert!(context.destroy(&counter).unwrap());
/// assert!(context.get(&counter).is_none());
/// assert!(!context.destroy(&counter).unwrap()); // idempotent
/// ```
pub struct ScopeContext {
    id: u64,
    kind: ScopeKind,
    active: AtomicBool,
    entries: DashMap<ContextualId, Arc<OnceCell<BeanInstanceBag>>>,
    /// Conversations nested under this context; only sessions use it.
    conversations: ConversationStore,
}

impl ScopeContext {
    /// Creates an inactive context.
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            id: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            kind,
            active: AtomicBool::new(false),
            entries: DashMap::new(),
            conversations: ConversationStore::default(),
        }
    }

    /// Process-unique id of this scope instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Existing instance of `unit`, if created here and not yet destroyed.
    pub fn get(&self, unit: &ContextualUnit) -> Option<Instance> {
        self.entries
            .get(unit.id())
            .and_then(|cell| cell.get().map(|bag| bag.instance().clone()))
    }

    /// Stored entry for `unit`.
    pub fn bag(&self, unit: &ContextualUnit) -> Option<BeanInstanceBag> {
        self.entries.get(unit.id()).and_then(|cell| cell.get().cloned())
    }

    pub fn contains(&self, unit: &ContextualUnit) -> bool {
        self.get(unit).is_some()
    }

    /// Returns the instance of `unit`, creating it with `cc` if absent.
    ///
    /// When an instance already exists `cc` is ignored. Creation on an inactive
    /// context fails with [`DiError::ContextNotActive`], as does a creation that
    /// finishes after the context (or the entry) was destroyed; that instance
    /// is destroyed before returning. If `create` fails, the dependents it
    /// managed to register into `cc` are released.
    pub fn get_or_create(&self, unit: &ContextualUnit, cc: CreationalContext) -> DiResult<Instance> {
        if !self.is_active() {
            return Err(DiError::ContextNotActive { scope: self.kind });
        }
        if self.kind == ScopeKind::Dependent {
            return create_dependent(unit, &cc);
        }
        if let Some(instance) = self.get(unit) {
            return Ok(instance);
        }

        let cell = self
            .entries
            .entry(unit.id().clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();
        let _guard = CreationGuard::enter(self.id, unit.id())?;

        let created = cell.get_or_try_init(|| {
            let instance = match unit.create(&cc) {
                Ok(instance) => instance,
                Err(err) => {
                    if let Err(release_err) = cc.release() {
                        warn!(contextual = %unit.id(), error = %release_err, "partial cleanup after failed creation failed");
                    }
                    return Err(err);
                }
            };
            debug!(scope = %self.kind, context = self.id, contextual = %unit.id(), "contextual instance created");
            Ok(BeanInstanceBag::new(unit.clone(), instance, cc.clone()))
        });

        match created {
            Ok(bag) => {
                let attached = self.is_active()
                    && self
                        .entries
                        .get(unit.id())
                        .is_some_and(|current| Arc::ptr_eq(current.value(), &cell));
                if attached {
                    return Ok(bag.instance().clone());
                }
                // The context was torn down while the instance was being created
                debug!(scope = %self.kind, context = self.id, contextual = %unit.id(), "destroying instance created during teardown");
                self.entries.remove_if(unit.id(), |_, c| Arc::ptr_eq(c, &cell));
                bag.destroy()?;
                Err(DiError::ContextNotActive { scope: self.kind })
            }
            Err(err) => {
                self.entries
                    .remove_if(unit.id(), |_, c| c.get().is_none() && Arc::ptr_eq(c, &cell));
                Err(err)
            }
        }
    }

    /// Removes and destroys the instance of `unit`.
    ///
    /// Returns `Ok(false)` when there was nothing to destroy.
    pub fn destroy(&self, unit: &ContextualUnit) -> DiResult<bool> {
        let Some((_, cell)) = self.entries.remove(unit.id()) else {
            return Ok(false);
        };
        match cell.get() {
            Some(bag) => {
                bag.destroy()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`destroy`](Self::destroy), but an absent entry is an error.
    pub fn destroy_existing(&self, unit: &ContextualUnit) -> DiResult<()> {
        if self.destroy(unit)? {
            Ok(())
        } else {
            Err(DiError::MissingEntry {
                scope: self.kind,
                contextual: unit.id().to_string(),
            })
        }
    }

    /// Deactivates the context and destroys every entry.
    ///
    /// Each entry is fully destroyed before the next one starts. A failing
    /// entry does not stop the others; all failures are returned together.
    pub fn destroy_all(&self) -> DiResult<()> {
        self.set_active(false);
        let keys: Vec<ContextualId> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        trace!(scope = %self.kind, context = self.id, entries = keys.len(), "destroying context");

        let mut failures = Vec::new();
        for key in keys {
            let Some((_, cell)) = self.entries.remove(&key) else {
                continue;
            };
            if let Some(bag) = cell.get() {
                if let Err(err) = bag.destroy() {
                    warn!(scope = %self.kind, contextual = %key, error = %err, "failed to destroy contextual instance");
                    failures.push(err);
                }
            }
        }
        for conversation in self.conversations.drain() {
            if let Err(err) = conversation.destroy() {
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DiError::Teardown {
                owner: format!("{} context #{}", self.kind, self.id),
                failures,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Conversations of this session.
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }
}

impl fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .field("entries", &self.len())
            .finish()
    }
}
