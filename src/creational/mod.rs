//! Creational contexts and dependent-object teardown.
//!
//! A [`CreationalContext`] is the bookkeeping record of one creation episode:
//! every dependent-scoped object created while building the root instance is
//! registered into it, and releasing the context destroys them all.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::contextual::{Bean, ContextualUnit, Instance};
use crate::error::{DiError, DiResult};
use crate::metadata::{EventMetadata, InjectionPoint};

mod dependent;
mod factory;
#[cfg(feature = "passivation")]
pub(crate) mod passivation;

pub use dependent::DependentInstance;
pub use factory::CreationalContextFactory;
#[cfg(feature = "passivation")]
pub use passivation::{PassivatedCreationalContext, PassivatedDependent, PassivationRegistry};

static NEXT_EPISODE: AtomicU64 = AtomicU64::new(1);

/// Minimal creational-context surface handed around by external callers.
///
/// [`CreationalContext`] implements it; foreign implementations can be adapted
/// with [`CreationalContextFactory::wrapped_creational_context`].
pub trait Creational: Send + Sync {
    /// Records the incomplete instance of the episode (used to break circular references).
    fn push(&self, incomplete: Instance);

    /// Destroys everything transitively created in this episode.
    fn release(&self) -> DiResult<()>;

    /// Returns the rich creational context when this already is one.
    fn as_creational_context(&self) -> Option<&CreationalContext> {
        None
    }
}

/// Bookkeeping record of one "give me an instance" operation.
///
/// Cloning yields another handle to the same episode. All dependent-list
/// access is serialized by a lock owned by this episode alone, so unrelated
/// episodes never contend.
///
/// # Teardown order
///
/// Dependents are destroyed front to back. A dependent whose contextual is the
/// episode's own bean goes to the front; every other dependent is appended.
/// Dependents registered while teardown is running are appended and destroyed
/// by the same [`release`](Self::release) call, up to a budget of
/// `teardown_factor × initial count` destroy attempts.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{ContainerConfig, CreationalContextFactory, FactoryBean, ScopeKind};
/// use std::sync::{Arc, Mutex};
///
/// let destroyed = Arc::new(Mutex::new(Vec::new()));
/// let log = destroyed.clone();
/// let helper = FactoryBean::new("helper", ScopeKind::Dependent, |_| Ok(Arc::new(7u32)))
///     .on_destroy(move |_, _| {
///         log.lock().unwrap().push("helper");
///         Ok(())
///     })
///     .into_unit();
///
/// let factory = CreationalContextFactory::new(&ContainerConfig::default());
/// let cc = factory.creational_context(None);
/// let instance = helper.create(&cc).unwrap();
/// cc.add_dependent(&helper, Some(instance.clone()));
/// assert!(cc.contains_dependent(&helper, &instance));
///
/// cc.release().unwrap();
/// cc.release().unwrap(); // second release is a no-op
/// assert_eq!(*destroyed.lock().unwrap(), vec!["helper"]);
/// ```
#[derive(Clone)]
pub struct CreationalContext {
    inner: Arc<Inner>,
}

struct Inner {
    episode: u64,
    contextual: RwLock<Option<ContextualUnit>>,
    bean: RwLock<Option<Arc<dyn Bean>>>,
    delegate: Mutex<Option<Instance>>,
    incomplete: Mutex<Option<Instance>>,
    injection_points: Mutex<Vec<InjectionPoint>>,
    event_metadata: Mutex<Vec<EventMetadata>>,
    /// Lazily allocated; `None` once released.
    dependents: Mutex<Option<VecDeque<DependentInstance>>>,
    destroying: AtomicBool,
    /// Foreign context this one was wrapped around.
    outer: Option<Arc<dyn Creational>>,
    teardown_factor: usize,
}

/// Clears the destroying flag however teardown exits.
struct DestroyingGuard<'a>(&'a AtomicBool);

impl Drop for DestroyingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CreationalContext {
    pub(crate) fn new(
        contextual: Option<ContextualUnit>,
        outer: Option<Arc<dyn Creational>>,
        teardown_factor: usize,
    ) -> Self {
        let bean = contextual.as_ref().and_then(|c| c.as_bean().cloned());
        Self {
            inner: Arc::new(Inner {
                episode: NEXT_EPISODE.fetch_add(1, Ordering::Relaxed),
                contextual: RwLock::new(contextual),
                bean: RwLock::new(bean),
                delegate: Mutex::new(None),
                incomplete: Mutex::new(None),
                injection_points: Mutex::new(Vec::new()),
                event_metadata: Mutex::new(Vec::new()),
                dependents: Mutex::new(None),
                destroying: AtomicBool::new(false),
                outer,
                teardown_factor: teardown_factor.max(1),
            }),
        }
    }

    /// Process-unique id of this creation episode, for tracing.
    pub fn episode(&self) -> u64 {
        self.inner.episode
    }

    /// Returns true if both handles refer to the same episode.
    pub fn same_episode(&self, other: &CreationalContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_wrapped(&self) -> bool {
        self.inner.outer.is_some()
    }

    pub fn teardown_factor(&self) -> usize {
        self.inner.teardown_factor
    }

    // ----- identity -----

    pub fn contextual(&self) -> Option<ContextualUnit> {
        self.inner.contextual.read().clone()
    }

    /// Swaps the contextual, returning the previous one so callers can restore it.
    pub fn put_contextual(&self, contextual: Option<ContextualUnit>) -> Option<ContextualUnit> {
        std::mem::replace(&mut *self.inner.contextual.write(), contextual)
    }

    pub fn bean(&self) -> Option<Arc<dyn Bean>> {
        self.inner.bean.read().clone()
    }

    /// Swaps the bean, returning the previous one so callers can restore it.
    pub fn put_bean(&self, bean: Option<Arc<dyn Bean>>) -> Option<Arc<dyn Bean>> {
        std::mem::replace(&mut *self.inner.bean.write(), bean)
    }

    /// Name used in diagnostics: bean id, else contextual id.
    pub fn owner_name(&self) -> String {
        if let Some(bean) = self.inner.bean.read().as_ref() {
            return bean.id().to_string();
        }
        match self.inner.contextual.read().as_ref() {
            Some(contextual) => contextual.id().to_string(),
            None => format!("creational context #{}", self.inner.episode),
        }
    }

    // ----- decorator delegate -----

    /// Replaces the ambient delegate, returning the previous value.
    pub fn put_delegate(&self, delegate: Option<Instance>) -> Option<Instance> {
        std::mem::replace(&mut *self.inner.delegate.lock(), delegate)
    }

    pub fn delegate(&self) -> Option<Instance> {
        self.inner.delegate.lock().clone()
    }

    pub fn incomplete_instance(&self) -> Option<Instance> {
        self.inner.incomplete.lock().clone()
    }

    // ----- ambient stacks -----

    pub fn put_injection_point(&self, injection_point: InjectionPoint) {
        self.inner.injection_points.lock().push(injection_point);
    }

    pub fn remove_injection_point(&self) -> Option<InjectionPoint> {
        self.inner.injection_points.lock().pop()
    }

    /// Current injection point, without popping it.
    pub fn injection_point(&self) -> Option<InjectionPoint> {
        self.inner.injection_points.lock().last().cloned()
    }

    pub fn put_event_metadata(&self, metadata: EventMetadata) {
        self.inner.event_metadata.lock().push(metadata);
    }

    pub fn remove_event_metadata(&self) -> Option<EventMetadata> {
        self.inner.event_metadata.lock().pop()
    }

    /// Current event, without popping it.
    pub fn event_metadata(&self) -> Option<EventMetadata> {
        self.inner.event_metadata.lock().last().cloned()
    }

    // ----- dependents -----

    /// Registers a dependent-scoped instance created during this episode.
    ///
    /// `None` (a producer returning nothing) is ignored, as is a second
    /// registration of the same contextual/instance pair. The episode's own
    /// bean is placed in front of every other dependent.
    pub fn add_dependent(&self, contextual: &ContextualUnit, instance: Option<Instance>) {
        let Some(instance) = instance else {
            return;
        };
        let is_self = self
            .inner
            .bean
            .read()
            .as_ref()
            .is_some_and(|bean| contextual.is_bean(bean));

        let mut guard = self.inner.dependents.lock();
        let dependents = guard.get_or_insert_with(VecDeque::new);
        if dependents.iter().any(|d| d.matches(contextual, &instance)) {
            trace!(episode = self.inner.episode, contextual = %contextual.id(), "dependent already registered");
            return;
        }
        let record = DependentInstance::new(contextual.clone(), instance);
        if is_self {
            dependents.push_front(record);
        } else {
            dependents.push_back(record);
        }
        trace!(
            episode = self.inner.episode,
            contextual = %contextual.id(),
            count = dependents.len(),
            "dependent registered"
        );
    }

    pub fn contains_dependent(&self, contextual: &ContextualUnit, instance: &Instance) -> bool {
        self.inner
            .dependents
            .lock()
            .as_ref()
            .is_some_and(|d| d.iter().any(|dep| dep.matches(contextual, instance)))
    }

    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.lock().as_ref().map_or(0, VecDeque::len)
    }

    /// Snapshot of the registered dependents in teardown order.
    pub fn dependents(&self) -> Vec<DependentInstance> {
        self.inner
            .dependents
            .lock()
            .as_ref()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Destroys the single dependent holding `instance`.
    ///
    /// Returns `Ok(false)` if no dependent holds it. The record is removed
    /// before its contextual's `destroy` runs, so the destroy call may freely
    /// register or destroy other dependents.
    pub fn destroy_dependent(&self, instance: &Instance) -> DiResult<bool> {
        let found = {
            let mut guard = self.inner.dependents.lock();
            guard.as_mut().and_then(|dependents| {
                let position = dependents.iter().position(|d| d.holds(instance))?;
                dependents.remove(position)
            })
        };
        match found {
            Some(dependent) => {
                debug!(
                    episode = self.inner.episode,
                    contextual = %dependent.contextual().id(),
                    "destroying single dependent"
                );
                dependent.destroy(self)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Destroys every registered dependent.
    ///
    /// Reentrant calls (from a dependent's own `destroy`) return immediately.
    /// Destroy failures do not stop the teardown; they are collected and
    /// returned together as [`DiError::Teardown`]. Exceeding the destroy budget
    /// aborts with [`DiError::TeardownLoop`], leaving the undestroyed dependents
    /// registered.
    pub fn remove_all_dependents(&self) -> DiResult<()> {
        if self.inner.destroying.swap(true, Ordering::AcqRel) {
            trace!(episode = self.inner.episode, "teardown already running");
            return Ok(());
        }
        let _destroying = DestroyingGuard(&self.inner.destroying);

        let initial = self.dependent_count();
        if initial == 0 {
            return Ok(());
        }
        let limit = initial.saturating_mul(self.inner.teardown_factor);
        debug!(episode = self.inner.episode, owner = %self.owner_name(), initial, limit, "releasing dependents");

        let mut attempts = 0usize;
        let mut failures = Vec::new();
        loop {
            let (next, exhausted) = {
                let mut guard = self.inner.dependents.lock();
                match guard.as_mut() {
                    Some(dependents) if attempts >= limit && !dependents.is_empty() => (None, true),
                    Some(dependents) => (dependents.pop_front(), false),
                    None => (None, false),
                }
            };
            if exhausted {
                let bean = self.owner_name();
                error!(episode = self.inner.episode, bean = %bean, limit, "dependent teardown did not converge");
                return Err(DiError::TeardownLoop { bean, limit });
            }
            let Some(dependent) = next else {
                break;
            };
            attempts += 1;
            let id = dependent.contextual().id().clone();
            if let Err(err) = dependent.destroy(self) {
                warn!(episode = self.inner.episode, contextual = %id, error = %err, "dependent destroy failed");
                failures.push(err);
            }
        }

        *self.inner.dependents.lock() = None;
        debug!(episode = self.inner.episode, destroyed = attempts, "dependents released");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DiError::Teardown {
                owner: self.owner_name(),
                failures,
            })
        }
    }

    /// Destroys everything this episode transitively created.
    ///
    /// For a wrapped context the foreign context is released afterwards.
    pub fn release(&self) -> DiResult<()> {
        let local = self.remove_all_dependents();
        if let Some(outer) = &self.inner.outer {
            outer.release()?;
        }
        local
    }

    pub fn is_destroying(&self) -> bool {
        self.inner.destroying.load(Ordering::Acquire)
    }
}

impl Creational for CreationalContext {
    fn push(&self, incomplete: Instance) {
        *self.inner.incomplete.lock() = Some(incomplete.clone());
        if let Some(outer) = &self.inner.outer {
            outer.push(incomplete);
        }
    }

    fn release(&self) -> DiResult<()> {
        CreationalContext::release(self)
    }

    fn as_creational_context(&self) -> Option<&CreationalContext> {
        Some(self)
    }
}

impl fmt::Debug for CreationalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreationalContext")
            .field("episode", &self.inner.episode)
            .field("contextual", &self.inner.contextual.read().as_ref().map(|c| c.id().clone()))
            .field("dependents", &self.dependent_count())
            .field("wrapped", &self.is_wrapped())
            .finish()
    }
}
