//! Container facade tying the registry, creational contexts and beans together.

use std::sync::Arc;

use tracing::trace;

use crate::beans::BeanRegistry;
use crate::config::ContainerConfig;
use crate::context::{create_dependent, ScopeContext};
use crate::contextual::{ContextualUnit, Instance};
use crate::creational::{Creational, CreationalContext, CreationalContextFactory};
use crate::error::{DiError, DiResult};
use crate::registry::ContextsService;
use crate::scope::ScopeKind;

#[cfg(feature = "passivation")]
use crate::context::PassivatedScopeContext;

/// Wraps instances of normal-scoped contextuals in client proxies.
///
/// The proxy must resolve to the same stored instance; implementations wrap,
/// never replace.
pub trait ProxyFactory: Send + Sync {
    fn create_proxy(&self, contextual: &ContextualUnit, scope: ScopeKind, instance: Instance) -> Instance;
}

/// Entry point for obtaining contextual references.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{BeanManager, ContainerConfig, FactoryBean, ScopeKind, ScopeParams};
/// use std::sync::Arc;
///
/// let manager = BeanManager::from_config(ContainerConfig::default()).unwrap();
/// let clock = FactoryBean::new("clock", ScopeKind::Application, |_| Ok(Arc::new(42u64))).into_unit();
/// let greeting = FactoryBean::new("greeting", ScopeKind::Dependent, |_| Ok(Arc::new("hi"))).into_unit();
///
/// manager.contexts().start_context(ScopeKind::Application, &ScopeParams::default()).unwrap();
///
/// let cc = manager.creational_context(None);
/// let a = manager.get_reference(&clock, &cc).unwrap();
/// let b = manager.get_reference(&clock, &cc).unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// // Dependent references belong to the caller's creational context
/// let g = manager.get_reference(&greeting, &cc).unwrap();
/// assert!(cc.contains_dependent(&greeting, &g));
///
/// cc.release().unwrap();
/// manager.contexts().destroy().unwrap();
/// ```
pub struct BeanManager {
    contexts: Arc<ContextsService>,
    factory: CreationalContextFactory,
    beans: BeanRegistry,
    proxies: Option<Arc<dyn ProxyFactory>>,
}

impl BeanManager {
    pub fn new(contexts: ContextsService) -> Self {
        let factory = CreationalContextFactory::new(contexts.config());
        Self {
            contexts: Arc::new(contexts),
            factory,
            beans: BeanRegistry::new(),
            proxies: None,
        }
    }

    pub fn from_config(config: ContainerConfig) -> DiResult<Self> {
        config.validate()?;
        Ok(Self::new(ContextsService::new(config)))
    }

    pub fn from_env() -> DiResult<Self> {
        Self::from_config(ContainerConfig::from_env()?)
    }

    pub fn with_proxy_factory(mut self, proxies: Arc<dyn ProxyFactory>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn contexts(&self) -> &Arc<ContextsService> {
        &self.contexts
    }

    pub fn beans(&self) -> &BeanRegistry {
        &self.beans
    }

    pub fn factory(&self) -> &CreationalContextFactory {
        &self.factory
    }

    /// Registers `unit` for passivation lookups. See [`BeanRegistry::register`].
    pub fn register(&self, unit: ContextualUnit) -> Option<String> {
        self.beans.register(unit)
    }

    pub fn creational_context(&self, contextual: Option<&ContextualUnit>) -> CreationalContext {
        self.factory.creational_context(contextual)
    }

    pub fn wrapped_creational_context(&self, outer: Arc<dyn Creational>, contextual: &ContextualUnit) -> CreationalContext {
        self.factory.wrapped_creational_context(outer, contextual)
    }

    /// Returns a reference to an instance of `unit` in its scope.
    ///
    /// Dependent instances are created into `cc`, which owns and later
    /// destroys them. Instances of other scopes are created into a fresh
    /// creational context of their own and stored in the current context of
    /// that scope; normal-scoped instances are passed through the proxy
    /// factory, if one is configured.
    pub fn get_reference(&self, unit: &ContextualUnit, cc: &CreationalContext) -> DiResult<Instance> {
        let scope = unit.scope();
        trace!(contextual = %unit.id(), scope = %scope, "resolving reference");

        if scope == ScopeKind::Dependent {
            return match self.contexts.current_context(ScopeKind::Dependent)? {
                Some(context) => context.get_or_create(unit, cc.clone()),
                None => create_dependent(unit, cc),
            };
        }

        let context = self
            .contexts
            .current_context(scope)?
            .ok_or(DiError::ContextNotActive { scope })?;
        let instance = context.get_or_create(unit, self.factory.creational_context(Some(unit)))?;

        match &self.proxies {
            Some(proxies) if scope.is_normal() => Ok(proxies.create_proxy(unit, scope, instance)),
            _ => Ok(instance),
        }
    }

    /// Destroys the instance of `unit` in the current context of its scope.
    ///
    /// Returns `Ok(false)` when the scope is not active or holds no instance.
    pub fn destroy_reference(&self, unit: &ContextualUnit) -> DiResult<bool> {
        match self.contexts.current_context(unit.scope())? {
            Some(context) => context.destroy(unit),
            None => Ok(false),
        }
    }

    /// Captures the current session for passivation.
    #[cfg(feature = "passivation")]
    pub fn passivate_session(&self) -> DiResult<PassivatedScopeContext> {
        let session = self
            .contexts
            .current_context(ScopeKind::Session)?
            .ok_or(DiError::ContextNotActive {
                scope: ScopeKind::Session,
            })?;
        session.passivate(&self.beans)
    }

    /// Restores a passivated session onto the calling thread.
    #[cfg(feature = "passivation")]
    pub fn activate_session(&self, snapshot: PassivatedScopeContext) -> DiResult<Arc<ScopeContext>> {
        self.contexts.activate_session(snapshot, &self.beans)
    }

    /// Current context of `kind`, failing when it is not active.
    pub fn context(&self, kind: ScopeKind) -> DiResult<Arc<ScopeContext>> {
        self.contexts
            .current_context(kind)?
            .ok_or(DiError::ContextNotActive { scope: kind })
    }
}

impl std::fmt::Debug for BeanManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanManager")
            .field("contexts", &self.contexts)
            .field("beans", &self.beans.len())
            .field("proxies", &self.proxies.is_some())
            .finish()
    }
}
