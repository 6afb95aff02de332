//! Contextual definitions: anything that can create and destroy an instance.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::creational::CreationalContext;
use crate::error::{DiError, DiResult};
use crate::scope::ScopeKind;

/// Type-erased, shareable contextual instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Returns true if both handles point at the same instance.
///
/// Instance identity is reference identity; vtable metadata is ignored.
pub fn same_instance(a: &Instance, b: &Instance) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Logical identity of a contextual.
///
/// Used as the storage key in scope contexts and as the equality for
/// dependent lookups. Two distinct contextual objects with the same id are
/// considered the same definition.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::ContextualId;
///
/// struct Greeter;
///
/// let a = ContextualId::new("greeter");
/// let b = ContextualId::new(String::from("greeter"));
/// assert_eq!(a, b);
///
/// let typed = ContextualId::of::<Greeter>();
/// assert!(typed.as_str().ends_with("Greeter"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextualId(Arc<str>);

impl ContextualId {
    pub fn new(id: impl Into<String>) -> Self {
        ContextualId(Arc::from(id.into()))
    }

    /// Id derived from a type name.
    pub fn of<T: ?Sized + 'static>() -> Self {
        ContextualId(Arc::from(std::any::type_name::<T>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContextualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextualId({})", self.0)
    }
}

impl fmt::Display for ContextualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A definition that knows how to create and destroy one kind of instance.
///
/// `create` is called exactly once per creational context it is handed.
/// `destroy` must tolerate nested destroys happening while it runs: tearing
/// down an instance may tear down its dependents, which may call back into the
/// same creational context.
pub trait Contextual: Send + Sync + 'static {
    /// Logical identity of this definition.
    fn id(&self) -> &ContextualId;

    /// Creates a new instance, registering any dependents it creates into `cc`.
    fn create(&self, cc: &CreationalContext) -> DiResult<Instance>;

    /// Destroys an instance previously returned by `create`.
    fn destroy(&self, instance: Instance, cc: &CreationalContext) -> DiResult<()>;

    /// Captures the instance state for passivation.
    #[cfg(feature = "passivation")]
    fn passivate(&self, _instance: &Instance) -> DiResult<serde_json::Value> {
        Err(DiError::NotPassivationCapable { bean: self.id().to_string() })
    }

    /// Rebuilds an instance from state captured by [`passivate`](Self::passivate).
    #[cfg(feature = "passivation")]
    fn activate(&self, _state: serde_json::Value) -> DiResult<Instance> {
        Err(DiError::NotPassivationCapable { bean: self.id().to_string() })
    }
}

/// A full component: a contextual with a declared scope.
pub trait Bean: Contextual {
    fn scope(&self) -> ScopeKind;

    /// Stable identity across processes, if the bean supports passivation.
    fn passivation_id(&self) -> Option<&str> {
        None
    }

    fn is_passivation_capable(&self) -> bool {
        self.passivation_id().is_some()
    }
}

/// A contextual resolved once, at registration time, into its variant.
///
/// Interceptors and decorators are contextuals but not beans. They carry no
/// scope and are always dependent on whatever they wrap.
///
/// Equality and hashing are logical (by [`ContextualId`]).
/// [`is_same`](Self::is_same) compares references.
#[derive(Clone)]
pub enum ContextualUnit {
    Bean(Arc<dyn Bean>),
    Interceptor(Arc<dyn Contextual>),
    Decorator(Arc<dyn Contextual>),
    Plain(Arc<dyn Contextual>),
}

impl ContextualUnit {
    pub fn bean<B: Bean>(bean: B) -> Self {
        ContextualUnit::Bean(Arc::new(bean))
    }

    pub fn interceptor<C: Contextual>(contextual: C) -> Self {
        ContextualUnit::Interceptor(Arc::new(contextual))
    }

    pub fn decorator<C: Contextual>(contextual: C) -> Self {
        ContextualUnit::Decorator(Arc::new(contextual))
    }

    pub fn plain<C: Contextual>(contextual: C) -> Self {
        ContextualUnit::Plain(Arc::new(contextual))
    }

    pub fn id(&self) -> &ContextualId {
        match self {
            ContextualUnit::Bean(b) => b.id(),
            ContextualUnit::Interceptor(c)
            | ContextualUnit::Decorator(c)
            | ContextualUnit::Plain(c) => c.id(),
        }
    }

    pub fn as_bean(&self) -> Option<&Arc<dyn Bean>> {
        match self {
            ContextualUnit::Bean(b) => Some(b),
            _ => None,
        }
    }

    /// Declared scope; non-bean contextuals are dependent.
    pub fn scope(&self) -> ScopeKind {
        match self {
            ContextualUnit::Bean(b) => b.scope(),
            _ => ScopeKind::Dependent,
        }
    }

    pub fn passivation_id(&self) -> Option<&str> {
        self.as_bean().and_then(|b| b.passivation_id())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ContextualUnit::Bean(_) => "bean",
            ContextualUnit::Interceptor(_) => "interceptor",
            ContextualUnit::Decorator(_) => "decorator",
            ContextualUnit::Plain(_) => "contextual",
        }
    }

    pub fn create(&self, cc: &CreationalContext) -> DiResult<Instance> {
        match self {
            ContextualUnit::Bean(b) => b.create(cc),
            ContextualUnit::Interceptor(c)
            | ContextualUnit::Decorator(c)
            | ContextualUnit::Plain(c) => c.create(cc),
        }
    }

    pub fn destroy(&self, instance: Instance, cc: &CreationalContext) -> DiResult<()> {
        match self {
            ContextualUnit::Bean(b) => b.destroy(instance, cc),
            ContextualUnit::Interceptor(c)
            | ContextualUnit::Decorator(c)
            | ContextualUnit::Plain(c) => c.destroy(instance, cc),
        }
    }

    #[cfg(feature = "passivation")]
    pub fn passivate(&self, instance: &Instance) -> DiResult<serde_json::Value> {
        match self {
            ContextualUnit::Bean(b) => b.passivate(instance),
            ContextualUnit::Interceptor(c)
            | ContextualUnit::Decorator(c)
            | ContextualUnit::Plain(c) => c.passivate(instance),
        }
    }

    #[cfg(feature = "passivation")]
    pub fn activate(&self, state: serde_json::Value) -> DiResult<Instance> {
        match self {
            ContextualUnit::Bean(b) => b.activate(state),
            ContextualUnit::Interceptor(c)
            | ContextualUnit::Decorator(c)
            | ContextualUnit::Plain(c) => c.activate(state),
        }
    }

    /// Reference identity: both units wrap the very same definition object.
    pub fn is_same(&self, other: &ContextualUnit) -> bool {
        std::ptr::eq(self.data_ptr(), other.data_ptr())
    }

    /// Reference identity against a bean handle.
    pub fn is_bean(&self, bean: &Arc<dyn Bean>) -> bool {
        std::ptr::eq(self.data_ptr(), Arc::as_ptr(bean) as *const ())
    }

    fn data_ptr(&self) -> *const () {
        match self {
            ContextualUnit::Bean(b) => Arc::as_ptr(b) as *const (),
            ContextualUnit::Interceptor(c)
            | ContextualUnit::Decorator(c)
            | ContextualUnit::Plain(c) => Arc::as_ptr(c) as *const (),
        }
    }
}

impl PartialEq for ContextualUnit {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ContextualUnit {}

impl std::hash::Hash for ContextualUnit {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for ContextualUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextualUnit")
            .field("kind", &self.kind_name())
            .field("id", self.id())
            .field("scope", &self.scope())
            .finish()
    }
}

type CreateFn = Box<dyn Fn(&CreationalContext) -> DiResult<Instance> + Send + Sync>;
type DestroyFn = Box<dyn Fn(Instance, &CreationalContext) -> DiResult<()> + Send + Sync>;

/// Bean backed by closures.
///
/// The quickest way to hand a definition to the container when no dedicated
/// [`Bean`] implementation exists.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{ContextsService, ContextualUnit, CreationalContextFactory,
///                   FactoryBean, ScopeKind, ScopeParams, ContainerConfig};
/// use std::sync::Arc;
///
/// struct Cart { items: Vec<String> }
///
/// let cart = ContextualUnit::bean(
///     FactoryBean::new("cart", ScopeKind::Request, |_cc| {
///         Ok(Arc::new(Cart { items: Vec::new() }))
///     })
///     .on_destroy(|_instance, _cc| Ok(())),
/// );
///
/// let contexts = ContextsService::new(ContainerConfig::default());
/// contexts.start_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
///
/// let factory = CreationalContextFactory::new(contexts.config());
/// let request = contexts.current_context(ScopeKind::Request).unwrap().unwrap();
/// let instance = request.get_or_create(&cart, factory.creational_context(Some(&cart))).unwrap();
/// assert!(instance.downcast_ref::<Cart>().unwrap().items.is_empty());
///
/// contexts.end_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
/// ```
pub struct FactoryBean {
    id: ContextualId,
    scope: ScopeKind,
    passivation_id: Option<String>,
    create: CreateFn,
    destroy: Option<DestroyFn>,
}

impl FactoryBean {
    pub fn new<F>(id: impl Into<String>, scope: ScopeKind, create: F) -> Self
    where
        F: Fn(&CreationalContext) -> DiResult<Instance> + Send + Sync + 'static,
    {
        Self {
            id: ContextualId::new(id),
            scope,
            passivation_id: None,
            create: Box::new(create),
            destroy: None,
        }
    }

    /// Sets the destruction callback; without one, destroy only drops the instance.
    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(Instance, &CreationalContext) -> DiResult<()> + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }

    /// Marks the bean as passivation capable under the given stable id.
    pub fn passivation_capable(mut self, id: impl Into<String>) -> Self {
        self.passivation_id = Some(id.into());
        self
    }

    pub fn into_unit(self) -> ContextualUnit {
        ContextualUnit::bean(self)
    }
}

impl Contextual for FactoryBean {
    fn id(&self) -> &ContextualId {
        &self.id
    }

    fn create(&self, cc: &CreationalContext) -> DiResult<Instance> {
        (self.create)(cc)
    }

    fn destroy(&self, instance: Instance, cc: &CreationalContext) -> DiResult<()> {
        match &self.destroy {
            Some(destroy) => destroy(instance, cc),
            None => Ok(()),
        }
    }
}

impl Bean for FactoryBean {
    fn scope(&self) -> ScopeKind {
        self.scope
    }

    fn passivation_id(&self) -> Option<&str> {
        self.passivation_id.as_deref()
    }
}

impl fmt::Debug for FactoryBean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryBean")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("passivation_id", &self.passivation_id)
            .finish()
    }
}
