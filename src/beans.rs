//! Registry of known contextuals by portable id.

use dashmap::DashMap;
use tracing::debug;

use crate::contextual::ContextualUnit;

#[cfg(feature = "passivation")]
use crate::creational::PassivationRegistry;

/// Contextuals of this process, keyed by a stable id.
///
/// Beans with a passivation id are registered under it. Interceptors,
/// decorators and other contextuals need an explicit id via
/// [`register_as`](Self::register_as).
///
/// ```rust
/// use ferrous_cdi::{BeanRegistry, FactoryBean, ScopeKind};
/// use std::sync::Arc;
///
/// let cart = FactoryBean::new("cart", ScopeKind::Session, |_| Ok(Arc::new(Vec::<u32>::new())))
///     .passivation_capable("shop.cart")
///     .into_unit();
///
/// let beans = BeanRegistry::new();
/// assert_eq!(beans.register(cart.clone()).as_deref(), Some("shop.cart"));
/// assert_eq!(beans.get("shop.cart"), Some(cart));
/// ```
#[derive(Debug, Default)]
pub struct BeanRegistry {
    by_id: DashMap<String, ContextualUnit>,
}

impl BeanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `unit` under its passivation id.
    ///
    /// Returns the id, or `None` when the unit has no passivation id and was
    /// not registered.
    pub fn register(&self, unit: ContextualUnit) -> Option<String> {
        let id = unit.passivation_id()?.to_string();
        self.register_as(id.clone(), unit);
        Some(id)
    }

    /// Registers `unit` under an explicit id, replacing any previous entry.
    pub fn register_as(&self, id: impl Into<String>, unit: ContextualUnit) {
        let id = id.into();
        debug!(id = %id, contextual = %unit.id(), kind = unit.kind_name(), "contextual registered");
        self.by_id.insert(id, unit);
    }

    pub fn get(&self, id: &str) -> Option<ContextualUnit> {
        self.by_id.get(id).map(|entry| entry.value().clone())
    }

    /// Id under which this very contextual object is registered.
    pub fn id_of(&self, unit: &ContextualUnit) -> Option<String> {
        if let Some(id) = unit.passivation_id() {
            return Some(id.to_string());
        }
        self.by_id
            .iter()
            .find(|entry| entry.value().is_same(unit))
            .map(|entry| entry.key().clone())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(feature = "passivation")]
impl PassivationRegistry for BeanRegistry {
    fn to_portable_id(&self, contextual: &ContextualUnit) -> Option<String> {
        self.id_of(contextual)
    }

    fn resolve(&self, id: &str) -> Option<ContextualUnit> {
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contextual::{Contextual, ContextualId, Instance};
    use crate::creational::CreationalContext;
    use crate::error::DiResult;
    use crate::{FactoryBean, ScopeKind};
    use std::sync::Arc;

    struct Audit {
        id: ContextualId,
    }

    impl Contextual for Audit {
        fn id(&self) -> &ContextualId {
            &self.id
        }

        fn create(&self, _cc: &CreationalContext) -> DiResult<Instance> {
            Ok(Arc::new(()))
        }

        fn destroy(&self, _instance: Instance, _cc: &CreationalContext) -> DiResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bean_without_passivation_id_is_not_registered() {
        let beans = BeanRegistry::new();
        let unit = FactoryBean::new("plain", ScopeKind::Request, |_| Ok(Arc::new(()) as Instance)).into_unit();
        assert!(beans.register(unit.clone()).is_none());
        assert!(beans.is_empty());
        assert!(beans.id_of(&unit).is_none());
    }

    #[test]
    fn test_interceptor_is_found_by_reference() {
        let beans = BeanRegistry::new();
        let interceptor = ContextualUnit::interceptor(Audit {
            id: ContextualId::new("audit"),
        });
        beans.register_as("interceptors.audit", interceptor.clone());

        assert_eq!(beans.id_of(&interceptor).as_deref(), Some("interceptors.audit"));

        // Same logical id, different object
        let twin = ContextualUnit::interceptor(Audit {
            id: ContextualId::new("audit"),
        });
        assert!(beans.id_of(&twin).is_none());
    }
}
