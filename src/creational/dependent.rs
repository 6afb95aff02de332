//! Dependent-object record kept by a creational context.

use std::fmt;

use crate::contextual::{same_instance, ContextualUnit, Instance};
use crate::error::DiResult;

use super::CreationalContext;

/// One dependent-scoped instance created while building the root instance.
#[derive(Clone)]
pub struct DependentInstance {
    contextual: ContextualUnit,
    instance: Instance,
}

impl DependentInstance {
    pub(crate) fn new(contextual: ContextualUnit, instance: Instance) -> Self {
        Self { contextual, instance }
    }

    pub fn contextual(&self) -> &ContextualUnit {
        &self.contextual
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Logical equality on the contextual, reference identity on the instance.
    pub(crate) fn matches(&self, contextual: &ContextualUnit, instance: &Instance) -> bool {
        self.contextual == *contextual && same_instance(&self.instance, instance)
    }

    pub(crate) fn holds(&self, instance: &Instance) -> bool {
        same_instance(&self.instance, instance)
    }

    /// Destroys the instance on behalf of the owning creational context.
    pub(crate) fn destroy(self, owner: &CreationalContext) -> DiResult<()> {
        self.contextual.destroy(self.instance, owner)
    }
}

impl fmt::Debug for DependentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentInstance")
            .field("contextual", self.contextual.id())
            .finish_non_exhaustive()
    }
}
