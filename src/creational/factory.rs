//! Creation of creational contexts bound to one container configuration.

use std::sync::Arc;

use tracing::trace;

use crate::config::ContainerConfig;
use crate::contextual::ContextualUnit;

use super::{Creational, CreationalContext};

/// Hands out creational contexts carrying the container's teardown budget.
#[derive(Debug, Clone)]
pub struct CreationalContextFactory {
    teardown_factor: usize,
}

impl CreationalContextFactory {
    pub fn new(config: &ContainerConfig) -> Self {
        Self {
            teardown_factor: config.teardown_factor,
        }
    }

    /// Starts a new creation episode for `contextual`.
    pub fn creational_context(&self, contextual: Option<&ContextualUnit>) -> CreationalContext {
        CreationalContext::new(contextual.cloned(), None, self.teardown_factor)
    }

    /// Adapts a foreign creational context for the internal machinery.
    ///
    /// A context that already is a [`CreationalContext`] is returned as is,
    /// keeping its identity. Anything else is wrapped: the wrapper tracks its
    /// own dependents and forwards `push`/`release` to the original.
    pub fn wrapped_creational_context(
        &self,
        outer: Arc<dyn Creational>,
        contextual: &ContextualUnit,
    ) -> CreationalContext {
        if let Some(existing) = outer.as_creational_context() {
            return existing.clone();
        }
        trace!(contextual = %contextual.id(), "wrapping foreign creational context");
        CreationalContext::new(Some(contextual.clone()), Some(outer), self.teardown_factor)
    }

    pub fn teardown_factor(&self) -> usize {
        self.teardown_factor
    }
}

impl Default for CreationalContextFactory {
    fn default() -> Self {
        Self::new(&ContainerConfig::default())
    }
}
