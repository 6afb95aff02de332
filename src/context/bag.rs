//! Stored (instance, creational context) pair.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::contextual::{ContextualUnit, Instance};
use crate::creational::CreationalContext;
use crate::error::{DiError, DiResult};

/// One contextual instance held by a scope context, together with the
/// creational context that tracks what its creation pulled in.
#[derive(Clone)]
pub struct BeanInstanceBag {
    contextual: ContextualUnit,
    instance: Instance,
    creational_context: CreationalContext,
    destroyed: Arc<AtomicBool>,
}

impl BeanInstanceBag {
    pub(crate) fn new(contextual: ContextualUnit, instance: Instance, creational_context: CreationalContext) -> Self {
        Self {
            contextual,
            instance,
            creational_context,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn contextual(&self) -> &ContextualUnit {
        &self.contextual
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn creational_context(&self) -> &CreationalContext {
        &self.creational_context
    }

    /// Destroys the instance, then releases its creational context.
    ///
    /// Runs at most once across clones of the bag. The release runs even when
    /// the contextual's destroy fails; when both fail, both are returned in a
    /// [`DiError::Teardown`].
    pub(crate) fn destroy(&self) -> DiResult<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(
            contextual = %self.contextual.id(),
            episode = self.creational_context.episode(),
            "destroying contextual instance"
        );
        let outcome = self
            .contextual
            .destroy(self.instance.clone(), &self.creational_context);
        let released = self.creational_context.release();
        match (outcome, released) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(destroy_err), Err(release_err)) => Err(DiError::Teardown {
                owner: format!("{} instance", self.contextual.id()),
                failures: vec![destroy_err, release_err],
            }),
        }
    }
}

impl fmt::Debug for BeanInstanceBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstanceBag")
            .field("contextual", self.contextual.id())
            .field("creational_context", &self.creational_context)
            .finish_non_exhaustive()
    }
}
