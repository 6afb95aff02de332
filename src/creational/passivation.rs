//! Passivation of creational contexts.
//!
//! Live contextual references cannot cross process boundaries, so a
//! passivated context names its contextuals by portable id and the
//! [`PassivationRegistry`] of the restoring process maps them back.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contextual::ContextualUnit;
use crate::error::{DiError, DiResult};

use super::{CreationalContext, CreationalContextFactory};

/// Maps contextuals to stable ids and back.
///
/// Implemented by the bean registry of the owning runtime, see
/// [`BeanRegistry`](crate::BeanRegistry).
pub trait PassivationRegistry: Send + Sync {
    /// Stable id of `contextual`, or `None` if it cannot be passivated.
    fn to_portable_id(&self, contextual: &ContextualUnit) -> Option<String>;

    /// Contextual registered under `id` in this process.
    fn resolve(&self, id: &str) -> Option<ContextualUnit>;
}

/// Serialized form of a [`CreationalContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassivatedCreationalContext {
    /// Portable id of the episode's contextual
    pub contextual: Option<String>,
    /// Dependents in teardown order
    pub dependents: Vec<PassivatedDependent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassivatedDependent {
    pub contextual: String,
    pub state: serde_json::Value,
}

pub(crate) fn portable_id(registry: &dyn PassivationRegistry, contextual: &ContextualUnit) -> DiResult<String> {
    registry
        .to_portable_id(contextual)
        .ok_or_else(|| DiError::NotPassivationCapable {
            bean: contextual.id().to_string(),
        })
}

pub(crate) fn resolve(registry: &dyn PassivationRegistry, id: &str) -> DiResult<ContextualUnit> {
    registry
        .resolve(id)
        .ok_or_else(|| DiError::UnknownPassivationId(id.to_string()))
}

impl CreationalContext {
    /// Captures this episode for passivation.
    ///
    /// Fails fast with [`DiError::NotPassivationCapable`] if the episode's
    /// contextual or any dependent has no portable id or cannot capture its
    /// instance state.
    pub fn passivate(&self, registry: &dyn PassivationRegistry) -> DiResult<PassivatedCreationalContext> {
        let contextual = match self.contextual() {
            Some(contextual) => Some(portable_id(registry, &contextual)?),
            None => None,
        };
        let dependents = self
            .dependents()
            .iter()
            .map(|dependent| {
                Ok(PassivatedDependent {
                    contextual: portable_id(registry, dependent.contextual())?,
                    state: dependent.contextual().passivate(dependent.instance())?,
                })
            })
            .collect::<DiResult<Vec<_>>>()?;
        debug!(episode = self.episode(), dependents = dependents.len(), "creational context passivated");
        Ok(PassivatedCreationalContext { contextual, dependents })
    }

    pub fn to_json(&self, registry: &dyn PassivationRegistry) -> DiResult<String> {
        Ok(serde_json::to_string(&self.passivate(registry)?)?)
    }
}

impl CreationalContextFactory {
    /// Restores a passivated episode against the contextuals of this process.
    pub fn activate(
        &self,
        snapshot: PassivatedCreationalContext,
        registry: &dyn PassivationRegistry,
    ) -> DiResult<CreationalContext> {
        let contextual = snapshot
            .contextual
            .as_deref()
            .map(|id| resolve(registry, id))
            .transpose()?;
        let cc = self.creational_context(contextual.as_ref());
        for dependent in snapshot.dependents {
            let unit = resolve(registry, &dependent.contextual)?;
            let instance = unit.activate(dependent.state)?;
            cc.add_dependent(&unit, Some(instance));
        }
        debug!(episode = cc.episode(), dependents = cc.dependent_count(), "creational context activated");
        Ok(cc)
    }

    pub fn from_json(&self, json: &str, registry: &dyn PassivationRegistry) -> DiResult<CreationalContext> {
        let snapshot: PassivatedCreationalContext = serde_json::from_str(json)?;
        self.activate(snapshot, registry)
    }
}
