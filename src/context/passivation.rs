//! Passivation of passivating scope contexts (sessions and conversations).

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::creational::passivation::{portable_id, resolve};
use crate::creational::{CreationalContextFactory, PassivatedCreationalContext, PassivationRegistry};
use crate::error::{DiError, DiResult};
use crate::scope::ScopeKind;

use super::{BeanInstanceBag, Conversation, ScopeContext};

/// Serialized form of a [`ScopeContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassivatedScopeContext {
    pub kind: ScopeKind,
    pub entries: Vec<PassivatedEntry>,
    /// Long-running conversations; transient ones end with their request
    #[serde(default)]
    pub conversations: Vec<PassivatedConversation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassivatedEntry {
    pub contextual: String,
    pub state: serde_json::Value,
    pub creational_context: PassivatedCreationalContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassivatedConversation {
    pub id: String,
    pub timeout_ms: u64,
    pub context: PassivatedScopeContext,
}

impl ScopeContext {
    /// Captures every entry of this context.
    ///
    /// Only passivating scopes can be captured. Fails fast with
    /// [`DiError::NotPassivationCapable`] on the first entry (or dependent of
    /// an entry) that cannot be passivated.
    pub fn passivate(&self, registry: &dyn PassivationRegistry) -> DiResult<PassivatedScopeContext> {
        if !self.kind.is_passivating() {
            return Err(DiError::NotPassivationCapable {
                bean: format!("{} context", self.kind),
            });
        }

        let bags: Vec<BeanInstanceBag> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        let entries = bags
            .iter()
            .map(|bag| {
                Ok(PassivatedEntry {
                    contextual: portable_id(registry, bag.contextual())?,
                    state: bag.contextual().passivate(bag.instance())?,
                    creational_context: bag.creational_context().passivate(registry)?,
                })
            })
            .collect::<DiResult<Vec<_>>>()?;

        let mut conversations = Vec::new();
        for id in self.conversations.ids() {
            let Some(conversation) = self.conversations.get(&id) else {
                continue;
            };
            if conversation.is_transient() || conversation.is_destroyed() {
                continue;
            }
            conversations.push(PassivatedConversation {
                id,
                timeout_ms: u64::try_from(conversation.timeout().as_millis()).unwrap_or(u64::MAX),
                context: conversation.context().passivate(registry)?,
            });
        }

        debug!(scope = %self.kind, context = self.id, entries = entries.len(), "context passivated");
        Ok(PassivatedScopeContext {
            kind: self.kind,
            entries,
            conversations,
        })
    }

    pub fn to_json(&self, registry: &dyn PassivationRegistry) -> DiResult<String> {
        Ok(serde_json::to_string(&self.passivate(registry)?)?)
    }

    /// Rebuilds a passivated context in this process.
    ///
    /// The returned context is inactive until it is attached to a thread.
    pub fn activate(
        snapshot: PassivatedScopeContext,
        registry: &dyn PassivationRegistry,
        factory: &CreationalContextFactory,
    ) -> DiResult<ScopeContext> {
        let context = ScopeContext::new(snapshot.kind);
        for entry in snapshot.entries {
            let unit = resolve(registry, &entry.contextual)?;
            let cc = factory.activate(entry.creational_context, registry)?;
            let instance = unit.activate(entry.state)?;
            let cell = OnceCell::with_value(BeanInstanceBag::new(unit.clone(), instance, cc));
            context.entries.insert(unit.id().clone(), Arc::new(cell));
        }
        for passivated in snapshot.conversations {
            let nested = ScopeContext::activate(passivated.context, registry, factory)?;
            nested.set_active(true);
            let conversation = Conversation::with_context(
                passivated.id,
                Duration::from_millis(passivated.timeout_ms),
                Arc::new(nested),
            );
            conversation.begin();
            context.conversations.insert(Arc::new(conversation))?;
        }
        info!(scope = %context.kind, context = context.id, entries = context.len(), "context activated");
        Ok(context)
    }

    pub fn from_json(
        json: &str,
        registry: &dyn PassivationRegistry,
        factory: &CreationalContextFactory,
    ) -> DiResult<ScopeContext> {
        let snapshot: PassivatedScopeContext = serde_json::from_str(json)?;
        Self::activate(snapshot, registry, factory)
    }
}
