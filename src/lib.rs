//! # ferrous-cdi
//!
//! Contextual instance lifecycle for Rust: creational contexts, dependent-object
//! teardown and thread-confined scope contexts, modelled on CDI.
//!
//! ## Features
//!
//! - **Creational contexts**: every dependent object created while building an
//!   instance is tracked and destroyed with it, in a deterministic order
//! - **Scope contexts**: request, session, conversation, singleton, dependent
//!   and application scopes with get-or-create storage
//! - **Thread confinement**: each thread sees only the scopes it started
//! - **Conversations**: long-running, session-nested contexts with busy and
//!   nonexistent detection
//! - **Passivation**: sessions and creational contexts can be captured as JSON
//!   and restored in another process
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_cdi::{BeanManager, ContainerConfig, FactoryBean, ScopeKind, ScopeParams};
//! use std::sync::{Arc, Mutex};
//!
//! struct Connection;
//! struct Repository {
//!     _connection: Arc<Connection>,
//! }
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! let connection_log = log.clone();
//! let connection = FactoryBean::new("connection", ScopeKind::Dependent, |_| Ok(Arc::new(Connection)))
//!     .on_destroy(move |_, _| {
//!         connection_log.lock().unwrap().push("connection closed");
//!         Ok(())
//!     })
//!     .into_unit();
//!
//! let manager = Arc::new(BeanManager::from_config(ContainerConfig::default()).unwrap());
//!
//! let inner = manager.clone();
//! let dependency = connection.clone();
//! let repository = FactoryBean::new("repository", ScopeKind::Request, move |cc| {
//!     let connection = inner.get_reference(&dependency, cc)?;
//!     let connection = connection.downcast::<Connection>().unwrap();
//!     Ok(Arc::new(Repository { _connection: connection }))
//! })
//! .into_unit();
//!
//! let contexts = manager.contexts();
//! contexts.start_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
//!
//! let cc = manager.creational_context(None);
//! let repo = manager.get_reference(&repository, &cc).unwrap();
//! assert!(repo.downcast_ref::<Repository>().is_some());
//!
//! // Ending the request destroys the repository and the connection it pulled in.
//! contexts.end_context(ScopeKind::Request, &ScopeParams::default()).unwrap();
//! assert_eq!(*log.lock().unwrap(), vec!["connection closed"]);
//! ```
//!
//! ## Scopes
//!
//! - **Request**, **Session**, **Conversation**: normal scopes, one context per
//!   started scope on the calling thread
//! - **Singleton**: thread-confined pseudo-scope, never proxied
//! - **Dependent**: never stored; the instance belongs to the creational
//!   context that created it
//! - **Application**: one context shared by every thread
//!
//! ## Logging
//!
//! Lifecycle events are emitted through `tracing`. Attach a
//! [`LoggingObserver`] to a [`ContextsService`] for scope start/end events.

// Module declarations
pub mod beans;
pub mod config;
pub mod context;
pub mod contextual;
pub mod creational;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod observer;
pub mod registry;
pub mod scope;

// Internal modules
mod internal;

pub use beans::BeanRegistry;
pub use config::{ConfigSource, ContainerConfig, EnvironmentConfigSource, MapConfigSource, RestartPolicy, ENV_PREFIX};
pub use context::{BeanInstanceBag, Conversation, ConversationStore, ScopeContext};
pub use contextual::{same_instance, Bean, Contextual, ContextualId, ContextualUnit, FactoryBean, Instance};
pub use creational::{Creational, CreationalContext, CreationalContextFactory, DependentInstance};
pub use error::{DiError, DiResult};
pub use manager::{BeanManager, ProxyFactory};
pub use metadata::{EventMetadata, InjectionPoint};
pub use observer::{LoggingObserver, ScopeObserver, ScopeObservers};
pub use registry::{ContextsService, ScopeParams};
pub use scope::ScopeKind;

#[cfg(feature = "passivation")]
pub use context::{PassivatedConversation, PassivatedEntry, PassivatedScopeContext};
#[cfg(feature = "passivation")]
pub use creational::{PassivatedCreationalContext, PassivatedDependent, PassivationRegistry};
