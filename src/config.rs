//! Container configuration.
//!
//! Settings are read from a [`ConfigSource`] (environment variables or an
//! in-memory map) or, with the `config` feature, from JSON.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::error::{DiError, DiResult};

/// Environment variable prefix used by [`ContainerConfig::from_env`].
pub const ENV_PREFIX: &str = "FERROUS_CDI";

/// What happens to the previous context when a thread-confined scope is
/// started again without being ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum RestartPolicy {
    /// Replace the context; the old one is dropped without destroying its entries
    #[default]
    Abandon,
    /// Destroy the old context before installing the new one
    DestroyPrevious,
}

impl FromStr for RestartPolicy {
    type Err = DiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "abandon" => Ok(RestartPolicy::Abandon),
            "destroy_previous" => Ok(RestartPolicy::DestroyPrevious),
            other => Err(DiError::Config(format!("unknown restart policy {other:?}"))),
        }
    }
}

/// Container-wide lifecycle settings.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{ContainerConfig, MapConfigSource, RestartPolicy};
///
/// let source = MapConfigSource::new()
///     .with("teardown_factor", "5")
///     .with("restart_policy", "destroy-previous");
///
/// let config = ContainerConfig::from_source(&source).unwrap();
/// assert_eq!(config.teardown_factor, 5);
/// assert_eq!(config.restart_policy, RestartPolicy::DestroyPrevious);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ContainerConfig {
    /// Destroy attempts allowed per dependent present when teardown starts
    pub teardown_factor: usize,
    pub restart_policy: RestartPolicy,
    /// Idle time after which a long-running conversation may be destroyed
    pub conversation_timeout_ms: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            teardown_factor: 3,
            restart_policy: RestartPolicy::Abandon,
            conversation_timeout_ms: 30 * 60 * 1000,
        }
    }
}

impl ContainerConfig {
    /// Reads settings from `source`, falling back to defaults for absent keys.
    pub fn from_source(source: &dyn ConfigSource) -> DiResult<Self> {
        let mut config = Self::default();
        if let Some(value) = source.get("teardown_factor") {
            config.teardown_factor = parse_number("teardown_factor", &value)?;
        }
        if let Some(value) = source.get("restart_policy") {
            config.restart_policy = value.parse()?;
        }
        if let Some(value) = source.get("conversation_timeout_ms") {
            config.conversation_timeout_ms = parse_number("conversation_timeout_ms", &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads `FERROUS_CDI_*` environment variables.
    pub fn from_env() -> DiResult<Self> {
        Self::from_source(&EnvironmentConfigSource::with_prefix(ENV_PREFIX))
    }

    #[cfg(feature = "config")]
    pub fn from_json(json: &str) -> DiResult<Self> {
        let config: ContainerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DiResult<()> {
        if self.teardown_factor == 0 {
            return Err(DiError::Config("teardown_factor must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_millis(self.conversation_timeout_ms)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> DiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DiError::Config(format!("{key} must be a non-negative integer, got {value:?}")))
}

/// Trait for configuration sources
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    /// Get a raw configuration value by lowercase key
    fn get(&self, key: &str) -> Option<String>;
}

/// Environment variable configuration source
#[derive(Debug, Default)]
pub struct EnvironmentConfigSource {
    /// Prefix to filter environment variables
    prefix: Option<String>,
}

impl EnvironmentConfigSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()) }
    }
}

impl ConfigSource for EnvironmentConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        let env_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_uppercase(), key.to_uppercase()),
            None => key.to_uppercase(),
        };
        env::var(env_key).ok()
    }
}

/// In-memory configuration source
#[derive(Debug, Default, Clone)]
pub struct MapConfigSource {
    values: HashMap<String, String>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
