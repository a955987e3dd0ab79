//! Subscriber configuration files.
//!
//! A subscriber config describes which kinds are mirrored, which fields are
//! kept, and which references must exist before a message is applied:
//!
//! ```json
//! {
//!   "handlers": [
//!     { "kind": "company", "fields": ["name"], "softDeleteField": "isDeleted" },
//!     {
//!       "kind": "employee",
//!       "fields": ["name", "companyId"],
//!       "optionalFields": ["title"],
//!       "dependencies": [{ "field": "companyId", "kind": "company" }]
//!     }
//!   ],
//!   "wait": { "organicMaxWaitMs": 300000, "forceSyncMaxWaitMs": 30000 }
//! }
//! ```

use mirrorsync_engine::{
    BackoffConfig, ConsumerConfig, DependencyRequirement, HandlerRegistry, MirrorHandler,
    MirrorSchema, WaitConfig,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors loading a subscriber config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid JSON for this schema.
    #[error("invalid subscriber config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The config parsed but is inconsistent.
    #[error("invalid subscriber config: {0}")]
    Invalid(String),
}

/// A dependency declared in the config.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEntry {
    /// Snapshot field holding the reference.
    pub field: String,
    /// Kind of the referenced entity.
    pub kind: String,
    /// Whether the reference may be absent.
    #[serde(default)]
    pub optional: bool,
}

/// One mirrored kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerEntry {
    /// Entity kind.
    pub kind: String,
    /// Required fields.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Fields kept when present.
    #[serde(default)]
    pub optional_fields: Vec<String>,
    /// Boolean field marking a soft-deleted source.
    #[serde(default)]
    pub soft_delete_field: Option<String>,
    /// References that must exist locally first.
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
}

/// Wait budgets, in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitEntry {
    /// Budget for organic messages.
    pub organic_max_wait_ms: Option<u64>,
    /// Budget for force-sync messages.
    pub force_sync_max_wait_ms: Option<u64>,
    /// First backoff delay.
    pub initial_backoff_ms: Option<u64>,
    /// Backoff cap.
    pub max_backoff_ms: Option<u64>,
}

/// A subscriber config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberConfig {
    /// Mirrored kinds.
    pub handlers: Vec<HandlerEntry>,
    /// Wait budgets.
    #[serde(default)]
    pub wait: WaitEntry,
    /// Maximum concurrent messages.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl SubscriberConfig {
    /// Loads a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parses a config from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for handler in &self.handlers {
            if handler.kind.is_empty() {
                return Err(ConfigError::Invalid("handler kind is empty".into()));
            }
            if !seen.insert(handler.kind.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "kind `{}` is configured twice",
                    handler.kind
                )));
            }
        }
        Ok(())
    }

    /// Builds the handler table.
    pub fn registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for entry in &self.handlers {
            let mut schema = MirrorSchema::new(entry.kind.clone());
            for field in &entry.fields {
                schema = schema.required(field.clone());
            }
            for field in &entry.optional_fields {
                schema = schema.optional(field.clone());
            }
            if let Some(flag) = &entry.soft_delete_field {
                schema = schema.with_soft_delete_field(flag.clone());
            }

            let mut handler = MirrorHandler::new(schema);
            for dep in &entry.dependencies {
                handler = handler.requires(if dep.optional {
                    DependencyRequirement::optional(dep.field.clone(), dep.kind.clone())
                } else {
                    DependencyRequirement::required(dep.field.clone(), dep.kind.clone())
                });
            }
            registry.register(handler);
        }
        registry
    }

    /// Builds the consumer configuration, applying file overrides on top of
    /// the defaults.
    pub fn consumer_config(&self) -> ConsumerConfig {
        let mut backoff = BackoffConfig::default();
        if let Some(ms) = self.wait.initial_backoff_ms {
            backoff.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.wait.max_backoff_ms {
            backoff.max_delay = Duration::from_millis(ms);
        }

        let mut wait = WaitConfig::default().with_backoff(backoff);
        if let Some(ms) = self.wait.organic_max_wait_ms {
            wait = wait.with_organic_max_wait(Duration::from_millis(ms));
        }
        if let Some(ms) = self.wait.force_sync_max_wait_ms {
            wait = wait.with_force_sync_max_wait(Duration::from_millis(ms));
        }

        let config = ConsumerConfig::default().with_wait(wait);
        match self.max_concurrency {
            Some(max) => config.with_max_concurrency(max),
            None => config,
        }
    }
}
