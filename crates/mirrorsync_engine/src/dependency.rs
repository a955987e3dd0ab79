//! Cross-entity dependencies of incoming messages.

use crate::error::SyncResult;
use crate::store::MirrorStore;
use async_trait::async_trait;
use mirrorsync_protocol::{EntityKey, Snapshot};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Declares that a snapshot field references another entity that must exist
/// locally before the message can be applied.
///
/// Requirements belong to the subscriber's configuration, not to the wire
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequirement {
    /// Snapshot field holding the referenced id.
    pub field: String,
    /// Kind of the referenced entity.
    pub kind: String,
    /// Whether a null or missing reference is acceptable.
    pub optional: bool,
}

impl DependencyRequirement {
    /// A reference that must always be present.
    pub fn required(field: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: kind.into(),
            optional: false,
        }
    }

    /// A reference that may be null or absent.
    pub fn optional(field: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: kind.into(),
            optional: true,
        }
    }

    /// Extracts the referenced entity from a snapshot.
    ///
    /// Returns `Ok(None)` for an absent optional reference and `Err` with a
    /// reason when the reference is missing or not an id.
    pub fn reference(&self, snapshot: &Snapshot) -> Result<Option<EntityKey>, String> {
        match snapshot.get(&self.field) {
            None | Some(Value::Null) if self.optional => Ok(None),
            None | Some(Value::Null) => Err(format!("missing reference field `{}`", self.field)),
            Some(Value::String(id)) if !id.is_empty() => {
                Ok(Some(EntityKey::new(self.kind.clone(), id.clone())))
            }
            Some(Value::Number(n)) => Ok(Some(EntityKey::new(self.kind.clone(), n.to_string()))),
            Some(_) => Err(format!("`{}` is not an entity id", self.field)),
        }
    }
}

/// Answers whether a dependency already exists locally.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Returns true if the entity exists and is not deleted.
    async fn exists(&self, key: &EntityKey) -> SyncResult<bool>;
}

/// Probes the mirror store itself: a dependency exists once a live mirror
/// record of that kind is present.
pub struct StoreProbe<S: MirrorStore> {
    store: Arc<S>,
}

impl<S: MirrorStore> StoreProbe<S> {
    /// Creates a probe over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: MirrorStore> DependencyProbe for StoreProbe<S> {
    async fn exists(&self, key: &EntityKey) -> SyncResult<bool> {
        Ok(self
            .store
            .load(key)
            .await?
            .is_some_and(|record| record.is_live()))
    }
}

/// Adapts an async closure into a probe, for integrators whose existence
/// check lives outside the mirror store.
pub struct FnProbe<F> {
    check: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn(EntityKey) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    /// Wraps a closure.
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F, Fut> DependencyProbe for FnProbe<F>
where
    F: Fn(EntityKey) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn exists(&self, key: &EntityKey) -> SyncResult<bool> {
        Ok((self.check)(key.clone()).await)
    }
}
