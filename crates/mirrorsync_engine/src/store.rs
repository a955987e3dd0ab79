//! Local mirror persistence.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use mirrorsync_protocol::{EntityKey, Snapshot, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// The subscriber's local copy of a foreign entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorRecord {
    /// Id of the entity in the source service.
    pub source_entity_id: String,
    /// Entity kind.
    pub entity_kind: String,
    /// Whitelisted subset of the last applied snapshot.
    pub fields: Snapshot,
    /// Stamp of the last applied message.
    pub last_synced_at: Timestamp,
    /// Soft-delete marker.
    pub is_deleted: bool,
}

impl MirrorRecord {
    /// Returns the store key of this record.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_kind.clone(), self.source_entity_id.clone())
    }

    /// Returns true if the record is visible to normal reads.
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }
}

/// Result of a conditional upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed; the new one was stored.
    Inserted,
    /// An older record was replaced.
    Replaced,
    /// The stored record is as new or newer; nothing was written.
    Stale {
        /// Stamp of the stored record.
        current: Timestamp,
    },
}

impl UpsertOutcome {
    /// Returns true if the record was written.
    pub fn is_written(&self) -> bool {
        !matches!(self, UpsertOutcome::Stale { .. })
    }
}

/// Storage for mirror records.
///
/// Implementations must make `upsert_if_newer` a single atomic conditional
/// write per key, e.g. `UPDATE .. WHERE last_synced_at < $incoming` followed
/// by an insert-if-absent, or an optimistic-concurrency write in a document
/// store. This is the only place ordering between concurrent messages for the
/// same entity is decided.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Loads a record, including soft-deleted ones.
    async fn load(&self, key: &EntityKey) -> SyncResult<Option<MirrorRecord>>;

    /// Stores `record` if no record exists for its key or the stored one has
    /// a strictly older `last_synced_at`.
    async fn upsert_if_newer(&self, record: MirrorRecord) -> SyncResult<UpsertOutcome>;

    /// Lists the records of one kind, ordered by source id.
    async fn list(&self, kind: &str, include_deleted: bool) -> SyncResult<Vec<MirrorRecord>>;
}

/// An in-memory mirror store.
///
/// The write lock is held only for the read-check-write of a single upsert and
/// never across an `.await`.
#[derive(Debug, Default)]
pub struct MemoryMirrorStore {
    records: RwLock<HashMap<EntityKey, MirrorRecord>>,
    failing_writes: AtomicU32,
}

impl MemoryMirrorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` upserts fail with a retryable storage error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Returns a record without going through the async interface.
    pub fn get(&self, key: &EntityKey) -> Option<MirrorRecord> {
        self.records.read().get(key).cloned()
    }

    /// Returns the number of records, including soft-deleted ones.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns every record, ordered by key.
    pub fn snapshot(&self) -> Vec<MirrorRecord> {
        let mut all: Vec<_> = self.records.read().values().cloned().collect();
        all.sort_by_key(MirrorRecord::key);
        all
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn load(&self, key: &EntityKey) -> SyncResult<Option<MirrorRecord>> {
        Ok(self.get(key))
    }

    async fn upsert_if_newer(&self, record: MirrorRecord) -> SyncResult<UpsertOutcome> {
        if self.take_injected_failure() {
            return Err(SyncError::storage_retryable("injected write failure"));
        }

        let key = record.key();
        let mut records = self.records.write();
        match records.get(&key) {
            Some(current) if current.last_synced_at >= record.last_synced_at => {
                Ok(UpsertOutcome::Stale {
                    current: current.last_synced_at,
                })
            }
            Some(_) => {
                records.insert(key, record);
                Ok(UpsertOutcome::Replaced)
            }
            None => {
                records.insert(key, record);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn list(&self, kind: &str, include_deleted: bool) -> SyncResult<Vec<MirrorRecord>> {
        let mut out: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.entity_kind == kind && (include_deleted || r.is_live()))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.source_entity_id.cmp(&b.source_entity_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, stamp: i64, name: &str) -> MirrorRecord {
        MirrorRecord {
            source_entity_id: id.into(),
            entity_kind: "company".into(),
            fields: Snapshot::new().with("name", name),
            last_synced_at: Timestamp::from_micros(stamp),
            is_deleted: false,
        }
    }

    #[tokio::test]
    async fn insert_then_replace() {
        let store = MemoryMirrorStore::new();
        assert_eq!(
            store.upsert_if_newer(record("c-1", 10, "a")).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            store.upsert_if_newer(record("c-1", 20, "b")).await.unwrap(),
            UpsertOutcome::Replaced
        );

        let key = EntityKey::new("company", "c-1");
        let stored = store.load(&key).await.unwrap().unwrap();
        assert_eq!(stored.fields.get_str("name"), Some("b"));
    }

    #[tokio::test]
    async fn older_or_equal_stamp_is_stale() {
        let store = MemoryMirrorStore::new();
        store.upsert_if_newer(record("c-1", 20, "new")).await.unwrap();

        let older = store.upsert_if_newer(record("c-1", 10, "old")).await.unwrap();
        assert_eq!(
            older,
            UpsertOutcome::Stale {
                current: Timestamp::from_micros(20)
            }
        );
        assert!(!older.is_written());

        let same = store.upsert_if_newer(record("c-1", 20, "dup")).await.unwrap();
        assert!(!same.is_written());

        let key = EntityKey::new("company", "c-1");
        assert_eq!(store.get(&key).unwrap().fields.get_str("name"), Some("new"));
    }

    #[tokio::test]
    async fn list_hides_deleted_by_default() {
        let store = MemoryMirrorStore::new();
        store.upsert_if_newer(record("c-2", 1, "b")).await.unwrap();
        let mut deleted = record("c-1", 1, "a");
        deleted.is_deleted = true;
        store.upsert_if_newer(deleted).await.unwrap();

        let live = store.list("company", false).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].source_entity_id, "c-2");

        let all = store.list("company", true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source_entity_id, "c-1");
        assert!(store.list("employee", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_retryable() {
        let store = MemoryMirrorStore::new();
        store.fail_next_writes(1);

        let err = store.upsert_if_newer(record("c-1", 1, "a")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.is_empty());

        store.upsert_if_newer(record("c-1", 1, "a")).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
