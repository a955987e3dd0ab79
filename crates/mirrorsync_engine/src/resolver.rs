//! Last-writer-wins merge of incoming messages into mirror records.

use crate::error::{SyncError, SyncResult};
use crate::schema::MirrorSchema;
use crate::store::MirrorRecord;
use mirrorsync_protocol::{CrudAction, Snapshot, SyncMessage, Timestamp};

/// What a successful write does to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// First record for the entity.
    Inserted,
    /// Fields refreshed; deletion state unchanged.
    Updated,
    /// Record marked deleted.
    SoftDeleted,
    /// Previously deleted record revived.
    Restored,
}

/// The next state computed for a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write this record.
    Write {
        /// Record to store.
        record: MirrorRecord,
        /// Effect of the write.
        change: ChangeKind,
    },
    /// The local record is as new or newer; discard the message.
    Stale {
        /// Stamp of the local record.
        last_synced_at: Timestamp,
    },
    /// Deletion of an entity never mirrored. Nothing becomes visible, but the
    /// tombstone is stored so an older `Created` arriving later is stale.
    Tombstone {
        /// Deleted record with no fields.
        record: MirrorRecord,
    },
}

/// Computes the next mirror state for `message` given the current record.
///
/// Pure and deterministic. Replaying the same message yields `Stale`, and of
/// two messages for one entity the one with the greater stamp always wins,
/// whatever the arrival order.
pub fn resolve(
    message: &SyncMessage,
    current: Option<&MirrorRecord>,
    schema: &MirrorSchema,
) -> SyncResult<Resolution> {
    let deletion = message.crud_action.is_deletion();

    let current = match current {
        None if deletion => {
            return Ok(Resolution::Tombstone {
                record: MirrorRecord {
                    source_entity_id: message.entity_id.clone(),
                    entity_kind: message.entity_kind.clone(),
                    fields: Snapshot::new(),
                    last_synced_at: message.emitted_at,
                    is_deleted: true,
                },
            });
        }
        None => None,
        Some(record) if message.emitted_at <= record.last_synced_at => {
            return Ok(Resolution::Stale {
                last_synced_at: record.last_synced_at,
            });
        }
        Some(record) => Some(record),
    };

    schema
        .check(&message.snapshot, !deletion)
        .into_result()
        .map_err(|reasons| {
            SyncError::malformed(&message.entity_kind, &message.entity_id, reasons)
        })?;

    let incoming = schema.project(&message.snapshot);
    let is_deleted = deletion || schema.is_soft_deleted(&message.snapshot);

    let (fields, change) = match current {
        None => (incoming, ChangeKind::Inserted),
        Some(record) => {
            let fields = if message.crud_action == CrudAction::Deleted {
                // Deletions may carry a partial snapshot; keep what we had.
                let mut merged = record.fields.clone();
                for (name, value) in incoming.iter() {
                    merged.insert(name.clone(), value.clone());
                }
                merged
            } else {
                incoming
            };
            let change = match (record.is_deleted, is_deleted) {
                (false, true) => ChangeKind::SoftDeleted,
                (true, false) => ChangeKind::Restored,
                _ => ChangeKind::Updated,
            };
            (fields, change)
        }
    };

    Ok(Resolution::Write {
        record: MirrorRecord {
            source_entity_id: message.entity_id.clone(),
            entity_kind: message.entity_kind.clone(),
            fields,
            last_synced_at: message.emitted_at,
            is_deleted,
        },
        change,
    })
}
