//! Sync messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::snapshot::Snapshot;
use crate::timestamp::Timestamp;
use crate::validation::Validation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle action that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrudAction {
    /// Entity was created.
    Created,
    /// Entity was updated.
    Updated,
    /// Entity was deleted.
    Deleted,
}

impl CrudAction {
    /// Returns true for `Deleted`.
    pub fn is_deletion(&self) -> bool {
        matches!(self, CrudAction::Deleted)
    }

    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudAction::Created => "Created",
            CrudAction::Updated => "Updated",
            CrudAction::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for CrudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one foreign entity: its kind plus its id in the source service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    /// Entity kind.
    pub kind: String,
    /// Source entity id.
    pub id: String,
}

impl EntityKey {
    /// Creates a new key.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// The unit of cross-service communication.
///
/// A `SyncMessage` carries a point-in-time snapshot of one entity together
/// with the stamp used to order it against other messages for the same
/// entity.
///
/// # Fields
///
/// - `entity_id`: logical identifier of the source entity
/// - `entity_kind`: logical type of the entity, used for routing
/// - `crud_action`: Created, Updated or Deleted
/// - `snapshot`: full field set at emission time
/// - `emitted_at`: ordering token, non-decreasing per entity
/// - `is_force_sync`: explicit resync request rather than an organic change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Source entity id.
    pub entity_id: String,
    /// Entity kind.
    pub entity_kind: String,
    /// Lifecycle action.
    pub crud_action: CrudAction,
    /// Entity fields at emission time.
    #[serde(default)]
    pub snapshot: Snapshot,
    /// Emission stamp.
    pub emitted_at: Timestamp,
    /// Whether this is an explicit resync.
    #[serde(default)]
    pub is_force_sync: bool,
}

impl SyncMessage {
    /// Creates a new organic message.
    pub fn new(
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        crud_action: CrudAction,
        snapshot: Snapshot,
        emitted_at: Timestamp,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_kind: entity_kind.into(),
            crud_action,
            snapshot,
            emitted_at,
            is_force_sync: false,
        }
    }

    /// Creates a `Created` message.
    pub fn created(
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        snapshot: Snapshot,
        emitted_at: Timestamp,
    ) -> Self {
        Self::new(entity_kind, entity_id, CrudAction::Created, snapshot, emitted_at)
    }

    /// Creates an `Updated` message.
    pub fn updated(
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        snapshot: Snapshot,
        emitted_at: Timestamp,
    ) -> Self {
        Self::new(entity_kind, entity_id, CrudAction::Updated, snapshot, emitted_at)
    }

    /// Creates a `Deleted` message.
    pub fn deleted(
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        snapshot: Snapshot,
        emitted_at: Timestamp,
    ) -> Self {
        Self::new(entity_kind, entity_id, CrudAction::Deleted, snapshot, emitted_at)
    }

    /// Marks the message as a force-sync request.
    pub fn with_force_sync(mut self, force: bool) -> Self {
        self.is_force_sync = force;
        self
    }

    /// Returns the key of the entity this message describes.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_kind.clone(), self.entity_id.clone())
    }

    /// Checks that the message can be routed at all.
    pub fn validate(&self) -> Validation {
        Validation::check(!self.entity_id.trim().is_empty(), "entityId is empty").and(
            Validation::check(!self.entity_kind.trim().is_empty(), "entityKind is empty"),
        )
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR bytes and validates the result.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let message: SyncMessage =
            ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        message.validated()
    }

    /// Encodes to a JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decodes from a JSON string and validates the result.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        let message: SyncMessage =
            serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        message.validated()
    }

    fn validated(self) -> ProtocolResult<Self> {
        self.validate()
            .into_result()
            .map_err(ProtocolError::InvalidMessage)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SyncMessage {
        SyncMessage::updated(
            "employee",
            "e-1",
            Snapshot::new().with("name", "Ada").with("companyId", "c-9"),
            Timestamp::from_micros(1_700_000_000_000_000),
        )
    }

    #[test]
    fn wire_names_are_camel_case() {
        let value = serde_json::to_value(sample().with_force_sync(true)).unwrap();
        assert_eq!(
            value,
            json!({
                "entityId": "e-1",
                "entityKind": "employee",
                "crudAction": "Updated",
                "snapshot": { "companyId": "c-9", "name": "Ada" },
                "emittedAt": 1_700_000_000_000_000i64,
                "isForceSync": true,
            })
        );
    }

    #[test]
    fn cbor_roundtrip() {
        let msg = sample();
        let bytes = msg.encode().unwrap();
        assert_eq!(SyncMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn json_defaults_optional_fields() {
        let msg = SyncMessage::from_json(
            r#"{"entityId":"c-1","entityKind":"company","crudAction":"Deleted","emittedAt":5}"#,
        )
        .unwrap();
        assert_eq!(msg.crud_action, CrudAction::Deleted);
        assert!(msg.snapshot.is_empty());
        assert!(!msg.is_force_sync);
        assert_eq!(msg.key(), EntityKey::new("company", "c-1"));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = SyncMessage::decode(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn decode_rejects_unroutable_message() {
        let mut msg = sample();
        msg.entity_id = " ".into();
        msg.entity_kind = String::new();
        let bytes = msg.encode().unwrap();

        match SyncMessage::decode(&bytes) {
            Err(ProtocolError::InvalidMessage(reasons)) => assert_eq!(reasons.len(), 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_decode_error() {
        let err = SyncMessage::from_json(
            r#"{"entityId":"x","entityKind":"k","crudAction":"Purged","emittedAt":1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn action_helpers() {
        assert!(CrudAction::Deleted.is_deletion());
        assert!(!CrudAction::Updated.is_deletion());
        assert_eq!(CrudAction::Created.to_string(), "Created");
        assert_eq!(EntityKey::new("company", "c-1").to_string(), "company/c-1");
    }
}
