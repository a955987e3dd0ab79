//! Property-based test generators using proptest.
//!
//! Provides strategies for generating sync messages and their parts.

use mirrorsync_protocol::{CrudAction, Snapshot, SyncMessage, Timestamp};
use proptest::prelude::*;
use serde_json::Value;
use std::ops::Range;

/// Strategy for generating entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,4}-[0-9]{1,6}").expect("Invalid regex")
}

/// Strategy for generating timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..4_102_444_800_000_000).prop_map(Timestamp::from_micros)
}

/// Strategy for generating a sorted list of distinct timestamps.
///
/// Distinct stamps make the expected winner of a merge unambiguous.
pub fn distinct_stamps(len: Range<usize>) -> impl Strategy<Value = Vec<Timestamp>> {
    prop::collection::btree_set(0i64..1_000_000, len)
        .prop_map(|set| set.into_iter().map(Timestamp::from_micros).collect())
}

/// Strategy for generating CRUD actions.
pub fn crud_action_strategy() -> impl Strategy<Value = CrudAction> {
    prop_oneof![
        Just(CrudAction::Created),
        Just(CrudAction::Updated),
        Just(CrudAction::Deleted),
    ]
}

/// Strategy for generating scalar JSON values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::String),
    ]
}

/// Strategy for generating snapshots with up to `max_fields` fields.
pub fn snapshot_strategy(max_fields: usize) -> impl Strategy<Value = Snapshot> {
    prop::collection::btree_map("[a-z][a-zA-Z]{0,11}", scalar_value_strategy(), 0..=max_fields)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for generating well-formed sync messages.
pub fn sync_message_strategy() -> impl Strategy<Value = SyncMessage> {
    (
        prop_oneof![Just("company"), Just("employee")],
        entity_id_strategy(),
        crud_action_strategy(),
        snapshot_strategy(6),
        timestamp_strategy(),
        any::<bool>(),
    )
        .prop_map(|(kind, id, action, snapshot, at, force)| {
            SyncMessage::new(kind, id, action, snapshot, at).with_force_sync(force)
        })
}
