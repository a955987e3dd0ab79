//! Whitelists describing which snapshot fields a mirror keeps.

use mirrorsync_protocol::{Snapshot, Validation};
use serde_json::Value;

/// A whitelisted snapshot field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name in the snapshot.
    pub name: String,
    /// Whether the field must be present and non-null for creates/updates.
    pub required: bool,
}

/// The subscriber-owned shape of a mirror record for one entity kind.
///
/// Only whitelisted fields are copied out of a snapshot. The optional
/// soft-delete field names a boolean in the snapshot that signals the source
/// entity was soft-deleted even though the action says `Updated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSchema {
    kind: String,
    fields: Vec<FieldSpec>,
    soft_delete_field: Option<String>,
}

impl MirrorSchema {
    /// Creates a schema with no fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Vec::new(),
            soft_delete_field: None,
        }
    }

    /// Adds a required field.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            required: true,
        });
        self
    }

    /// Adds an optional field.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            required: false,
        });
        self
    }

    /// Names the snapshot's soft-delete flag.
    pub fn with_soft_delete_field(mut self, name: impl Into<String>) -> Self {
        self.soft_delete_field = Some(name.into());
        self
    }

    /// Entity kind this schema applies to.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whitelisted fields.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Name of the soft-delete flag, if any.
    pub fn soft_delete_field(&self) -> Option<&str> {
        self.soft_delete_field.as_deref()
    }

    /// Checks a snapshot against the whitelist.
    ///
    /// With `require_fields` false only the soft-delete flag type is checked;
    /// deletion messages are not expected to carry a full field set.
    pub fn check(&self, snapshot: &Snapshot, require_fields: bool) -> Validation {
        let fields = self
            .fields
            .iter()
            .filter(|spec| require_fields && spec.required)
            .map(|spec| {
                Validation::check(
                    snapshot.has(&spec.name),
                    format!("missing required field `{}`", spec.name),
                )
            });

        let flag = match self.soft_delete_field.as_deref() {
            Some(name) => Validation::check(
                matches!(snapshot.get(name), None | Some(Value::Null) | Some(Value::Bool(_))),
                format!("`{name}` must be a boolean"),
            ),
            None => Validation::Valid,
        };

        Validation::all(fields).and(flag)
    }

    /// Copies the whitelisted fields out of a snapshot.
    pub fn project(&self, snapshot: &Snapshot) -> Snapshot {
        snapshot.project(self.fields.iter().map(|spec| spec.name.as_str()))
    }

    /// Returns true if the snapshot's soft-delete flag is set.
    pub fn is_soft_deleted(&self, snapshot: &Snapshot) -> bool {
        self.soft_delete_field
            .as_deref()
            .and_then(|name| snapshot.get(name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
