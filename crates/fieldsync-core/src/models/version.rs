//! Version history models

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Before/after values of one field.
///
/// `None` means the field is absent on that side, which is distinct from a
/// present JSON `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub old: Option<serde_json::Value>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub new: Option<serde_json::Value>,
}

impl FieldChange {
    /// Field was removed in the newer snapshot
    #[must_use]
    pub const fn is_removal(&self) -> bool {
        self.old.is_some() && self.new.is_none()
    }
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Field-level differences between two snapshots, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldDiff(BTreeMap<String, FieldChange>);

impl FieldDiff {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, field: impl Into<String>, change: FieldChange) {
        self.0.insert(field.into(), change);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.0.iter()
    }

    /// Swap old and new on every field
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(field, change)| {
                    (
                        field.clone(),
                        FieldChange {
                            old: change.new.clone(),
                            new: change.old.clone(),
                        },
                    )
                })
                .collect(),
        )
    }
}

/// One immutable point in a resource's change history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub id: String,
    pub resource_type: String,
    pub resource_id: String,
    /// Monotonic per resource, starting at 1
    pub version: i64,
    /// Full snapshot at this version
    pub data: serde_json::Value,
    pub changed_by: String,
    /// Unix ms
    pub changed_at: i64,
    pub change_reason: Option<String>,
    /// Changes against the previous version; absent for version 1
    pub diff: Option<FieldDiff>,
}
