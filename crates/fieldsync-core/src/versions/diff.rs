//! Field-level snapshot diff

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::models::{FieldChange, FieldDiff};

/// Compare two snapshots field by field.
///
/// Every top-level key present in either snapshot is compared with deep
/// structural equality. Keys missing on one side are reported with that side
/// absent. Non-object snapshots (a deleted entity's `null`) have no fields.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> FieldDiff {
    let empty = Map::new();
    let old_fields = old.as_object().unwrap_or(&empty);
    let new_fields = new.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();

    let mut result = FieldDiff::new();
    for key in keys {
        let before = old_fields.get(key);
        let after = new_fields.get(key);
        if before != after {
            result.insert(
                key.clone(),
                FieldChange {
                    old: before.cloned(),
                    new: after.cloned(),
                },
            );
        }
    }
    result
}
