//! Attribute diffs between planned and last-applied state

use crate::types::{Attributes, Planned};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Change of a single attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDiff {
    /// Attribute name
    pub name: String,
    /// Last-applied value, `None` if the attribute is new
    pub before: Option<serde_json::Value>,
    /// Planned value, `None` if the attribute is removed
    pub after: Option<Planned>,
    /// Whether this change forces replacement
    pub forces_replacement: bool,
}

impl AttributeDiff {
    /// Check if the planned value is only known after apply
    pub fn is_unknown(&self) -> bool {
        matches!(self.after, Some(Planned::Unknown))
    }
}

/// Compare planned attributes against the stored ones.
///
/// Returns one entry per attribute that differs, sorted by name. An unknown
/// planned value always counts as a change.
pub fn diff_attributes(
    before: &Attributes,
    after: &BTreeMap<String, Planned>,
    replace_triggers: &BTreeSet<String>,
) -> Vec<AttributeDiff> {
    let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let old = before.get(name);
            let new = after.get(name);
            let changed = match (old, new) {
                (Some(o), Some(Planned::Known(n))) => o != n,
                (None, None) => false,
                _ => true,
            };
            changed.then(|| AttributeDiff {
                name: name.clone(),
                before: old.cloned(),
                after: new.cloned(),
                forces_replacement: replace_triggers.contains(name),
            })
        })
        .collect()
}

/// Attribute list for a brand-new resource (everything is added).
pub fn initial_attributes(after: &BTreeMap<String, Planned>) -> Vec<AttributeDiff> {
    after
        .iter()
        .map(|(name, value)| AttributeDiff {
            name: name.clone(),
            before: None,
            after: Some(value.clone()),
            forces_replacement: false,
        })
        .collect()
}

/// Attribute list for a resource being destroyed (everything is removed).
pub fn removed_attributes(before: &Attributes) -> Vec<AttributeDiff> {
    before
        .iter()
        .map(|(name, value)| AttributeDiff {
            name: name.clone(),
            before: Some(value.clone()),
            after: None,
            forces_replacement: false,
        })
        .collect()
}
