//! Duplicate detection against existing service items.
//!
//! An item counts as a duplicate if it shares a native id with an existing
//! item, or failing that, the same description and diameter.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::exchange::ToolItem;
use super::units::plain_string;

/// Why an item was flagged as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DuplicateReason {
    /// Same native tool id.
    #[serde(rename = "FreeCAD ID")]
    NativeId,
    /// Same description and diameter.
    #[serde(rename = "description+diameter")]
    Signature,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NativeId => "FreeCAD ID",
            Self::Signature => "description+diameter",
        })
    }
}

/// A detected duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    /// Match reason.
    pub reason: DuplicateReason,
    /// The existing item that matched.
    pub existing: ToolItem,
}

/// Returns the `description|diameter` signature of an item.
///
/// Items without a description or a diameter have no signature.
#[must_use]
pub fn signature(item: &ToolItem) -> Option<String> {
    if item.description.is_empty() {
        return None;
    }
    let diameter = item.geometry.get("diameter").filter(|v| !v.is_null())?;
    Some(format!("{}|{}", item.description, plain_string(diameter)))
}

/// Lookup tables over a set of existing items.
#[derive(Debug, Default, Clone)]
pub struct DuplicateIndex {
    items: Vec<ToolItem>,
    by_native_id: HashMap<String, usize>,
    by_signature: HashMap<String, usize>,
}

impl DuplicateIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index over `items`.
    ///
    /// When several items share a key the first one wins.
    #[must_use]
    pub fn from_items(items: impl IntoIterator<Item = ToolItem>) -> Self {
        let mut index = Self::new();
        for item in items {
            index.insert(item);
        }
        index
    }

    /// Parses a JSON array of items and indexes those that deserialise.
    ///
    /// Entries that are not valid items are skipped with a warning.
    #[must_use]
    pub fn from_json(items: &[Value]) -> Self {
        Self::from_items(items.iter().enumerate().filter_map(|(i, raw)| {
            serde_json::from_value::<ToolItem>(raw.clone())
                .map_err(|e| tracing::warn!(index = i, error = %e, "Skipping existing item"))
                .ok()
        }))
    }

    /// Adds an item to the index.
    pub fn insert(&mut self, item: ToolItem) {
        let position = self.items.len();
        if let Some(id) = item.native_metadata.as_ref().and_then(|m| m.id.clone()) {
            self.by_native_id.entry(id).or_insert(position);
        }
        if let Some(sig) = signature(&item) {
            self.by_signature.entry(sig).or_insert(position);
        }
        self.items.push(item);
    }

    /// Number of indexed items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Checks a candidate against the index.
    ///
    /// The native id is tried first, then the signature.
    #[must_use]
    pub fn check(&self, candidate: &ToolItem) -> Option<DuplicateMatch> {
        let by_id = candidate
            .native_id()
            .and_then(|id| self.by_native_id.get(id))
            .map(|&i| (DuplicateReason::NativeId, i));

        let found = by_id.or_else(|| {
            signature(candidate)
                .and_then(|sig| self.by_signature.get(&sig).copied())
                .map(|i| (DuplicateReason::Signature, i))
        });

        found.map(|(reason, i)| {
            tracing::debug!(%reason, description = %candidate.description, "Duplicate found");
            DuplicateMatch {
                reason,
                existing: self.items[i].clone(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> ToolItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn signature_uses_description_and_diameter() {
        let it = item(json!({"description": "6mm Endmill", "geometry": {"diameter": 6.0}}));
        assert_eq!(signature(&it).as_deref(), Some("6mm Endmill|6.0"));
    }

    #[test]
    fn signature_requires_both_parts() {
        assert!(signature(&item(json!({"description": "", "geometry": {"diameter": 6.0}}))).is_none());
        assert!(signature(&item(json!({"description": "x", "geometry": {}}))).is_none());
        assert!(signature(&item(json!({"description": "x", "geometry": {"diameter": null}}))).is_none());
    }

    #[test]
    fn native_id_takes_precedence() {
        let index = DuplicateIndex::from_items([
            item(json!({"description": "A", "geometry": {"diameter": 3.0}})),
            item(json!({"description": "B", "freecad_metadata": {"id": "abc"}})),
        ]);
        let candidate = item(json!({
            "description": "A",
            "geometry": {"diameter": 3.0},
            "freecad_metadata": {"id": "abc"}
        }));
        let found = index.check(&candidate).unwrap();
        assert_eq!(found.reason, DuplicateReason::NativeId);
        assert_eq!(found.existing.description, "B");
    }

    #[test]
    fn candidate_top_level_id_is_used() {
        let index = DuplicateIndex::from_items([item(json!({"freecad_metadata": {"id": "t1"}}))]);
        let found = index.check(&item(json!({"id": "t1"}))).unwrap();
        assert_eq!(found.reason, DuplicateReason::NativeId);
    }

    #[test]
    fn no_match() {
        let index = DuplicateIndex::from_items([item(json!({
            "description": "A",
            "geometry": {"diameter": 3.0}
        }))]);
        let candidate = item(json!({"description": "A", "geometry": {"diameter": 4.0}}));
        assert!(index.check(&candidate).is_none());
    }

    #[test]
    fn from_json_skips_invalid() {
        let index = DuplicateIndex::from_json(&[json!({"description": "ok"}), json!(42)]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn reason_serialises_to_label() {
        assert_eq!(json!(DuplicateReason::Signature), json!("description+diameter"));
        assert_eq!(DuplicateReason::NativeId.to_string(), "FreeCAD ID");
    }
}
