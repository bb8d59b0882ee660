//! Hybrid copy-on-write pre-images.
//!
//! The first mutation of an object inside a checkpoint window records the
//! object's prior attribute map. Small payloads are copied by value; large
//! ones are captured as a reference to the object's immutable version
//! (attribute maps are `Arc`-held and replaced wholesale on update, so the
//! reference stays valid until the last holding checkpoint releases it
//! (the `Arc` count is the reference counter).

use std::sync::Arc;

use serde_json::Value;

use crate::object::{AttrMap, ObjectId, ObjectKind};

/// Serialized-size boundary between by-value and by-reference capture.
pub const SNAPSHOT_INLINE_LIMIT: usize = 10 * 1024;

/// How a pre-image was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreImageKind {
    /// Copied by value (small payload).
    Inline,
    /// Referenced into the object's immutable version (large payload).
    Shared,
}

/// Captured pre-mutation state of one object.
#[derive(Debug, Clone)]
pub struct PreImage {
    /// The object this pre-image restores.
    pub id: ObjectId,
    /// Its kind (restore re-registers disposed objects).
    pub kind: ObjectKind,
    /// Its original creation timestamp.
    pub created_at: f64,
    data: PreImageData,
}

#[derive(Debug, Clone)]
enum PreImageData {
    Inline(AttrMap),
    Shared(Arc<AttrMap>),
}

impl PreImage {
    /// Captures a pre-image of `attrs`, choosing the hybrid strategy by
    /// estimated serialized size.
    #[must_use]
    pub fn capture(id: ObjectId, kind: ObjectKind, created_at: f64, attrs: &Arc<AttrMap>) -> Self {
        let data = if estimate_map_size(attrs) <= SNAPSHOT_INLINE_LIMIT {
            PreImageData::Inline((**attrs).clone())
        } else {
            PreImageData::Shared(Arc::clone(attrs))
        };
        Self {
            id,
            kind,
            created_at,
            data,
        }
    }

    /// Which capture strategy was taken.
    #[must_use]
    pub const fn capture_kind(&self) -> PreImageKind {
        match self.data {
            PreImageData::Inline(_) => PreImageKind::Inline,
            PreImageData::Shared(_) => PreImageKind::Shared,
        }
    }

    /// Number of strong references to a shared pre-image's version
    /// (excluding the object manager's own, which is gone once the object
    /// has been mutated past this version). `None` for inline copies.
    #[must_use]
    pub fn shared_refcount(&self) -> Option<usize> {
        match &self.data {
            PreImageData::Inline(_) => None,
            PreImageData::Shared(arc) => Some(Arc::strong_count(arc)),
        }
    }

    /// Consumes the pre-image into a restorable attribute map.
    #[must_use]
    pub fn into_attrs(self) -> Arc<AttrMap> {
        match self.data {
            PreImageData::Inline(map) => Arc::new(map),
            PreImageData::Shared(arc) => arc,
        }
    }
}

/// Cheap serialized-size estimate for an attribute map. No allocation:
/// close enough to `serde_json::to_vec(..).len()` to steer the
/// inline/shared split, and O(size) with a small constant.
#[must_use]
pub fn estimate_map_size(map: &AttrMap) -> usize {
    2 + map
        .iter()
        .map(|(key, value)| key.len() + 4 + estimate_value_size(value))
        .sum::<usize>()
}

fn estimate_value_size(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 5,
        Value::Number(_) => 16,
        Value::String(s) => s.len() + 2,
        Value::Array(items) => 2 + items.iter().map(estimate_value_size).sum::<usize>(),
        Value::Object(map) => estimate_map_size(map),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    fn attrs_of_size(bytes: usize) -> Arc<AttrMap> {
        let mut map = Map::new();
        map.insert("payload".into(), Value::String("x".repeat(bytes)));
        Arc::new(map)
    }

    #[test]
    fn small_payloads_are_copied() {
        let attrs = attrs_of_size(9 * 1024);
        let pre = PreImage::capture(
            "tab:1".parse().unwrap(),
            ObjectKind::Tab,
            0.0,
            &attrs,
        );
        assert_eq!(pre.capture_kind(), PreImageKind::Inline);
        assert_eq!(pre.shared_refcount(), None);
    }

    #[test]
    fn large_payloads_are_referenced() {
        let attrs = attrs_of_size(12 * 1024);
        let pre = PreImage::capture(
            "tab:1".parse().unwrap(),
            ObjectKind::Tab,
            0.0,
            &attrs,
        );
        assert_eq!(pre.capture_kind(), PreImageKind::Shared);
        // The capture itself plus our local handle.
        assert_eq!(pre.shared_refcount(), Some(2));
        drop(attrs);
        assert_eq!(pre.shared_refcount(), Some(1));
    }

    #[test]
    fn size_estimate_tracks_serialized_size() {
        let attrs = attrs_of_size(4096);
        let estimated = estimate_map_size(&attrs);
        let actual = serde_json::to_vec(&*attrs).unwrap().len();
        let delta = estimated.abs_diff(actual);
        assert!(delta < 64, "estimate {estimated} vs actual {actual}");
    }

    #[test]
    fn restore_roundtrips_attrs() {
        let attrs = attrs_of_size(16);
        let pre = PreImage::capture(
            "tab:1".parse().unwrap(),
            ObjectKind::Tab,
            0.0,
            &attrs,
        );
        assert_eq!(*pre.into_attrs(), *attrs);
    }
}
