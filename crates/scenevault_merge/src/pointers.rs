//! Conversion between the storage form of a document (dense arrays) and its
//! keyed working form (maps).
//!
//! Every array whose elements are all objects becomes a map. The key of an
//! element is, in order of preference:
//!
//! 1. `usage/quality` for elements of a `derivatives` array,
//! 2. `id`, then `uri`, then `name`,
//! 3. `#<index>` when none of the above is usable.
//!
//! A key already taken by an earlier element gets a `#<index>` suffix.
//! Each converted element records its position under [`SOURCE_INDEX`], which
//! is what [`from_pointers`] sorts on to rebuild the array.
//!
//! Arrays of scalars, arrays of arrays and empty arrays stay as they are.

use crate::error::{MergeError, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Reserved key holding an element's position in its source array.
pub const SOURCE_INDEX: &str = "__source_index";

const KEY_FIELDS: [&str; 3] = ["id", "uri", "name"];

/// Convert a document to its keyed working form.
pub fn to_pointers(doc: &Value) -> Result<Value> {
    convert(doc, None, "$")
}

/// Convert a working-form document back to storage form.
pub fn from_pointers(doc: &Value) -> Value {
    match doc {
        Value::Object(map) => {
            if is_keyed_collection(map) {
                restore_collection(map)
            } else {
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), from_pointers(v)))
                        .collect(),
                )
            }
        }
        other => other.clone(),
    }
}

fn convert(value: &Value, parent_key: Option<&str>, path: &str) -> Result<Value> {
    match value {
        Value::Object(map) => Ok(Value::Object(convert_object(map, path)?)),
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let mut out = Map::with_capacity(items.len());
            let mut taken = HashSet::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let Value::Object(item) = item else {
                    continue;
                };
                let converted = convert_object(item, &format!("{}[{}]", path, index))?;

                let mut key = element_key(&converted, parent_key)
                    .unwrap_or_else(|| format!("#{}", index));
                if !taken.insert(key.clone()) {
                    key = format!("{}#{}", key, index);
                    while !taken.insert(key.clone()) {
                        key.push('#');
                    }
                }

                let mut element = converted;
                element.insert(SOURCE_INDEX.to_string(), Value::from(index as u64));
                out.insert(key, Value::Object(element));
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn convert_object(map: &Map<String, Value>, path: &str) -> Result<Map<String, Value>> {
    if map.contains_key(SOURCE_INDEX) {
        return Err(MergeError::ReservedKey {
            key: SOURCE_INDEX,
            path: path.to_string(),
        });
    }
    let mut out = Map::with_capacity(map.len());
    for (key, child) in map {
        let child_path = format!("{}.{}", path, key);
        out.insert(key.clone(), convert(child, Some(key), &child_path)?);
    }
    Ok(out)
}

fn element_key(element: &Map<String, Value>, parent_key: Option<&str>) -> Option<String> {
    if parent_key == Some("derivatives") {
        if let (Some(Value::String(usage)), Some(Value::String(quality))) =
            (element.get("usage"), element.get("quality"))
        {
            return Some(format!("{}/{}", usage, quality));
        }
    }
    KEY_FIELDS.iter().find_map(|field| match element.get(*field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn is_keyed_collection(map: &Map<String, Value>) -> bool {
    !map.is_empty()
        && map.values().all(|v| match v {
            Value::Object(element) => element.get(SOURCE_INDEX).map_or(false, Value::is_u64),
            _ => false,
        })
}

fn restore_collection(map: &Map<String, Value>) -> Value {
    let mut elements: Vec<(u64, Value)> = map
        .values()
        .filter_map(|v| {
            let Value::Object(element) = v else {
                return None;
            };
            let index = element.get(SOURCE_INDEX).and_then(Value::as_u64)?;
            let stripped: Map<String, Value> = element
                .iter()
                .filter(|(k, _)| k.as_str() != SOURCE_INDEX)
                .map(|(k, v)| (k.clone(), from_pointers(v)))
                .collect();
            Some((index, Value::Object(stripped)))
        })
        .collect();
    // stable: equal indices keep map order
    elements.sort_by_key(|(index, _)| *index);
    Value::Array(elements.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nodes_keyed_by_id() {
        let doc = json!({"nodes": [{"id": "n1", "name": "a"}, {"id": "n2"}]});
        let ptr = to_pointers(&doc).unwrap();
        assert_eq!(ptr["nodes"]["n1"]["name"], json!("a"));
        assert_eq!(ptr["nodes"]["n2"][SOURCE_INDEX], json!(1));
    }

    #[test]
    fn test_key_fallback_order() {
        let doc = json!({"assets": [{"uri": "model.glb"}, {"name": "label"}, {"type": "x"}]});
        let ptr = to_pointers(&doc).unwrap();
        let assets = ptr["assets"].as_object().unwrap();
        assert!(assets.contains_key("model.glb"));
        assert!(assets.contains_key("label"));
        assert!(assets.contains_key("#2"));
    }

    #[test]
    fn test_derivatives_keyed_by_usage_and_quality() {
        let doc = json!({"models": [{"derivatives": [
            {"usage": "Web3D", "quality": "High", "assets": [{"uri": "high.glb"}]},
            {"usage": "Web3D", "quality": "Low", "assets": [{"uri": "low.glb"}]}
        ]}]});
        let ptr = to_pointers(&doc).unwrap();
        let derivatives = &ptr["models"]["#0"]["derivatives"];
        assert_eq!(derivatives["Web3D/High"]["assets"]["high.glb"]["uri"], json!("high.glb"));
        assert_eq!(derivatives["Web3D/Low"][SOURCE_INDEX], json!(1));
    }

    #[test]
    fn test_duplicate_keys_get_suffix() {
        let doc = json!({"items": [{"id": "same"}, {"id": "same"}]});
        let ptr = to_pointers(&doc).unwrap();
        let items = ptr["items"].as_object().unwrap();
        assert!(items.contains_key("same"));
        assert!(items.contains_key("same#1"));
        assert_eq!(from_pointers(&ptr), doc);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let doc = json!({
            "asset": {"version": "1.0"},
            "nodes": [{"id": "z"}, {"id": "a"}, {"name": "m"}],
            "scenes": [{"nodes": [0, 1]}],
            "matrix": [1, 0, 0, 1],
            "empty": []
        });
        let ptr = to_pointers(&doc).unwrap();
        assert_eq!(ptr["scenes"]["#0"]["nodes"], json!([0, 1]));
        assert_eq!(ptr["empty"], json!([]));
        assert_eq!(from_pointers(&ptr), doc);
    }

    #[test]
    fn test_mixed_arrays_stay_opaque() {
        let doc = json!({"mixed": [{"id": "a"}, 3]});
        let ptr = to_pointers(&doc).unwrap();
        assert_eq!(ptr, doc);
    }

    #[test]
    fn test_reserved_key_rejected() {
        let doc = json!({"nodes": [{"id": "a", "__source_index": 4}]});
        let err = to_pointers(&doc).unwrap_err();
        assert!(matches!(err, MergeError::ReservedKey { .. }));
    }
}
