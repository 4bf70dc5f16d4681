//! Recursive structural diff over `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Difference between two JSON trees.
///
/// An empty `Object` is the no-op delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delta {
    /// Replace the value at this position.
    Replace(Value),
    /// The key was present in `from` and is absent in `to`.
    Deleted,
    /// Per-key changes of an object. Unchanged keys are omitted.
    Object(BTreeMap<String, Delta>),
}

impl Delta {
    /// The delta that changes nothing.
    pub fn empty() -> Self {
        Delta::Object(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Delta::Object(changes) if changes.is_empty())
    }

    /// Number of leaf changes (replacements and deletions).
    pub fn change_count(&self) -> usize {
        match self {
            Delta::Replace(_) | Delta::Deleted => 1,
            Delta::Object(changes) => changes.values().map(Delta::change_count).sum(),
        }
    }
}

/// Compute the delta turning `from` into `to`.
///
/// Arrays are never diffed element-wise: any change inside an array
/// replaces the whole array.
pub fn diff(from: &Value, to: &Value) -> Delta {
    if from == to {
        return Delta::empty();
    }
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => Delta::Object(diff_objects(a, b)),
        _ => Delta::Replace(to.clone()),
    }
}

fn diff_objects(from: &Map<String, Value>, to: &Map<String, Value>) -> BTreeMap<String, Delta> {
    let mut changes = BTreeMap::new();

    for (key, next) in to {
        match from.get(key) {
            Some(prev) if prev == next => {}
            Some(Value::Object(prev)) => {
                if let Value::Object(next) = next {
                    changes.insert(key.clone(), Delta::Object(diff_objects(prev, next)));
                } else {
                    changes.insert(key.clone(), Delta::Replace(next.clone()));
                }
            }
            _ => {
                changes.insert(key.clone(), Delta::Replace(next.clone()));
            }
        }
    }

    for key in from.keys() {
        if !to.contains_key(key) {
            changes.insert(key.clone(), Delta::Deleted);
        }
    }

    changes
}

/// Apply `delta` to `doc`.
///
/// An object delta applied to a non-object starts from an empty object.
/// A bare `Deleted` yields `null`, since there is no parent to remove it from.
pub fn apply(doc: &Value, delta: &Delta) -> Value {
    match delta {
        Delta::Replace(value) => value.clone(),
        Delta::Deleted => Value::Null,
        Delta::Object(changes) if changes.is_empty() => doc.clone(),
        Delta::Object(changes) => {
            let mut target = match doc {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for (key, change) in changes {
                match change {
                    Delta::Deleted => {
                        target.remove(key);
                    }
                    Delta::Replace(value) => {
                        target.insert(key.clone(), value.clone());
                    }
                    Delta::Object(_) => {
                        let current = target.get(key).cloned().unwrap_or(Value::Null);
                        target.insert(key.clone(), apply(&current, change));
                    }
                }
            }
            Value::Object(target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_documents_produce_empty_delta() {
        let doc = json!({"a": 1, "b": {"c": [1, 2, 3]}});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn test_primitive_change_is_replacement() {
        let delta = diff(&json!({"a": 1, "b": 2}), &json!({"a": 1, "b": 3}));
        let mut expected = BTreeMap::new();
        expected.insert("b".to_string(), Delta::Replace(json!(3)));
        assert_eq!(delta, Delta::Object(expected));
    }

    #[test]
    fn test_removed_key_is_deleted_marker() {
        let delta = diff(&json!({"a": 1, "b": 2}), &json!({"a": 1}));
        match delta {
            Delta::Object(changes) => {
                assert_eq!(changes.len(), 1);
                assert_eq!(changes.get("b"), Some(&Delta::Deleted));
            }
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[test]
    fn test_null_is_a_value_not_a_deletion() {
        let from = json!({"a": 1});
        let to = json!({"a": null});
        let delta = diff(&from, &to);
        assert_eq!(delta.change_count(), 1);
        assert_eq!(apply(&from, &delta), to);
    }

    #[test]
    fn test_nested_objects_are_recursive() {
        let from = json!({"scene": {"units": "m", "name": "x"}});
        let to = json!({"scene": {"units": "cm", "name": "x"}});
        let delta = diff(&from, &to);
        assert_eq!(delta.change_count(), 1);
        let Delta::Object(top) = &delta else {
            panic!("expected object delta");
        };
        assert!(matches!(top.get("scene"), Some(Delta::Object(_))));
        assert_eq!(apply(&from, &delta), to);
    }

    #[test]
    fn test_arrays_are_replaced_wholesale() {
        let from = json!({"list": [1, 2, 3]});
        let to = json!({"list": [1, 2, 4]});
        let Delta::Object(changes) = diff(&from, &to) else {
            panic!("expected object delta");
        };
        assert_eq!(changes.get("list"), Some(&Delta::Replace(json!([1, 2, 4]))));
    }

    #[test]
    fn test_type_change_replaces_object() {
        let from = json!({"a": {"b": 1}});
        let to = json!({"a": "flat"});
        let delta = diff(&from, &to);
        assert_eq!(apply(&from, &delta), to);
    }

    #[test]
    fn test_delta_serializes_deleted_variant() {
        let delta = diff(&json!({"a": 1}), &json!({}));
        let encoded = serde_json::to_value(&delta).unwrap();
        assert_eq!(encoded, json!({"object": {"a": "deleted"}}));
        let decoded: Delta = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, delta);
    }
}
