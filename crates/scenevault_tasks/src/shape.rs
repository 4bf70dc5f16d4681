//! Projection of resolved task outputs into a caller-defined shape.
//!
//! A shape is any JSON value. Strings of the form `$` or `$[i]...` are paths
//! into the list of inputs and are replaced by what they point to; every
//! other value passes through, recursing into objects and arrays.
//!
//! ```text
//! "$"              the whole input list
//! "$[0]"           first input
//! "$[1].files[2]"  property and index access into the second input
//! ```

use crate::error::{Result, TaskError};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Index(usize),
    Key(String),
}

/// Substitute every path in `shape` with the value it selects from `inputs`.
pub fn map_shape(shape: &Value, inputs: &[Value]) -> Result<Value> {
    match shape {
        Value::String(s) if is_path(s) => resolve(s, inputs),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), map_shape(value, inputs)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| map_shape(item, inputs))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn is_path(s: &str) -> bool {
    s == "$" || s.starts_with("$[")
}

fn resolve(path: &str, inputs: &[Value]) -> Result<Value> {
    let steps = parse_path(path)?;
    let Some((Step::Index(first), rest)) = steps.split_first() else {
        return Ok(Value::Array(inputs.to_vec()));
    };

    let mut current = inputs.get(*first).ok_or_else(|| {
        TaskError::InvalidShape(format!(
            "{}: index {} out of range for {} inputs",
            path,
            first,
            inputs.len()
        ))
    })?;

    for step in rest {
        current = match (step, current) {
            (Step::Key(key), Value::Object(map)) => match map.get(key) {
                Some(value) => value,
                None => &Value::Null,
            },
            (Step::Index(i), Value::Array(items)) => items.get(*i).ok_or_else(|| {
                TaskError::InvalidShape(format!("{}: index {} out of range", path, i))
            })?,
            (step, value) => {
                return Err(TaskError::InvalidShape(format!(
                    "{}: cannot apply {:?} to {}",
                    path,
                    step,
                    type_name(value)
                )))
            }
        };
    }
    Ok(current.clone())
}

fn parse_path(path: &str) -> Result<Vec<Step>> {
    let invalid = || TaskError::InvalidShape(format!("malformed path {:?}", path));
    let mut rest = path.strip_prefix('$').ok_or_else(invalid)?;
    let mut steps = Vec::new();

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('[') {
            let end = tail.find(']').ok_or_else(invalid)?;
            let index = tail[..end].trim().parse::<usize>().map_err(|_| invalid())?;
            steps.push(Step::Index(index));
            rest = &tail[end + 1..];
        } else if let Some(tail) = rest.strip_prefix('.') {
            let end = tail.find(['.', '[']).unwrap_or(tail.len());
            if end == 0 {
                return Err(invalid());
            }
            steps.push(Step::Key(tail[..end].to_string()));
            rest = &tail[end..];
        } else {
            return Err(invalid());
        }
    }
    Ok(steps)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_list() {
        let inputs = vec![json!(1), json!({"a": 2})];
        assert_eq!(map_shape(&json!("$"), &inputs).unwrap(), json!([1, {"a": 2}]));
    }

    #[test]
    fn test_indexed_property() {
        let inputs = vec![json!({"bar": "x"})];
        let shaped = map_shape(&json!({"foo": "$[0].bar"}), &inputs).unwrap();
        assert_eq!(shaped, json!({"foo": "x"}));
    }

    #[test]
    fn test_literals_pass_through() {
        let inputs = vec![json!("first")];
        let shape = json!({"kind": "model", "n": 3, "cost": "$5", "src": "$[0]", "tags": ["a", "$[0]"]});
        assert_eq!(
            map_shape(&shape, &inputs).unwrap(),
            json!({"kind": "model", "n": 3, "cost": "$5", "src": "first", "tags": ["a", "first"]})
        );
    }

    #[test]
    fn test_nested_path() {
        let inputs = vec![json!(null), json!({"files": ["a.glb", "b.glb", "c.glb"]})];
        assert_eq!(map_shape(&json!("$[1].files[2]"), &inputs).unwrap(), json!("c.glb"));
    }

    #[test]
    fn test_missing_property_is_null() {
        let inputs = vec![json!({"bar": "x"})];
        assert_eq!(map_shape(&json!("$[0].baz"), &inputs).unwrap(), Value::Null);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let err = map_shape(&json!("$[3]"), &[json!(1)]).unwrap_err();
        assert!(matches!(err, TaskError::InvalidShape(_)));
    }

    #[test]
    fn test_property_of_scalar_is_rejected() {
        let err = map_shape(&json!("$[0].name"), &[json!(12)]).unwrap_err();
        assert!(matches!(err, TaskError::InvalidShape(_)));
    }

    #[test]
    fn test_malformed_paths() {
        for path in ["$[x]", "$[0", "$[0]name", "$[0].", "$[0]..a"] {
            let err = map_shape(&json!(path), &[json!({})]).unwrap_err();
            assert!(matches!(err, TaskError::InvalidShape(_)), "{}", path);
        }
    }
}
