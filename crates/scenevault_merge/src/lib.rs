//! Structural diff/patch over JSON scene documents.
//!
//! Two layers:
//!
//! - [`diff`] / [`apply`] work on any JSON tree. Objects are compared key by
//!   key; arrays and scalars are opaque and replaced wholesale.
//! - [`diff_doc`] / [`apply_doc`] first convert a document's arrays of
//!   objects into maps keyed by `id`, `uri` or `name` (see [`pointers`]), so
//!   that reordering or editing a single node, model or annotation produces a
//!   small delta instead of a whole-array rewrite.
//!
//! ```rust
//! use scenevault_merge::{apply_doc, diff_doc};
//! use serde_json::json;
//!
//! let from = json!({"nodes": [{"id": "a", "name": "Root"}]});
//! let to = json!({"nodes": [{"id": "a", "name": "Renamed"}]});
//!
//! let delta = diff_doc(&from, &to).unwrap();
//! assert_eq!(apply_doc(&from, &delta).unwrap(), to);
//! ```

mod delta;
mod error;
pub mod pointers;

pub use delta::{apply, diff, Delta};
pub use error::{MergeError, Result};

use serde_json::Value;

/// Diff two documents in their keyed working form.
pub fn diff_doc(from: &Value, to: &Value) -> Result<Delta> {
    let from = pointers::to_pointers(from)?;
    let to = pointers::to_pointers(to)?;
    Ok(diff(&from, &to))
}

/// Apply a delta produced by [`diff_doc`] and return the document in storage form.
pub fn apply_doc(doc: &Value, delta: &Delta) -> Result<Value> {
    let working = pointers::to_pointers(doc)?;
    Ok(pointers::from_pointers(&apply(&working, delta)))
}
