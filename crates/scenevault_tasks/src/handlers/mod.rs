//! Built-in handlers.
//!
//! Content handlers (archive extraction, model conversion) are registered by
//! the embedding application; only control flow lives here.

pub mod control;

use crate::error::{Result, TaskError};
use crate::types::Task;
use serde::de::DeserializeOwned;

/// Deserialize the input data of a task.
pub fn parse_data<T: DeserializeOwned>(task: &Task) -> Result<T> {
    serde_json::from_value(task.data.clone()).map_err(|e| {
        TaskError::bad_request(format!(
            "Invalid data for {} task #{}: {}",
            task.task_type, task.id, e
        ))
    })
}
