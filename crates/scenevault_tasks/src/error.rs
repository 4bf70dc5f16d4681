//! Error types for the scheduler.

use scenevault_store::{ErrorKind, StoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No handler registered for this task type
    #[error("Unknown task type: {0}")]
    UnknownType(String),

    /// A waited-on task ended in error
    #[error("In task #{task_id}: {message}")]
    Failed { task_id: i64, message: String },

    /// The task was cancelled before it finished
    #[error("Task #{task_id} was aborted")]
    Aborted { task_id: i64 },

    /// Error raised by handler code
    #[error("{0}")]
    Handler(String),

    /// Output shape references something the inputs don't have
    #[error("Invalid output shape: {0}")]
    InvalidShape(String),

    /// Adding this "after" edge would close a cycle
    #[error("Task #{to} already runs before task #{from}")]
    Cycle { from: i64, to: i64 },

    #[error("Task #{0} not found")]
    NotFound(i64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

impl TaskError {
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskError::Aborted { .. })
    }

    /// Classify this error in the store's public taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Store(e) => e.kind(),
            TaskError::NotFound(_) => ErrorKind::NotFound,
            TaskError::Cycle { .. } => ErrorKind::Conflict,
            TaskError::UnknownType(_)
            | TaskError::BadRequest(_)
            | TaskError::InvalidShape(_)
            | TaskError::Serialization(_) => ErrorKind::BadRequest,
            TaskError::Failed { .. } | TaskError::Aborted { .. } | TaskError::Handler(_) => {
                ErrorKind::Internal
            }
        }
    }
}
