//! Error types for the store.

use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Public error taxonomy shared with the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Unauthorized,
    Forbidden,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::Internal => "Internal",
        }
    }
}

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity or blob absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller-supplied value has an invalid shape
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (blob storage)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Translate constraint violations into `Conflict` / `BadRequest`.
    ///
    /// Any other database error is passed through.
    pub fn from_constraint(err: sqlx::Error, what: impl Into<String>) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Conflict(what.into());
            }
            if db_err.is_foreign_key_violation() {
                return Self::NotFound(format!("{}: referenced entity does not exist", what.into()));
            }
            if db_err.is_check_violation() {
                return Self::BadRequest(what.into());
            }
        }
        Self::Sqlx(err)
    }

    /// Classify this error in the public taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::BadRequest(_) | StoreError::Serialization(_) => ErrorKind::BadRequest,
            StoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            StoreError::Forbidden(_) => ErrorKind::Forbidden,
            StoreError::Sqlx(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            StoreError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            StoreError::Internal(_) | StoreError::Sqlx(_) | StoreError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<scenevault_merge::MergeError> for StoreError {
    fn from(err: scenevault_merge::MergeError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(StoreError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(StoreError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(StoreError::Sqlx(sqlx::Error::PoolClosed).kind(), ErrorKind::Internal);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(StoreError::from(io).kind(), ErrorKind::NotFound);
    }
}
