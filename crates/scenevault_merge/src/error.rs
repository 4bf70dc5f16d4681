use thiserror::Error;

pub type Result<T> = std::result::Result<T, MergeError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The document uses a key reserved for the keyed working form.
    #[error("Reserved key '{key}' found at {path}")]
    ReservedKey { key: &'static str, path: String },
}
