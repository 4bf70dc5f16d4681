//! Scene, file and tag records.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hash value recorded for folder placeholders.
pub const DIRECTORY_HASH: &str = "directory";
/// Mime type of folder placeholders.
pub const DIRECTORY_MIME: &str = "text/directory";
/// Mime type of scene documents.
pub const DOCUMENT_MIME: &str = "application/si-dpo-3d.document+json";

/// Hard cap on page size for listings.
pub const MAX_PAGE_SIZE: i64 = 100;

// ============================================================================
// Scenes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: i64,
    pub name: String,
    pub owner: Option<i64>,
    pub archived: bool,
    pub ctime: DateTime<Utc>,
}

/// Filter for scene listings.
#[derive(Debug, Clone)]
pub struct SceneQuery {
    pub limit: i64,
    pub offset: i64,
    /// Include archived scenes
    pub archived: bool,
    /// Case-insensitive substring match on the name
    pub matching: Option<String>,
}

impl Default for SceneQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            archived: false,
            matching: None,
        }
    }
}

// ============================================================================
// Files
// ============================================================================

/// One generation of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: i64,
    pub scene_id: i64,
    pub name: String,
    pub generation: i64,
    /// Content hash. `None` marks a tombstone.
    pub hash: Option<String>,
    /// Inline payload for small documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub size: i64,
    pub mime: String,
    pub author: Option<i64>,
    pub ctime: DateTime<Utc>,
}

impl FileEntry {
    pub fn is_removed(&self) -> bool {
        self.hash.is_none()
    }

    pub fn is_directory(&self) -> bool {
        self.hash.as_deref() == Some(DIRECTORY_HASH)
    }

    /// First generation of this path.
    pub fn is_created(&self) -> bool {
        self.generation == 1
    }
}

/// What a path looked like as of a given generation.
#[derive(Debug, Clone, PartialEq)]
pub enum FileState {
    /// Live entry
    Present(FileEntry),
    /// Existed, but the visible generation is a tombstone
    Removed(FileEntry),
    /// No generation at or before the requested one
    Missing,
}

impl FileState {
    pub fn entry(&self) -> Option<&FileEntry> {
        match self {
            FileState::Present(entry) | FileState::Removed(entry) => Some(entry),
            FileState::Missing => None,
        }
    }

    pub fn exists(&self) -> bool {
        matches!(self, FileState::Present(_))
    }
}

/// Parameters for writing a new generation.
#[derive(Debug, Clone)]
pub struct WriteFileParams {
    pub scene_id: i64,
    pub name: String,
    pub mime: String,
    pub user_id: Option<i64>,
}

impl WriteFileParams {
    pub fn new(scene_id: i64, name: impl Into<String>) -> Self {
        Self {
            scene_id,
            name: name.into(),
            mime: "application/octet-stream".to_string(),
            user_id: None,
        }
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilesOptions {
    /// Include paths whose latest generation is a tombstone
    pub with_removed: bool,
    /// Include folder placeholders
    pub with_folders: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(OrderDirection::Asc),
            "desc" => Some(OrderDirection::Desc),
            _ => None,
        }
    }
}

/// Page of a scene's history.
#[derive(Debug, Clone, Copy)]
pub struct HistoryQuery {
    pub limit: i64,
    pub offset: i64,
    pub order: OrderDirection,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            order: OrderDirection::Desc,
        }
    }
}

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    /// Number of scenes carrying this tag
    pub size: i64,
}

/// Validate pagination bounds shared by all listings.
pub(crate) fn check_page(limit: i64, offset: i64) -> Result<()> {
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(StoreError::bad_request(format!(
            "limit must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, limit
        )));
    }
    if offset < 0 {
        return Err(StoreError::bad_request(format!(
            "offset must be positive, got {}",
            offset
        )));
    }
    Ok(())
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
