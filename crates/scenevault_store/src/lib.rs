//! Versioned content-addressable storage for scenes.
//!
//! A [`Vault`] pairs a SQLite metadata database (scenes, file generations,
//! tags, task records) with a [`BlobStore`] holding file contents by hash.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scenevault_store::{Vault, VaultConfig, WriteFileParams};
//!
//! let vault = Vault::open(&VaultConfig::new("/srv/scenes")).await?;
//! let scene_id = vault.create_scene("lighthouse", Some(user_id)).await?;
//!
//! let entry = vault
//!     .write_bytes(b"<html/>", &WriteFileParams::new(scene_id, "articles/intro.html").mime("text/html"))
//!     .await?;
//! assert!(entry.is_created());
//!
//! // multi-step changes commit or roll back as one unit
//! vault.isolate(|tx| async move {
//!     tx.rename_scene(scene_id, "lighthouse-2024").await?;
//!     tx.add_tag("coast", scene_id).await
//! }).await?;
//! ```

mod blob;
mod clean;
mod config;
mod documents;
mod error;
mod files;
mod isolate;
mod scenes;
mod schema;
mod tags;
mod types;

pub use blob::{BlobInfo, BlobStore};
pub use clean::{CleanOptions, CleanReport};
pub use config::VaultConfig;
pub use error::{ErrorKind, Result, StoreError};
pub use isolate::{Conn, ImmediateTx};
pub use types::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Handle to scene storage.
///
/// Cloning is cheap. A clone handed out by [`Vault::isolate`] is bound to
/// that block's transaction.
#[derive(Clone)]
pub struct Vault {
    pool: SqlitePool,
    blobs: BlobStore,
    tx: Option<isolate::SharedTx>,
}

impl Vault {
    /// Open or create a vault.
    ///
    /// Creates directories and all tables if they don't exist.
    pub async fn open(config: &VaultConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root_dir)?;
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", config.database_path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let blobs = BlobStore::new(&config.files_dir).await?;
        let vault = Self {
            pool,
            blobs,
            tx: None,
        };

        vault.ensure_schema().await?;

        info!(
            database = %config.database_path.display(),
            files = %config.files_dir.display(),
            "Vault opened"
        );

        Ok(vault)
    }

    /// Underlying connection pool (escape hatch for read-only reporting).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `LIKE` pattern matching `needle` anywhere, case-folded. Used with
/// `ESCAPE '\'`.
pub(crate) fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
