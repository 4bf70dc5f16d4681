//! Consistency sweep between file metadata and the blob store.
//!
//! Run it while no writes are in flight: a blob stored by a write that has
//! not inserted its row yet looks loose.

use crate::error::Result;
use crate::types::DIRECTORY_HASH;
use crate::Vault;
use serde::Serialize;
use sqlx::Row;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Delete loose blobs instead of only reporting them
    pub remove_loose: bool,
    /// Temporary upload files older than this are deleted
    pub temp_max_age: Duration,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            remove_loose: false,
            temp_max_age: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    /// Blobs no generation references
    pub loose: Vec<String>,
    /// Hashes referenced by a generation but absent from the blob store
    pub missing: Vec<String>,
    pub removed_loose: usize,
    pub removed_temp: usize,
}

impl Vault {
    pub async fn clean(&self, options: &CleanOptions) -> Result<CleanReport> {
        let referenced: HashSet<String> = {
            let mut conn = self.conn().await?;
            // inline documents carry a hash but no blob
            let rows = sqlx::query(
                "SELECT DISTINCT hash FROM files WHERE hash IS NOT NULL AND hash != ? AND data IS NULL",
            )
            .bind(DIRECTORY_HASH)
            .fetch_all(&mut *conn)
            .await?;
            rows.iter().map(|row| row.get::<String, _>("hash")).collect()
        };

        let stored: HashSet<String> = self.blobs.list().await?.into_iter().collect();

        let mut report = CleanReport {
            loose: stored.difference(&referenced).cloned().collect(),
            missing: referenced.difference(&stored).cloned().collect(),
            ..Default::default()
        };
        report.loose.sort();
        report.missing.sort();

        for hash in &report.missing {
            warn!(hash = %hash, "Referenced blob is missing");
        }

        if options.remove_loose {
            for hash in &report.loose {
                if self.blobs.remove(hash).await? {
                    report.removed_loose += 1;
                }
            }
        }
        report.removed_temp = self.blobs.remove_stale_temp(options.temp_max_age).await?;

        info!(
            loose = report.loose.len(),
            missing = report.missing.len(),
            removed_loose = report.removed_loose,
            removed_temp = report.removed_temp,
            "Clean finished"
        );
        Ok(report)
    }
}
