//! Scene documents: JSON payloads stored inline in the generation row.

use crate::blob::BlobStore;
use crate::error::{Result, StoreError};
use crate::files::NewEntry;
use crate::types::*;
use crate::Vault;
use scenevault_merge::{diff_doc, Delta};
use serde_json::Value;
use tracing::info;

impl Vault {
    /// Store `document` as a new generation of `name`.
    pub async fn write_document(
        &self,
        scene_id: i64,
        name: &str,
        document: &Value,
        user_id: Option<i64>,
    ) -> Result<FileEntry> {
        if !document.is_object() {
            return Err(StoreError::bad_request("A scene document must be a JSON object"));
        }
        let data = serde_json::to_string(document)?;
        let hash = BlobStore::hash_bytes(data.as_bytes());
        let file = self
            .insert_entry(NewEntry {
                scene_id,
                name,
                hash: Some(&hash),
                data: Some(&data),
                size: data.len() as i64,
                mime: DOCUMENT_MIME,
                author: user_id,
            })
            .await?;
        info!(scene_id, name, generation = file.generation, "Document written");
        Ok(file)
    }

    /// Parse a document, at the latest generation or as of `generation`.
    pub async fn get_document(
        &self,
        scene_id: i64,
        name: &str,
        generation: Option<i64>,
    ) -> Result<Value> {
        let file = match generation {
            None => self.get_file(scene_id, name).await?,
            Some(generation) => match self.get_file_before(scene_id, name, generation).await? {
                FileState::Present(file) => file,
                FileState::Removed(_) | FileState::Missing => {
                    return Err(StoreError::not_found(format!(
                        "Document {} does not exist at generation {}",
                        name, generation
                    )))
                }
            },
        };
        let bytes = self.read_file(&file).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Delta between two stored generations of a document.
    pub async fn diff_document_generations(
        &self,
        scene_id: i64,
        name: &str,
        from: i64,
        to: i64,
    ) -> Result<Delta> {
        let before = self.get_document(scene_id, name, Some(from)).await?;
        let after = self.get_document(scene_id, name, Some(to)).await?;
        Ok(diff_doc(&before, &after)?)
    }

    /// Write a past generation again as the newest one.
    pub async fn restore_document(
        &self,
        scene_id: i64,
        name: &str,
        generation: i64,
        user_id: Option<i64>,
    ) -> Result<FileEntry> {
        self.isolate(|tx| async move {
            let document = tx.get_document(scene_id, name, Some(generation)).await?;
            tx.write_document(scene_id, name, &document, user_id).await
        })
        .await
    }
}
