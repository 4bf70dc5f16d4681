//! File generations: write, remove, rename, folders and history.

use crate::error::{Result, StoreError};
use crate::types::*;
use crate::{now_millis, Vault};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

/// Column values of a generation about to be inserted.
pub(crate) struct NewEntry<'a> {
    pub scene_id: i64,
    pub name: &'a str,
    pub hash: Option<&'a str>,
    pub data: Option<&'a str>,
    pub size: i64,
    pub mime: &'a str,
    pub author: Option<i64>,
}

impl Vault {
    /// Append a generation for `(scene, name)`.
    ///
    /// The generation number is computed by the insert statement itself, so
    /// concurrent writers on one path always get distinct numbers.
    pub(crate) async fn insert_entry(&self, entry: NewEntry<'_>) -> Result<FileEntry> {
        let mut conn = self.conn().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO files (fk_scene_id, name, generation, hash, data, size, mime, author, ctime)
            SELECT ?1, ?2, COALESCE(MAX(generation), 0) + 1, ?3, ?4, ?5, ?6, ?7, ?8
            FROM files
            WHERE fk_scene_id = ?1 AND name = ?2
            RETURNING *
            "#,
        )
        .bind(entry.scene_id)
        .bind(entry.name)
        .bind(entry.hash)
        .bind(entry.data)
        .bind(entry.size)
        .bind(entry.mime)
        .bind(entry.author)
        .bind(now_millis())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            StoreError::from_constraint(
                e,
                format!("Concurrent write on {} in scene {}", entry.name, entry.scene_id),
            )
        })?;

        let file = row_to_file(&row);
        debug!(
            scene_id = file.scene_id,
            name = %file.name,
            generation = file.generation,
            "File generation inserted"
        );
        Ok(file)
    }

    /// Stream `reader` to the blob store and record a new generation.
    ///
    /// `generation == 1` on the returned entry means the path was created.
    pub async fn write_file<R>(&self, reader: R, params: &WriteFileParams) -> Result<FileEntry>
    where
        R: AsyncRead + Unpin,
    {
        validate_file_name(&params.name)?;
        let blob = self.blobs.put(reader).await?;
        let size = i64::try_from(blob.size)
            .map_err(|_| StoreError::bad_request("File too large"))?;
        let file = self
            .insert_entry(NewEntry {
                scene_id: params.scene_id,
                name: &params.name,
                hash: Some(&blob.hash),
                data: None,
                size,
                mime: &params.mime,
                author: params.user_id,
            })
            .await?;
        info!(
            scene_id = file.scene_id,
            name = %file.name,
            generation = file.generation,
            hash = %blob.hash,
            "File written"
        );
        Ok(file)
    }

    pub async fn write_bytes(&self, bytes: &[u8], params: &WriteFileParams) -> Result<FileEntry> {
        self.write_file(bytes, params).await
    }

    /// Latest generation of a live file.
    pub async fn get_file(&self, scene_id: i64, name: &str) -> Result<FileEntry> {
        match self.latest_entry(scene_id, name).await? {
            Some(file) if !file.is_removed() => Ok(file),
            _ => Err(StoreError::not_found(format!(
                "File {} not found in scene {}",
                name, scene_id
            ))),
        }
    }

    async fn latest_entry(&self, scene_id: i64, name: &str) -> Result<Option<FileEntry>> {
        let mut conn = self.conn().await?;
        let row = sqlx::query(
            r#"
            SELECT * FROM files
            WHERE fk_scene_id = ? AND name = ?
            ORDER BY generation DESC
            LIMIT 1
            "#,
        )
        .bind(scene_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.as_ref().map(row_to_file))
    }

    /// The generation visible at `generation`: the latest one `<= generation`.
    pub async fn get_file_before(
        &self,
        scene_id: i64,
        name: &str,
        generation: i64,
    ) -> Result<FileState> {
        let mut conn = self.conn().await?;
        let row = sqlx::query(
            r#"
            SELECT * FROM files
            WHERE fk_scene_id = ? AND name = ? AND generation <= ?
            ORDER BY generation DESC
            LIMIT 1
            "#,
        )
        .bind(scene_id)
        .bind(name)
        .bind(generation)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(match row.as_ref().map(row_to_file) {
            None => FileState::Missing,
            Some(file) if file.is_removed() => FileState::Removed(file),
            Some(file) => FileState::Present(file),
        })
    }

    /// Every generation of one path, newest first.
    pub async fn get_file_history(&self, scene_id: i64, name: &str) -> Result<Vec<FileEntry>> {
        let mut conn = self.conn().await?;
        let rows = sqlx::query(
            "SELECT * FROM files WHERE fk_scene_id = ? AND name = ? ORDER BY generation DESC",
        )
        .bind(scene_id)
        .bind(name)
        .fetch_all(&mut *conn)
        .await?;
        if rows.is_empty() {
            return Err(StoreError::not_found(format!(
                "File {} not found in scene {}",
                name, scene_id
            )));
        }
        Ok(rows.iter().map(row_to_file).collect())
    }

    /// Latest generation of each path in a scene, ordered by name.
    pub async fn list_files(&self, scene_id: i64, options: ListFilesOptions) -> Result<Vec<FileEntry>> {
        let mut conn = self.conn().await?;
        let rows = sqlx::query(
            r#"
            SELECT f.* FROM files f
            WHERE f.fk_scene_id = ?1
              AND f.generation = (
                SELECT MAX(generation) FROM files
                WHERE fk_scene_id = f.fk_scene_id AND name = f.name
              )
              AND (?2 OR f.hash IS NOT NULL)
              AND (?3 OR f.hash IS NULL OR f.hash != ?4)
            ORDER BY f.name ASC
            "#,
        )
        .bind(scene_id)
        .bind(options.with_removed)
        .bind(options.with_folders)
        .bind(DIRECTORY_HASH)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.iter().map(row_to_file).collect())
    }

    /// Append a tombstone for a live file.
    pub async fn remove_file(
        &self,
        scene_id: i64,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<FileEntry> {
        self.isolate(|tx| async move {
            let previous = match tx.latest_entry(scene_id, name).await? {
                Some(file) => file,
                None => {
                    return Err(StoreError::not_found(format!(
                        "File {} not found in scene {}",
                        name, scene_id
                    )))
                }
            };
            if previous.is_removed() {
                return Err(StoreError::conflict(format!("File {} is already removed", name)));
            }
            let tombstone = tx
                .insert_entry(NewEntry {
                    scene_id,
                    name,
                    hash: None,
                    data: None,
                    size: 0,
                    mime: &previous.mime,
                    author: user_id,
                })
                .await?;
            info!(scene_id, name, generation = tombstone.generation, "File removed");
            Ok(tombstone)
        })
        .await
    }

    /// Move a file: tombstone at `from`, copy of its content at `to`.
    pub async fn rename_file(
        &self,
        scene_id: i64,
        from: &str,
        to: &str,
        user_id: Option<i64>,
    ) -> Result<FileEntry> {
        validate_file_name(to)?;
        self.isolate(|tx| async move {
            let source = tx.get_file(scene_id, from).await?;
            if tx.get_file(scene_id, to).await.is_ok() {
                return Err(StoreError::conflict(format!("File {} already exists", to)));
            }
            tx.insert_entry(NewEntry {
                scene_id,
                name: from,
                hash: None,
                data: None,
                size: 0,
                mime: &source.mime,
                author: user_id,
            })
            .await?;
            let moved = tx
                .insert_entry(NewEntry {
                    scene_id,
                    name: to,
                    hash: source.hash.as_deref(),
                    data: source.data.as_deref(),
                    size: source.size,
                    mime: &source.mime,
                    author: user_id,
                })
                .await?;
            info!(scene_id, from, to, "File renamed");
            Ok(moved)
        })
        .await
    }

    /// Create a folder placeholder.
    pub async fn create_folder(
        &self,
        scene_id: i64,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<FileEntry> {
        if name.starts_with('/') || name.ends_with('/') {
            return Err(StoreError::bad_request(format!(
                "Folder name {:?} must not start or end with '/'",
                name
            )));
        }
        validate_file_name(name)?;
        self.isolate(|tx| async move {
            if let Some(existing) = tx.latest_entry(scene_id, name).await? {
                if !existing.is_removed() {
                    return Err(StoreError::conflict(format!("{} already exists", name)));
                }
            }
            tx.insert_entry(NewEntry {
                scene_id,
                name,
                hash: Some(DIRECTORY_HASH),
                data: None,
                size: 0,
                mime: DIRECTORY_MIME,
                author: user_id,
            })
            .await
        })
        .await
    }

    pub async fn remove_folder(
        &self,
        scene_id: i64,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<FileEntry> {
        let folder = self.get_file(scene_id, name).await?;
        if !folder.is_directory() {
            return Err(StoreError::bad_request(format!("{} is not a folder", name)));
        }
        self.remove_file(scene_id, name, user_id).await
    }

    /// Live folders of a scene.
    pub async fn list_folders(&self, scene_id: i64) -> Result<Vec<FileEntry>> {
        let files = self
            .list_files(
                scene_id,
                ListFilesOptions {
                    with_removed: false,
                    with_folders: true,
                },
            )
            .await?;
        Ok(files.into_iter().filter(FileEntry::is_directory).collect())
    }

    /// Content of a generation.
    pub async fn read_file(&self, file: &FileEntry) -> Result<Vec<u8>> {
        if let Some(data) = &file.data {
            return Ok(data.as_bytes().to_vec());
        }
        match file.hash.as_deref() {
            None => Err(StoreError::not_found(format!("File {} was removed", file.name))),
            Some(DIRECTORY_HASH) => Err(StoreError::bad_request(format!("{} is a folder", file.name))),
            Some(hash) => {
                let mut reader = self.blobs.open(hash).await?;
                let mut bytes = Vec::with_capacity(file.size.max(0) as usize);
                reader.read_to_end(&mut bytes).await?;
                Ok(bytes)
            }
        }
    }

    /// Paginated changes across a whole scene, in insertion order.
    pub async fn get_scene_history(&self, scene_id: i64, query: &HistoryQuery) -> Result<Vec<FileEntry>> {
        check_page(query.limit, query.offset)?;
        // direction comes from the enum, never from caller text
        let sql = format!(
            r#"
            SELECT * FROM files
            WHERE fk_scene_id = ?
            ORDER BY ctime {dir}, file_id {dir}
            LIMIT ? OFFSET ?
            "#,
            dir = query.order.as_str()
        );
        let mut conn = self.conn().await?;
        let rows = sqlx::query(&sql)
            .bind(scene_id)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.iter().map(row_to_file).collect())
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if !valid {
        return Err(StoreError::bad_request(format!("Invalid file name {:?}", name)));
    }
    Ok(())
}

pub(crate) fn row_to_file(row: &SqliteRow) -> FileEntry {
    FileEntry {
        id: row.get("file_id"),
        scene_id: row.get("fk_scene_id"),
        name: row.get("name"),
        generation: row.get("generation"),
        hash: row.get("hash"),
        data: row.get("data"),
        size: row.get("size"),
        mime: row.get("mime"),
        author: row.get("author"),
        ctime: millis_to_datetime(row.get("ctime")),
    }
}
