//! Scene records: create, rename, archive, remove.

use crate::error::{Result, StoreError};
use crate::types::*;
use crate::{contains_pattern, now_millis, Vault};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

impl Vault {
    /// Create an empty scene.
    pub async fn create_scene(&self, name: &str, owner: Option<i64>) -> Result<i64> {
        validate_scene_name(name)?;
        let mut conn = self.conn().await?;
        let result = sqlx::query("INSERT INTO scenes (scene_name, owner, ctime) VALUES (?, ?, ?)")
            .bind(name)
            .bind(owner)
            .bind(now_millis())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::from_constraint(e, format!("Scene {} already exists", name)))?;

        let id = result.last_insert_rowid();
        info!(scene_id = id, name, "Scene created");
        Ok(id)
    }

    pub async fn get_scene(&self, id: i64) -> Result<Scene> {
        let mut conn = self.conn().await?;
        let row = sqlx::query("SELECT * FROM scenes WHERE scene_id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(row_to_scene(&row)),
            None => Err(StoreError::not_found(format!("No scene with id {}", id))),
        }
    }

    pub async fn get_scene_by_name(&self, name: &str) -> Result<Scene> {
        let mut conn = self.conn().await?;
        let row = sqlx::query("SELECT * FROM scenes WHERE scene_name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(row_to_scene(&row)),
            None => Err(StoreError::not_found(format!("No scene named {}", name))),
        }
    }

    /// Scenes ordered by name. Archived scenes are left out unless asked for.
    pub async fn list_scenes(&self, query: &SceneQuery) -> Result<Vec<Scene>> {
        check_page(query.limit, query.offset)?;
        let pattern = query.matching.as_deref().map(contains_pattern);

        let mut conn = self.conn().await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM scenes
            WHERE (archived = 0 OR ?1)
              AND (?2 IS NULL OR LOWER(scene_name) LIKE ?2 ESCAPE '\')
            ORDER BY scene_name ASC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(query.archived)
        .bind(pattern)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(row_to_scene).collect())
    }

    /// Rename a scene. The uniqueness check and the write share one transaction.
    pub async fn rename_scene(&self, id: i64, new_name: &str) -> Result<()> {
        validate_scene_name(new_name)?;
        self.isolate(|tx| async move {
            let scene = tx.get_scene(id).await?;
            if scene.name == new_name {
                return Ok(());
            }
            if tx.get_scene_by_name(new_name).await.is_ok() {
                return Err(StoreError::conflict(format!("Scene {} already exists", new_name)));
            }
            let mut conn = tx.conn().await?;
            sqlx::query("UPDATE scenes SET scene_name = ? WHERE scene_id = ?")
                .bind(new_name)
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    StoreError::from_constraint(e, format!("Scene {} already exists", new_name))
                })?;
            info!(scene_id = id, from = %scene.name, to = new_name, "Scene renamed");
            Ok(())
        })
        .await
    }

    /// Soft delete: hide the scene from listings and free its name.
    ///
    /// The name gets a `#<id>` suffix. History stays readable by id.
    pub async fn archive_scene(&self, id: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        let result = sqlx::query(
            r#"
            UPDATE scenes
            SET archived = 1, scene_name = scene_name || '#' || scene_id
            WHERE scene_id = ? AND archived = 0
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        drop(conn);

        if result.rows_affected() == 0 {
            // either missing or already archived
            let scene = self.get_scene(id).await?;
            return Err(StoreError::conflict(format!("Scene {} is already archived", scene.name)));
        }
        info!(scene_id = id, "Scene archived");
        Ok(())
    }

    /// Undo [`Vault::archive_scene`]. Fails with `Conflict` if the name was reused.
    pub async fn unarchive_scene(&self, id: i64) -> Result<()> {
        self.isolate(|tx| async move {
            let scene = tx.get_scene(id).await?;
            if !scene.archived {
                return Err(StoreError::conflict(format!("Scene {} is not archived", scene.name)));
            }
            let suffix = format!("#{}", id);
            let name = scene
                .name
                .strip_suffix(&suffix)
                .unwrap_or(&scene.name)
                .to_string();

            let mut conn = tx.conn().await?;
            sqlx::query("UPDATE scenes SET archived = 0, scene_name = ? WHERE scene_id = ?")
                .bind(&name)
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::from_constraint(e, format!("Scene {} already exists", name)))?;
            info!(scene_id = id, name = %name, "Scene restored");
            Ok(())
        })
        .await
    }

    /// Hard delete. Files, tags and tasks of the scene go with it.
    ///
    /// Blobs are left for the cleanup sweep.
    pub async fn remove_scene(&self, id: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        let result = sqlx::query("DELETE FROM scenes WHERE scene_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("No scene with id {}", id)));
        }
        info!(scene_id = id, "Scene removed");
        Ok(())
    }
}

fn validate_scene_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StoreError::bad_request("Scene name must not be empty"));
    }
    if name.contains('/') || name.contains('#') {
        return Err(StoreError::bad_request(format!(
            "Invalid scene name {:?}: '/' and '#' are reserved",
            name
        )));
    }
    Ok(())
}

fn row_to_scene(row: &SqliteRow) -> Scene {
    Scene {
        id: row.get("scene_id"),
        name: row.get("scene_name"),
        owner: row.get("owner"),
        archived: row.get::<i64, _>("archived") != 0,
        ctime: millis_to_datetime(row.get("ctime")),
    }
}
