//! Tag index. Tag names are case-insensitive and stored lowercased.

use crate::error::{Result, StoreError};
use crate::types::Tag;
use crate::{contains_pattern, Vault};
use sqlx::Row;
use tracing::debug;

impl Vault {
    pub async fn add_tag(&self, name: &str, scene_id: i64) -> Result<()> {
        let tag = normalize_tag(name)?;
        let mut conn = self.conn().await?;
        sqlx::query("INSERT INTO tags (tag_name, fk_scene_id) VALUES (?, ?)")
            .bind(&tag)
            .bind(scene_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::from_constraint(e, format!("Scene {} already has tag {}", scene_id, tag))
            })?;
        debug!(scene_id, tag = %tag, "Tag added");
        Ok(())
    }

    /// Returns false if the scene did not carry the tag.
    pub async fn remove_tag(&self, name: &str, scene_id: i64) -> Result<bool> {
        let tag = normalize_tag(name)?;
        let mut conn = self.conn().await?;
        let result = sqlx::query("DELETE FROM tags WHERE tag_name = ? AND fk_scene_id = ?")
            .bind(&tag)
            .bind(scene_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of the scenes carrying a tag.
    pub async fn get_tag(&self, name: &str) -> Result<Vec<i64>> {
        let tag = normalize_tag(name)?;
        let mut conn = self.conn().await?;
        let rows = sqlx::query(
            "SELECT fk_scene_id FROM tags WHERE tag_name = ? ORDER BY fk_scene_id ASC",
        )
        .bind(&tag)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.iter().map(|row| row.get("fk_scene_id")).collect())
    }

    /// All tags with their scene counts, optionally filtered by substring.
    pub async fn get_tags(&self, matching: Option<&str>) -> Result<Vec<Tag>> {
        let pattern = matching.map(contains_pattern);
        let mut conn = self.conn().await?;
        let rows = sqlx::query(
            r#"
            SELECT tag_name, COUNT(fk_scene_id) AS size
            FROM tags
            WHERE ?1 IS NULL OR tag_name LIKE ?1 ESCAPE '\'
            GROUP BY tag_name
            ORDER BY tag_name ASC
            "#,
        )
        .bind(pattern)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows
            .iter()
            .map(|row| Tag {
                name: row.get("tag_name"),
                size: row.get("size"),
            })
            .collect())
    }

    /// Tags of one scene.
    pub async fn scene_tags(&self, scene_id: i64) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let rows = sqlx::query("SELECT tag_name FROM tags WHERE fk_scene_id = ? ORDER BY tag_name")
            .bind(scene_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.iter().map(|row| row.get("tag_name")).collect())
    }
}

fn normalize_tag(name: &str) -> Result<String> {
    let tag = name.trim().to_lowercase();
    if tag.is_empty() {
        return Err(StoreError::bad_request("Tag name must not be empty"));
    }
    Ok(tag)
}
