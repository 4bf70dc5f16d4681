//! Database schema creation for all vault tables.
//!
//! All CREATE TABLE statements live here, task tables included.

use crate::error::Result;
use crate::Vault;
use tracing::info;

impl Vault {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_scene_tables().await?;
        self.create_task_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Scenes, file generations and tags
    async fn create_scene_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scenes (
                scene_id INTEGER PRIMARY KEY AUTOINCREMENT,
                scene_name TEXT NOT NULL UNIQUE,
                owner INTEGER,
                archived INTEGER NOT NULL DEFAULT 0,
                ctime INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // One row per generation; a NULL hash is a tombstone
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS files (
                file_id INTEGER PRIMARY KEY AUTOINCREMENT,
                fk_scene_id INTEGER NOT NULL REFERENCES scenes(scene_id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                generation INTEGER NOT NULL CHECK (generation > 0),
                hash TEXT,
                data TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                mime TEXT NOT NULL,
                author INTEGER,
                ctime INTEGER NOT NULL,
                UNIQUE (fk_scene_id, name, generation)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_files_scene_ctime ON files(fk_scene_id, ctime)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tags (
                tag_name TEXT NOT NULL,
                fk_scene_id INTEGER NOT NULL REFERENCES scenes(scene_id) ON DELETE CASCADE,
                PRIMARY KEY (tag_name, fk_scene_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Task records, "after" edges and per-task logs
    async fn create_task_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tasks (
                task_id INTEGER PRIMARY KEY AUTOINCREMENT,
                fk_scene_id INTEGER NOT NULL REFERENCES scenes(scene_id) ON DELETE CASCADE,
                fk_user_id INTEGER,
                parent INTEGER REFERENCES tasks(task_id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                output TEXT,
                error TEXT,
                aborted INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                ctime INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent)")
            .execute(&self.pool)
            .await?;

        // "after" edges: target may only run once source succeeded
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tasks_relations (
                source INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
                target INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
                PRIMARY KEY (source, target),
                CHECK (source != target)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tasks_logs (
                log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                fk_task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
                timestamp INTEGER NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
