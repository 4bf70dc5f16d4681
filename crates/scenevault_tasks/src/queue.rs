//! Task persistence.
//!
//! All task SQL lives here. Claiming uses a single `UPDATE ... RETURNING`
//! so two passes can never pick up the same task.

use crate::error::{Result, TaskError};
use crate::types::*;
use scenevault_store::{StoreError, Vault};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct TaskQueue {
    vault: Vault,
}

impl TaskQueue {
    pub fn new(vault: Vault) -> Self {
        Self { vault }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Insert a task and its "after" edges in one transaction.
    pub async fn create(&self, scene_id: i64, params: &CreateTask, status: TaskStatus) -> Result<Task> {
        let data = serde_json::to_string(&normalize_data(&params.data))?;
        let params = params.clone();
        let task = self
            .vault
            .isolate(|tx| async move {
                let queue = TaskQueue::new(tx);
                let task_id = {
                    let mut conn = queue.vault.conn().await?;
                    sqlx::query(
                        r#"
                        INSERT INTO tasks (fk_scene_id, fk_user_id, parent, type, data, status, ctime)
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        RETURNING task_id
                        "#,
                    )
                    .bind(scene_id)
                    .bind(params.user_id)
                    .bind(params.parent)
                    .bind(&params.task_type)
                    .bind(&data)
                    .bind(status.as_str())
                    .bind(now_millis())
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| {
                        StoreError::from_constraint(e, format!("Cannot create {} task in scene {}", params.task_type, scene_id))
                    })?
                    .get::<i64, _>("task_id")
                };
                for source in &params.after {
                    queue.add_relation(*source, task_id).await?;
                }
                queue.get_task(task_id).await
            })
            .await?;

        debug!(task_id = task.id, task_type = %task.task_type, scene_id, "Task created");
        Ok(task)
    }

    /// Make `target` wait for `source` to succeed.
    pub async fn add_relation(&self, source: i64, target: i64) -> Result<()> {
        if source == target {
            return Err(TaskError::Cycle { from: source, to: target });
        }
        let mut conn = self.vault.conn().await?;

        let closes_cycle: Option<i64> = sqlx::query_scalar(
            r#"
            WITH RECURSIVE downstream(id) AS (
                SELECT target FROM tasks_relations WHERE source = ?1
                UNION
                SELECT r.target FROM tasks_relations r JOIN downstream d ON r.source = d.id
            )
            SELECT id FROM downstream WHERE id = ?2 LIMIT 1
            "#,
        )
        .bind(target)
        .bind(source)
        .fetch_optional(&mut *conn)
        .await?;
        if closes_cycle.is_some() {
            return Err(TaskError::Cycle { from: source, to: target });
        }

        sqlx::query("INSERT OR IGNORE INTO tasks_relations (source, target) VALUES (?, ?)")
            .bind(source)
            .bind(target)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::from_constraint(e, format!("Relation #{} -> #{}", source, target))
            })?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Task> {
        self.find_task(task_id).await?.ok_or(TaskError::NotFound(task_id))
    }

    pub async fn find_task(&self, task_id: i64) -> Result<Option<Task>> {
        let row = {
            let mut conn = self.vault.conn().await?;
            sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(&mut *conn)
                .await?
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let mut tasks = vec![row_to_task(&row)?];
        self.attach_after(&mut tasks).await?;
        Ok(tasks.pop())
    }

    /// Atomically move one runnable task to `running`.
    ///
    /// Runnable means pending, of a type in `types`, with every "after"
    /// source succeeded.
    pub async fn claim(&self, types: &[String]) -> Result<Option<Task>> {
        let types = serde_json::to_string(types)?;
        let row = {
            let mut conn = self.vault.conn().await?;
            sqlx::query(
                r#"
                UPDATE tasks SET status = 'running'
                WHERE status = 'pending' AND task_id = (
                    SELECT t.task_id FROM tasks t
                    WHERE t.status = 'pending'
                      AND t.type IN (SELECT value FROM json_each(?))
                      AND NOT EXISTS (
                          SELECT 1 FROM tasks_relations r
                          JOIN tasks s ON s.task_id = r.source
                          WHERE r.target = t.task_id AND s.status != 'success'
                      )
                    ORDER BY t.task_id ASC
                    LIMIT 1
                )
                RETURNING *
                "#,
            )
            .bind(&types)
            .fetch_optional(&mut *conn)
            .await?
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let mut tasks = vec![row_to_task(&row)?];
        self.attach_after(&mut tasks).await?;
        let task = tasks.pop();
        if let Some(task) = &task {
            info!(task_id = task.id, task_type = %task.task_type, "Claimed task");
        }
        Ok(task)
    }

    /// Outputs of the "after" sources of a task, ordered by source id.
    pub async fn inputs(&self, task_id: i64) -> Result<Vec<Value>> {
        let mut conn = self.vault.conn().await?;
        let rows = sqlx::query(
            r#"
            SELECT s.output FROM tasks_relations r
            JOIN tasks s ON s.task_id = r.source
            WHERE r.target = ?
            ORDER BY s.task_id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter()
            .map(|row| parse_json(row.get::<Option<String>, _>("output")).map(|v| v.unwrap_or(Value::Null)))
            .collect()
    }

    /// Record a result. Returns false if the task was no longer running.
    pub async fn complete(&self, task_id: i64, output: &Value) -> Result<bool> {
        let output = serde_json::to_string(output)?;
        let mut conn = self.vault.conn().await?;
        let result = sqlx::query(
            "UPDATE tasks SET status = 'success', output = ? WHERE task_id = ? AND status = 'running'",
        )
        .bind(&output)
        .bind(task_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a non-terminal task to `error` and log the message.
    ///
    /// Returns false if the task had already reached a terminal state.
    pub async fn fail(&self, task_id: i64, message: &str, aborted: bool) -> Result<bool> {
        let failed = {
            let mut conn = self.vault.conn().await?;
            sqlx::query(
                r#"
                UPDATE tasks SET status = 'error', error = ?, aborted = ?
                WHERE task_id = ? AND status NOT IN ('success', 'error')
                "#,
            )
            .bind(message)
            .bind(aborted)
            .bind(task_id)
            .execute(&mut *conn)
            .await?
            .rows_affected()
                > 0
        };
        if failed {
            self.append_log(task_id, LogSeverity::Error, message).await?;
        }
        Ok(failed)
    }

    /// Fail pending tasks whose "after" source ended in error.
    ///
    /// Repeats until the failure has reached the end of every chain. Returns
    /// the number of tasks failed.
    pub async fn fail_blocked(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let rows = {
                let mut conn = self.vault.conn().await?;
                sqlx::query(
                    r#"
                    SELECT t.task_id, s.task_id AS source_id, s.error, s.aborted
                    FROM tasks t
                    JOIN tasks_relations r ON r.target = t.task_id
                    JOIN tasks s ON s.task_id = r.source
                    WHERE t.status = 'pending' AND s.status = 'error'
                    ORDER BY t.task_id ASC, s.task_id ASC
                    "#,
                )
                .fetch_all(&mut *conn)
                .await?
            };
            if rows.is_empty() {
                return Ok(total);
            }

            let mut seen = HashSet::new();
            for row in &rows {
                let task_id: i64 = row.get("task_id");
                if !seen.insert(task_id) {
                    continue;
                }
                let source_id: i64 = row.get("source_id");
                let message = TaskError::Failed {
                    task_id: source_id,
                    message: row.get::<Option<String>, _>("error").unwrap_or_default(),
                }
                .to_string();
                if self.fail(task_id, &message, row.get("aborted")).await? {
                    info!(task_id, source_id, "Dependency failed, task not run");
                    total += 1;
                }
            }
        }
    }

    /// Move an `initializing` task to `pending`.
    pub async fn release(&self, task_id: i64) -> Result<()> {
        let mut conn = self.vault.conn().await?;
        sqlx::query("UPDATE tasks SET status = 'pending' WHERE task_id = ? AND status = 'initializing'")
            .bind(task_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Non-terminal tasks in the subtree rooted at `task_id`, including itself.
    pub async fn active_subtree(&self, task_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.vault.conn().await?;
        let ids = sqlx::query_scalar(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT ?
                UNION ALL
                SELECT t.task_id FROM tasks t JOIN subtree s ON t.parent = s.id
            )
            SELECT task_id FROM tasks
            WHERE task_id IN (SELECT id FROM subtree) AND status NOT IN ('success', 'error')
            "#,
        )
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(ids)
    }

    /// Delete a task; children go with it. Returns false if it didn't exist.
    pub async fn delete(&self, task_id: i64) -> Result<bool> {
        let mut conn = self.vault.conn().await?;
        let result = sqlx::query("DELETE FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// True if some pending task could be claimed right now.
    pub async fn has_runnable(&self, types: &[String]) -> Result<bool> {
        let types = serde_json::to_string(types)?;
        let mut conn = self.vault.conn().await?;
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT t.task_id FROM tasks t
            WHERE t.status = 'pending'
              AND t.type IN (SELECT value FROM json_each(?))
              AND NOT EXISTS (
                  SELECT 1 FROM tasks_relations r
                  JOIN tasks s ON s.task_id = r.source
                  WHERE r.target = t.task_id AND s.status != 'success'
              )
            LIMIT 1
            "#,
        )
        .bind(&types)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(found.is_some())
    }

    pub async fn append_log(&self, task_id: i64, severity: LogSeverity, message: &str) -> Result<()> {
        let mut conn = self.vault.conn().await?;
        sqlx::query(
            "INSERT INTO tasks_logs (fk_task_id, timestamp, severity, message) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(now_millis())
        .bind(severity.as_str())
        .bind(message)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::from_constraint(e, format!("Log for task #{}", task_id)))?;
        Ok(())
    }

    pub async fn task_logs(&self, task_id: i64, page: TaskPage) -> Result<Vec<TaskLog>> {
        check_page(page)?;
        let mut conn = self.vault.conn().await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks_logs WHERE fk_task_id = ?
            ORDER BY log_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(task_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_log).collect()
    }

    /// Message of the most recent error log line of a task.
    pub async fn last_error(&self, task_id: i64) -> Result<Option<String>> {
        let mut conn = self.vault.conn().await?;
        let message = sqlx::query_scalar(
            r#"
            SELECT message FROM tasks_logs
            WHERE fk_task_id = ? AND severity = 'error'
            ORDER BY log_id DESC LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(message)
    }

    /// Root tasks with their descendants.
    ///
    /// Roots are filtered by user and scene when given, grouped by scene and
    /// newest first within a scene.
    pub async fn list_trees(
        &self,
        user_id: Option<i64>,
        scene_id: Option<i64>,
        page: TaskPage,
    ) -> Result<Vec<TaskNode>> {
        check_page(page)?;
        let (root_rows, descendant_rows) = {
            let mut conn = self.vault.conn().await?;
            let roots = sqlx::query(
                r#"
                SELECT t.*, s.scene_name FROM tasks t
                JOIN scenes s ON s.scene_id = t.fk_scene_id
                WHERE t.parent IS NULL
                  AND (?1 IS NULL OR t.fk_user_id = ?1)
                  AND (?2 IS NULL OR t.fk_scene_id = ?2)
                ORDER BY t.fk_scene_id ASC, t.task_id DESC
                LIMIT ?3 OFFSET ?4
                "#,
            )
            .bind(user_id)
            .bind(scene_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&mut *conn)
            .await?;

            let root_ids: Vec<i64> = roots.iter().map(|row| row.get("task_id")).collect();
            let descendants = sqlx::query(
                r#"
                WITH RECURSIVE subtree(id) AS (
                    SELECT task_id FROM tasks WHERE parent IN (SELECT value FROM json_each(?))
                    UNION ALL
                    SELECT t.task_id FROM tasks t JOIN subtree s ON t.parent = s.id
                )
                SELECT * FROM tasks WHERE task_id IN (SELECT id FROM subtree)
                ORDER BY task_id ASC
                "#,
            )
            .bind(serde_json::to_string(&root_ids)?)
            .fetch_all(&mut *conn)
            .await?;
            (roots, descendants)
        };

        let mut roots = Vec::with_capacity(root_rows.len());
        let mut scene_names = Vec::with_capacity(root_rows.len());
        for row in &root_rows {
            roots.push(row_to_task(row)?);
            scene_names.push(row.get::<String, _>("scene_name"));
        }
        let mut descendants = descendant_rows.iter().map(row_to_task).collect::<Result<Vec<_>>>()?;
        self.attach_after(&mut roots).await?;
        self.attach_after(&mut descendants).await?;

        let mut by_parent: HashMap<i64, Vec<Task>> = HashMap::new();
        for task in descendants {
            if let Some(parent) = task.parent {
                by_parent.entry(parent).or_default().push(task);
            }
        }

        Ok(roots
            .into_iter()
            .zip(scene_names)
            .map(|(task, scene_name)| {
                let mut node = build_node(task, &mut by_parent);
                node.scene_name = Some(scene_name);
                node
            })
            .collect())
    }

    async fn attach_after(&self, tasks: &mut [Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        let rows = {
            let mut conn = self.vault.conn().await?;
            sqlx::query(
                r#"
                SELECT source, target FROM tasks_relations
                WHERE target IN (SELECT value FROM json_each(?))
                ORDER BY source ASC
                "#,
            )
            .bind(serde_json::to_string(&ids)?)
            .fetch_all(&mut *conn)
            .await?
        };
        let mut sources: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for row in &rows {
            sources.entry(row.get("target")).or_default().push(row.get("source"));
        }
        for task in tasks {
            task.after = sources.remove(&task.id).unwrap_or_default();
        }
        Ok(())
    }
}

fn build_node(task: Task, by_parent: &mut HashMap<i64, Vec<Task>>) -> TaskNode {
    let children = by_parent
        .remove(&task.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| build_node(child, by_parent))
        .collect();
    TaskNode {
        task,
        scene_name: None,
        children,
    }
}

/// Absent data is stored as an empty object.
fn normalize_data(data: &Value) -> Value {
    match data {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}

fn check_page(page: TaskPage) -> Result<()> {
    if !(1..=MAX_PAGE_SIZE).contains(&page.limit) || page.offset < 0 {
        return Err(TaskError::bad_request(format!(
            "limit must be between 1 and {} and offset positive, got limit {} offset {}",
            MAX_PAGE_SIZE, page.limit, page.offset
        )));
    }
    Ok(())
}

fn parse_json(text: Option<String>) -> Result<Option<Value>> {
    Ok(match text {
        Some(text) => Some(serde_json::from_str(&text)?),
        None => None,
    })
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status: String = row.get("status");
    let status = TaskStatus::parse(&status)
        .ok_or_else(|| StoreError::internal(format!("Unknown task status {:?}", status)))?;
    Ok(Task {
        id: row.get("task_id"),
        scene_id: row.get("fk_scene_id"),
        user_id: row.get("fk_user_id"),
        parent: row.get("parent"),
        task_type: row.get("type"),
        data: serde_json::from_str(&row.get::<String, _>("data"))?,
        output: parse_json(row.get("output"))?,
        error: row.get("error"),
        aborted: row.get("aborted"),
        status,
        ctime: millis_to_datetime(row.get("ctime")),
        after: Vec::new(),
    })
}

fn row_to_log(row: &SqliteRow) -> Result<TaskLog> {
    let severity: String = row.get("severity");
    let severity = LogSeverity::parse(&severity)
        .ok_or_else(|| StoreError::internal(format!("Unknown log severity {:?}", severity)))?;
    Ok(TaskLog {
        id: row.get("log_id"),
        task_id: row.get("fk_task_id"),
        timestamp: millis_to_datetime(row.get("timestamp")),
        severity,
        message: row.get("message"),
    })
}
