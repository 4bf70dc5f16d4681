//! `scenevault task ...`
//!
//! Tasks only run while a scheduler is alive, so `task run` drives the
//! built-in handlers in-process until nothing is left to do.

use super::output::{format_time, print_json, print_table, Output};
use super::resolve_scene;
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use scenevault_store::Vault;
use scenevault_tasks::{CreateTask, HandlerRegistry, TaskNode, TaskPage, TaskScheduler};
use serde_json::{json, Value};

#[derive(Subcommand, Debug)]
pub enum TaskAction {
    /// Create a task and run it to completion
    Run {
        scene: String,
        /// Handler name, e.g. delay, forEach, reduce
        #[arg(value_name = "TYPE")]
        task_type: String,
        /// Task data as JSON
        #[arg(default_value = "{}")]
        data: String,
        #[arg(long)]
        user: Option<i64>,
    },

    /// Task trees, newest first within each scene
    List {
        #[arg(long)]
        scene: Option<String>,

        /// Only tasks created by this user
        #[arg(long)]
        user: Option<i64>,

        #[arg(long, default_value = "10")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Log lines of a task
    Logs {
        id: i64,
        #[arg(long, default_value = "100")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Delete a task and its subtree
    Rm { id: i64 },
}

pub async fn run(vault: &Vault, out: &Output, action: TaskAction) -> Result<()> {
    let scheduler = TaskScheduler::new(vault.clone(), HandlerRegistry::with_control_handlers());

    match action {
        TaskAction::Run {
            scene,
            task_type,
            data,
            user,
        } => {
            let scene = resolve_scene(vault, &scene).await?;
            let data: Value = serde_json::from_str(&data).context("Task data must be JSON")?;
            let mut params = CreateTask::new(task_type, data);
            if let Some(user) = user {
                params = params.user(user);
            }

            let task = scheduler.create(scene.id, params).await?;
            scheduler.run_until_idle().await?;

            let finished = scheduler.get_task(task.id).await?;
            if !finished.status.is_terminal() {
                bail!(
                    "Task #{} is still {}: it depends on tasks no handler can run",
                    task.id,
                    finished.status
                );
            }
            let output = scheduler.wait(task.id).await?;
            if out.is_json() {
                print_json(&json!({ "id": task.id, "output": output }))
            } else {
                eprintln!("Task #{} succeeded", task.id);
                print_json(&output)
            }
        }

        TaskAction::List {
            scene,
            user,
            limit,
            offset,
        } => {
            let page = TaskPage { offset, limit };
            let trees = match (scene, user) {
                (Some(scene), _) => {
                    let scene = resolve_scene(vault, &scene).await?;
                    scheduler.list_scene_tasks(scene.id, page).await?
                }
                (None, Some(user)) => scheduler.list_own_tasks(user, page).await?,
                (None, None) => scheduler.list_all_tasks(page).await?,
            };
            out.emit(&trees, || {
                for tree in &trees {
                    print_tree(tree, 0);
                }
            })
        }

        TaskAction::Logs { id, limit, offset } => {
            let logs = scheduler.task_logs(id, TaskPage { offset, limit }).await?;
            out.emit(&logs, || {
                let rows = logs
                    .iter()
                    .map(|log| {
                        vec![
                            format_time(&log.timestamp),
                            log.severity.as_str().to_string(),
                            log.message.clone(),
                        ]
                    })
                    .collect();
                print_table(&["TIME", "SEVERITY", "MESSAGE"], rows);
            })
        }

        TaskAction::Rm { id } => {
            let deleted = scheduler.delete_task(id).await?;
            out.emit(&json!({ "deleted": deleted }), || {
                if deleted {
                    println!("Deleted task #{}", id);
                } else {
                    println!("No task #{}", id);
                }
            })
        }
    }
}

fn print_tree(node: &TaskNode, depth: usize) {
    let task = &node.task;
    let scene = node
        .scene_name
        .as_deref()
        .map(|name| format!("  ({})", name))
        .unwrap_or_default();
    println!(
        "{}#{} {} [{}]{}",
        "  ".repeat(depth),
        task.id,
        task.task_type,
        task.status,
        scene
    );
    if let Some(error) = &task.error {
        println!("{}  error: {}", "  ".repeat(depth), error);
    }
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}
