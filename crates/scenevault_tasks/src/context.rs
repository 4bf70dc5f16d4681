//! What a handler sees of the world while it runs.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::scheduler::TaskScheduler;
use crate::types::*;
use scenevault_store::Vault;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, error, info, warn};

/// Collaborators handed to a running handler.
pub struct TaskContext {
    vault: Vault,
    tasks: TaskApi,
    logger: TaskLogger,
    inputs: Vec<Value>,
}

impl TaskContext {
    pub(crate) fn new(scheduler: TaskScheduler, task: &Task, cancel: CancellationToken, inputs: Vec<Value>) -> Self {
        Self {
            vault: scheduler.vault().clone(),
            logger: TaskLogger {
                queue: scheduler.queue().clone(),
                task_id: task.id,
            },
            tasks: TaskApi {
                scheduler,
                task_id: Some(task.id),
                scene_id: task.scene_id,
                user_id: task.user_id,
                cancel,
            },
            inputs,
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Task API bound to the running task.
    pub fn tasks(&self) -> &TaskApi {
        &self.tasks
    }

    pub fn logger(&self) -> &TaskLogger {
        &self.logger
    }

    /// Outputs of the tasks this one runs after, ordered by task id.
    pub fn inputs(&self) -> &[Value] {
        &self.inputs
    }
}

/// Nested task API.
///
/// Tasks created through it belong to the same scene and user as the task
/// (or caller) it is bound to, and become its children.
#[derive(Clone)]
pub struct TaskApi {
    scheduler: TaskScheduler,
    task_id: Option<i64>,
    scene_id: i64,
    user_id: Option<i64>,
    cancel: CancellationToken,
}

impl TaskApi {
    /// API for callers outside any task: created tasks are roots.
    pub(crate) fn root(scheduler: TaskScheduler, scene_id: i64, user_id: Option<i64>) -> Self {
        Self {
            scheduler,
            task_id: None,
            scene_id,
            user_id,
            cancel: CancellationToken::new(),
        }
    }

    pub fn task_id(&self) -> Option<i64> {
        self.task_id
    }

    pub fn scene_id(&self) -> i64 {
        self.scene_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn create(&self, params: CreateTask) -> Result<Task> {
        self.scheduler.create(self.scene_id, self.bind(params)).await
    }

    /// Wait for a task to finish and return its output.
    ///
    /// Fails with the task's error, or with `Aborted` if this API's own task
    /// is cancelled meanwhile.
    pub async fn wait(&self, task_id: i64) -> Result<Value> {
        let waiter = self.task_id.unwrap_or(task_id);
        self.scheduler
            .wait_cancellable(task_id, Some((&self.cancel, waiter)))
            .await
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Task> {
        self.scheduler.get_task(task_id).await
    }

    /// Create a `groupOutputs` task collecting the outputs of the tasks
    /// `work` creates.
    ///
    /// The group task stays out of the queue until `work` returns the ids of
    /// its members. Its output is `shape` mapped over their outputs, or the
    /// plain list of outputs when `shape` is null or empty.
    pub async fn group<F, Fut>(&self, shape: Value, work: F) -> Result<Task>
    where
        F: FnOnce(TaskApi) -> Fut,
        Fut: Future<Output = Result<Vec<i64>>>,
    {
        let group = self
            .scheduler
            .create_with_status(
                self.scene_id,
                self.bind(CreateTask::new("groupOutputs", shape)),
                TaskStatus::Initializing,
            )
            .await?;
        let queue = self.scheduler.queue();

        let attached: Result<()> = async {
            for member in work(self.clone()).await? {
                queue.add_relation(member, group.id).await?;
            }
            queue.release(group.id).await
        }
        .await;

        if let Err(e) = attached {
            queue.fail(group.id, &e.to_string(), false).await?;
            self.scheduler.notify_status();
            return Err(e);
        }
        self.scheduler.wake();
        self.scheduler.get_task(group.id).await
    }

    fn bind(&self, mut params: CreateTask) -> CreateTask {
        if params.parent.is_none() {
            params.parent = self.task_id;
        }
        if params.user_id.is_none() {
            params.user_id = self.user_id;
        }
        params
    }
}

/// Per-task log, persisted and mirrored to tracing.
#[derive(Clone)]
pub struct TaskLogger {
    queue: TaskQueue,
    task_id: i64,
}

impl TaskLogger {
    pub async fn debug(&self, message: impl AsRef<str>) {
        self.log(LogSeverity::Debug, message.as_ref()).await
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        self.log(LogSeverity::Info, message.as_ref()).await
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        self.log(LogSeverity::Warn, message.as_ref()).await
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        self.log(LogSeverity::Error, message.as_ref()).await
    }

    /// Log failures are reported to tracing and otherwise ignored.
    pub async fn log(&self, severity: LogSeverity, message: &str) {
        let task_id = self.task_id;
        match severity {
            LogSeverity::Debug => debug!(task_id, "{}", message),
            LogSeverity::Info => info!(task_id, "{}", message),
            LogSeverity::Warn => warn!(task_id, "{}", message),
            LogSeverity::Error => error!(task_id, "{}", message),
        }
        if let Err(e) = self.queue.append_log(task_id, severity, message).await {
            warn!(task_id, error = %e, "Failed to persist task log");
        }
    }
}

impl std::fmt::Debug for TaskApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskApi")
            .field("task_id", &self.task_id)
            .field("scene_id", &self.scene_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}
