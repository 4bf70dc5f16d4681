//! Task execution.
//!
//! A scheduling pass fails tasks whose dependencies failed, then claims and
//! spawns every runnable task. Passes are coalesced through [`TakeOne`]:
//! creating tasks and finishing them only request a pass.
//!
//! Status changes are broadcast through a watch counter so `wait()` can
//! re-read the task it is interested in.

use crate::cancel::CancellationToken;
use crate::context::{TaskApi, TaskContext};
use crate::debounce::TakeOne;
use crate::error::{Result, TaskError};
use crate::queue::TaskQueue;
use crate::registry::HandlerRegistry;
use crate::types::*;
use scenevault_store::{StoreError, Vault};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Handle to the task scheduler. Cloning is cheap.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    queue: TaskQueue,
    registry: HandlerRegistry,
    /// Registered types, as passed to the claim query
    types: Vec<String>,
    /// Tasks whose handler has been claimed and whose result is not yet
    /// recorded
    running: Mutex<HashMap<i64, CancellationToken>>,
    /// Held from claiming a task until its token is in `running`
    claiming: tokio::sync::Mutex<()>,
    status: watch::Sender<u64>,
    wake: TakeOne,
    started: AtomicBool,
}

impl TaskScheduler {
    /// Create a stopped scheduler. Nothing runs before [`start`] or
    /// [`run_until_idle`].
    ///
    /// [`start`]: TaskScheduler::start
    /// [`run_until_idle`]: TaskScheduler::run_until_idle
    pub fn new(vault: Vault, registry: HandlerRegistry) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let wake = TakeOne::new(move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        TaskScheduler { inner }.pass().await;
                    }
                }
            });
            let (status, _) = watch::channel(0);
            Inner {
                queue: TaskQueue::new(vault),
                types: registry.types(),
                registry,
                running: Mutex::new(HashMap::new()),
                claiming: tokio::sync::Mutex::new(()),
                status,
                wake,
                started: AtomicBool::new(false),
            }
        });
        Self { inner }
    }

    pub fn vault(&self) -> &Vault {
        self.inner.queue.vault()
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Task API for a caller outside any task.
    pub fn api(&self, scene_id: i64, user_id: Option<i64>) -> TaskApi {
        TaskApi::root(self.clone(), scene_id, user_id)
    }

    /// Queue a new task. Fails with `UnknownType` if no handler is registered
    /// for its type.
    pub async fn create(&self, scene_id: i64, params: CreateTask) -> Result<Task> {
        let task = self.create_with_status(scene_id, params, TaskStatus::Pending).await?;
        self.wake();
        Ok(task)
    }

    pub(crate) async fn create_with_status(
        &self,
        scene_id: i64,
        params: CreateTask,
        status: TaskStatus,
    ) -> Result<Task> {
        if !self.inner.registry.contains(&params.task_type) {
            return Err(TaskError::UnknownType(params.task_type));
        }
        if let Some(parent) = params.parent {
            let parent = self.inner.queue.get_task(parent).await?;
            if parent.scene_id != scene_id {
                return Err(TaskError::bad_request(format!(
                    "Task #{} belongs to scene {}, not {}",
                    parent.id, parent.scene_id, scene_id
                )));
            }
        }
        self.inner.queue.create(scene_id, &params, status).await
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Task> {
        self.inner.queue.get_task(task_id).await
    }

    /// Wait for a task to reach a terminal state and return its output.
    ///
    /// Only returns once the task has been run, so the scheduler must be
    /// started.
    pub async fn wait(&self, task_id: i64) -> Result<Value> {
        self.wait_cancellable(task_id, None).await
    }

    /// Like [`wait`](TaskScheduler::wait), giving up with `Aborted` on behalf
    /// of `waiter` once `cancel` fires.
    pub(crate) async fn wait_cancellable(
        &self,
        task_id: i64,
        cancel: Option<(&CancellationToken, i64)>,
    ) -> Result<Value> {
        let mut status = self.inner.status.subscribe();
        loop {
            status.borrow_and_update();
            let task = self.inner.queue.get_task(task_id).await?;
            match task.status {
                TaskStatus::Success => return Ok(task.output.unwrap_or(Value::Null)),
                TaskStatus::Error => return Err(self.task_error(&task).await?),
                _ => {}
            }

            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(StoreError::internal("Task scheduler shut down").into());
                    }
                }
                waiter = cancelled(cancel) => {
                    return Err(TaskError::Aborted { task_id: waiter });
                }
            }
        }
    }

    /// Error describing how a failed task ended.
    async fn task_error(&self, task: &Task) -> Result<TaskError> {
        if task.aborted {
            return Ok(TaskError::Aborted { task_id: task.id });
        }
        let message = match &task.error {
            Some(message) => message.clone(),
            None => self
                .inner
                .queue
                .last_error(task.id)
                .await?
                .unwrap_or_else(|| "Unknown error".to_string()),
        };
        Ok(TaskError::Failed {
            task_id: task.id,
            message,
        })
    }

    /// Cancel a task and its descendants.
    ///
    /// Running tasks get their token cancelled; tasks that have not started
    /// are marked aborted right away. Returns false if nothing was left to
    /// cancel.
    pub async fn cancel(&self, task_id: i64) -> Result<bool> {
        self.inner.queue.get_task(task_id).await?;
        let claiming = self.inner.claiming.lock().await;
        let active = self.inner.queue.active_subtree(task_id).await?;
        if active.is_empty() {
            return Ok(false);
        }
        for id in active {
            let token = self.running().get(&id).cloned();
            match token {
                Some(token) => token.cancel(),
                // not claimed yet
                None => {
                    let message = TaskError::Aborted { task_id: id }.to_string();
                    self.inner.queue.fail(id, &message, true).await?;
                }
            }
        }
        drop(claiming);
        info!(task_id, "Task cancelled");
        self.notify_status();
        self.wake();
        Ok(true)
    }

    /// Delete a task and its subtree, cancelling whatever of it is running.
    ///
    /// Returns false if the task did not exist.
    pub async fn delete_task(&self, task_id: i64) -> Result<bool> {
        for id in self.inner.queue.active_subtree(task_id).await? {
            let token = self.running().get(&id).cloned();
            if let Some(token) = token {
                token.cancel();
            }
        }
        let deleted = self.inner.queue.delete(task_id).await?;
        if deleted {
            info!(task_id, "Task deleted");
            self.notify_status();
        }
        Ok(deleted)
    }

    /// Root tasks created by a user, with their descendants.
    pub async fn list_own_tasks(&self, user_id: i64, page: TaskPage) -> Result<Vec<TaskNode>> {
        self.inner.queue.list_trees(Some(user_id), None, page).await
    }

    pub async fn list_scene_tasks(&self, scene_id: i64, page: TaskPage) -> Result<Vec<TaskNode>> {
        self.inner.queue.list_trees(None, Some(scene_id), page).await
    }

    pub async fn list_all_tasks(&self, page: TaskPage) -> Result<Vec<TaskNode>> {
        self.inner.queue.list_trees(None, None, page).await
    }

    pub async fn task_logs(&self, task_id: i64, page: TaskPage) -> Result<Vec<TaskLog>> {
        self.inner.queue.task_logs(task_id, page).await
    }

    pub async fn append_task_log(&self, task_id: i64, severity: LogSeverity, message: &str) -> Result<()> {
        self.inner.queue.append_log(task_id, severity, message).await
    }

    /// Start executing tasks.
    pub fn start(&self) {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            info!(types = ?self.inner.types, "Task scheduler started");
        }
        self.wake();
    }

    /// Stop claiming tasks and cancel the running ones.
    pub fn stop(&self) {
        self.inner.started.store(false, Ordering::SeqCst);
        let running = self.running();
        for token in running.values() {
            token.cancel();
        }
        info!(cancelled = running.len(), "Task scheduler stopped");
    }

    /// Start, then return once no task is running and none can be claimed.
    ///
    /// Pending tasks of unregistered types, or waiting on tasks that never
    /// finish, are left pending.
    pub async fn run_until_idle(&self) -> Result<()> {
        self.inner.started.store(true, Ordering::SeqCst);
        loop {
            let mut status = self.inner.status.subscribe();
            status.borrow_and_update();
            self.inner.wake.call().await;

            let idle = {
                let _claiming = self.inner.claiming.lock().await;
                let nothing_running = self.running().is_empty();
                nothing_running && !self.inner.queue.has_runnable(&self.inner.types).await?
            };
            if idle {
                debug!("Task scheduler idle");
                return Ok(());
            }
            if self.running().is_empty() {
                continue;
            }
            if status.changed().await.is_err() {
                return Err(StoreError::internal("Task scheduler shut down").into());
            }
        }
    }

    /// True while the handler of `task_id` is executing in this process.
    pub fn is_running(&self, task_id: i64) -> bool {
        self.running().contains_key(&task_id)
    }

    /// Request a scheduling pass.
    pub(crate) fn wake(&self) {
        self.inner.wake.trigger();
    }

    pub(crate) fn notify_status(&self) {
        self.inner.status.send_modify(|n| *n = n.wrapping_add(1));
    }

    fn running(&self) -> MutexGuard<'_, HashMap<i64, CancellationToken>> {
        match self.inner.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn pass(&self) {
        if !self.inner.started.load(Ordering::SeqCst) {
            return;
        }

        match self.inner.queue.fail_blocked().await {
            Ok(0) => {}
            Ok(failed) => {
                debug!(failed, "Failed tasks blocked by failed dependencies");
                self.notify_status();
            }
            Err(e) => error!(error = %e, "Failed to propagate dependency failures"),
        }

        while self.inner.started.load(Ordering::SeqCst) {
            let _claiming = self.inner.claiming.lock().await;
            match self.inner.queue.claim(&self.inner.types).await {
                Ok(Some(task)) => self.spawn_task(task),
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to claim task");
                    break;
                }
            }
        }
    }

    fn spawn_task(&self, task: Task) {
        let token = CancellationToken::new();
        self.running().insert(task.id, token.clone());
        let this = self.clone();
        tokio::spawn(async move { this.run_task(task, token).await });
    }

    async fn run_task(self, task: Task, token: CancellationToken) {
        let task_id = task.id;
        let outcome = self.execute(&task, &token).await;

        let recorded = match outcome {
            Ok(output) => {
                info!(task_id, task_type = %task.task_type, "Task succeeded");
                self.inner.queue.complete(task_id, &output).await
            }
            Err(err) => {
                let aborted = token.is_cancelled();
                if aborted {
                    warn!(task_id, task_type = %task.task_type, "Task aborted");
                } else {
                    warn!(task_id, task_type = %task.task_type, error = %err, "Task failed");
                }
                self.inner.queue.fail(task_id, &err.to_string(), aborted).await
            }
        };
        match recorded {
            Ok(true) => {}
            Ok(false) => debug!(task_id, "Task finished after leaving the running state"),
            Err(e) => error!(task_id, error = %e, "Failed to record task result"),
        }

        // only once the result is in the database
        self.running().remove(&task_id);
        self.notify_status();
        self.wake();
    }

    async fn execute(&self, task: &Task, token: &CancellationToken) -> Result<Value> {
        let handler = self
            .inner
            .registry
            .get(&task.task_type)
            .ok_or_else(|| TaskError::UnknownType(task.task_type.clone()))?;
        let inputs = self.inner.queue.inputs(task.id).await?;
        let ctx = TaskContext::new(self.clone(), task, token.clone(), inputs);

        let task = task.clone();
        let token = token.clone();
        // spawned so a panicking handler fails its task instead of the pass
        let joined = tokio::spawn(async move { handler.handle(&task, &token, &ctx).await }).await;
        match joined {
            Ok(result) => result,
            Err(e) => Err(TaskError::handler(format!("Handler panicked: {}", e))),
        }
    }
}

/// Resolves with the waiter id once its token fires; never without a token.
async fn cancelled(cancel: Option<(&CancellationToken, i64)>) -> i64 {
    match cancel {
        Some((token, waiter)) => {
            token.cancelled().await;
            waiter
        }
        None => std::future::pending().await,
    }
}
