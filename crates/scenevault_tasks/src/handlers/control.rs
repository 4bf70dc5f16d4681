//! Control-flow handlers: timing, grouping and fan-out/fan-in of child tasks.

use super::parse_data;
use crate::cancel::CancellationToken;
use crate::context::TaskContext;
use crate::error::{Result, TaskError};
use crate::registry::TaskHandler;
use crate::shape::map_shape;
use crate::types::{CreateTask, Task};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// A child task to create.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub data: Value,
}

impl TaskSpec {
    fn into_create(self) -> CreateTask {
        CreateTask::new(self.task_type, self.data)
    }
}

/// Sleep for `duration`, or fail with `Aborted` if cancelled first.
async fn sleep_cancellable(task: &Task, cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(TaskError::Aborted { task_id: task.id }),
    }
}

#[derive(Debug, Deserialize)]
struct DelayData {
    /// Milliseconds
    #[serde(default)]
    time: u64,
    #[serde(default)]
    value: Value,
}

/// `{time, value?}`: wait, then output `value`.
pub struct DelayHandler;

#[async_trait]
impl TaskHandler for DelayHandler {
    async fn handle(&self, task: &Task, cancel: &CancellationToken, _ctx: &TaskContext) -> Result<Value> {
        let data: DelayData = parse_data(task)?;
        sleep_cancellable(task, cancel, Duration::from_millis(data.time)).await?;
        Ok(data.value)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
    /// Milliseconds to wait before failing
    #[serde(default)]
    timeout: Option<u64>,
}

/// `{message, timeout?}`: always fails with `message`.
pub struct ErrorHandler;

#[async_trait]
impl TaskHandler for ErrorHandler {
    async fn handle(&self, task: &Task, cancel: &CancellationToken, _ctx: &TaskContext) -> Result<Value> {
        let data: ErrorData = parse_data(task)?;
        if let Some(timeout) = data.timeout {
            sleep_cancellable(task, cancel, Duration::from_millis(timeout)).await?;
        }
        Err(TaskError::handler(
            data.message.unwrap_or_else(|| "Error task".to_string()),
        ))
    }
}

/// Parent placeholder for tasks grouped under it.
pub struct GroupHandler;

#[async_trait]
impl TaskHandler for GroupHandler {
    async fn handle(&self, _task: &Task, _cancel: &CancellationToken, _ctx: &TaskContext) -> Result<Value> {
        Ok(Value::Null)
    }
}

#[derive(Debug, Deserialize)]
struct ForEachData {
    children: Vec<TaskSpec>,
}

/// `{children: [{type, data}]}`: run every child, fail if any fails.
pub struct ForEachHandler;

#[async_trait]
impl TaskHandler for ForEachHandler {
    async fn handle(&self, task: &Task, _cancel: &CancellationToken, ctx: &TaskContext) -> Result<Value> {
        let data: ForEachData = parse_data(task)?;
        let mut children = Vec::with_capacity(data.children.len());
        for spec in data.children {
            children.push(ctx.tasks().create(spec.into_create()).await?.id);
        }
        ctx.logger()
            .debug(format!("Waiting for {} children", children.len()))
            .await;
        for child in children {
            ctx.tasks().wait(child).await?;
        }
        Ok(Value::Null)
    }
}

#[derive(Debug, Deserialize)]
struct ReduceData {
    tasks: Vec<TaskSpec>,
}

/// `{tasks: [{type, data}]}`: schedule children and an `afterReduce` task
/// collecting their outputs. Outputs the id of the `afterReduce` task.
///
/// The children run after this task succeeds, so it never waits on them.
pub struct ReduceHandler;

#[async_trait]
impl TaskHandler for ReduceHandler {
    async fn handle(&self, task: &Task, _cancel: &CancellationToken, ctx: &TaskContext) -> Result<Value> {
        let data: ReduceData = parse_data(task)?;
        let mut children = Vec::with_capacity(data.tasks.len());
        for spec in data.tasks {
            let child = ctx
                .tasks()
                .create(spec.into_create().after([task.id]))
                .await?;
            children.push(child.id);
        }
        let collector = ctx
            .tasks()
            .create(CreateTask::new("afterReduce", json!({ "tasks": children })).after(children.clone()))
            .await?;
        ctx.logger()
            .info(format!("Reducing {} tasks into #{}", children.len(), collector.id))
            .await;
        Ok(json!(collector.id))
    }
}

#[derive(Debug, Deserialize)]
struct AfterReduceData {
    tasks: Vec<i64>,
}

/// `{tasks: [id]}`: outputs of the listed tasks, in order.
pub struct AfterReduceHandler;

#[async_trait]
impl TaskHandler for AfterReduceHandler {
    async fn handle(&self, task: &Task, _cancel: &CancellationToken, ctx: &TaskContext) -> Result<Value> {
        let data: AfterReduceData = parse_data(task)?;
        let mut outputs = Vec::with_capacity(data.tasks.len());
        for id in data.tasks {
            outputs.push(ctx.tasks().wait(id).await?);
        }
        Ok(Value::Array(outputs))
    }
}

/// Shapes the outputs of the tasks it runs after with its data.
///
/// Null or empty data outputs the plain list.
pub struct GroupOutputsHandler;

#[async_trait]
impl TaskHandler for GroupOutputsHandler {
    async fn handle(&self, task: &Task, _cancel: &CancellationToken, ctx: &TaskContext) -> Result<Value> {
        let plain = match &task.data {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if plain {
            return Ok(Value::Array(ctx.inputs().to_vec()));
        }
        map_shape(&task.data, ctx.inputs())
    }
}
