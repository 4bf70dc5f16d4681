use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default page size for task listings
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Lifecycle: `pending -> running -> {success | error}`.
///
/// `initializing` holds a task back from execution while its relations are
/// being attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Initializing,
    Pending,
    Running,
    Success,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Initializing => "initializing",
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(TaskStatus::Initializing),
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "success" => Some(TaskStatus::Success),
            "error" => Some(TaskStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub scene_id: i64,
    pub user_id: Option<i64>,
    pub parent: Option<i64>,
    #[serde(rename = "type")]
    pub task_type: String,
    pub data: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Ended in error because it was cancelled
    pub aborted: bool,
    pub status: TaskStatus,
    pub ctime: DateTime<Utc>,
    /// Tasks that must succeed before this one runs
    pub after: Vec<i64>,
}

/// Parameters for a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub parent: Option<i64>,
    #[serde(default)]
    pub after: Vec<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl CreateTask {
    pub fn new(task_type: impl Into<String>, data: Value) -> Self {
        Self {
            task_type: task_type.into(),
            data,
            parent: None,
            after: Vec::new(),
            user_id: None,
        }
    }

    pub fn parent(mut self, parent: i64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn after(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.after.extend(ids);
        self
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Debug => "debug",
            LogSeverity::Info => "info",
            LogSeverity::Warn => "warn",
            LogSeverity::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogSeverity::Debug),
            "info" => Some(LogSeverity::Info),
            "warn" => Some(LogSeverity::Warn),
            "error" => Some(LogSeverity::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskLog {
    pub id: i64,
    pub task_id: i64,
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    pub message: String,
}

/// A task with its descendants, as returned by the listing calls.
#[derive(Debug, Clone, Serialize)]
pub struct TaskNode {
    #[serde(flatten)]
    pub task: Task,
    /// Set on root nodes only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_name: Option<String>,
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    /// Number of tasks in this subtree, including the node itself.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(TaskNode::subtree_size).sum::<usize>()
    }
}

/// Pagination over root tasks.
#[derive(Debug, Clone, Copy)]
pub struct TaskPage {
    pub offset: i64,
    pub limit: i64,
}

impl Default for TaskPage {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
