//! Dependency-ordered task scheduler.
//!
//! Tasks live in the vault's `tasks` table and form two independent graphs:
//! a parent/child ownership tree (deleting a parent deletes its subtree) and
//! a DAG of "after" edges (a task runs once every task it runs after has
//! succeeded, and fails without running if one of them failed).
//!
//! Handlers are registered by type name in a [`HandlerRegistry`] and run on
//! the tokio runtime by a [`TaskScheduler`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use scenevault_tasks::{CreateTask, HandlerRegistry, TaskScheduler};
//! use serde_json::json;
//!
//! let scheduler = TaskScheduler::new(vault, HandlerRegistry::with_control_handlers());
//! scheduler.start();
//!
//! let api = scheduler.api(scene_id, Some(user_id));
//! let a = api.create(CreateTask::new("delay", json!({"time": 10, "value": "a"}))).await?;
//! let b = api.create(CreateTask::new("delay", json!({"time": 10, "value": "b"}))).await?;
//! let group = api
//!     .group(json!({"first": "$[0]", "all": "$"}), |_| async move { Ok(vec![a.id, b.id]) })
//!     .await?;
//!
//! assert_eq!(scheduler.wait(group.id).await?, json!({"first": "a", "all": ["a", "b"]}));
//! ```

mod cancel;
mod context;
mod debounce;
mod error;
pub mod handlers;
mod queue;
mod registry;
mod scheduler;
mod shape;
mod types;

pub use cancel::CancellationToken;
pub use context::{TaskApi, TaskContext, TaskLogger};
pub use debounce::TakeOne;
pub use error::{Result, TaskError};
pub use queue::TaskQueue;
pub use registry::{HandlerRegistry, TaskHandler};
pub use scheduler::TaskScheduler;
pub use shape::map_shape;
pub use types::*;
