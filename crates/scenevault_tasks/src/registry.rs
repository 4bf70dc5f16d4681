//! Task handlers and their registration by type name.

use crate::cancel::CancellationToken;
use crate::context::TaskContext;
use crate::error::Result;
use crate::handlers::control;
use crate::types::Task;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A unit of work run for every task of one type.
///
/// The returned value becomes the task output; an error fails the task.
/// Long-running handlers must watch `cancel` at their suspension points.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task, cancel: &CancellationToken, ctx: &TaskContext) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in control-flow handlers.
    pub fn with_control_handlers() -> Self {
        let mut registry = Self::new();
        registry.register("delay", control::DelayHandler);
        registry.register("error", control::ErrorHandler);
        registry.register("group", control::GroupHandler);
        registry.register("forEach", control::ForEachHandler);
        registry.register("reduce", control::ReduceHandler);
        registry.register("afterReduce", control::AfterReduceHandler);
        registry.register("groupOutputs", control::GroupOutputsHandler);
        registry
    }

    /// Register `handler` for `task_type`, replacing any previous one.
    pub fn register<H>(&mut self, task_type: impl Into<String>, handler: H) -> &mut Self
    where
        H: TaskHandler + 'static,
    {
        self.handlers.insert(task_type.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_handlers_registered() {
        let registry = HandlerRegistry::with_control_handlers();
        for name in ["delay", "error", "group", "forEach", "reduce", "afterReduce", "groupOutputs"] {
            assert!(registry.contains(name), "{} missing", name);
        }
        assert!(!registry.contains("extractZip"));
        assert_eq!(registry.types().len(), 7);
    }
}
