//! # Handler Registry
//!
//! Per-worker mapping from task name to handler. Each `Worker` owns exactly
//! one registry; it is never shared across workers and there is no global
//! instance. A lookup miss is an ordinary outcome, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::handler::TaskHandler;

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.registered_handlers())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the handler's own name
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let name = handler.name().to_string();
        self.register_as(name, handler);
    }

    /// Register under an explicit task name; the last registration wins
    pub fn register_as(&mut self, task_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_name = task_name.into();
        let handler_name = handler.name().to_string();
        if self.handlers.insert(task_name.clone(), handler).is_some() {
            debug!(task_name = %task_name, handler = %handler_name, "Replaced task handler");
        } else {
            info!(task_name = %task_name, handler = %handler_name, "Registered task handler");
        }
    }

    /// Resolve the handler for a task name
    pub fn get(&self, task_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_name).cloned()
    }

    pub fn handler_available(&self, task_name: &str) -> bool {
        self.handlers.contains_key(task_name)
    }

    /// Registered task names, sorted
    pub fn registered_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
