//! Task outcomes and the machine-readable exception record.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{error_classes, not_registered_message};

/// Encoded handler failure: `{"class": ..., "args": [...], "str": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub class: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(rename = "str")]
    pub message: String,
}

impl ExceptionRecord {
    /// Single-argument record where `args == [message]`
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            class: class.into(),
            args: vec![Value::String(message.clone())],
            message,
        }
    }

    pub fn with_args(class: impl Into<String>, args: Vec<Value>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            args,
            message: message.into(),
        }
    }

    /// The terminal record written when no handler exists for `task_name`
    pub fn task_not_registered(task_name: &str) -> Self {
        Self::new(
            error_classes::TASK_NOT_REGISTERED,
            not_registered_message(task_name),
        )
    }

    pub fn is_task_not_registered(&self) -> bool {
        self.class == error_classes::TASK_NOT_REGISTERED
    }

    /// Wrap into the `{"exception": {...}}` result shape
    pub fn to_result_value(&self) -> Value {
        json!({ "exception": self })
    }

    /// Extract a record from a task result, if it has the exception shape
    pub fn from_result(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.len() != 1 {
            return None;
        }
        serde_json::from_value(object.get("exception")?.clone()).ok()
    }
}

impl std::fmt::Display for ExceptionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(Value),
    Failure(ExceptionRecord),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result_value(self) -> Value {
        match self {
            Self::Success(value) => value,
            Self::Failure(record) => record.to_result_value(),
        }
    }
}
