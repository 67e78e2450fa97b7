//! # Task Model
//!
//! The unit of work and the unit of result. A task is created PENDING by the
//! broker and moved to DONE by exactly one worker write per delivery attempt.
//! Failures are DONE tasks whose result carries an exception record.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::outcome::{ExceptionRecord, TaskOutcome};
use crate::error::{BrokerError, BrokerResult};

/// Opaque task identifier, generated by the broker
///
/// Rendered as a hyphenated UUID v4 string; it is the sole lookup key into
/// the result cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<&TaskId> for TaskId {
    fn from(id: &TaskId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status. There is no RUNNING or FAILED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String-keyed structured arguments passed to a handler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskArgs(Map<String, Value>);

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build arguments from a JSON value, which must be an object
    pub fn from_json(value: Value) -> BrokerResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(BrokerError::InvalidArgs(format!(
                "task arguments must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Build arguments from any serializable struct or map
    pub fn from_serializable<T: Serialize>(value: &T) -> BrokerResult<Self> {
        Self::from_json(serde_json::to_value(value)?)
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the arguments into a handler's typed input
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for TaskArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for TaskArgs {
    type Error = BrokerError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A task record as stored in the result cache
///
/// Fields are private so that `done` always agrees with `status` and a result
/// exists only on DONE tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "TaskRecord", try_from = "TaskRecord")]
pub struct Task {
    id: TaskId,
    name: String,
    args: TaskArgs,
    status: TaskStatus,
    result: Option<Value>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A freshly created task awaiting its first worker write
    pub fn pending(id: TaskId, name: impl Into<String>, args: TaskArgs) -> Self {
        Self {
            id,
            name: name.into(),
            args,
            status: TaskStatus::Pending,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to DONE with the outcome of one delivery attempt
    ///
    /// Completing an already DONE task replaces its result (last writer wins
    /// under redelivery) but keeps it DONE.
    pub fn complete(mut self, outcome: TaskOutcome) -> Self {
        self.status = TaskStatus::Done;
        self.result = Some(outcome.into_result_value());
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &TaskArgs {
        &self.args
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// The handler's return value or the encoded exception; `None` while PENDING
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// The exception record when the task finished with an error
    pub fn exception(&self) -> Option<ExceptionRecord> {
        self.result.as_ref().and_then(ExceptionRecord::from_result)
    }

    pub fn is_failure(&self) -> bool {
        self.exception().is_some()
    }

    /// Decode a successful result into a concrete type
    pub fn result_as<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.result
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
    }
}

/// Wire shape: `{id, name, args, status, done, result, created_at, completed_at}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskRecord {
    id: TaskId,
    name: String,
    #[serde(default)]
    args: TaskArgs,
    status: TaskStatus,
    done: bool,
    #[serde(default)]
    result: Option<Value>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        Self {
            done: task.is_done(),
            id: task.id,
            name: task.name,
            args: task.args,
            status: task.status,
            result: task.result,
            created_at: task.created_at,
            completed_at: task.completed_at,
        }
    }
}

impl TryFrom<TaskRecord> for Task {
    type Error = String;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let is_done = record.status == TaskStatus::Done;
        if record.done != is_done {
            return Err(format!(
                "task {} has done={} but status {}",
                record.id, record.done, record.status
            ));
        }
        if !is_done && record.result.is_some() {
            return Err(format!("pending task {} carries a result", record.id));
        }
        Ok(Self {
            id: record.id,
            name: record.name,
            args: record.args,
            status: record.status,
            result: if is_done {
                Some(record.result.unwrap_or(Value::Null))
            } else {
                None
            },
            created_at: record.created_at,
            completed_at: record.completed_at,
        })
    }
}
