//! # Task Handler Traits
//!
//! The execution contract for task handlers, the error type handlers fail
//! with, and adapters that turn plain closures into handlers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tasker_broker::registry::{FnHandler, HandlerError, TaskHandler};
//!
//! struct Addition;
//!
//! #[async_trait::async_trait]
//! impl TaskHandler for Addition {
//!     async fn call(&self, args: TaskArgs) -> Result<Value, HandlerError> {
//!         let input: AddArgs = args.parse()?;
//!         Ok(json!(input.x + input.y))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "addition"
//!     }
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::constants::error_classes;
use crate::models::{ExceptionRecord, TaskArgs};

/// Task handler execution trait
///
/// ## Error Handling
///
/// Returning `Err` never stops the worker: the error is encoded into the
/// task's result as an exception record. Panics are caught by the worker and
/// encoded the same way with class `HandlerPanic`.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute the handler with the task's arguments
    async fn call(&self, args: TaskArgs) -> Result<Value, HandlerError>;

    /// Default registration name
    fn name(&self) -> &str;
}

/// A handler failure, encoded into the task result as
/// `{"exception": {"class": ..., "args": [...], "str": ...}}`
///
/// Any `std::error::Error` converts into a `HandlerError` whose class is the
/// error type's short name, so `?` works inside handlers. `anyhow::Error`
/// converts through [`HandlerError::from_anyhow`].
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    pub class: String,
    pub args: Vec<Value>,
    pub message: String,
}

impl HandlerError {
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

    /// Generic failure with class `Error`
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(error_classes::GENERIC, message)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(error_classes::INVALID_ARGUMENTS, message)
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(error_classes::HANDLER_PANIC, message)
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            error_classes::HANDLER_TIMEOUT,
            format!("handler did not finish within {timeout_ms}ms"),
        )
    }

    /// Convert an `anyhow::Error`, keeping the full context chain in the message
    ///
    /// A `HandlerError` wrapped in the anyhow error is recovered as-is.
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        match error.downcast::<HandlerErrorWrapper>() {
            Ok(wrapper) => wrapper.0,
            Err(error) => Self::new(error_classes::GENERIC, format!("{error:#}")),
        }
    }

    /// Wrap into an `anyhow::Error` that `from_anyhow` can recover
    pub fn into_anyhow(self) -> anyhow::Error {
        anyhow::Error::new(HandlerErrorWrapper(self))
    }

    pub fn into_exception_record(self) -> ExceptionRecord {
        ExceptionRecord::with_args(self.class, self.args, self.message)
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(short_type_name::<E>(), error.to_string())
    }
}

impl From<HandlerError> for ExceptionRecord {
    fn from(error: HandlerError) -> Self {
        error.into_exception_record()
    }
}

/// Carries a `HandlerError` through `anyhow`, which requires `std::error::Error`
#[derive(Debug)]
struct HandlerErrorWrapper(HandlerError);

impl std::fmt::Display for HandlerErrorWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for HandlerErrorWrapper {}

/// `core::num::error::ParseIntError` -> `ParseIntError`
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, args: TaskArgs) -> Result<Value, HandlerError> {
        (self.func)(args).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handler backed by a synchronous closure, run on the blocking thread pool
///
/// Use for CPU-bound or blocking work so it does not stall the runtime.
pub struct BlockingFnHandler<F> {
    name: String,
    func: Arc<F>,
}

impl<F> BlockingFnHandler<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl<F> std::fmt::Debug for BlockingFnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingFnHandler")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> TaskHandler for BlockingFnHandler<F>
where
    F: Fn(TaskArgs) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    async fn call(&self, args: TaskArgs) -> Result<Value, HandlerError> {
        let func = Arc::clone(&self.func);
        match tokio::task::spawn_blocking(move || func(args)).await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => Err(HandlerError::panic(panic_message(
                join_error.into_panic().as_ref(),
            ))),
            Err(join_error) => Err(HandlerError::msg(format!(
                "blocking handler was cancelled: {join_error}"
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
