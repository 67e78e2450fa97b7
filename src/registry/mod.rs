//! # Handler Registry
//!
//! Task handlers and the per-worker registry that resolves them by name.
//!
//! ## Architecture
//!
//! ```text
//! Worker ──owns──> HandlerRegistry ──task name──> Arc<dyn TaskHandler>
//!                                                   ├─ user type implementing TaskHandler
//!                                                   ├─ FnHandler (async closure)
//!                                                   └─ BlockingFnHandler (sync closure)
//! ```

pub mod handler;
pub mod handler_registry;

pub use handler::{BlockingFnHandler, FnHandler, HandlerError, TaskHandler};
pub use handler_registry::HandlerRegistry;
