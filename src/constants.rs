//! # System Constants
//!
//! Backend discriminators, defaults, and error class names that define the
//! operational boundaries of the broker and worker pool.

/// Backend discriminator strings accepted by `Broker::create` and `Worker::create`
pub mod backends {
    /// In-memory reference implementation (queue and cache)
    pub const DUMMY: &str = "dummy";
    pub const MEMORY: &str = "memory";
    pub const IN_MEMORY: &str = "in_memory";

    /// One JSON document per key on the local filesystem (cache only)
    pub const FILE: &str = "file";

    /// Redis-backed queue or cache (requires the `redis-backend` feature)
    pub const REDIS: &str = "redis";

    /// True when the discriminator selects the in-memory reference backend
    pub fn is_in_memory(backend: &str) -> bool {
        matches!(backend, DUMMY | MEMORY | IN_MEMORY)
    }
}

/// Class names written into `{"exception": {"class": ...}}` task results
pub mod error_classes {
    /// No handler was registered for the task name on the consuming worker
    pub const TASK_NOT_REGISTERED: &str = "TaskNotRegistered";
    /// The handler panicked; the panic payload becomes the message
    pub const HANDLER_PANIC: &str = "HandlerPanic";
    /// The handler exceeded the worker's configured handler timeout
    pub const HANDLER_TIMEOUT: &str = "HandlerTimeout";
    /// Fallback class for errors that carry no more specific type name
    pub const GENERIC: &str = "Error";
    /// Handler arguments could not be decoded into the handler's input type
    pub const INVALID_ARGUMENTS: &str = "InvalidArguments";
}

/// Defaults used when a backend or worker option is omitted
pub mod defaults {
    /// Shared channel / map name for in-memory backends
    pub const IN_MEMORY_NAME: &str = "default";
    /// How long a consumed message stays invisible before redelivery
    pub const VISIBILITY_TIMEOUT_MS: u64 = 30_000;
    /// Poll interval for backends without blocking receive
    pub const POLL_INTERVAL_MS: u64 = 100;
    /// Key prefix for task records in the result cache
    pub const TASK_KEY_PREFIX: &str = "task:";
    /// Redis list/zset base name for the task queue
    pub const REDIS_QUEUE_NAME: &str = "tasker:tasks";
    /// Handlers executed concurrently per worker (1 = fully serialized)
    pub const MAX_CONCURRENT_HANDLERS: usize = 1;
    /// Delay before a message withheld under the requeue policy becomes visible again
    pub const REQUEUE_DELAY_MS: u64 = 1_000;
    /// Upper bound on waiting for in-flight deliveries during worker close
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
    /// First wait after a retryable receive error; doubles per consecutive error
    pub const RECEIVE_BACKOFF_MS: u64 = 100;
    /// Ceiling for the receive backoff
    pub const MAX_RECEIVE_BACKOFF_MS: u64 = 5_000;
    /// Poll interval used by `Broker::wait_for_task`
    pub const WAIT_POLL_INTERVAL_MS: u64 = 50;
}

/// Message written for a task whose name has no registered handler
pub fn not_registered_message(task_name: &str) -> String {
    format!("can not processed {task_name}, no handler...")
}
