/// Per-thread liveness and cancellation
pub mod thread_context;

/// Exclusive module locks
pub mod arbiter;

/// Service call results
pub mod service_result;

/// Service calls
pub mod service_call;

/// Service processes
pub mod service_process;

/// Context handed to executors
pub mod context;

/// Process manager and containment boundary
pub mod process_manager;

/// Bridge into tokio
pub mod async_runner;
