//! Bounded async task runner with deterministic shutdown.
//!
//! # Features
//! - Fixed number of workers, unbounded run queue
//! - Three-state lifecycle: accepting, draining, stopped
//! - Graceful shutdown with a grace period, then cooperative cancellation
//! - Per-task failure and panic containment
//! - Metrics snapshots and periodic monitoring

pub mod aggregate;
pub mod config;
pub mod errors;
pub mod handle;
pub mod logging;
pub mod model;
pub mod pair;
pub mod pool;

pub use config::Config;
pub use errors::{ConfigError, SubmitError, TaskError};
pub use handle::{CancelSignal, TaskHandle};
pub use model::{RunnerMetrics, RunnerState, ShutdownOutcome, ShutdownReport, TaskId, TaskOutcome};
pub use pool::BoundedTaskRunner;
