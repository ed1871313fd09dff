//! Download and build scheduling for remote resources.
//!
//! # Invariants
//! - A key is in the loading set from its first request until its build
//!   completes or fails; requests in between join as waiters.
//! - Worker threads only see owned inputs and return owned outputs; results
//!   surface on the caller's thread when it drains.
//! - No stage ever has more than its configured number of tasks in flight.

mod error;
mod pipeline;
mod pool;
mod queue;
mod scheduler;

pub use error::SchedError;
pub use pipeline::{
    Completion, LoadRequest, PipelineConfig, PipelineStats, RequestOutcome, ResourcePipeline,
};
pub use pool::{WorkerPool, default_worker_count};
pub use queue::{LoadQueue, QueueItem, size_factor_for};
pub use scheduler::{Stage, StageConfig};
