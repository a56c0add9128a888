//! Concurrent batch upload engine.
//!
//! - `partition` - splits items into fixed-size batches with correlation ids
//! - `retry` - bounded retry keyed on transient errors
//! - `dispatch` - sequential or pooled execution of batch jobs
//! - `progress` - completion counter

mod dispatch;
mod partition;
mod progress;
mod retry;

pub use dispatch::{
    BatchSink, DispatchError, DispatchSummary, Dispatcher, Job, JobFailure, JobReport,
    default_parallelism,
};
pub use partition::{Batch, BatchEntry, partition};
pub use progress::Progress;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, Retried, RetryError, RetryOutcome, RetryPolicy,
    Transient, retry, retry_with,
};
