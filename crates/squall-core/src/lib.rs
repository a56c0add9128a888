//! squall-core: the batching engine shared by the queue and storage managers.
//!
//! - `batch/` - partitioning, retrying, dispatching and progress reporting
//! - `destination` - resolve a named queue or bucket, creating it when missing
//! - `storage/` - object storage abstraction (S3, local filesystem)
//! - `metrics/` - internal events recorded through the `metrics` facade
//! - `config/` - batch configuration
//! - `error` - common error types

pub mod batch;
pub mod config;
pub mod destination;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use batch::{
    Batch, BatchEntry, BatchSink, DispatchError, DispatchSummary, Dispatcher, JobFailure,
    RetryPolicy, Transient, partition,
};
pub use config::BatchConfig;
pub use destination::{Destination, Resolution, resolve_or_create};
pub use error::{ConfigError, StorageError};
pub use storage::{
    BackendConfig, BucketAdmin, BucketHandle, StorageProvider, StorageProviderRef,
    bucket_admin_for,
};
pub use crate::tracing::init_tracing;
