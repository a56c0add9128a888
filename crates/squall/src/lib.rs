//! squall: batch clients for a message queue and blob storage.
//!
//! This crate provides:
//! - A queue manager over Amazon SQS or a local directory
//! - A storage manager over S3 or a local directory
//! - YAML configuration and the `squall` command line
//!
//! Batching, retries and dispatch come from `squall-core`.

pub mod cli;
pub mod config;
pub mod error;
pub mod queue;
pub mod storage;

// Re-export commonly used items
pub use cli::{CliArgs, run};
pub use config::Config;
pub use error::{AppError, QueueError};
pub use queue::{Message, Payload, QueueManager, QueueService};
pub use storage::{StorageManager, StorageObject};

pub use squall_core::{Dispatcher, RetryPolicy, init_tracing};
