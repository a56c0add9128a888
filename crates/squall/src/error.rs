//! Error types for the queue and storage managers.

use snafu::prelude::*;
use std::path::PathBuf;

use squall_core::batch::{DispatchError, Transient};
use squall_core::destination::Resolution;

// Re-export common errors
pub use squall_core::error::{ConfigError, StorageError};

/// Errors raised by queue services.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// The queue does not exist.
    #[snafu(display("Queue '{queue}' not found"))]
    QueueNotFound { queue: String },

    /// Creation found a queue of the same name owned by the caller.
    #[snafu(display("Queue '{queue}' already exists"))]
    QueueAlreadyOwned { queue: String },

    /// The queue service answered with something the client could not parse.
    #[snafu(display("Malformed response from {operation}: {message}"))]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },

    /// Any other queue service failure.
    #[snafu(display("{operation} failed: {message}"))]
    Request {
        operation: &'static str,
        message: String,
    },

    /// The service accepted the call but rejected some entries of the batch.
    #[snafu(display(
        "Batch {batch} rejected {failed} entries, first entry {entry}: {code} {message}"
    ))]
    EntriesRejected {
        batch: usize,
        failed: usize,
        entry: String,
        code: String,
        message: String,
    },

    /// A request entry could not be built.
    #[snafu(display("Invalid batch entry: {message}"))]
    InvalidEntry { message: String },

    /// IO error in the local queue backend.
    #[snafu(display("Local queue IO error at {}: {source}", path.display()))]
    LocalIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Transient for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, QueueError::MalformedResponse { .. })
    }
}

impl Resolution for QueueError {
    fn is_not_found(&self) -> bool {
        matches!(self, QueueError::QueueNotFound { .. })
    }

    fn is_already_owned(&self) -> bool {
        matches!(self, QueueError::QueueAlreadyOwned { .. })
    }
}

/// Top-level errors for the command line.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Queue error.
    #[snafu(display("Queue error: {source}"))]
    Queue { source: QueueError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// At least one message batch failed.
    #[snafu(display("Message upload failed: {source}"))]
    MessageUpload { source: DispatchError<QueueError> },

    /// At least one object upload failed.
    #[snafu(display("Object upload failed: {source}"))]
    ObjectUpload { source: DispatchError<StorageError> },

    /// Failed to read an input file.
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },
}
