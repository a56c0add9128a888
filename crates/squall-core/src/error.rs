//! Common error types shared between the batching engine and the managers.
//!
//! This module defines error types for storage, bucket administration and
//! configuration. Queue errors live in the `squall` crate next to the
//! queue services that produce them.

use snafu::prelude::*;

use crate::batch::Transient;
use crate::destination::Resolution;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// The bucket does not exist.
    #[snafu(display("Bucket '{bucket}' not found"))]
    BucketNotFound { bucket: String },

    /// The bucket already exists and belongs to the caller.
    #[snafu(display("Bucket '{bucket}' already owned by you"))]
    BucketAlreadyOwned { bucket: String },

    /// The bucket service answered with something the client could not parse.
    #[snafu(display("Malformed response from {operation}: {message}"))]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },

    /// Any other bucket service failure.
    #[snafu(display("{operation} failed: {message}"))]
    BucketRequest {
        operation: &'static str,
        message: String,
    },

    /// Object contents were not valid UTF-8.
    #[snafu(display("Object '{key}' is not valid UTF-8"))]
    InvalidUtf8 {
        key: String,
        source: std::string::FromUtf8Error,
    },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            StorageError::BucketNotFound { .. } => true,
            _ => false,
        }
    }
}

impl Transient for StorageError {
    /// Only responses the client could not parse are retried. `object_store`
    /// errors are final: remote stores retry internally before surfacing them.
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::MalformedResponse { .. })
    }
}

impl Resolution for StorageError {
    fn is_not_found(&self) -> bool {
        StorageError::is_not_found(self)
    }

    fn is_already_owned(&self) -> bool {
        matches!(self, StorageError::BucketAlreadyOwned { .. })
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// The retry budget must allow at least one attempt.
    #[snafu(display("batch.max_retries must be at least 1"))]
    ZeroRetries,

    /// The worker pool needs at least one worker.
    #[snafu(display("batch.parallelism must be at least 1"))]
    ZeroParallelism,

    /// Queue name is empty.
    #[snafu(display("queue.name cannot be empty"))]
    EmptyQueueName,

    /// The retry delay is negative or not a number.
    #[snafu(display("batch.retry_delay_secs must be a non-negative number, got {value}"))]
    InvalidRetryDelay { value: f64 },

    /// Bucket name is empty.
    #[snafu(display("storage.bucket cannot be empty"))]
    EmptyBucketName,

    /// A command needs a section the configuration does not have.
    #[snafu(display("Configuration has no '{section}' section"))]
    MissingSection { section: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(message: &str) -> object_store::Error {
        object_store::Error::Generic {
            store: "LocalFileSystem",
            source: message.to_string().into(),
        }
    }

    #[test]
    fn test_object_store_errors_are_fatal() {
        let io = StorageError::ObjectStore {
            source: generic("Not a directory (os error 20)"),
        };
        let missing = StorageError::ObjectStore {
            source: object_store::Error::NotFound {
                path: "a".to_string(),
                source: "gone".into(),
            },
        };

        assert!(!io.is_transient());
        assert!(!missing.is_transient());
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_malformed_response_is_transient() {
        let err = StorageError::MalformedResponse {
            operation: "list_buckets",
            message: "unexpected end of XML".to_string(),
        };
        assert!(err.is_transient());
        assert!(!err.is_not_found());
    }
}
