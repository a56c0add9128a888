//! Internal events for squall metrics emission.
//!
//! Each event struct represents a measurable occurrence in a batch upload or
//! a single storage or queue request. Events implement the `InternalEvent`
//! trait which records the corresponding metric.
//!
//! ## Target Labels
//!
//! Batch metrics carry a `target` label naming the queue or bucket.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Batch events
// ============================================================================

/// Event emitted when a batch has been accepted by its destination.
pub struct BatchSubmitted {
    pub items: usize,
    pub target: String,
}

impl InternalEvent for BatchSubmitted {
    fn emit(self) {
        trace!(items = self.items, target = %self.target, "Batch submitted");
        counter!("squall_batches_submitted_total", "target" => self.target.clone()).increment(1);
        counter!("squall_items_submitted_total", "target" => self.target)
            .increment(self.items as u64);
    }
}

/// Event emitted each time a batch is retried after a transient error.
pub struct BatchRetried {
    pub target: String,
}

impl InternalEvent for BatchRetried {
    fn emit(self) {
        trace!(target = %self.target, "Batch retried");
        counter!("squall_batch_retries_total", "target" => self.target).increment(1);
    }
}

/// Why a batch ended without being submitted.
#[derive(Debug, Clone, Copy)]
pub enum BatchFailureKind {
    Fatal,
    Exhausted,
    Panicked,
}

impl BatchFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchFailureKind::Fatal => "fatal",
            BatchFailureKind::Exhausted => "exhausted",
            BatchFailureKind::Panicked => "panicked",
        }
    }
}

/// Event emitted when a batch reaches a failed terminal outcome.
pub struct BatchFailed {
    pub kind: BatchFailureKind,
    pub target: String,
}

impl InternalEvent for BatchFailed {
    fn emit(self) {
        trace!(kind = self.kind.as_str(), target = %self.target, "Batch failed");
        counter!(
            "squall_batches_failed_total",
            "kind" => self.kind.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Gauge of completed batches in the current dispatch.
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub target: String,
}

impl InternalEvent for BatchProgress {
    fn emit(self) {
        trace!(
            completed = self.completed,
            total = self.total,
            target = %self.target,
            "Batch progress"
        );
        gauge!("squall_batches_completed", "target" => self.target.clone())
            .set(self.completed as f64);
        gauge!("squall_batches_total", "target" => self.target).set(self.total as f64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
    Head,
    List,
    HeadBucket,
    CreateBucket,
    ListBuckets,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
            StorageOperation::Head => "head",
            StorageOperation::List => "list",
            StorageOperation::HeadBucket => "head_bucket",
            StorageOperation::CreateBucket => "create_bucket",
            StorageOperation::ListBuckets => "list_buckets",
        }
    }
}

/// Status of a storage or queue request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "squall_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "squall_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Queue operation events
// ============================================================================

/// Queue operation types.
#[derive(Debug, Clone, Copy)]
pub enum QueueOperation {
    GetQueueUrl,
    CreateQueue,
    SendBatch,
    Receive,
    Delete,
    Purge,
    Attributes,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::GetQueueUrl => "get_queue_url",
            QueueOperation::CreateQueue => "create_queue",
            QueueOperation::SendBatch => "send_batch",
            QueueOperation::Receive => "receive",
            QueueOperation::Delete => "delete",
            QueueOperation::Purge => "purge",
            QueueOperation::Attributes => "attributes",
        }
    }
}

/// Event emitted when a queue request completes.
pub struct QueueRequest {
    pub operation: QueueOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for QueueRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Queue request"
        );
        counter!(
            "squall_queue_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "squall_queue_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a backend is asked for something it cannot do.
pub struct UnsupportedOperation {
    pub backend: &'static str,
    pub operation: &'static str,
}

impl InternalEvent for UnsupportedOperation {
    fn emit(self) {
        trace!(
            backend = self.backend,
            operation = self.operation,
            "Unsupported operation"
        );
        counter!(
            "squall_unsupported_operations_total",
            "backend" => self.backend,
            "operation" => self.operation
        )
        .increment(1);
    }
}
