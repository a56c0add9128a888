//! Local filesystem queue service.
//!
//! Each queue is a directory under `root` and each message a file in it.
//! Messages are never hidden or removed: delete, purge and visibility
//! timeouts only log a warning.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

use squall_core::batch::Batch;
use squall_core::destination::Destination;
use squall_core::emit;
use squall_core::metrics::events::UnsupportedOperation;

use super::{QueueHandle, QueueService, RawMessage, ReceiptHandle};
use crate::error::QueueError;

const BACKEND: &str = "local";

/// File extension of stored messages.
const MESSAGE_EXTENSION: &str = "msg";

/// Queue service over plain directories.
#[derive(Debug)]
pub struct LocalQueueService {
    root: PathBuf,
    sequence: AtomicU64,
    unsupported: AtomicUsize,
}

impl LocalQueueService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: AtomicU64::new(0),
            unsupported: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of calls this backend ignored.
    pub fn unsupported_calls(&self) -> usize {
        self.unsupported.load(Ordering::Relaxed)
    }

    fn unsupported(&self, queue: &QueueHandle, operation: &'static str) {
        self.unsupported.fetch_add(1, Ordering::Relaxed);
        emit!(UnsupportedOperation {
            backend: BACKEND,
            operation,
        });
        warn!(
            queue = %queue.name,
            operation,
            "Operation not supported by the local queue backend, ignoring"
        );
    }

    fn queue_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn handle(&self, name: &str) -> QueueHandle {
        QueueHandle {
            name: name.to_string(),
            url: format!("file://{}", self.queue_dir(name).display()),
        }
    }

    /// Message file names sort in send order.
    fn message_name(&self, batch: usize, entry: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        format!("{timestamp}-{sequence:010}-{batch:06}-{entry}.{MESSAGE_EXTENSION}")
    }

    async fn message_files(&self, queue: &QueueHandle) -> Result<Vec<PathBuf>, QueueError> {
        let dir = self.queue_dir(&queue.name);
        let io_error = |source| QueueError::LocalIo {
            path: dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == MESSAGE_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Destination for LocalQueueService {
    type Handle = QueueHandle;
    type Error = QueueError;

    fn kind(&self) -> &'static str {
        "queue"
    }

    async fn lookup(&self, name: &str) -> Result<QueueHandle, QueueError> {
        let dir = self.queue_dir(name);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(self.handle(name)),
            Ok(_) => Err(QueueError::QueueNotFound {
                queue: name.to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(QueueError::QueueNotFound {
                queue: name.to_string(),
            }),
            Err(source) => Err(QueueError::LocalIo { path: dir, source }),
        }
    }

    async fn create(&self, name: &str) -> Result<QueueHandle, QueueError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| QueueError::LocalIo {
                path: self.root.clone(),
                source,
            })?;

        let dir = self.queue_dir(name);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => Ok(self.handle(name)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(QueueError::QueueAlreadyOwned {
                queue: name.to_string(),
            }),
            Err(source) => Err(QueueError::LocalIo { path: dir, source }),
        }
    }
}

#[async_trait]
impl QueueService for LocalQueueService {
    async fn send_batch(
        &self,
        queue: &QueueHandle,
        batch: &Batch<String>,
    ) -> Result<(), QueueError> {
        let dir = self.queue_dir(&queue.name);
        for entry in &batch.entries {
            let path = dir.join(self.message_name(batch.id, &entry.id));
            tokio::fs::write(&path, entry.item.as_bytes())
                .await
                .map_err(|source| QueueError::LocalIo { path, source })?;
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max: usize,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>, QueueError> {
        if visibility_timeout.is_some() {
            self.unsupported(queue, "visibility_timeout");
        }

        let mut messages = Vec::new();
        for path in self.message_files(queue).await?.into_iter().take(max) {
            let body = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| QueueError::LocalIo {
                    path: path.clone(),
                    source,
                })?;
            let id = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            messages.push(RawMessage {
                receipt: ReceiptHandle::new(id.clone()),
                id,
                body,
            });
        }
        Ok(messages)
    }

    async fn delete(&self, queue: &QueueHandle, _receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.unsupported(queue, "delete");
        Ok(())
    }

    async fn purge(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        self.unsupported(queue, "purge");
        Ok(())
    }

    async fn approximate_size(&self, queue: &QueueHandle) -> Result<usize, QueueError> {
        Ok(self.message_files(queue).await?.len())
    }
}
