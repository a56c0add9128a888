//! Integration tests for squall

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use squall::QueueError;
use squall::queue::{
    LocalQueueService, Payload, QueueHandle, QueueManager, QueueService, RawMessage,
    ReceiptHandle,
};
use squall_core::batch::{Batch, Dispatcher, RetryPolicy};
use squall_core::destination::Destination;

/// In-process stand-in for a remote queue.
#[derive(Debug, Default)]
struct FakeQueueService {
    queues: Mutex<HashMap<String, Vec<String>>>,
    creates: AtomicUsize,
    /// Batch id -> remaining transient failures.
    flaky: Mutex<HashMap<usize, usize>>,
    /// (batch id, batch size) per successful send, in completion order.
    sent: Mutex<Vec<(usize, usize)>>,
    attempts: AtomicUsize,
}

impl FakeQueueService {
    fn flaky(batch: usize, failures: usize) -> Self {
        let service = Self::default();
        service.flaky.lock().unwrap().insert(batch, failures);
        service
    }

    fn sent(&self) -> Vec<(usize, usize)> {
        self.sent.lock().unwrap().clone()
    }
}

fn handle(name: &str) -> QueueHandle {
    QueueHandle {
        name: name.to_string(),
        url: format!("fake://{name}"),
    }
}

#[async_trait]
impl Destination for FakeQueueService {
    type Handle = QueueHandle;
    type Error = QueueError;

    fn kind(&self) -> &'static str {
        "queue"
    }

    async fn lookup(&self, name: &str) -> Result<QueueHandle, QueueError> {
        if self.queues.lock().unwrap().contains_key(name) {
            Ok(handle(name))
        } else {
            Err(QueueError::QueueNotFound {
                queue: name.to_string(),
            })
        }
    }

    async fn create(&self, name: &str) -> Result<QueueHandle, QueueError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.queues
            .lock()
            .unwrap()
            .insert(name.to_string(), Vec::new());
        Ok(handle(name))
    }
}

#[async_trait]
impl QueueService for FakeQueueService {
    async fn send_batch(
        &self,
        queue: &QueueHandle,
        batch: &Batch<String>,
    ) -> Result<(), QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(&batch.id)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(QueueError::MalformedResponse {
                    operation: "send_batch",
                    message: "truncated response".to_string(),
                });
            }
        }

        self.sent.lock().unwrap().push((batch.id, batch.len()));
        self.queues
            .lock()
            .unwrap()
            .entry(queue.name.clone())
            .or_default()
            .extend(batch.items().cloned());
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max: usize,
        _visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let queues = self.queues.lock().unwrap();
        let bodies = queues.get(&queue.name).cloned().unwrap_or_default();
        Ok(bodies
            .into_iter()
            .enumerate()
            .take(max)
            .map(|(i, body)| RawMessage {
                id: i.to_string(),
                body,
                receipt: ReceiptHandle::new(format!("receipt-{i}")),
            })
            .collect())
    }

    async fn delete(&self, queue: &QueueHandle, receipt: ReceiptHandle) -> Result<(), QueueError> {
        let index: usize = receipt
            .as_str()
            .trim_start_matches("receipt-")
            .parse()
            .unwrap();
        self.queues
            .lock()
            .unwrap()
            .entry(queue.name.clone())
            .or_default()
            .remove(index);
        Ok(())
    }

    async fn purge(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        self.queues
            .lock()
            .unwrap()
            .insert(queue.name.clone(), Vec::new());
        Ok(())
    }

    async fn approximate_size(&self, queue: &QueueHandle) -> Result<usize, QueueError> {
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get(&queue.name)
            .map(Vec::len)
            .unwrap_or_default())
    }
}

fn single_worker() -> Dispatcher {
    Dispatcher::new(1, RetryPolicy::new(3, Duration::from_secs(5))).with_progress(false)
}

fn texts(count: usize) -> Vec<Payload> {
    (0..count).map(|i| Payload::from(format!("message {i}"))).collect()
}

mod queue_tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_25_messages_on_single_worker() {
        let service = Arc::new(FakeQueueService::default());
        let manager = QueueManager::new("jobs", service.clone(), single_worker())
            .await
            .unwrap();

        let summary = manager.upload(texts(25)).await.unwrap();

        assert_eq!(service.sent(), vec![(0, 10), (1, 10), (2, 5)]);
        assert_eq!(summary.batches(), 3);
        assert_eq!(summary.items(), 25);
        assert_eq!(manager.size().await.unwrap(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_batch_recovers_after_two_delays() {
        let service = Arc::new(FakeQueueService::flaky(1, 2));
        let manager = QueueManager::new("jobs", service.clone(), single_worker())
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        let summary = manager.upload(texts(25)).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(service.attempts.load(Ordering::SeqCst), 5);
        assert_eq!(summary.attempts(), 5);
        assert_eq!(service.sent(), vec![(0, 10), (1, 10), (2, 5)]);
        assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(15), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_batch_fails_upload() {
        let service = Arc::new(FakeQueueService::flaky(0, 5));
        let manager = QueueManager::new("jobs", service.clone(), single_worker())
            .await
            .unwrap();

        let err = manager.upload(texts(12)).await.unwrap_err();

        let first = err.first().unwrap();
        assert_eq!(first.batch(), 0);
        assert!(matches!(
            first.error(),
            Some(QueueError::MalformedResponse { .. })
        ));
        // Batch 1 was already submitted and stays submitted.
        assert_eq!(err.completed.len(), 1);
        assert_eq!(service.sent(), vec![(1, 2)]);
    }

    #[tokio::test]
    async fn test_missing_queue_is_created_once() {
        let service = Arc::new(FakeQueueService::default());

        let first = QueueManager::new("orders", service.clone(), single_worker())
            .await
            .unwrap();
        let second = QueueManager::new("orders", service.clone(), single_worker())
            .await
            .unwrap();

        assert_eq!(service.creates.load(Ordering::SeqCst), 1);
        assert_eq!(first.url(), "fake://orders");
        assert_eq!(second.handle(), first.handle());
    }

    #[tokio::test]
    async fn test_records_round_trip_through_queue() {
        let service = Arc::new(FakeQueueService::default());
        let manager = QueueManager::new("jobs", service, single_worker())
            .await
            .unwrap();

        manager
            .upload(vec![
                Payload::from(json!({"id": 1})),
                Payload::from("plain"),
            ])
            .await
            .unwrap();

        let messages = manager.receive(10).await.unwrap();
        assert_eq!(messages[0].payload, Payload::Record(json!({"id": 1})));
        assert_eq!(messages[1].payload, Payload::Text("plain".to_string()));

        let next = manager.next().await.unwrap().unwrap();
        manager.delete(next).await.unwrap();
        assert_eq!(manager.size().await.unwrap(), 1);

        manager.purge().await.unwrap();
        assert!(manager.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_delete_and_purge_only_warn() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(LocalQueueService::new(temp_dir.path()));
        let manager = QueueManager::new("jobs", service.clone(), single_worker())
            .await
            .unwrap()
            .with_visibility_timeout(Some(Duration::from_secs(30)));

        manager.upload(texts(3)).await.unwrap();
        assert_eq!(manager.size().await.unwrap(), 3);

        let message = manager.next().await.unwrap().unwrap();
        assert_eq!(message.payload, Payload::Text("message 0".to_string()));
        manager.delete(message).await.unwrap();
        manager.purge().await.unwrap();

        // One ignored visibility timeout, one delete, one purge.
        assert_eq!(service.unsupported_calls(), 3);
        assert_eq!(manager.size().await.unwrap(), 3);
    }
}

mod storage_tests {
    use bytes::Bytes;
    use futures::TryStreamExt;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    use squall::config::{StorageBackend, StorageConfig};
    use squall::{StorageManager, StorageObject};
    use squall_core::{BatchConfig, JobFailure};
    use squall_core::storage::{
        BackendConfig, LocalBucketAdmin, LocalConfig, StorageProvider,
    };

    fn local_config(root: &std::path::Path, prefix: Option<&str>) -> StorageConfig {
        StorageConfig {
            bucket: "reports".to_string(),
            prefix: prefix.map(String::from),
            backend: StorageBackend::Local {
                root: root.to_path_buf(),
            },
        }
    }

    fn batch_config() -> BatchConfig {
        BatchConfig {
            parallelism: Some(2),
            progress: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_local_storage_manager_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let manager = StorageManager::from_config(
            &local_config(temp_dir.path(), Some("daily")),
            &batch_config(),
        )
        .await
        .unwrap();
        assert_eq!(manager.bucket().name, "reports");

        let objects = vec![
            StorageObject::new("a.txt", "alpha"),
            StorageObject::new("b.txt", "beta"),
            StorageObject::new("nested/c.txt", "gamma"),
        ];
        let summary = manager.upload_many(objects).await.unwrap();
        assert_eq!(summary.batches(), 3);

        let on_disk = temp_dir.path().join("reports").join("daily").join("a.txt");
        assert_eq!(std::fs::read_to_string(on_disk).unwrap(), "alpha");

        assert_eq!(manager.read_file("nested/c.txt").await.unwrap(), "gamma");
        assert!(manager.exists("b.txt").await.unwrap());
        assert!(manager.exists("nested").await.unwrap());
        assert!(!manager.exists("missing.txt").await.unwrap());

        let mut keys = manager.list_all_files("", None).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a.txt", "b.txt", "nested/c.txt"]);
        assert_eq!(manager.list_all_files("", Some(2)).await.unwrap().len(), 2);

        manager.delete("a.txt").await.unwrap();
        assert!(!manager.exists("a.txt").await.unwrap());

        assert_eq!(manager.list_buckets().await.unwrap(), vec!["reports"]);
    }

    #[tokio::test]
    async fn test_upload_file_and_stream_keys() {
        let temp_dir = TempDir::new().unwrap();
        let manager = StorageManager::from_config(&local_config(temp_dir.path(), None), &batch_config())
            .await
            .unwrap();

        let input = temp_dir.path().join("input.json");
        std::fs::write(&input, br#"{"ok":true}"#).unwrap();
        manager.upload_file(&input, "docs/input.json").await.unwrap();

        let keys: Vec<String> = manager.list_keys("docs").try_collect().await.unwrap();
        assert_eq!(keys, vec!["docs/input.json"]);
        assert_eq!(
            manager.read("docs/input.json").await.unwrap(),
            Bytes::from_static(br#"{"ok":true}"#)
        );
    }

    #[tokio::test]
    async fn test_exists_matches_partial_key_segment() {
        let temp_dir = TempDir::new().unwrap();
        let manager = StorageManager::from_config(&local_config(temp_dir.path(), None), &batch_config())
            .await
            .unwrap();
        manager.upload("report.csv", "a,b").await.unwrap();
        manager.upload("logs/2024-01.txt", "jan").await.unwrap();

        assert!(manager.exists("rep").await.unwrap());
        assert!(manager.exists("report.csv").await.unwrap());
        assert!(!manager.exists("rez").await.unwrap());
        assert!(manager.exists("logs/2024").await.unwrap());
        assert!(!manager.exists("logs/2025").await.unwrap());

        let keys: Vec<String> = manager.list_keys("logs/20").try_collect().await.unwrap();
        assert_eq!(keys, vec!["logs/2024-01.txt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_store_error_is_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let batch = BatchConfig {
            max_retries: 3,
            retry_delay_secs: 5.0,
            ..batch_config()
        };
        let manager = StorageManager::from_config(&local_config(temp_dir.path(), None), &batch)
            .await
            .unwrap();

        // "a" is a file, so nothing can be written below it.
        manager.upload("a", "x").await.unwrap();

        let start = tokio::time::Instant::now();
        let err = manager
            .upload_many(vec![StorageObject::new("a/b", "x")])
            .await
            .unwrap_err();

        match err.first() {
            Some(JobFailure::Failed { batch: 0, source }) => {
                assert!(!source.is_exhausted());
                assert_eq!(source.attempts(), 1);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let config = BackendConfig::Local(LocalConfig {
            root: temp_dir.path().display().to_string(),
            bucket: "bin".to_string(),
            key: None,
        });
        let provider = Arc::new(StorageProvider::with_store(
            config,
            Arc::new(InMemory::new()),
            "memory://bin",
        ));
        let admin = Arc::new(LocalBucketAdmin::new(temp_dir.path()));
        let manager = StorageManager::new("bin", admin, provider.clone(), Default::default())
            .await
            .unwrap();

        provider
            .put(&Path::from("blob"), Bytes::from_static(&[0xff, 0xfe]))
            .await
            .unwrap();

        let err = manager.read_file("blob").await.unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
        // The bucket directory was created by resolution.
        assert!(temp_dir.path().join("bin").is_dir());
    }
}

mod config_tests {
    use squall::Config;
    use squall::config::QueueBackend;
    use std::io::Write;

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
batch:
  parallelism: 2
queue:
  name: jobs
  backend:
    type: local
    root: /tmp/squall-queues
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.batch.parallelism(), 2);
        assert_eq!(config.batch.max_retries, 3);
        let queue = config.queue().unwrap();
        assert!(matches!(queue.backend, QueueBackend::Local { .. }));
        assert!(config.storage.is_none());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Config::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
