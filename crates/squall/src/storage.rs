//! Storage manager: bucket resolution plus batched object uploads.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, future::ready};
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use squall_core::batch::{
    Batch, BatchSink, DispatchError, DispatchSummary, Dispatcher, partition,
};
use squall_core::config::BatchConfig;
use squall_core::destination::resolve_or_create;
use squall_core::error::{InvalidUtf8Snafu, IoSnafu, StorageError};
use squall_core::storage::{
    BucketAdmin, BucketHandle, StorageProvider, StorageProviderRef, bucket_admin_for,
};

use crate::config::StorageConfig;

/// One object to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub key: String,
    pub bytes: Bytes,
}

impl StorageObject {
    pub fn new(key: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            bytes: bytes.into(),
        }
    }
}

/// Writes each batch entry as one object.
#[derive(Debug)]
struct ObjectSink {
    provider: StorageProviderRef,
    bucket: String,
}

#[async_trait]
impl BatchSink for ObjectSink {
    type Item = StorageObject;
    type Error = StorageError;

    fn target(&self) -> &str {
        &self.bucket
    }

    async fn submit(&self, batch: &Batch<StorageObject>) -> Result<(), StorageError> {
        for object in batch.items() {
            self.provider
                .put(&Path::from(object.key.as_str()), object.bytes.clone())
                .await?;
        }
        Ok(())
    }
}

/// Batch client for one bucket.
#[derive(Debug, Clone)]
pub struct StorageManager {
    bucket: BucketHandle,
    admin: Arc<dyn BucketAdmin>,
    provider: StorageProviderRef,
    dispatcher: Dispatcher,
}

impl StorageManager {
    /// Resolve `bucket`, creating it if it does not exist.
    pub async fn new(
        bucket: &str,
        admin: Arc<dyn BucketAdmin>,
        provider: StorageProviderRef,
        dispatcher: Dispatcher,
    ) -> Result<Self, StorageError> {
        let bucket = resolve_or_create(admin.as_ref(), bucket).await?;
        Ok(Self {
            bucket,
            admin,
            provider,
            dispatcher,
        })
    }

    /// The bucket is resolved before the object store is opened, so a local
    /// backend does not create the directory as a side effect of the lookup.
    pub async fn from_config(
        config: &StorageConfig,
        batch: &BatchConfig,
    ) -> Result<Self, StorageError> {
        let backend = config.backend_config();
        let admin = bucket_admin_for(&backend).await;
        let bucket = resolve_or_create(admin.as_ref(), &config.bucket).await?;
        let provider = Arc::new(StorageProvider::for_backend(backend).await?);

        info!(bucket = %bucket.name, url = %provider.canonical_url(), "Storage ready");

        Ok(Self {
            bucket,
            admin,
            provider,
            dispatcher: batch.dispatcher(),
        })
    }

    pub fn bucket(&self) -> &BucketHandle {
        &self.bucket
    }

    pub fn provider(&self) -> &StorageProviderRef {
        &self.provider
    }

    pub async fn upload(&self, key: &str, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        debug!(bucket = %self.bucket.name, key, "Uploading object");
        self.provider.put(&Path::from(key), bytes.into()).await
    }

    pub async fn upload_file(
        &self,
        path: impl AsRef<std::path::Path>,
        key: &str,
    ) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(path.as_ref()).await.context(IoSnafu)?;
        self.upload(key, bytes).await
    }

    /// Upload every object, one request per object, across the dispatcher.
    pub async fn upload_many(
        &self,
        objects: Vec<StorageObject>,
    ) -> Result<DispatchSummary, DispatchError<StorageError>> {
        info!(bucket = %self.bucket.name, objects = objects.len(), "Uploading objects");

        let sink = Arc::new(ObjectSink {
            provider: self.provider.clone(),
            bucket: self.bucket.name.clone(),
        });
        self.dispatcher.run(sink, partition(objects, 1)).await
    }

    pub async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        self.provider.get(&Path::from(key)).await
    }

    /// Read an object as UTF-8 text.
    pub async fn read_file(&self, key: &str) -> Result<String, StorageError> {
        let bytes = self.read(key).await?;
        String::from_utf8(bytes.to_vec()).context(InvalidUtf8Snafu { key })
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        debug!(bucket = %self.bucket.name, key, "Deleting object");
        self.provider.delete(&Path::from(key)).await
    }

    /// True if `key` is an object or a string prefix of at least one key.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        if self.provider.exists(&Path::from(key)).await? {
            return Ok(true);
        }
        let first = self.list_keys(key).boxed().try_next().await?;
        Ok(first.is_some())
    }

    /// Lazily list keys starting with `prefix`, in no particular order.
    ///
    /// `prefix` is matched as a plain string, so `rep` matches `report.csv`.
    /// The listing is issued for the enclosing directory and filtered.
    pub fn list_keys(&self, prefix: &str) -> impl Stream<Item = Result<String, StorageError>> + '_ {
        let parent = prefix.rsplit_once('/').map_or("", |(parent, _)| parent);
        let prefix = prefix.to_string();
        self.provider
            .list_with_prefix(parent)
            .map_ok(|path| path.to_string())
            .try_filter(move |key| ready(key.starts_with(&prefix)))
    }

    /// Collect keys under `prefix`, stopping after `max_files` when given.
    pub async fn list_all_files(
        &self,
        prefix: &str,
        max_files: Option<usize>,
    ) -> Result<Vec<String>, StorageError> {
        let keys = self.list_keys(prefix);
        match max_files {
            Some(max) => keys.take(max).try_collect().await,
            None => keys.try_collect().await,
        }
    }

    /// Buckets visible to the backend, most recently created first.
    pub async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        self.admin.list_buckets().await
    }
}
