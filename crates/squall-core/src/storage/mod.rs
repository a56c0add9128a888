//! Object storage abstraction.
//!
//! Provides a unified interface for working with S3 and the local
//! filesystem. Object reads and writes go through `object_store`; bucket
//! lookup and creation, which `object_store` does not cover, go through
//! [`BucketAdmin`].

mod local;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, future::ready, stream};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::destination::Destination;
use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

pub use local::{LocalBucketAdmin, LocalConfig};
pub use s3::{S3BucketAdmin, S3Config};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Bucket the backend is bound to.
    pub fn bucket(&self) -> &str {
        match self {
            BackendConfig::S3(config) => &config.bucket,
            BackendConfig::Local(config) => &config.bucket,
        }
    }

    /// Optional sub-path prefix applied to every key.
    pub fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(config) => config.key.as_ref(),
            BackendConfig::Local(config) => config.key.as_ref(),
        }
    }
}

/// Resolved reference to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHandle {
    pub name: String,
    /// Where the bucket lives (region or directory).
    pub location: String,
}

/// Bucket administration: lookup, creation and listing.
#[async_trait]
pub trait BucketAdmin:
    Destination<Handle = BucketHandle, Error = StorageError> + std::fmt::Debug
{
    /// Bucket names, most recently created first.
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError>;
}

/// Create the bucket administrator matching a backend.
pub async fn bucket_admin_for(config: &BackendConfig) -> Arc<dyn BucketAdmin> {
    match config {
        BackendConfig::S3(config) => Arc::new(S3BucketAdmin::from_config(config).await),
        BackendConfig::Local(config) => Arc::new(LocalBucketAdmin::new(&config.root)),
    }
}

/// Storage provider that abstracts over different storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

fn record<T, E>(operation: StorageOperation, start: Instant, result: &Result<T, E>) {
    emit!(StorageRequest {
        operation,
        status: RequestStatus::of(result),
    });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

impl StorageProvider {
    /// Create a storage provider for the given backend.
    pub async fn for_backend(config: BackendConfig) -> Result<Self, StorageError> {
        match config {
            BackendConfig::S3(config) => Self::construct_s3(config).await,
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Wrap an existing object store, e.g. `object_store::memory::InMemory`.
    pub fn with_store(
        config: BackendConfig,
        object_store: Arc<dyn ObjectStore>,
        canonical_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            object_store,
            canonical_url: canonical_url.into(),
        }
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(path)).await {
            Ok(object) => object.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, start, &result);

        result.context(ObjectStoreSnafu)
    }

    /// Put bytes to a path.
    pub async fn put(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .put(&self.qualify_path(path), PutPayload::from(bytes))
            .await;
        record(StorageOperation::Put, start, &result);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete an object at the given path.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(&self.qualify_path(path)).await;
        record(StorageOperation::Delete, start, &result);

        result.context(ObjectStoreSnafu)
    }

    /// Check whether an object exists.
    pub async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(&self.qualify_path(path)).await;
        record(StorageOperation::Head, start, &result);

        match result {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }

    /// List objects under a prefix (relative to the configured key prefix).
    ///
    /// The stream is lazy and unordered. Returned paths are relative to the
    /// configured key prefix, matching what `get`/`put`/`delete` expect. The
    /// request is recorded once, with the status of the first page: an error
    /// if the listing fails, otherwise success (including an empty listing).
    pub fn list_with_prefix(
        &self,
        prefix: &str,
    ) -> impl Stream<Item = Result<Path, StorageError>> + '_ {
        let full_prefix: Path = match self.config.key() {
            Some(key) => key.parts().chain(Path::from(prefix).parts()).collect(),
            None => Path::from(prefix),
        };
        let full_prefix = (full_prefix.parts().count() > 0).then_some(full_prefix);

        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let recorded = Arc::new(AtomicBool::new(false));
        let on_first = Arc::clone(&recorded);

        let listing = self.object_store.list(full_prefix.as_ref()).map(move |meta| {
            if !on_first.swap(true, Ordering::Relaxed) {
                emit!(StorageRequest {
                    operation: StorageOperation::List,
                    status: RequestStatus::of(&meta),
                });
            }
            meta.map(|metadata| metadata.location.parts().skip(key_part_count).collect())
                .context(ObjectStoreSnafu)
        });

        // Nothing was listed: the request still succeeded.
        let on_empty = stream::once(async move {
            if !recorded.swap(true, Ordering::Relaxed) {
                emit!(StorageRequest {
                    operation: StorageOperation::List,
                    status: RequestStatus::Success,
                });
            }
            None::<Result<Path, StorageError>>
        })
        .filter_map(ready);

        listing
            .chain(on_empty)
            .filter(|result| ready(!matches!(result, Ok(path) if is_temporary(path))))
    }
}

/// In-progress local writes are staged under a `#` suffix and must not be listed.
fn is_temporary(path: &Path) -> bool {
    path.filename().is_some_and(|name| name.contains('#'))
}
