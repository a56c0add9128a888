//! Local filesystem storage backend implementation.
//!
//! A bucket is a directory under `root`; objects are files inside it.

use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use snafu::prelude::*;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::destination::Destination;
use crate::error::{
    BucketAlreadyOwnedSnafu, BucketNotFoundSnafu, IoSnafu, ObjectStoreSnafu, StorageError,
};

use super::{BackendConfig, BucketAdmin, BucketHandle, StorageProvider};

/// Local filesystem configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// Directory holding one subdirectory per bucket.
    pub root: String,
    pub bucket: String,
    pub key: Option<Path>,
}

impl LocalConfig {
    pub fn bucket_dir(&self) -> PathBuf {
        PathBuf::from(&self.root).join(&self.bucket)
    }
}

impl StorageProvider {
    pub(super) async fn construct_local(config: LocalConfig) -> Result<Self, StorageError> {
        let bucket_dir = config.bucket_dir();
        tokio::fs::create_dir_all(&bucket_dir)
            .await
            .context(IoSnafu)?;

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(&bucket_dir).context(ObjectStoreSnafu)?);

        let canonical_url = format!("file://{}", bucket_dir.display());

        Ok(Self {
            config: BackendConfig::Local(config),
            object_store,
            canonical_url,
        })
    }
}

/// Bucket administration over plain directories.
#[derive(Debug, Clone)]
pub struct LocalBucketAdmin {
    root: PathBuf,
}

impl LocalBucketAdmin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn handle(&self, name: &str) -> BucketHandle {
        BucketHandle {
            name: name.to_string(),
            location: self.root.join(name).display().to_string(),
        }
    }
}

#[async_trait]
impl Destination for LocalBucketAdmin {
    type Handle = BucketHandle;
    type Error = StorageError;

    fn kind(&self) -> &'static str {
        "bucket"
    }

    async fn lookup(&self, name: &str) -> Result<BucketHandle, StorageError> {
        match tokio::fs::metadata(self.root.join(name)).await {
            Ok(meta) if meta.is_dir() => Ok(self.handle(name)),
            Ok(_) => BucketNotFoundSnafu { bucket: name }.fail(),
            Err(e) if e.kind() == ErrorKind::NotFound => BucketNotFoundSnafu { bucket: name }.fail(),
            Err(source) => Err(StorageError::Io { source }),
        }
    }

    async fn create(&self, name: &str) -> Result<BucketHandle, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .context(IoSnafu)?;

        match tokio::fs::create_dir(self.root.join(name)).await {
            Ok(()) => Ok(self.handle(name)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                BucketAlreadyOwnedSnafu { bucket: name }.fail()
            }
            Err(source) => Err(StorageError::Io { source }),
        }
    }
}

#[async_trait]
impl BucketAdmin for LocalBucketAdmin {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::Io { source }),
        };

        let mut buckets: Vec<(SystemTime, String)> = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu)? {
            let meta = entry.metadata().await.context(IoSnafu)?;
            if !meta.is_dir() {
                continue;
            }
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            buckets.push((created, entry.file_name().to_string_lossy().into_owned()));
        }

        // Newest first; ties broken by name for a stable listing.
        buckets.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(buckets.into_iter().map(|(_, name)| name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::resolve_or_create;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_bucket_is_created() {
        let temp_dir = TempDir::new().unwrap();
        let admin = LocalBucketAdmin::new(temp_dir.path().join("buckets"));

        let err = admin.lookup("photos").await.unwrap_err();
        assert!(err.is_not_found());

        let handle = resolve_or_create(&admin, "photos").await.unwrap();
        assert_eq!(handle.name, "photos");
        assert!(temp_dir.path().join("buckets").join("photos").is_dir());
    }

    #[tokio::test]
    async fn test_create_existing_reports_already_owned() {
        let temp_dir = TempDir::new().unwrap();
        let admin = LocalBucketAdmin::new(temp_dir.path());

        admin.create("photos").await.unwrap();
        let err = admin.create("photos").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketAlreadyOwned { .. }));
    }

    #[tokio::test]
    async fn test_list_buckets_skips_files() {
        let temp_dir = TempDir::new().unwrap();
        let admin = LocalBucketAdmin::new(temp_dir.path());

        admin.create("a").await.unwrap();
        admin.create("b").await.unwrap();
        std::fs::write(temp_dir.path().join("stray.txt"), b"x").unwrap();

        let mut names = admin.list_buckets().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_buckets_without_root() {
        let temp_dir = TempDir::new().unwrap();
        let admin = LocalBucketAdmin::new(temp_dir.path().join("nothing-here"));

        assert!(admin.list_buckets().await.unwrap().is_empty());
    }
}
