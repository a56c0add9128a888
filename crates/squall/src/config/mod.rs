//! Configuration for the queue and storage managers.

use object_store::path::Path as ObjectPath;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
pub use squall_core::config::BatchConfig;
use squall_core::storage::{BackendConfig, LocalConfig, S3Config};

/// Where queue messages live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum QueueBackend {
    /// Amazon SQS (or a compatible endpoint).
    Sqs {
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
    /// One directory per queue under `root`.
    Local { root: PathBuf },
}

/// Configuration for the queue manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Queue name; created when it does not exist.
    pub name: String,
    /// Seconds a received message stays hidden from other consumers.
    #[serde(default)]
    pub visibility_timeout_secs: Option<u64>,
    pub backend: QueueBackend,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Option<Duration> {
        self.visibility_timeout_secs.map(Duration::from_secs)
    }
}

/// Where objects live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum StorageBackend {
    S3 {
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
    /// One directory per bucket under `root`.
    Local { root: PathBuf },
}

/// Configuration for the storage manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Bucket name; created when it does not exist.
    pub bucket: String,
    /// Optional sub-path every key is placed under.
    #[serde(default)]
    pub prefix: Option<String>,
    pub backend: StorageBackend,
}

impl StorageConfig {
    /// Translate into the storage provider's backend configuration.
    pub fn backend_config(&self) -> BackendConfig {
        let key = self
            .prefix
            .as_deref()
            .map(ObjectPath::from)
            .filter(|key| key.parts().count() > 0);

        match &self.backend {
            StorageBackend::S3 { region, endpoint } => BackendConfig::S3(S3Config {
                endpoint: endpoint.clone(),
                region: region.clone(),
                bucket: self.bucket.clone(),
                key,
            }),
            StorageBackend::Local { root } => BackendConfig::Local(LocalConfig {
                root: root.display().to_string(),
                bucket: self.bucket.clone(),
                key,
            }),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.batch.validate()?;
        if let Some(queue) = &self.queue
            && queue.name.trim().is_empty()
        {
            return Err(ConfigError::EmptyQueueName);
        }
        if let Some(storage) = &self.storage
            && storage.bucket.trim().is_empty()
        {
            return Err(ConfigError::EmptyBucketName);
        }
        Ok(())
    }

    /// The queue section, required by queue commands.
    pub fn queue(&self) -> Result<&QueueConfig, ConfigError> {
        self.queue
            .as_ref()
            .ok_or(ConfigError::MissingSection { section: "queue" })
    }

    /// The storage section, required by storage commands.
    pub fn storage(&self) -> Result<&StorageConfig, ConfigError> {
        self.storage
            .as_ref()
            .ok_or(ConfigError::MissingSection { section: "storage" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
batch:
  max_retries: 4
  retry_delay_secs: 2
  parallelism: 8
queue:
  name: jobs
  visibility_timeout_secs: 30
  backend:
    type: sqs
    region: us-west-2
storage:
  bucket: my-bucket
  prefix: exports/daily
  backend:
    type: local
    root: ./data
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();

        assert_eq!(config.batch.max_retries, 4);
        assert_eq!(config.batch.parallelism(), 8);
        assert!(config.batch.progress);

        let queue = config.queue().unwrap();
        assert_eq!(queue.name, "jobs");
        assert_eq!(queue.visibility_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            queue.backend,
            QueueBackend::Sqs {
                region: Some("us-west-2".to_string()),
                endpoint: None,
            }
        );

        let storage = config.storage().unwrap();
        match storage.backend_config() {
            BackendConfig::Local(local) => {
                assert_eq!(local.root, "./data");
                assert_eq!(local.bucket, "my-bucket");
                assert_eq!(local.key, Some(ObjectPath::from("exports/daily")));
            }
            other => panic!("expected local backend, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_sections() {
        let config = Config::parse("batch: {}").unwrap();

        assert!(matches!(
            config.queue(),
            Err(ConfigError::MissingSection { section: "queue" })
        ));
        assert!(matches!(
            config.storage(),
            Err(ConfigError::MissingSection { section: "storage" })
        ));
    }

    #[test]
    fn test_validation_errors() {
        let empty_queue = r#"
queue:
  name: ""
  backend: { type: local, root: /tmp/q }
"#;
        assert!(matches!(
            Config::parse(empty_queue),
            Err(ConfigError::EmptyQueueName)
        ));

        let empty_bucket = r#"
storage:
  bucket: " "
  backend: { type: s3 }
"#;
        assert!(matches!(
            Config::parse(empty_bucket),
            Err(ConfigError::EmptyBucketName)
        ));

        assert!(matches!(
            Config::parse("batch: { max_retries: 0 }"),
            Err(ConfigError::ZeroRetries)
        ));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let yaml = r#"
queue:
  name: jobs
  backend: { type: rabbitmq }
"#;
        assert!(matches!(
            Config::parse(yaml),
            Err(ConfigError::YamlParse { .. })
        ));
    }

    #[test]
    fn test_empty_prefix_means_no_key() {
        let storage = StorageConfig {
            bucket: "b".to_string(),
            prefix: Some(String::new()),
            backend: StorageBackend::S3 {
                region: None,
                endpoint: None,
            },
        };
        assert!(storage.backend_config().key().is_none());
    }
}
