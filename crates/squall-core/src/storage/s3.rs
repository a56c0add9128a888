//! S3 storage backend implementation.
//!
//! Object traffic goes through `object_store`'s `AmazonS3`. Bucket
//! administration uses the AWS SDK client, since `object_store` cannot
//! create or enumerate buckets.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;

use crate::destination::Destination;
use crate::error::{S3ConfigSnafu, StorageError};
use crate::metrics::events::StorageOperation;

use super::{BackendConfig, BucketAdmin, BucketHandle, StorageProvider, record};

/// Region that rejects an explicit location constraint on bucket creation.
const DEFAULT_REGION: &str = "us-east-1";

/// S3 storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) async fn construct_s3(config: S3Config) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let canonical_url = match (&config.region, &config.endpoint) {
            (_, Some(endpoint)) => format!("s3::{}/{}", endpoint, config.bucket),
            (Some(region), _) => format!("https://s3.{}.amazonaws.com/{}", region, config.bucket),
            _ => format!("https://s3.amazonaws.com/{}", config.bucket),
        };

        let canonical_url = if let Some(key) = &config.key {
            format!("{}/{}", canonical_url, key)
        } else {
            canonical_url
        };

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu)?);

        Ok(Self {
            config: BackendConfig::S3(config),
            object_store,
            canonical_url,
        })
    }
}

/// Bucket administration through the AWS SDK.
#[derive(Debug, Clone)]
pub struct S3BucketAdmin {
    client: Client,
    region: Option<String>,
}

impl S3BucketAdmin {
    pub fn new(client: Client, region: Option<String>) -> Self {
        Self { client, region }
    }

    /// Build a client from the default credential chain, honouring the
    /// configured region and endpoint override.
    pub async fn from_config(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        let region = config
            .region
            .clone()
            .or_else(|| sdk_config.region().map(|r| r.to_string()));

        Self::new(Client::from_conf(s3_config), region)
    }

    fn handle(&self, name: &str) -> BucketHandle {
        BucketHandle {
            name: name.to_string(),
            location: self
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        }
    }
}

/// Map an SDK failure onto a storage error. Responses the client could not
/// parse are kept apart so they can be retried.
fn sdk_error<E, R>(operation: StorageOperation, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ResponseError(_) => StorageError::MalformedResponse {
            operation: operation.as_str(),
            message,
        },
        _ => StorageError::BucketRequest {
            operation: operation.as_str(),
            message,
        },
    }
}

#[async_trait]
impl Destination for S3BucketAdmin {
    type Handle = BucketHandle;
    type Error = StorageError;

    fn kind(&self) -> &'static str {
        "bucket"
    }

    async fn lookup(&self, name: &str) -> Result<BucketHandle, StorageError> {
        let start = Instant::now();
        let result = self.client.head_bucket().bucket(name).send().await;
        record(StorageOperation::HeadBucket, start, &result);

        match result {
            Ok(_) => Ok(self.handle(name)),
            Err(e) => {
                let missing = e.as_service_error().is_some_and(|se| se.is_not_found())
                    || e.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if missing {
                    Err(StorageError::BucketNotFound {
                        bucket: name.to_string(),
                    })
                } else {
                    Err(sdk_error(StorageOperation::HeadBucket, e))
                }
            }
        }
    }

    async fn create(&self, name: &str) -> Result<BucketHandle, StorageError> {
        let mut request = self.client.create_bucket().bucket(name);
        if let Some(region) = self.region.as_deref()
            && region != DEFAULT_REGION
        {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        let start = Instant::now();
        let result = request.send().await;
        record(StorageOperation::CreateBucket, start, &result);

        match result {
            Ok(_) => Ok(self.handle(name)),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_bucket_already_owned_by_you()) =>
            {
                Err(StorageError::BucketAlreadyOwned {
                    bucket: name.to_string(),
                })
            }
            Err(e) => Err(sdk_error(StorageOperation::CreateBucket, e)),
        }
    }
}

#[async_trait]
impl BucketAdmin for S3BucketAdmin {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let start = Instant::now();
        let result = self.client.list_buckets().send().await;
        record(StorageOperation::ListBuckets, start, &result);

        let output = result.map_err(|e| sdk_error(StorageOperation::ListBuckets, e))?;

        let mut buckets: Vec<(i64, String)> = output
            .buckets()
            .iter()
            .filter_map(|bucket| {
                let name = bucket.name()?.to_string();
                let created = bucket.creation_date().map(|d| d.secs()).unwrap_or_default();
                Some((created, name))
            })
            .collect();

        buckets.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(buckets.into_iter().map(|(_, name)| name).collect())
    }
}
