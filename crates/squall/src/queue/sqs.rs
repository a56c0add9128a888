//! Amazon SQS queue service.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use aws_sdk_sqs::types::{QueueAttributeName, SendMessageBatchRequestEntry};
use std::time::{Duration, Instant};
use tracing::warn;

use squall_core::batch::Batch;
use squall_core::destination::Destination;
use squall_core::emit;
use squall_core::metrics::events::{QueueOperation, QueueRequest, RequestStatus};

use super::{MAX_BATCH_SIZE, QueueHandle, QueueService, RawMessage, ReceiptHandle};
use crate::error::QueueError;

/// Queue service backed by Amazon SQS.
#[derive(Debug, Clone)]
pub struct SqsQueueService {
    client: Client,
}

impl SqsQueueService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default credential chain.
    pub async fn from_config(region: Option<&str>, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        Self::new(Client::new(&sdk_config))
    }
}

fn record<T, E>(operation: QueueOperation, start: Instant, result: &Result<T, E>) {
    emit!(QueueRequest {
        operation,
        status: RequestStatus::of(result),
        duration: start.elapsed(),
    });
}

/// Responses the client could not parse are the only retryable failure.
fn sdk_error<E, R>(operation: QueueOperation, err: SdkError<E, R>) -> QueueError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ResponseError(_) => QueueError::MalformedResponse {
            operation: operation.as_str(),
            message,
        },
        _ => QueueError::Request {
            operation: operation.as_str(),
            message,
        },
    }
}

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl Destination for SqsQueueService {
    type Handle = QueueHandle;
    type Error = QueueError;

    fn kind(&self) -> &'static str {
        "queue"
    }

    async fn lookup(&self, name: &str) -> Result<QueueHandle, QueueError> {
        let start = Instant::now();
        let result = self.client.get_queue_url().queue_name(name).send().await;
        record(QueueOperation::GetQueueUrl, start, &result);

        match result {
            Ok(output) => match output.queue_url() {
                Some(url) => Ok(QueueHandle {
                    name: name.to_string(),
                    url: url.to_string(),
                }),
                None => Err(QueueError::MalformedResponse {
                    operation: QueueOperation::GetQueueUrl.as_str(),
                    message: "response carried no queue url".to_string(),
                }),
            },
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_queue_does_not_exist()) =>
            {
                Err(QueueError::QueueNotFound {
                    queue: name.to_string(),
                })
            }
            Err(e) => Err(sdk_error(QueueOperation::GetQueueUrl, e)),
        }
    }

    async fn create(&self, name: &str) -> Result<QueueHandle, QueueError> {
        let start = Instant::now();
        let result = self.client.create_queue().queue_name(name).send().await;
        record(QueueOperation::CreateQueue, start, &result);

        match result {
            Ok(output) => match output.queue_url() {
                Some(url) => Ok(QueueHandle {
                    name: name.to_string(),
                    url: url.to_string(),
                }),
                None => self.lookup(name).await,
            },
            Err(e) if e.as_service_error().is_some_and(|se| se.is_queue_name_exists()) => {
                Err(QueueError::QueueAlreadyOwned {
                    queue: name.to_string(),
                })
            }
            Err(e) => Err(sdk_error(QueueOperation::CreateQueue, e)),
        }
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn send_batch(
        &self,
        queue: &QueueHandle,
        batch: &Batch<String>,
    ) -> Result<(), QueueError> {
        let entries = batch
            .entries
            .iter()
            .map(|entry| {
                SendMessageBatchRequestEntry::builder()
                    .id(&entry.id)
                    .message_body(&entry.item)
                    .build()
                    .map_err(|e| QueueError::InvalidEntry {
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let start = Instant::now();
        let result = self
            .client
            .send_message_batch()
            .queue_url(&queue.url)
            .set_entries(Some(entries))
            .send()
            .await;
        record(QueueOperation::SendBatch, start, &result);

        let output = result.map_err(|e| sdk_error(QueueOperation::SendBatch, e))?;

        let failed = output.failed();
        if let Some(first) = failed.first() {
            warn!(
                queue = %queue.name,
                batch = batch.id,
                failed = failed.len(),
                "Batch entries rejected"
            );
            return Err(QueueError::EntriesRejected {
                batch: batch.id,
                failed: failed.len(),
                entry: first.id().to_string(),
                code: first.code().to_string(),
                message: first.message().unwrap_or_default().to_string(),
            });
        }

        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max: usize,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let max = i32::try_from(max.clamp(1, MAX_BATCH_SIZE)).unwrap_or(1);
        let mut request = self
            .client
            .receive_message()
            .queue_url(&queue.url)
            .max_number_of_messages(max);
        if let Some(timeout) = visibility_timeout {
            request = request.visibility_timeout(seconds(timeout));
        }

        let start = Instant::now();
        let result = request.send().await;
        record(QueueOperation::Receive, start, &result);

        let output = result.map_err(|e| sdk_error(QueueOperation::Receive, e))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|message| {
                let Some(receipt) = message.receipt_handle() else {
                    warn!(queue = %queue.name, "Skipping message without receipt handle");
                    return None;
                };
                Some(RawMessage {
                    id: message.message_id().unwrap_or_default().to_string(),
                    body: message.body().unwrap_or_default().to_string(),
                    receipt: ReceiptHandle::new(receipt),
                })
            })
            .collect())
    }

    async fn delete(&self, queue: &QueueHandle, receipt: ReceiptHandle) -> Result<(), QueueError> {
        let start = Instant::now();
        let result = self
            .client
            .delete_message()
            .queue_url(&queue.url)
            .receipt_handle(receipt.into_inner())
            .send()
            .await;
        record(QueueOperation::Delete, start, &result);

        result.map_err(|e| sdk_error(QueueOperation::Delete, e))?;
        Ok(())
    }

    async fn purge(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        let start = Instant::now();
        let result = self
            .client
            .purge_queue()
            .queue_url(&queue.url)
            .send()
            .await;
        record(QueueOperation::Purge, start, &result);

        result.map_err(|e| sdk_error(QueueOperation::Purge, e))?;
        Ok(())
    }

    async fn approximate_size(&self, queue: &QueueHandle) -> Result<usize, QueueError> {
        let start = Instant::now();
        let result = self
            .client
            .get_queue_attributes()
            .queue_url(&queue.url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await;
        record(QueueOperation::Attributes, start, &result);

        let output = result.map_err(|e| sdk_error(QueueOperation::Attributes, e))?;

        let Some(count) = output
            .attributes()
            .and_then(|attributes| attributes.get(&QueueAttributeName::ApproximateNumberOfMessages))
        else {
            return Ok(0);
        };

        count.parse().map_err(|_| QueueError::MalformedResponse {
            operation: QueueOperation::Attributes.as_str(),
            message: format!("ApproximateNumberOfMessages is not a number: {count}"),
        })
    }
}
