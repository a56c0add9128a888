//! Queue manager and the queue services behind it.
//!
//! - `sqs` - Amazon SQS through `aws-sdk-sqs`
//! - `local` - one directory per queue, one file per message
//! - `payload` - text/record body decoding

mod local;
mod payload;
mod sqs;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use squall_core::batch::{
    Batch, BatchSink, DispatchError, DispatchSummary, Dispatcher, partition,
};
use squall_core::config::BatchConfig;
use squall_core::destination::{Destination, resolve_or_create};

use crate::config::{QueueBackend, QueueConfig};
use crate::error::QueueError;

pub use local::LocalQueueService;
pub use payload::Payload;
pub use sqs::SqsQueueService;

/// Most messages a single send or receive call may carry.
pub const MAX_BATCH_SIZE: usize = 10;

/// Resolved queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub name: String,
    pub url: String,
}

/// Single-use token authorising deletion of one delivered message.
///
/// Not `Clone`: deleting a message consumes its receipt.
#[derive(Debug, PartialEq, Eq)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(receipt: impl Into<String>) -> Self {
        Self(receipt.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A message as delivered by a queue service.
#[derive(Debug)]
pub struct RawMessage {
    pub id: String,
    pub body: String,
    pub receipt: ReceiptHandle,
}

/// A delivered message with its decoded payload.
#[derive(Debug)]
pub struct Message {
    pub id: String,
    pub payload: Payload,
    pub receipt: ReceiptHandle,
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        Self {
            id: raw.id,
            payload: Payload::decode(raw.body),
            receipt: raw.receipt,
        }
    }
}

/// Operations a queue backend provides on top of lookup and creation.
#[async_trait]
pub trait QueueService:
    Destination<Handle = QueueHandle, Error = QueueError> + std::fmt::Debug + 'static
{
    /// Send every entry of `batch` in one call. Fails if any entry is rejected.
    async fn send_batch(&self, queue: &QueueHandle, batch: &Batch<String>)
    -> Result<(), QueueError>;

    /// Fetch up to `max` messages, hiding them from other consumers for
    /// `visibility_timeout` when given.
    async fn receive(
        &self,
        queue: &QueueHandle,
        max: usize,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>, QueueError>;

    async fn delete(&self, queue: &QueueHandle, receipt: ReceiptHandle) -> Result<(), QueueError>;

    async fn purge(&self, queue: &QueueHandle) -> Result<(), QueueError>;

    /// Approximate number of visible messages.
    async fn approximate_size(&self, queue: &QueueHandle) -> Result<usize, QueueError>;
}

/// Create the queue service for a configured backend.
pub async fn service_for(backend: &QueueBackend) -> Arc<dyn QueueService> {
    match backend {
        QueueBackend::Sqs { region, endpoint } => Arc::new(
            SqsQueueService::from_config(region.as_deref(), endpoint.as_deref()).await,
        ),
        QueueBackend::Local { root } => Arc::new(LocalQueueService::new(root)),
    }
}

/// Submits message batches to one resolved queue.
#[derive(Debug)]
struct MessageSink {
    service: Arc<dyn QueueService>,
    queue: QueueHandle,
}

#[async_trait]
impl BatchSink for MessageSink {
    type Item = String;
    type Error = QueueError;

    fn target(&self) -> &str {
        &self.queue.name
    }

    async fn submit(&self, batch: &Batch<String>) -> Result<(), QueueError> {
        self.service.send_batch(&self.queue, batch).await
    }
}

/// Batch client for one queue.
#[derive(Debug, Clone)]
pub struct QueueManager {
    queue: QueueHandle,
    service: Arc<dyn QueueService>,
    dispatcher: Dispatcher,
    visibility_timeout: Option<Duration>,
}

impl QueueManager {
    /// Resolve the queue `name`, creating it if it does not exist.
    pub async fn new(
        name: &str,
        service: Arc<dyn QueueService>,
        dispatcher: Dispatcher,
    ) -> Result<Self, QueueError> {
        let queue = resolve_or_create(service.as_ref(), name).await?;
        Ok(Self {
            queue,
            service,
            dispatcher,
            visibility_timeout: None,
        })
    }

    pub async fn from_config(config: &QueueConfig, batch: &BatchConfig) -> Result<Self, QueueError> {
        let service = service_for(&config.backend).await;
        let manager = Self::new(&config.name, service, batch.dispatcher()).await?;
        Ok(manager.with_visibility_timeout(config.visibility_timeout()))
    }

    /// Visibility timeout applied to every receive.
    pub fn with_visibility_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.queue.name
    }

    pub fn url(&self) -> &str {
        &self.queue.url
    }

    pub fn handle(&self) -> &QueueHandle {
        &self.queue
    }

    /// Approximate number of messages waiting in the queue.
    pub async fn size(&self) -> Result<usize, QueueError> {
        self.service.approximate_size(&self.queue).await
    }

    /// Send `messages` in batches of ten across the dispatcher.
    pub async fn upload(
        &self,
        messages: Vec<Payload>,
    ) -> Result<DispatchSummary, DispatchError<QueueError>> {
        let bodies: Vec<String> = messages.iter().map(Payload::encode).collect();
        let batches = partition(bodies, MAX_BATCH_SIZE);

        info!(
            queue = %self.queue.name,
            messages = messages.len(),
            batches = batches.len(),
            "Uploading messages"
        );

        let sink = Arc::new(MessageSink {
            service: self.service.clone(),
            queue: self.queue.clone(),
        });
        let summary = self.dispatcher.run(sink, batches).await?;

        info!(
            queue = %self.queue.name,
            messages = summary.items(),
            retries = (summary.attempts() as usize).saturating_sub(summary.batches()),
            "Upload complete"
        );
        Ok(summary)
    }

    /// Fetch up to `max` messages.
    pub async fn receive(&self, max: usize) -> Result<Vec<Message>, QueueError> {
        let raw = self
            .service
            .receive(&self.queue, max, self.visibility_timeout)
            .await?;
        debug!(queue = %self.queue.name, received = raw.len(), "Received messages");
        Ok(raw.into_iter().map(Message::from).collect())
    }

    /// Fetch the next message, if any.
    pub async fn next(&self) -> Result<Option<Message>, QueueError> {
        Ok(self.receive(1).await?.into_iter().next())
    }

    /// Delete a delivered message, consuming its receipt.
    pub async fn delete(&self, message: Message) -> Result<(), QueueError> {
        debug!(queue = %self.queue.name, message = %message.id, "Deleting message");
        self.service.delete(&self.queue, message.receipt).await
    }

    /// Remove every message from the queue.
    pub async fn purge(&self) -> Result<(), QueueError> {
        info!(queue = %self.queue.name, "Purging queue");
        self.service.purge(&self.queue).await
    }
}
