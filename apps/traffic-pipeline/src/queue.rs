mod azure;
mod shared_key;

pub use azure::AzureQueueClient;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A message handed out by `receive`. The pop receipt is only valid while the message stays
/// hidden; once the visibility timeout lapses another receiver gets a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub pop_receipt: String,
    pub dequeue_count: u32,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("queue returned {status} ({code}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
    #[error("failed to decode queue response: {0}")]
    Decode(String),
    #[error("invalid queue account key: {0}")]
    InvalidKey(#[from] base64::DecodeError),
    #[error("invalid queue endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl QueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::Status { status: 404, code, .. } if code == "MessageNotFound")
    }
}

/// Durable at-least-once queue. Implementations must keep a received message invisible for the
/// requested timeout and make it visible again if it is not deleted in time.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, text: &str) -> Result<SentMessage, QueueError>;

    async fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Eventually-consistent depth estimate. Only fit for logging.
    async fn approximate_count(&self) -> Result<u64, QueueError>;

    /// Human-readable location of the queue for log lines.
    fn describe(&self) -> String;
}
