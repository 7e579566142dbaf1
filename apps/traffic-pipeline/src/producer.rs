use crate::queue::{MessageQueue, QueueError, SentMessage};
use crate::reading::{self, Reading};
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode reading: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] QueueError),
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub interval: Duration,
    /// Stop after this many readings; `None` runs until cancelled.
    pub count: Option<u64>,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            count: None,
        }
    }
}

pub async fn publish(
    queue: &dyn MessageQueue,
    reading: &Reading,
) -> Result<SentMessage, PublishError> {
    let payload = reading.to_json()?;
    match queue.send(&payload).await {
        Ok(sent) => {
            tracing::info!(message_id = %sent.id, payload = %payload, "sent message");
            Ok(sent)
        }
        Err(err) => {
            tracing::error!(error = %err, payload = %payload, "failed to send message");
            Err(err.into())
        }
    }
}

/// Publishes one generated reading per interval. The first reading goes out immediately. Returns
/// the number sent; a send failure ends the run.
pub async fn run_producer(
    queue: &dyn MessageQueue,
    settings: &ProducerSettings,
    cancel: &CancellationToken,
) -> Result<u64, PublishError> {
    tracing::info!(
        queue = %queue.describe(),
        interval_ms = settings.interval.as_millis() as u64,
        count = ?settings.count,
        "producer started"
    );

    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    loop {
        if settings.count.is_some_and(|limit| sent >= limit) {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("received shutdown signal, stopping producer");
                break;
            }
            _ = ticker.tick() => {
                publish(queue, &reading::generate()).await?;
                sent += 1;
            }
        }
    }

    tracing::info!(sent, "producer stopped");
    Ok(sent)
}
