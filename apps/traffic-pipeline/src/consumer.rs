mod processor;
mod state;


pub use processor::process_message;
pub use state::{DrainState, DrainTracker, PollOutcome};

use crate::config::Config;
use crate::error::ProcessingError;
use crate::queue::{MessageQueue, QueueMessage};
use crate::store::SensorStore;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_size: u32,
    pub visibility_timeout: Duration,
    pub max_empty_polls: u32,
    pub empty_poll_delay: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            visibility_timeout: config.visibility_timeout(),
            max_empty_polls: config.max_empty_polls,
            empty_poll_delay: config.empty_poll_delay(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            visibility_timeout: Duration::from_secs(30),
            max_empty_polls: 3,
            empty_poll_delay: Duration::from_secs(5),
        }
    }
}

/// Where undecodable messages go once they have been delivered `max_dequeue_count` times.
#[derive(Clone, Copy)]
pub struct DeadLetter<'a> {
    pub queue: &'a dyn MessageQueue,
    pub max_dequeue_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub polls: u64,
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub receive_errors: u64,
    pub cancelled: bool,
}

/// Drains the queue into the store and returns once `max_empty_polls` consecutive polls came back
/// empty, or when `cancel` fires. Per-message failures are logged and skipped; only a lost store
/// connection aborts the drain.
pub async fn run_consumer(
    queue: &dyn MessageQueue,
    store: &dyn SensorStore,
    dead_letter: Option<DeadLetter<'_>>,
    settings: &ConsumerSettings,
    cancel: &CancellationToken,
) -> Result<DrainReport, ProcessingError> {
    let mut tracker = DrainTracker::new(settings.max_empty_polls);
    let mut report = DrainReport::default();
    tracing::info!(
        queue = %queue.describe(),
        batch_size = settings.batch_size,
        visibility_timeout_secs = settings.visibility_timeout.as_secs(),
        max_empty_polls = tracker.max_empty_polls(),
        "consumer started"
    );

    while !tracker.is_terminated() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        match queue.approximate_count().await {
            Ok(count) => tracing::info!(approximate_count = count, "queue depth"),
            Err(err) => tracing::warn!(error = %err, "failed to read approximate queue depth"),
        }

        let batch = match queue
            .receive(settings.batch_size, settings.visibility_timeout)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                report.receive_errors += 1;
                tracing::warn!(error = %err, "failed to receive messages");
                Vec::new()
            }
        };
        report.polls += 1;

        match tracker.observe(batch.len()) {
            PollOutcome::Dispatch { received } => {
                tracing::info!(received, "received messages");
                for message in &batch {
                    if cancel.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    handle_message(queue, store, dead_letter, message, &mut report).await?;
                }
            }
            PollOutcome::Backoff { empty_polls } => {
                tracing::info!(
                    attempt = empty_polls,
                    max_attempts = tracker.max_empty_polls(),
                    queue = %queue.describe(),
                    "no messages received"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                    }
                    _ = tokio::time::sleep(settings.empty_poll_delay) => {}
                }
            }
            PollOutcome::Terminate { empty_polls } => {
                tracing::info!(
                    attempt = empty_polls,
                    max_attempts = tracker.max_empty_polls(),
                    "no messages received"
                );
            }
        }
        tracker.resume();
    }

    if report.cancelled {
        tracing::info!(processed = report.processed, "consumer cancelled");
    } else {
        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            polls = report.polls,
            "no more messages in the queue"
        );
    }
    Ok(report)
}

async fn handle_message(
    queue: &dyn MessageQueue,
    store: &dyn SensorStore,
    dead_letter: Option<DeadLetter<'_>>,
    message: &QueueMessage,
    report: &mut DrainReport,
) -> Result<(), ProcessingError> {
    let err = match process_message(queue, store, message).await {
        Ok(_) => {
            report.processed += 1;
            tracing::info!(message_id = %message.id, "processed message");
            return Ok(());
        }
        Err(err) => err,
    };

    if err.is_fatal() {
        tracing::error!(
            message_id = %message.id,
            error = %err,
            processed = report.processed,
            "store connection lost; aborting drain"
        );
        return Err(err);
    }

    if err.is_poison() {
        if let Some(dead_letter) = dead_letter {
            if message.dequeue_count >= dead_letter.max_dequeue_count {
                match move_to_dead_letter(queue, dead_letter, message).await {
                    Ok(()) => {
                        report.dead_lettered += 1;
                        tracing::warn!(
                            message_id = %message.id,
                            dequeue_count = message.dequeue_count,
                            error = %err,
                            dead_letter_queue = %dead_letter.queue.describe(),
                            "moved undecodable message to dead-letter queue"
                        );
                        return Ok(());
                    }
                    Err(move_err) => {
                        tracing::warn!(
                            message_id = %message.id,
                            error = %move_err,
                            "failed to dead-letter message"
                        );
                    }
                }
            }
        }
    }

    report.failed += 1;
    tracing::error!(
        message_id = %message.id,
        kind = err.kind(),
        error = %err,
        "error processing message"
    );
    Ok(())
}

async fn move_to_dead_letter(
    queue: &dyn MessageQueue,
    dead_letter: DeadLetter<'_>,
    message: &QueueMessage,
) -> Result<(), ProcessingError> {
    dead_letter.queue.send(&message.body).await?;
    queue.delete(message).await?;
    Ok(())
}
