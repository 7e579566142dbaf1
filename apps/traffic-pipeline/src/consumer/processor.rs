use crate::error::ProcessingError;
use crate::queue::{MessageQueue, QueueMessage};
use crate::reading::Reading;
use crate::store::SensorStore;

/// Persists one message and acknowledges it. The delete is issued only after the row has been
/// committed; on any error the message stays on the queue and reappears after its visibility
/// timeout.
pub async fn process_message(
    queue: &dyn MessageQueue,
    store: &dyn SensorStore,
    message: &QueueMessage,
) -> Result<Reading, ProcessingError> {
    let reading = Reading::from_json(&message.body)?;

    if message.dequeue_count > 1 {
        // No dedup key exists for SensorData; a redelivery after a lost delete inserts again.
        tracing::warn!(
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
            "redelivered message; SensorData may receive a duplicate row"
        );
    }

    store.insert_reading(&reading).await?;
    queue.delete(message).await?;

    tracing::debug!(
        message_id = %message.id,
        sensor_id = reading.sensor_id,
        timestamp = %reading.timestamp,
        "stored reading"
    );
    Ok(reading)
}
