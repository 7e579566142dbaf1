use crate::config::{Config, QueueConfig, SqlConfig};
use crate::queue::{MessageQueue, QueueError, QueueMessage, SentMessage};
use crate::reading::Reading;
use crate::store::{SensorStore, StoreError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub fn test_config() -> Config {
    Config {
        queue: QueueConfig {
            account_name: "devaccount".to_string(),
            account_key: "c3VwZXItc2VjcmV0LXRlc3Qta2V5LTAxMjM0NTY3ODk=".to_string(),
            queue_name: "telemetry".to_string(),
            endpoint: "https://devaccount.queue.core.windows.net".to_string(),
            poison_queue_name: "telemetry-poison".to_string(),
        },
        sql: SqlConfig {
            server: None,
            database: None,
            user: None,
            password: None,
            database_url: Some("postgresql://postgres@localhost/postgres".to_string()),
            pool_size: 1,
            acquire_timeout_secs: 30,
        },
        batch_size: 32,
        visibility_timeout_secs: 30,
        max_empty_polls: 3,
        empty_poll_delay_secs: 5,
        publish_interval_ms: 1000,
        poison_dequeue_limit: None,
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    dequeue_count: u32,
    pop_receipt: Option<String>,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryQueueState {
    messages: VecDeque<StoredMessage>,
    deleted: Vec<String>,
    receive_calls: u64,
    failing_receives: u32,
    failing_sends: u32,
    failing_deletes: u32,
    depth_unavailable: bool,
}

/// In-process queue with the same visibility rules as the real service. Time comes from tokio, so
/// paused-clock tests can expire visibility windows.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_receives(&self, count: u32) {
        self.state.lock().unwrap().failing_receives = count;
    }

    pub fn fail_next_sends(&self, count: u32) {
        self.state.lock().unwrap().failing_sends = count;
    }

    pub fn fail_next_deletes(&self, count: u32) {
        self.state.lock().unwrap().failing_deletes = count;
    }

    /// Every `approximate_count` call errors until the queue is dropped.
    pub fn fail_depth(&self) {
        self.state.lock().unwrap().depth_unavailable = true;
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .any(|message| message.id == id)
    }

    pub fn bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .map(|message| message.body.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn receive_calls(&self) -> u64 {
        self.state.lock().unwrap().receive_calls
    }
}

fn unavailable() -> QueueError {
    QueueError::Status {
        status: 503,
        code: "ServerBusy".to_string(),
        message: "injected failure".to_string(),
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, text: &str) -> Result<SentMessage, QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(unavailable());
        }
        let id = Uuid::new_v4().to_string();
        state.messages.push_back(StoredMessage {
            id: id.clone(),
            body: text.to_string(),
            dequeue_count: 0,
            pop_receipt: None,
            visible_at: Instant::now(),
        });
        Ok(SentMessage { id })
    }

    async fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock().unwrap();
        state.receive_calls += 1;
        if state.failing_receives > 0 {
            state.failing_receives -= 1;
            return Err(unavailable());
        }
        let now = Instant::now();
        let mut out = Vec::new();
        for stored in state.messages.iter_mut() {
            if out.len() >= max_messages as usize {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            let pop_receipt = Uuid::new_v4().to_string();
            stored.dequeue_count += 1;
            stored.pop_receipt = Some(pop_receipt.clone());
            stored.visible_at = now + visibility_timeout;
            out.push(QueueMessage {
                id: stored.id.clone(),
                pop_receipt,
                dequeue_count: stored.dequeue_count,
                body: stored.body.clone(),
            });
        }
        Ok(out)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(unavailable());
        }
        let Some(index) = state.messages.iter().position(|m| m.id == message.id) else {
            return Ok(());
        };
        if state.messages[index].pop_receipt.as_deref() != Some(message.pop_receipt.as_str()) {
            return Err(QueueError::Status {
                status: 400,
                code: "PopReceiptMismatch".to_string(),
                message: "pop receipt does not match".to_string(),
            });
        }
        state.messages.remove(index);
        state.deleted.push(message.id.clone());
        Ok(())
    }

    async fn approximate_count(&self) -> Result<u64, QueueError> {
        let state = self.state.lock().unwrap();
        if state.depth_unavailable {
            return Err(unavailable());
        }
        Ok(state.messages.len() as u64)
    }

    fn describe(&self) -> String {
        "memory://telemetry".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailure {
    Write,
    Connection,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Reading>>,
    failures: Mutex<VecDeque<StoreFailure>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, failure: StoreFailure) {
        self.failures.lock().unwrap().push_back(failure);
    }

    pub fn rows(&self) -> Vec<Reading> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl SensorStore for MemoryStore {
    async fn insert_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(match failure {
                StoreFailure::Write => StoreError::from(sqlx::Error::Protocol(
                    "injected write failure".to_string(),
                )),
                StoreFailure::Connection => StoreError::from(sqlx::Error::PoolTimedOut),
            });
        }
        self.rows.lock().unwrap().push(reading.clone());
        Ok(())
    }
}
