use crate::queue::QueueError;
use crate::reading::ReadingError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Payload or timestamp could not be decoded. Redelivery will fail the same way.
    #[error(transparent)]
    Serialization(#[from] ReadingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] QueueError),
}

impl ProcessingError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Serialization(ReadingError::Payload(_)) => "serialization",
            ProcessingError::Serialization(ReadingError::Timestamp { .. }) => "timestamp",
            ProcessingError::Store(_) => "store",
            ProcessingError::Transport(_) => "transport",
        }
    }

    /// Only loss of the store connection ends a drain; everything else is per message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessingError::Store(err) if err.is_fatal())
    }

    pub fn is_poison(&self) -> bool {
        matches!(self, ProcessingError::Serialization(_))
    }
}
