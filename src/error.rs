//! Error types for the worker pool.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Failed to spawn worker for slot {slot_index}: {message}")]
    SpawnError { slot_index: usize, message: String },
    #[error("Invalid slot transition for slot {slot_index}: {from:?} -> {to:?}")]
    InvalidSlotTransition {
        slot_index: usize,
        from: crate::execution::slot::SlotState,
        to: crate::execution::slot::SlotState,
    },
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Worker for slot {slot_index} is gone: {reason}")]
    WorkerLost { slot_index: usize, reason: String },
    #[error("Pool supervisor failed: {0}")]
    SupervisorFailed(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PoolError {
    pub fn spawn(slot_index: usize, message: impl Into<String>) -> Self {
        PoolError::SpawnError {
            slot_index,
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for PoolError {
    fn from(error: config::ConfigError) -> Self {
        PoolError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
