use thiserror::Error;

use crate::models::event::ValidationError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller payload violates the event contract. Surfaced as HTTP 400.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Broker stayed unreachable for every publish attempt. Surfaced as HTTP 500.
    #[error("failed to queue event after {attempts} attempts: {last_error}")]
    PublishExhausted { attempts: u32, last_error: String },

    /// Queue payload could not be deserialized into an event.
    #[error("malformed queue message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// A single store write failed and may be retried.
    #[error("store write failed: {0}")]
    TransientPersistFailure(String),

    #[error("store write failed after {attempts} attempts: {last_error}")]
    PersistExhausted { attempts: u32, last_error: String },

    /// Broker connection, channel, or publish failure.
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl From<lapin::Error> for PipelineError {
    fn from(e: lapin::Error) -> Self {
        PipelineError::Connection(e.to_string())
    }
}

impl From<tokio_postgres::Error> for PipelineError {
    fn from(e: tokio_postgres::Error) -> Self {
        PipelineError::TransientPersistFailure(e.to_string())
    }
}

impl PipelineError {
    /// Whether the error means the broker connection is no longer usable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, PipelineError::Connection(_))
    }
}
