//! Error types for the Courier client

use courier_core::domain::job::InvalidJobId;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the broker
#[derive(Debug, Error)]
pub enum ClientError {
    /// Broker endpoint string could not be used
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    /// Job descriptor was rejected before dispatch
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] InvalidJobId),

    /// Broker unreachable, handshake or authentication failure
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Channel-level failure (open, declare, delete, close)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Publishing a message failed
    #[error("Publish to '{queue}' failed: {message}")]
    Publish {
        /// Target queue
        queue: String,
        /// Broker error message
        message: String,
    },

    /// Receiving or acknowledging a message failed
    #[error("Consume from '{queue}' failed: {message}")]
    Consume {
        /// Source queue
        queue: String,
        /// Broker error message
        message: String,
    },

    /// Payload could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Create a publish error for a queue
    pub fn publish(queue: impl Into<String>, message: impl ToString) -> Self {
        Self::Publish {
            queue: queue.into(),
            message: message.to_string(),
        }
    }

    /// Create a consume error for a queue
    pub fn consume(queue: impl Into<String>, message: impl ToString) -> Self {
        Self::Consume {
            queue: queue.into(),
            message: message.to_string(),
        }
    }

    /// Check if this error happened before a connection was established
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::InvalidEndpoint(_))
    }
}
