//! Error types for the core library.

use thiserror::Error;

use crate::deferred::DeferredId;
use crate::message::MessageId;
use crate::request::RequestId;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] froide_imap::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored raw mail is not valid base64.
    #[error("Invalid stored mail: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Request not found.
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    /// Message not found.
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Deferred message not found.
    #[error("Deferred message not found: {0}")]
    DeferredNotFound(DeferredId),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The operation is not allowed in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
