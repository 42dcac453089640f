//! Crate-wide error type.

use crate::dispatch::Operation;
use crate::network;

/// Errors returned by the client, the transports and the codecs.
///
/// Validation failures (`InvalidPropertyKey`, `DuplicateKey`,
/// `MissingRequestId`, `Config`) are raised before any I/O. Wire failures
/// arrive as [`Error::Network`] and are retried when
/// [`Error::is_retryable`] says so.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Twin property keys must be non-empty and free of ' ', '$' and '.'.
    #[error("invalid twin property key {0:?}")]
    InvalidPropertyKey(String),

    /// The same key appeared twice in one reported-property update.
    #[error("duplicate twin property key {0:?}")]
    DuplicateKey(String),

    /// A twin or method request was built without a request id.
    #[error("{0:?} requires a request id")]
    MissingRequestId(Operation),

    /// An HTTPS body would exceed the hub's size ceiling.
    #[error("encoded size {size} exceeds the {limit} byte limit")]
    SizeExceeded {
        /// Encoded size that was attempted.
        size: usize,
        /// The ceiling.
        limit: usize,
    },

    /// A topic could not be built or parsed.
    #[error("malformed topic {topic:?}: {reason}")]
    MalformedTopic {
        /// The offending topic, or its prefix when building.
        topic: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A response arrived for a request id that is not outstanding.
    #[error("no outstanding request with id {0:?}")]
    UnknownRequestId(String),

    /// A response topic does not match the operation recorded for its id.
    #[error("response does not match outstanding {0:?} request")]
    OperationMismatch(Operation),

    /// A method response was sent for a request that is not awaiting one.
    #[error("method request {0:?} is not awaiting a response")]
    MethodNotAwaitingResponse(String),

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,

    /// The transport has not been opened, or is reconnecting.
    #[error("transport is not connected")]
    NotConnected,

    /// The transport cannot carry this operation.
    #[error("{0:?} is not supported by this transport")]
    UnsupportedOperation(Operation),

    /// Invalid client configuration or connection string.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wire-level failure.
    #[error("network error: {0}")]
    Network(#[from] network::error::Error),

    /// A twin document or reported patch could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the operation that failed should go back to the waiting queue.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
