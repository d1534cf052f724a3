//! Error types for the value bridge and listener dispatch.

use crate::native::{ErrorDomain, NativeError};
use thiserror::Error;

/// Main error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unrecognized native value type tag: {0}")]
    UnrecognizedType(i32),

    #[error("Unsupported value shape: {0}")]
    UnsupportedValueShape(String),

    #[error("Blob resolution failed: {0}")]
    BlobResolutionFailed(String),

    #[error("Blob metadata unavailable")]
    BlobMetadataUnavailable,

    #[error("Blob I/O error (domain {domain:?}, code {code})")]
    BlobIoError { domain: ErrorDomain, code: i32 },

    #[error("Dispatched context carries no listener token")]
    DispatchMissingToken,

    #[error("Listener not found: {0}")]
    ListenerNotFound(String),

    #[error("Context is missing required key: {0}")]
    ContextMissingRequiredKey(String),

    #[error("Listener token already registered: {0}")]
    DuplicateToken(String),

    #[error("Value nesting exceeds depth limit of {0}")]
    DepthLimitExceeded(usize),

    #[error("Engine error: {0}")]
    Engine(NativeError),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Wrap an engine error reported by a blob stream operation.
    pub fn blob_io(error: NativeError) -> Self {
        BridgeError::BlobIoError {
            domain: error.domain(),
            code: error.code,
        }
    }
}

impl From<NativeError> for BridgeError {
    fn from(e: NativeError) -> Self {
        BridgeError::Engine(e)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
