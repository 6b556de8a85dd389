/// Error types for the move relay
///
/// Join rejections are not errors at this level: they are reported through
/// logging and the event bus. `RelayError` covers configuration, transport,
/// host and runtime failures that callers can act on.

use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    // ========================================
    // Validation Errors
    // ========================================

    #[error("Invalid input for field '{field}': {reason}")]
    ValidationError {
        field: String,
        reason: String,
    },

    #[error("Invalid session identifier: {0:?}")]
    InvalidSessionId(String),

    // ========================================
    // Transport Errors
    // ========================================

    #[error("Socket endpoint '{endpoint}' rejected connect params: {reason}")]
    Unauthorized {
        endpoint: String,
        reason: String,
    },

    #[error("Channel '{topic}' is closed")]
    ChannelClosed {
        topic: String,
    },

    #[error("Transport error: {0}")]
    TransportError(String),

    // ========================================
    // Host Errors
    // ========================================

    #[error("UI host error: {0}")]
    HostError(String),

    // ========================================
    // Runtime Errors
    // ========================================

    #[error("No tokio runtime available to await the join acknowledgement")]
    NoRuntime,

    #[error("Join acknowledgement task failed: {0}")]
    JoinTaskFailed(String),

    // ========================================
    // IO Errors
    // ========================================

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ========================================
    // Serialization Errors
    // ========================================

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ========================================
    // Generic Errors
    // ========================================

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(feature = "tauri")]
impl From<tauri::Error> for RelayError {
    fn from(err: tauri::Error) -> Self {
        RelayError::HostError(err.to_string())
    }
}

// ========================================
// Unit Tests
// ========================================
