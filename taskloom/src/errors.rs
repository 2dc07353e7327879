//! Error taxonomy for the runtime, mapped onto the A2A JSON-RPC error codes.

/// Main error type for the runtime.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    // === JSON-RPC level errors ===
    #[error("Request payload validation error: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // === A2A-specific errors ===
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task cannot be canceled: {0}")]
    TaskNotCancelable(String),

    #[error("Push notifications are not supported by this agent")]
    PushNotificationNotSupported,

    #[error("Streaming is not supported by this agent")]
    StreamingNotSupported,

    // === Cache/transport errors ===
    #[error("Cache request failed: {0}")]
    Network(String),

    #[error("Cache responded with status {status}: {body}")]
    CacheStatus { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ServerError {
    /// The JSON-RPC error code this error maps to on the wire.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) | Self::Network(_) | Self::CacheStatus { .. } | Self::Serialization(_) => {
                -32603
            }
            Self::TaskNotFound(_) => -32001,
            Self::TaskNotCancelable(_) => -32002,
            Self::PushNotificationNotSupported => -32003,
            Self::StreamingNotSupported => -32004,
        }
    }

    /// Whether retrying the failed operation could succeed. Used by the
    /// cache adapter's backoff loop.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::CacheStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the runtime.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

impl From<serde_json::Error> for ServerError {
    fn from(error: serde_json::Error) -> Self {
        ServerError::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(error: reqwest::Error) -> Self {
        ServerError::Network(error.to_string())
    }
}
