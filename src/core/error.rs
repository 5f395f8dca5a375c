//! SDK error types

use thiserror::Error;

/// Errors that can occur in the agent SDK
#[derive(Error, Debug)]
pub enum SdkError {
    /// No trace with this id is held by the store
    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    /// The trace exists but has no span with this id
    #[error("Span not found: {span_id} (trace {trace_id})")]
    SpanNotFound { trace_id: String, span_id: String },

    /// No API key was configured for the completion API
    #[error("Missing API key for {0}")]
    MissingApiKey(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Non-success response from the completion API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Trace persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel closed unexpectedly
    #[error("Channel closed")]
    ChannelClosed,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl SdkError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        SdkError::Other(msg.into())
    }

    /// Create a span-not-found error
    pub fn span_not_found(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        SdkError::SpanNotFound {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    /// Whether this error reports a missing trace or span
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SdkError::TraceNotFound(_) | SdkError::SpanNotFound { .. }
        )
    }
}

/// Result type alias for SDK operations
pub type SdkResult<T> = Result<T, SdkError>;
