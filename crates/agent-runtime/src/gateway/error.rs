//! Error types for external tool sessions

use agent_core::AgentError;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur when talking to an external tool source
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("JSON-RPC error (code {code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Tool reported an error: {0}")]
    ToolReported(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Timed out waiting for '{0}'")]
    Timeout(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for AgentError {
    fn from(err: GatewayError) -> Self {
        AgentError::Other(err.to_string())
    }
}
