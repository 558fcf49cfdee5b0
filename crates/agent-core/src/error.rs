//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Longest error description folded back into a conversation
pub const MAX_ERROR_DESCRIPTION: usize = 500;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// No tool with this name in the execution's snapshot
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments did not match the declared schema
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool ran and failed (includes timeouts and malformed external responses)
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    /// Primary or auxiliary model unreachable or errored
    #[error("Model call failed: {0}")]
    ModelCallFailed(String),

    /// Decide/act rounds exhausted
    #[error("Recursion limit ({0}) exceeded")]
    RecursionLimitExceeded(usize),

    /// Conversation memory backend down
    #[error("Conversation store unavailable: {0}")]
    StoreUnavailable(String),

    /// Caller disconnected before the loop finished
    #[error("Caller disconnected")]
    Cancelled,

    /// Parse error (e.g., tool call parsing)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Build a `ToolExecutionFailed` with the description truncated
    pub fn tool_failed(tool: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ToolExecutionFailed {
            tool: tool.into(),
            message: truncate_chars(&message.to_string(), MAX_ERROR_DESCRIPTION),
        }
    }

    /// Tool-level errors are recovered inside the loop
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_)
                | AgentError::ToolValidation(_)
                | AgentError::ToolExecutionFailed { .. }
        )
    }

    /// Stable machine-readable code for the error event
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            AgentError::ToolValidation(_) => "TOOL_VALIDATION",
            AgentError::ToolExecutionFailed { .. } => "TOOL_EXECUTION_FAILED",
            AgentError::ModelCallFailed(_) => "MODEL_CALL_FAILED",
            AgentError::RecursionLimitExceeded(_) => "RECURSION_LIMIT_EXCEEDED",
            AgentError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AgentError::Cancelled => "CANCELLED",
            _ => "AGENT_ERROR",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::ModelCallFailed(_) => "The AI service is currently unavailable. Please try again.".into(),
            AgentError::ToolNotFound(name) => format!("The tool '{}' is not available.", name),
            AgentError::ToolValidation(msg) => format!("Invalid tool input: {}", msg),
            AgentError::ToolExecutionFailed { tool, message } => format!("Tool '{}' error: {}", tool, message),
            AgentError::RecursionLimitExceeded(_) => "The request took too many steps to process. Please try a simpler query.".into(),
            AgentError::StoreUnavailable(_) => "Conversation history is temporarily unavailable. Please try again.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

/// Keep at most `max` characters, never splitting a UTF-8 sequence
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failed_truncates_description() {
        let long = "x".repeat(MAX_ERROR_DESCRIPTION * 3);
        match AgentError::tool_failed("search", long) {
            AgentError::ToolExecutionFailed { tool, message } => {
                assert_eq!(tool, "search");
                assert_eq!(message.chars().count(), MAX_ERROR_DESCRIPTION);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("añoñ", 2), "añ");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_tool_level_classification() {
        assert!(AgentError::ToolNotFound("x".into()).is_tool_level());
        assert!(!AgentError::ModelCallFailed("down".into()).is_tool_level());
        assert_eq!(AgentError::RecursionLimitExceeded(25).code(), "RECURSION_LIMIT_EXCEEDED");
    }
}
