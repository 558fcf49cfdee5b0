//! Conversation Messages
//!
//! Standard message format used across the agent system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Outcome of one pending tool invocation
    ToolResult,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content (absent for assistant turns that only request tools)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Pending tool invocations (assistant turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call this message answers (tool_result turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name for tool_result turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, Some(content.into()))
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    /// Create a final assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    /// Create an assistant message that requests tools
    pub fn assistant_with_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let content = content.filter(|c| !c.trim().is_empty());
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message answering `call_id`
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::ToolResult, Some(content.into()));
        msg.tool_call_id = Some(call_id.into());
        msg.name = Some(tool_name.into());
        msg
    }

    /// Text content, empty when absent
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Whether this assistant turn still waits on tools
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Working copy of a thread's messages for one loop execution.
///
/// Tracks which messages came from the store so the loop can hand back
/// only the appended delta.
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    saved: usize,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted history.
    ///
    /// A stored thread can end mid tool round (torn file, interrupted
    /// process). Every call left without a result gets an error result right
    /// after its assistant turn, and results answering no open call are
    /// dropped, so the working copy always satisfies call/result pairing. The
    /// repair is not persisted; it is recomputed identically on every load.
    pub fn resume(history: Vec<Message>) -> Self {
        let mut messages = Vec::with_capacity(history.len());
        let mut open: Vec<ToolCall> = Vec::new();
        let mut repaired = 0;

        for message in history {
            if message.role == Role::ToolResult {
                let matched = message
                    .tool_call_id
                    .as_ref()
                    .and_then(|id| open.iter().position(|call| &call.id == id));
                match matched {
                    Some(idx) => {
                        open.remove(idx);
                        messages.push(message);
                    }
                    None => {
                        tracing::warn!(call_id = ?message.tool_call_id, "Dropping tool result with no open call");
                        repaired += 1;
                    }
                }
                continue;
            }

            repaired += close_interrupted(&mut messages, &mut open);
            if message.role == Role::Assistant {
                open.extend(message.tool_calls.iter().cloned());
            }
            messages.push(message);
        }
        repaired += close_interrupted(&mut messages, &mut open);

        if repaired > 0 {
            tracing::warn!(repaired, "Repaired unpaired tool calls in stored history");
        }

        let saved = messages.len();
        Self { messages, saved }
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the most recent user message
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or("")
    }

    /// Messages appended since the last checkpoint
    pub fn unsaved(&self) -> &[Message] {
        &self.messages[self.saved..]
    }

    /// Mark everything so far as persisted
    pub fn checkpoint(&mut self) {
        self.saved = self.messages.len();
    }

    /// Drop unsaved messages beyond `len`
    pub fn rollback_to(&mut self, len: usize) {
        self.messages.truncate(len.max(self.saved));
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Error results for calls that never got one
fn close_interrupted(messages: &mut Vec<Message>, open: &mut Vec<ToolCall>) -> usize {
    let count = open.len();
    for call in open.drain(..) {
        messages.push(Message::tool_result(
            call.id,
            call.name,
            "Error: the tool call was interrupted before it returned a result.",
        ));
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello");
    }

    #[test]
    fn test_role_serializes_snake_case() {
        let msg = Message::tool_result("call-1", "datetime", "Monday");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["tool_call_id"], "call-1");
    }

    #[test]
    fn test_blank_assistant_content_is_dropped() {
        let msg = Message::assistant_with_calls(Some("  ".into()), vec![ToolCall::new("datetime")]);
        assert!(msg.content.is_none());
        assert!(msg.has_tool_calls());
    }

    #[test]
    fn test_unsaved_delta() {
        let mut conv = Conversation::resume(vec![Message::system("You are helpful."), Message::user("Hi")]);
        assert!(conv.unsaved().is_empty());

        conv.push(Message::user("Again"));
        conv.push(Message::assistant("Hello!"));
        assert_eq!(conv.unsaved().len(), 2);

        conv.checkpoint();
        assert!(conv.unsaved().is_empty());
        assert_eq!(conv.len(), 4);
    }

    #[test]
    fn test_resume_closes_interrupted_calls() {
        let first = ToolCall::new("datetime");
        let second = ToolCall::new("calculate");
        let trailing = ToolCall::new("calculate");
        let conv = Conversation::resume(vec![
            Message::user("Hi"),
            Message::assistant_with_calls(None, vec![first.clone(), second.clone()]),
            Message::tool_result(&first.id, "datetime", "now"),
            Message::tool_result("call-nobody-made", "datetime", "stray"),
            Message::assistant("It is now."),
            Message::user("And 2+2?"),
            Message::assistant_with_calls(None, vec![trailing.clone()]),
        ]);

        let messages = conv.messages();
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some(second.id.as_str()));
        assert!(messages[3].text().starts_with("Error:"));
        assert_eq!(messages[4].text(), "It is now.");
        assert_eq!(messages[7].role, Role::ToolResult);
        assert_eq!(messages[7].tool_call_id.as_deref(), Some(trailing.id.as_str()));
        assert!(conv.unsaved().is_empty());
    }

    #[test]
    fn test_resume_keeps_paired_history_untouched() {
        let call = ToolCall::new("datetime");
        let history = vec![
            Message::user("Hi"),
            Message::assistant_with_calls(None, vec![call.clone()]),
            Message::tool_result(&call.id, "datetime", "now"),
            Message::assistant("It is now."),
        ];
        let conv = Conversation::resume(history.clone());
        assert_eq!(conv.len(), history.len());
    }

    #[test]
    fn test_rollback_keeps_persisted_prefix() {
        let mut conv = Conversation::resume(vec![Message::user("Hi")]);
        conv.push(Message::assistant_with_calls(None, vec![ToolCall::new("datetime")]));
        conv.rollback_to(0);
        assert_eq!(conv.len(), 1);
    }
}
