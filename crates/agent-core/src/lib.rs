//! # agent-core
//!
//! Provider-agnostic orchestration of a primary LLM that answers by
//! delegating to tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────────┐  │
//! │  │ Decide/Act  │  │    Tool     │  │   LlmProvider            │  │
//! │  │    Loop     │──│  Registry   │──│   (Strategy)             │  │
//! │  └─────────────┘  └─────────────┘  └──────────────────────────┘  │
//! │         │                │                                       │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────────┐  │
//! │  │Conversation │  │  Compactor  │  │  Emitter (event stream)  │  │
//! │  │   Memory    │  │             │  │                          │  │
//! │  └─────────────┘  └─────────────┘  └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between Ollama, OpenAI-compatible
//! endpoints, or any other provider without changing orchestration logic.
//! Dynamically discovered tools plug in through [`ToolSource`].

pub mod builtin;
pub mod compaction;
pub mod error;
pub mod init;
pub mod memory;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod stream;
pub mod subagent;
pub mod tool;

#[cfg(test)]
pub mod testing;

pub use compaction::{CompactionConfig, Compactor};
pub use error::{AgentError, Result};
pub use init::{InitStatus, LazyInit};
pub use memory::{ConversationMemory, ConversationStore, MemoryStore, ThreadId, ThreadSummary};
pub use message::{Conversation, Message, Role};
pub use orchestrator::{ChatRequest, Orchestrator, OrchestratorBuilder, OrchestratorConfig, RunReport, ToolSource};
pub use provider::{Completion, GenerationOptions, LlmProvider, ModelInfo};
pub use stream::{Emitter, StreamEvent};
pub use subagent::{SubAgentConfig, SubAgentTool};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema, ToolSnapshot};
