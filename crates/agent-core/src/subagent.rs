//! Sub-agent Tools
//!
//! A sub-agent forwards its task text to a secondary model call with its
//! own fixed instruction. Each configured agent becomes one tool instance.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{GenerationOptions, LlmProvider};
use crate::tool::{Arguments, FieldKind, ParameterSchema, Tool, ToolSchema};

/// One configured specialist agent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubAgentConfig {
    /// Display name, also the source of the tool name
    pub name: String,

    /// What the agent is good at (shown to the orchestrating model)
    pub description: String,

    /// Model the agent runs on
    pub model: String,

    /// Fixed instruction sent as the system message
    pub system_prompt: String,
}

impl SubAgentConfig {
    /// Tool name: lowercase, spaces and hyphens become underscores
    pub fn tool_name(&self) -> String {
        self.name.trim().to_lowercase().replace([' ', '-'], "_")
    }
}

/// Tool that delegates a task to a secondary model
pub struct SubAgentTool {
    config: SubAgentConfig,
    provider: Arc<dyn LlmProvider>,
}

impl SubAgentTool {
    pub fn new(config: SubAgentConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self { config, provider }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.config.tool_name(),
            description: format!("Specialist agent: {}", self.config.description),
            parameters: vec![ParameterSchema::required(
                "task",
                FieldKind::String,
                format!("The detailed task or question for the agent '{}'", self.config.name),
            )],
        }
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<String> {
        let task = arguments
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ToolValidation("Missing task".into()))?;

        tracing::debug!(agent = %self.config.name, model = %self.config.model, "Delegating to sub-agent");

        let messages = [Message::system(&self.config.system_prompt), Message::user(task)];
        let completion = self
            .provider
            .complete(&messages, &[], &GenerationOptions::for_model(&self.config.model))
            .await
            .map_err(|e| AgentError::tool_failed(self.config.tool_name(), e))?;

        Ok(completion.content.unwrap_or_default())
    }
}
