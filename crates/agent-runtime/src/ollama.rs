//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference.
//!
//! Ollama models are driven through the ```tool text protocol: the tool
//! catalog is appended to the system message and every ```tool block in a
//! reply becomes one tool call.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
    tool::{self, ToolSchema},
};
use async_trait::async_trait;
use ollama_rs::{
    generation::chat::{ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest},
    models::ModelOptions,
    Ollama,
};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self { host, port }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(config.host, config.port),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(messages: &[Message], tools: &[ToolSchema]) -> Vec<ChatMessage> {
        let mut converted: Vec<ChatMessage> = messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatMessage::new(MessageRole::System, m.text().to_string()),
                Role::User => ChatMessage::new(MessageRole::User, m.text().to_string()),
                Role::Assistant => {
                    let mut content = m.text().to_string();
                    for call in &m.tool_calls {
                        if !content.is_empty() {
                            content.push('\n');
                        }
                        content.push_str(&tool::render_tool_block(call));
                    }
                    ChatMessage::new(MessageRole::Assistant, content)
                }
                // Tool results appear as user context
                Role::ToolResult => ChatMessage::new(
                    MessageRole::User,
                    format!(
                        "[Tool '{}' returned]\n{}",
                        m.name.as_deref().unwrap_or("tool"),
                        m.text()
                    ),
                ),
            })
            .collect();

        if !tools.is_empty() {
            let catalog = tool::prompt_section(tools);
            match messages.iter().position(|m| m.role == Role::System) {
                Some(idx) => {
                    let system = format!("{}\n\n{}", messages[idx].text(), catalog);
                    converted[idx] = ChatMessage::new(MessageRole::System, system);
                }
                None => converted.insert(0, ChatMessage::new(MessageRole::System, catalog)),
            }
        }

        converted
    }

    /// Split a raw reply into answer text and tool calls
    fn interpret(raw: &str, tools: &[ToolSchema], model: &str) -> Completion {
        let tool_calls = if tools.is_empty() {
            Vec::new()
        } else {
            tool::parse_tool_blocks(raw)
        };

        let content = if tool_calls.is_empty() {
            raw.trim().to_string()
        } else {
            tool::strip_tool_blocks(raw)
        };

        Completion {
            content: Some(content).filter(|c| !c.is_empty()),
            finish_reason: Some(if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolUse
            }),
            tool_calls,
            model: model.to_string(),
            usage: None,
        }
    }

    /// Convert Ollama response to agent completion
    fn convert_completion(response: ChatMessageResponse, tools: &[ToolSchema], model: &str) -> Completion {
        let mut completion = Self::interpret(&response.message.content, tools, model);
        completion.usage = response.final_data.as_ref().map(|d| TokenUsage {
            prompt_tokens: d.prompt_eval_count as u32,
            completion_tokens: d.eval_count as u32,
            total_tokens: (d.prompt_eval_count + d.eval_count) as u32,
        });
        completion
    }

    /// Build Ollama generation options
    fn build_options(opts: &GenerationOptions) -> ModelOptions {
        ModelOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(opts.max_tokens as i32)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let ollama_messages = Self::convert_messages(messages, tools);
        let ollama_options = Self::build_options(options);

        let request = ChatMessageRequest::new(
            options.model.clone(),
            ollama_messages,
        ).options(ollama_options);

        let response = self.client
            .send_chat_messages(request)
            .await
            .map_err(|e| AgentError::ModelCallFailed(e.to_string()))?;

        Ok(Self::convert_completion(response, tools, &options.model))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self.client
            .list_local_models()
            .await
            .map_err(|e| AgentError::ModelCallFailed(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None, // Not exposed by Ollama API
            })
            .collect())
    }
}
