//! OpenAI-compatible LLM Provider
//!
//! Talks to any `/chat/completions` endpoint with native function calling.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
    tool::{Arguments, ToolCall, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token
    pub api_key: String,

    /// Base URL without the trailing path (e.g. `https://api.openai.com/v1`)
    pub base_url: String,

    /// Request timeout
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Read `OPENAI_API_KEY` and `OPENAI_BASE_URL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::Config("OPENAI_API_KEY is not set".into()))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(120),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// OpenAI-compatible provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env()?)
    }

    fn convert_message(message: &Message) -> Value {
        match message.role {
            Role::System => json!({ "role": "system", "content": message.text() }),
            Role::User => json!({ "role": "user", "content": message.text() }),
            Role::Assistant if message.has_tool_calls() => {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": Value::Object(c.arguments.clone().into_iter().collect()).to_string(),
                            }
                        })
                    })
                    .collect();
                json!({ "role": "assistant", "content": message.content, "tool_calls": calls })
            }
            Role::Assistant => json!({ "role": "assistant", "content": message.text() }),
            Role::ToolResult => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.text(),
            }),
        }
    }

    fn build_body(messages: &[Message], tools: &[ToolSchema], options: &GenerationOptions) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": messages.iter().map(Self::convert_message).collect::<Vec<_>>(),
            "temperature": options.temperature,
            "top_p": options.top_p,
            "max_tokens": options.max_tokens,
        });

        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.to_json_schema(),
                        }
                    })
                })
                .collect();
        }
        body
    }

    fn convert_completion(response: ChatResponse, requested_model: &str) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ModelCallFailed("response has no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| {
                let call = ToolCall::new(c.function.name).with_id(c.id);
                if c.function.arguments.trim().is_empty() {
                    return call;
                }
                match serde_json::from_str::<Arguments>(&c.function.arguments) {
                    Ok(arguments) => ToolCall { arguments, ..call },
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "Unparseable tool arguments");
                        call.with_argument_error(e.to_string())
                    }
                }
            })
            .collect();

        let finish_reason = choice.finish_reason.as_deref().map(|r| match r {
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolUse,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        });

        Ok(Completion {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            model: if response.model.is_empty() {
                requested_model.to_string()
            } else {
                response.model
            },
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {}", e);
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
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = Self::build_body(messages, tools, options);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ModelCallFailed(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::ModelCallFailed(format!(
                "HTTP {} from {}: {}",
                status,
                url,
                agent_core::error::truncate_chars(&text, 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ModelCallFailed(format!("Failed to parse response: {}", e)))?;

        Self::convert_completion(parsed, &options.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.config.base_url);
        let list: ModelList = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AgentError::ModelCallFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AgentError::ModelCallFailed(e.to_string()))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
                context_length: None,
            })
            .collect())
    }
}
