//! # agent-runtime
//!
//! Runtime integrations for the agent orchestrator.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference, tools through ```tool blocks
//! - **OpenAI**: any `/chat/completions` endpoint with native function calling
//!
//! ## Tools
//!
//! - External tool sources launched as subprocesses ([`gateway`])
//! - Web search and URL OCR ([`web`])
//! - Personal document search ([`documents`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{provider_from_env, ExternalToolGateway, GatewayConfig, ToolsConfig};
//!
//! let provider = provider_from_env()?;
//! let tools = ToolsConfig::from_env().await?;
//! let gateway = Arc::new(ExternalToolGateway::new(GatewayConfig::from_tools_config(&tools)));
//! let orchestrator = OrchestratorBuilder::new()
//!     .provider(provider)
//!     .source(gateway.clone())
//!     .build()?;
//! ```

use std::sync::Arc;

pub mod config;
pub mod documents;
pub mod file_store;
pub mod gateway;
pub mod openai;
pub mod web;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use config::{ServerConfig, ToolsConfig};
pub use documents::DocumentSearchTool;
pub use file_store::FileStore;
pub use gateway::{ExternalToolGateway, GatewayConfig, GatewayStatus};
pub use openai::OpenAiProvider;
pub use web::{InternetSearchTool, UrlAnalyzerTool};

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, Message, Result, Role, Tool, ToolRegistry};

/// Provider named by `LLM_PROVIDER` (`ollama` or `openai`, default `ollama`)
pub fn provider_from_env() -> Result<Arc<dyn LlmProvider>> {
    let name = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "ollama".into());
    provider_by_name(&name)
}

fn provider_by_name(name: &str) -> Result<Arc<dyn LlmProvider>> {
    match name.trim().to_ascii_lowercase().as_str() {
        #[cfg(feature = "ollama")]
        "ollama" => Ok(Arc::new(OllamaProvider::from_env())),
        "openai" => Ok(Arc::new(OpenAiProvider::from_env()?)),
        other => Err(AgentError::Config(format!("Unknown LLM_PROVIDER '{}'", other))),
    }
}

/// Registry with the built-in, web and document tools
pub fn default_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(agent_core::builtin::DateTimeTool);
    registry.register(agent_core::builtin::CalculatorTool);
    registry.register(InternetSearchTool::from_env());
    registry.register(UrlAnalyzerTool::from_env());
    registry.register(DocumentSearchTool::from_env());
    registry
}
