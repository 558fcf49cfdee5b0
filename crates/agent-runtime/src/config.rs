//! Tools configuration file
//!
//! ```json
//! {
//!   "agents": [{"name": "SEO Writer", "description": "...", "model": "llama3.2", "system_prompt": "..."}],
//!   "servers": {"platform_tools": {"command": "python", "args": ["-m", "api.mcp_server"], "enabled": true}},
//!   "global_env": {"NODE_ENV": "production"}
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use agent_core::error::{AgentError, Result};
use agent_core::subagent::SubAgentConfig;
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool { true }

/// One external tool source launched as a subprocess
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment, applied over `global_env`
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Contents of `tools.json`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Specialist agents exposed as tools
    #[serde(default)]
    pub agents: Vec<SubAgentConfig>,

    /// External tool sources by name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,

    /// Environment shared by every source
    #[serde(default)]
    pub global_env: HashMap<String, String>,
}

impl ToolsConfig {
    /// Load from `path`; a missing file means no agents and no sources
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No tools configuration, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw)
            .map_err(|e| AgentError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `TOOLS_CONFIG` (default `tools.json`)
    pub async fn from_env() -> Result<Self> {
        let path = std::env::var("TOOLS_CONFIG").unwrap_or_else(|_| "tools.json".into());
        Self::load(path).await
    }

    /// Sources with `enabled: true`
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter().filter(|(_, server)| server.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"{
            "agents": [{"name": "SEO Writer", "description": "Articles", "model": "llama3.2", "system_prompt": "Write."}],
            "servers": {
                "platform_tools": {"command": "python", "args": ["-m", "api.mcp_server"], "env": {"A": "1"}},
                "github": {"command": "npx", "enabled": false}
            },
            "global_env": {"NODE_ENV": "production"}
        }"#;
        let config: ToolsConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.agents[0].tool_name(), "seo_writer");
        assert_eq!(config.servers["platform_tools"].args, vec!["-m", "api.mcp_server"]);
        assert!(config.servers["platform_tools"].enabled);
        let enabled: Vec<&String> = config.enabled_servers().map(|(name, _)| name).collect();
        assert_eq!(enabled, vec!["platform_tools"]);
        assert_eq!(config.global_env["NODE_ENV"], "production");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_config() {
        let config = ToolsConfig::load("/nonexistent/tools.json").await.unwrap();
        assert!(config.agents.is_empty());
        assert!(config.servers.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(matches!(ToolsConfig::load(&path).await, Err(AgentError::Config(_))));
    }
}
