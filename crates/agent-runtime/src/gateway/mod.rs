//! External Tool Gateway
//!
//! Launches every configured tool source as a subprocess, discovers its
//! tools once per process lifetime and exposes them to the registry as
//! `<source>_<tool>`. Sources that fail to come up inside the startup window
//! are recorded as unavailable and simply contribute no tools.
//!
//! ```text
//!   ToolRegistry ◀── refresh ── ExternalToolGateway
//!                                   │  LazyInit<[Source]>
//!                     ┌─────────────┼─────────────┐
//!                     ▼             ▼             ▼
//!              ExternalSession ExternalSession  (unavailable)
//!                 stdio JSON-RPC  stdio JSON-RPC
//! ```

pub mod error;
pub mod protocol;
pub mod session;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_core::{
    error::AgentError,
    init::{InitStatus, LazyInit},
    orchestrator::ToolSource,
    tool::{Arguments, Tool, ToolRegistry, ToolSchema},
};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ServerConfig, ToolsConfig};
pub use error::GatewayError;
pub use protocol::{ResourceInfo, ToolInfo};
pub use session::ExternalSession;

/// Gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Sources by name
    pub servers: BTreeMap<String, ServerConfig>,

    /// Environment shared by every source
    pub global_env: HashMap<String, String>,

    /// Spawn + handshake + discovery budget per source
    pub startup_timeout: Duration,

    /// Budget for one request on a session
    pub call_timeout: Duration,

    /// Wait after closing stdin before killing a source
    pub shutdown_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            global_env: HashMap::new(),
            startup_timeout: Duration::from_secs(15),
            call_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Enabled sources of a tools configuration
    pub fn from_tools_config(config: &ToolsConfig) -> Self {
        Self {
            servers: config
                .enabled_servers()
                .map(|(name, server)| (name.clone(), server.clone()))
                .collect(),
            global_env: config.global_env.clone(),
            ..Default::default()
        }
    }
}

/// Exposed registry name of a source's tool
pub fn exposed_name(source: &str, tool: &str) -> String {
    format!("{}_{}", source, tool)
}

#[derive(Clone)]
enum SourceState {
    Connected {
        session: Arc<ExternalSession>,
        tools: Vec<ToolInfo>,
    },
    Unavailable(String),
}

#[derive(Clone)]
struct Source {
    name: String,
    description: String,
    state: SourceState,
}

/// Per-source health for `/health` and `/api/tools`
#[derive(Clone, Debug, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub description: String,
    pub available: bool,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GatewayStatus {
    pub init: InitStatus,
    pub sources: Vec<SourceStatus>,
}

/// Resource listed by one source
#[derive(Clone, Debug, Serialize)]
pub struct ResourceEntry {
    pub server: String,
    #[serde(flatten)]
    pub resource: ResourceInfo,
}

/// Tool backed by an external session
pub struct ExternalTool {
    schema: ToolSchema,
    remote_name: String,
    session: Arc<ExternalSession>,
}

impl ExternalTool {
    pub fn new(source: &str, info: &ToolInfo, session: Arc<ExternalSession>) -> Self {
        Self {
            schema: ToolSchema::from_json_schema(
                exposed_name(source, &info.name),
                info.description.clone().unwrap_or_default(),
                &info.input_schema,
            ),
            remote_name: info.name.clone(),
            session,
        }
    }
}

#[async_trait]
impl Tool for ExternalTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn invoke(&self, arguments: &Arguments) -> agent_core::Result<String> {
        let arguments = Value::Object(arguments.clone().into_iter().collect());
        self.session
            .call_tool(&self.remote_name, arguments)
            .await
            .map_err(|e| AgentError::tool_failed(&self.schema.name, e))
    }
}

pub struct ExternalToolGateway {
    config: GatewayConfig,
    sources: LazyInit<Arc<[Source]>>,
    registered: Mutex<HashSet<String>>,
}

impl ExternalToolGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            sources: LazyInit::new(),
            registered: Mutex::new(HashSet::new()),
        }
    }

    /// Connect every source now instead of on the first execution.
    ///
    /// Returns the number of tools discovered.
    pub async fn connect(&self) -> agent_core::Result<usize> {
        let sources = self.sources().await?;
        Ok(sources
            .iter()
            .map(|s| match &s.state {
                SourceState::Connected { tools, .. } => tools.len(),
                SourceState::Unavailable(_) => 0,
            })
            .sum())
    }

    async fn sources(&self) -> agent_core::Result<Arc<[Source]>> {
        self.sources.get_or_try_init(|| self.discover()).await
    }

    async fn discover(&self) -> agent_core::Result<Arc<[Source]>> {
        let attempts = self
            .config
            .servers
            .iter()
            .map(|(name, server)| self.connect_source(name, server));
        let sources: Vec<Source> = join_all(attempts).await;

        let connected = sources
            .iter()
            .filter(|s| matches!(s.state, SourceState::Connected { .. }))
            .count();
        tracing::info!(connected, total = sources.len(), "External tool sources initialized");

        Ok(sources.into())
    }

    async fn connect_source(&self, name: &str, server: &ServerConfig) -> Source {
        let attempt = async {
            let session = ExternalSession::spawn(name, server, &self.config.global_env, self.config.call_timeout)?;
            session.initialize().await?;
            let tools = session.list_tools().await?;
            Ok::<_, GatewayError>((session, tools))
        };

        let state = match tokio::time::timeout(self.config.startup_timeout, attempt).await {
            Ok(Ok((session, tools))) => {
                tracing::info!(source = %name, tools = tools.len(), "Connected external tool source");
                SourceState::Connected {
                    session: Arc::new(session),
                    tools,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(source = %name, error = %e, "External tool source unavailable");
                SourceState::Unavailable(e.to_string())
            }
            Err(_) => {
                tracing::warn!(source = %name, timeout = ?self.config.startup_timeout, "External tool source did not start in time");
                SourceState::Unavailable(format!("no answer within {:?}", self.config.startup_timeout))
            }
        };

        Source {
            name: name.to_string(),
            description: server.description.clone(),
            state,
        }
    }

    pub fn status(&self) -> GatewayStatus {
        let sources = self
            .sources
            .get()
            .map(|sources| {
                sources
                    .iter()
                    .map(|s| match &s.state {
                        SourceState::Connected { session, tools } => SourceStatus {
                            name: s.name.clone(),
                            description: s.description.clone(),
                            available: session.is_alive(),
                            tools: tools.iter().map(|t| exposed_name(&s.name, &t.name)).collect(),
                            error: (!session.is_alive()).then(|| "session closed".to_string()),
                        },
                        SourceState::Unavailable(e) => SourceStatus {
                            name: s.name.clone(),
                            description: s.description.clone(),
                            available: false,
                            tools: Vec::new(),
                            error: Some(e.clone()),
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        GatewayStatus {
            init: self.sources.status(),
            sources,
        }
    }

    fn live_session(&self, sources: &[Source], server: &str) -> Option<Arc<ExternalSession>> {
        sources.iter().find(|s| s.name == server).and_then(|s| match &s.state {
            SourceState::Connected { session, .. } if session.is_alive() => Some(Arc::clone(session)),
            _ => None,
        })
    }

    /// Resources of every live source; failing sources are skipped
    pub async fn resources(&self) -> Vec<ResourceEntry> {
        let Some(sources) = self.sources.get() else {
            return Vec::new();
        };

        let listings = sources.iter().filter_map(|s| match &s.state {
            SourceState::Connected { session, .. } if session.is_alive() => Some(async move {
                match session.list_resources().await {
                    Ok(resources) => resources
                        .into_iter()
                        .map(|resource| ResourceEntry {
                            server: s.name.clone(),
                            resource,
                        })
                        .collect(),
                    Err(e) => {
                        tracing::warn!(source = %s.name, error = %e, "Failed to list resources");
                        Vec::new()
                    }
                }
            }),
            _ => None,
        });

        join_all(listings).await.into_iter().flatten().collect()
    }

    pub async fn read_resource(&self, server: &str, uri: &str) -> Result<String, GatewayError> {
        let session = self
            .sources
            .get()
            .and_then(|sources| self.live_session(&sources, server))
            .ok_or_else(|| GatewayError::Unavailable(server.to_string()))?;
        session.read_resource(uri).await
    }

    /// Terminate every source. Safe to call more than once.
    pub async fn shutdown(&self) {
        let Some(sources) = self.sources.get() else {
            return;
        };

        let grace = self.config.shutdown_grace;
        let stops = sources.iter().filter_map(|s| match &s.state {
            SourceState::Connected { session, .. } => Some(session.shutdown(grace)),
            SourceState::Unavailable(_) => None,
        });
        join_all(stops).await;
        tracing::info!("External tool gateway shut down");
    }
}

#[async_trait]
impl ToolSource for ExternalToolGateway {
    async fn refresh(&self, registry: &ToolRegistry) {
        let sources = match self.sources().await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(error = %e, "External tools unavailable for this execution");
                return;
            }
        };

        let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
        for source in sources.iter() {
            let SourceState::Connected { session, tools } = &source.state else {
                continue;
            };
            for info in tools {
                let name = exposed_name(&source.name, &info.name);
                if session.is_alive() {
                    if registered.insert(name) {
                        registry.register(ExternalTool::new(&source.name, info, Arc::clone(session)));
                    }
                } else if registered.remove(&name) {
                    tracing::warn!(source = %source.name, tool = %name, "Source closed, removing tool");
                    registry.unregister(&name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::ToolCall;

    fn server(command: &str, args: &[&str]) -> ServerConfig {
        ServerConfig {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            description: "test source".into(),
            enabled: true,
        }
    }

    #[test]
    fn test_exposed_name() {
        assert_eq!(exposed_name("platform_tools", "search"), "platform_tools_search");
    }

    #[tokio::test]
    async fn test_failed_source_contributes_no_tools() {
        let mut servers = BTreeMap::new();
        servers.insert("ghost".to_string(), server("definitely-not-an-installed-binary", &[]));
        let gateway = ExternalToolGateway::new(GatewayConfig {
            servers,
            ..Default::default()
        });

        let registry = ToolRegistry::new();
        gateway.refresh(&registry).await;
        assert!(registry.is_empty());

        let status = gateway.status();
        assert_eq!(status.init, InitStatus::Ready);
        assert!(!status.sources[0].available);
        assert!(status.sources[0].error.is_some());

        let result = registry.snapshot().invoke(&ToolCall::new("ghost_search")).await;
        assert!(matches!(result.outcome, Err(AgentError::ToolNotFound(_))));

        gateway.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_source_end_to_end() {
        // answers initialize, tools/list and one tools/call in order
        let script = r#"
read line; echo '{"jsonrpc":"2.0","id":1,"result":{}}'
read line
read line; echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}'
read line; echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}'
read line
"#;
        let mut servers = BTreeMap::new();
        servers.insert("shell".to_string(), server("sh", &["-c", script]));
        let gateway = ExternalToolGateway::new(GatewayConfig {
            servers,
            ..Default::default()
        });

        assert_eq!(gateway.connect().await.unwrap(), 1);

        let registry = ToolRegistry::new();
        gateway.refresh(&registry).await;
        gateway.refresh(&registry).await;
        assert_eq!(registry.names(), vec!["shell_echo".to_string()]);

        let snapshot = registry.snapshot();
        assert!(snapshot.schemas()[0].parameters[0].required);

        let call = ToolCall::new("shell_echo").with_arg("text", "ping");
        let result = snapshot.invoke(&call).await;
        assert_eq!(result.outcome.unwrap(), "pong");

        gateway.shutdown().await;
        assert!(!gateway.status().sources[0].available);

        gateway.refresh(&registry).await;
        assert!(registry.is_empty());
    }
}
