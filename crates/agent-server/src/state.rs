//! Application State

use std::sync::Arc;

use agent_core::Orchestrator;
use agent_runtime::ExternalToolGateway;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Decide/act loop shared by every request
    pub orchestrator: Arc<Orchestrator>,

    /// External tool sources, also registered as a tool source of the orchestrator
    pub gateway: Arc<ExternalToolGateway>,
}
