//! Agent HTTP Server
//!
//! Axum-based server exposing the decide/act loop as a server-sent event
//! stream, plus health, tool, model, resource and thread listings.

mod handlers;
mod settings;
mod state;

use std::sync::Arc;

use axum::{routing::{get, post}, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{
    compaction::{CompactionConfig, Compactor},
    memory::{ConversationMemory, MemoryStore},
    orchestrator::{Orchestrator, OrchestratorConfig},
    provider::GenerationOptions,
    subagent::SubAgentTool,
};
use agent_runtime::{ExternalToolGateway, FileStore, GatewayConfig, ToolsConfig};

use crate::handlers::{
    chat_handler, chat_sync_handler, health_check, list_models, list_resources, list_threads,
    list_tools, read_resource,
};
use crate::settings::{Settings, ThreadStore};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    // Initialize LLM provider
    let provider = agent_runtime::provider_from_env()?;
    match provider.health_check().await {
        Ok(true) => {
            tracing::info!(provider = provider.name(), "Connected to LLM provider");
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!(provider = provider.name(), "LLM provider not available, chats will fail until it is");
        }
    }

    // Tools: built-ins, specialist agents, external sources
    let tools_config = ToolsConfig::from_env().await?;
    let registry = agent_runtime::default_registry();
    for agent in &tools_config.agents {
        registry.register(SubAgentTool::new(agent.clone(), provider.clone()));
    }
    tracing::info!("Registered {} tools:", registry.len());
    for name in registry.names() {
        tracing::info!("  • {}", name);
    }

    let gateway = Arc::new(ExternalToolGateway::new(GatewayConfig::from_tools_config(&tools_config)));

    let compactor = Compactor::new(
        provider.clone(),
        CompactionConfig {
            threshold: settings.compaction_threshold,
            generation: GenerationOptions::for_model(&settings.compaction_model),
        },
    );

    let orchestrator = Orchestrator::builder()
        .provider(provider)
        .registry(Arc::new(registry))
        .source(gateway.clone())
        .compactor(compactor)
        .memory(conversation_memory(&settings).await?)
        .config(OrchestratorConfig {
            recursion_limit: settings.recursion_limit,
            generation: GenerationOptions::for_model(&settings.primary_model),
            model_timeout: settings.model_timeout,
            ..Default::default()
        })
        .build()?;

    // Start external sources now so the first chat does not pay for it
    let warmup = gateway.clone();
    tokio::spawn(async move {
        match warmup.connect().await {
            Ok(tools) => tracing::info!(tools, "External tools ready"),
            Err(e) => tracing::warn!(error = %e, "External tools failed to initialize"),
        }
    });

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        gateway: gateway.clone(),
    };

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;

    tracing::info!("Agent server running on http://{}", settings.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health             - Health check");
    tracing::info!("  GET  /api/models         - List available models");
    tracing::info!("  GET  /api/tools          - List tools and external sources");
    tracing::info!("  GET  /api/resources      - List external resources");
    tracing::info!("  GET  /api/threads        - List conversation threads");
    tracing::info!("  POST /api/chat           - Chat (server-sent events)");
    tracing::info!("  POST /api/chat/sync      - Chat (single JSON response)");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}

pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(handlers::THREAD_ID_HEADER)]);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/tools", get(list_tools))
        .route("/api/resources", get(list_resources))
        .route("/api/resources/{server}", get(read_resource))
        .route("/api/threads", get(list_threads))

        // Agent API
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/sync", post(chat_sync_handler))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn conversation_memory(settings: &Settings) -> anyhow::Result<ConversationMemory> {
    let memory = match &settings.thread_store {
        ThreadStore::Memory => ConversationMemory::new(Arc::new(MemoryStore::new())),
        ThreadStore::None => {
            tracing::warn!("THREAD_STORE=none, every chat is single-turn");
            ConversationMemory::stateless()
        }
        ThreadStore::File(dir) => ConversationMemory::new(Arc::new(FileStore::open(dir.clone()).await?)),
    };
    Ok(memory.degrade_on_failure(settings.store_degrade))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
