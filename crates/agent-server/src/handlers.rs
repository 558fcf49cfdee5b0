//! HTTP Handlers

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

use agent_core::{
    error::AgentError,
    init::InitStatus,
    memory::{ThreadId, ThreadSummary},
    orchestrator::ChatRequest,
    provider::ModelInfo,
    stream::StreamEvent,
};
use agent_runtime::gateway::{ResourceEntry, SourceStatus};

use crate::state::AppState;

pub const THREAD_ID_HEADER: &str = "x-thread-id";

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub thread_id: ThreadId,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub tools: usize,
    pub sources: Vec<SourceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<Value>,
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ThreadsQuery {
    #[serde(default = "default_thread_limit")]
    pub limit: usize,
}

fn default_thread_limit() -> usize { 20 }

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    pub uri: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn agent_error(e: &AgentError) -> ApiError {
    let status = match e {
        AgentError::ModelCallFailed(_) => StatusCode::BAD_GATEWAY,
        AgentError::RecursionLimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AgentError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.code(), e.user_message())
}

impl ChatBody {
    /// Validated thread id and loop request
    fn into_request(self) -> Result<(Option<ThreadId>, ChatRequest), ApiError> {
        if self.message.trim().is_empty() {
            return Err(api_error(StatusCode::BAD_REQUEST, "EMPTY_MESSAGE", "Message must not be empty"));
        }

        let thread_id = match self.thread_id.filter(|t| !t.is_empty()) {
            Some(id) if is_valid_thread_id(&id) => Some(ThreadId::from_string(id)),
            Some(_) => {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    "INVALID_THREAD_ID",
                    "thread_id may only contain letters, digits, '-' and '_'",
                ));
            }
            None => None,
        };

        Ok((
            thread_id,
            ChatRequest {
                message: self.message,
                model: self.model.filter(|m| !m.is_empty()),
            },
        ))
    }
}

fn is_valid_thread_id(id: &str) -> bool {
    id.len() <= 128 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check, reflecting external tool initialization
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let provider = state.orchestrator.provider();
    let provider_connected = provider.health_check().await.unwrap_or(false);
    let gateway = state.gateway.status();

    let (status_code, status, error) = match gateway.init {
        InitStatus::Ready => (StatusCode::OK, "ok", None),
        InitStatus::Uninitialized | InitStatus::Initializing => {
            (StatusCode::SERVICE_UNAVAILABLE, "initializing", None)
        }
        InitStatus::Failed(e) => (StatusCode::INTERNAL_SERVER_ERROR, "error", Some(e)),
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            provider: provider.name().to_string(),
            provider_connected,
            tools: state.orchestrator.registry().len(),
            sources: gateway.sources,
            error,
        }),
    )
}

/// Models offered by the primary provider
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    state.orchestrator.provider().list_models().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "Failed to list models");
        agent_error(&e)
    })
}

/// Tools the next execution would see
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    let snapshot = state.orchestrator.snapshot().await;
    let tools = snapshot
        .schemas()
        .iter()
        .map(|schema| {
            json!({
                "name": schema.name,
                "description": schema.description,
                "parameters": schema.to_json_schema(),
            })
        })
        .collect();

    Json(ToolsResponse {
        tools,
        sources: state.gateway.status().sources,
    })
}

pub async fn list_resources(State(state): State<AppState>) -> Json<Vec<ResourceEntry>> {
    Json(state.gateway.resources().await)
}

pub async fn read_resource(
    State(state): State<AppState>,
    Path(server): Path<String>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Value>, ApiError> {
    let content = state.gateway.read_resource(&server, &query.uri).await.map_err(|e| {
        tracing::warn!(source = %server, uri = %query.uri, error = %e, "Failed to read resource");
        api_error(StatusCode::BAD_GATEWAY, "RESOURCE_UNAVAILABLE", e.to_string())
    })?;

    Ok(Json(json!({ "server": server, "uri": query.uri, "content": content })))
}

pub async fn list_threads(
    State(state): State<AppState>,
    Query(query): Query<ThreadsQuery>,
) -> Result<Json<Vec<ThreadSummary>>, ApiError> {
    state
        .orchestrator
        .memory()
        .list(query.limit)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(error = %e, "Failed to list threads");
            agent_error(&e)
        })
}

/// Non-streaming chat: runs the loop to completion
pub async fn chat_sync_handler(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (thread_id, request) = body.into_request()?;

    let (thread_id, message) = state.orchestrator.ask(thread_id, request).await.map_err(|e| {
        tracing::error!(error = %e, "Chat failed");
        agent_error(&e)
    })?;

    Ok(Json(ChatResponse { message, thread_id }))
}

/// Streaming chat over server-sent events
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let (thread_id, request) = body.into_request()?;
    let (thread_id, events) = state.orchestrator.stream(thread_id, request);

    let header = HeaderValue::from_str(thread_id.as_str()).map_err(|_| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR", "Invalid thread id")
    })?;

    let sse = Sse::new(sse_events(ReceiverStream::new(events))).keep_alive(KeepAlive::default());
    Ok(([(HeaderName::from_static(THREAD_ID_HEADER), header)], sse).into_response())
}

fn sse_events(
    events: impl Stream<Item = StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    events.map(|event| {
        let data = match event {
            StreamEvent::Content { thread_id, content } => {
                json!({ "content": content, "thread_id": thread_id }).to_string()
            }
            StreamEvent::Error { thread_id, error, .. } => {
                json!({ "error": error, "thread_id": thread_id }).to_string()
            }
            StreamEvent::Done { .. } => "[DONE]".to_string(),
        };
        Ok(Event::default().data(data))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_core::{
        error::Result,
        memory::{ConversationMemory, MemoryStore},
        message::Message,
        provider::{Completion, GenerationOptions, LlmProvider},
        tool::ToolSchema,
        Orchestrator,
    };
    use agent_runtime::{ExternalToolGateway, GatewayConfig};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    /// Answers with the number of messages it was sent
    struct CountingProvider;

    #[async_trait]
    impl LlmProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            messages: &[Message],
            _tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<Completion> {
            Ok(Completion::text(format!("{} messages", messages.len())))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![ModelInfo {
                id: "counting-1".into(),
                name: "counting-1".into(),
                context_length: None,
            }])
        }
    }

    fn test_state() -> AppState {
        let gateway = Arc::new(ExternalToolGateway::new(GatewayConfig::default()));
        let orchestrator = Orchestrator::builder()
            .provider(Arc::new(CountingProvider))
            .tool(agent_core::builtin::CalculatorTool)
            .source(gateway.clone())
            .memory(ConversationMemory::new(Arc::new(MemoryStore::new())))
            .build()
            .unwrap();

        AppState {
            orchestrator: Arc::new(orchestrator),
            gateway,
        }
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, String) {
        let response = crate::router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_initialization() {
        let state = test_state();

        let (status, body) = send(&state, get("/health")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains(r#""status":"initializing""#));

        state.gateway.connect().await.unwrap();
        let (status, body) = send(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#""status":"ok""#));
        assert!(body.contains(r#""provider_connected":true"#));
    }

    #[tokio::test]
    async fn test_sync_chat_resumes_thread() {
        let state = test_state();

        let (status, body) = send(&state, post("/api/chat/sync", json!({"message": "hi", "thread_id": "t-1"}))).await;
        assert_eq!(status, StatusCode::OK);
        let reply: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(reply["message"], "2 messages");
        assert_eq!(reply["thread_id"], "t-1");

        let (_, body) = send(&state, post("/api/chat/sync", json!({"message": "again", "thread_id": "t-1"}))).await;
        let reply: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(reply["message"], "4 messages");

        let (status, body) = send(&state, get("/api/threads")).await;
        assert_eq!(status, StatusCode::OK);
        let threads: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(threads[0]["id"], "t-1");
        assert_eq!(threads[0]["title"], "hi");
    }

    #[tokio::test]
    async fn test_streaming_chat_events() {
        let state = test_state();

        let response = crate::router(state.clone())
            .oneshot(post("/api/chat", json!({"message": "hi", "thread_id": "abc"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[THREAD_ID_HEADER], "abc");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(r#"data: {"content":"2 messages","thread_id":"abc"}"#));
        assert!(body.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let state = test_state();

        let (status, body) = send(&state, post("/api/chat", json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("EMPTY_MESSAGE"));

        let (status, body) =
            send(&state, post("/api/chat/sync", json!({"message": "hi", "thread_id": "../x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("INVALID_THREAD_ID"));
    }

    #[tokio::test]
    async fn test_lists_tools_and_models() {
        let state = test_state();

        let (_, body) = send(&state, get("/api/tools")).await;
        let tools: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(tools["tools"][0]["name"], "calculate");
        assert_eq!(tools["tools"][0]["parameters"]["type"], "object");

        let (_, body) = send(&state, get("/api/models")).await;
        assert!(body.contains("counting-1"));

        let (status, body) = send(&state, get("/api/resources")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }
}
