//! Orchestration State Machine
//!
//! The decide/act loop. Each execution asks the primary model for a
//! decision, dispatches the tools it requests, folds the compacted results
//! back in and repeats until the model answers in text.
//!
//! ```text
//!            ┌──────────── tool results folded in ────────────┐
//!            ▼                                                │
//!   ──▶ DECIDING ── tool calls ──▶ ACTING ────────────────────┘
//!            │
//!            ├── text answer ─────────────▶ DONE
//!            └── model/store failure,
//!                recursion limit ─────────▶ ABORTED
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;

use crate::compaction::Compactor;
use crate::error::{AgentError, Result};
use crate::memory::{ConversationMemory, Loaded, ThreadId};
use crate::message::{Conversation, Message};
use crate::provider::{Completion, GenerationOptions, LlmProvider};
use crate::stream::{Emitter, StreamEvent};
use crate::tool::{ToolCall, ToolRegistry, ToolSnapshot};

/// Default bound on decide/act rounds
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Fixed system preamble; `None` uses the dated default
    pub preamble: Option<String>,

    /// Maximum DECIDING → ACTING transitions per execution
    pub recursion_limit: usize,

    /// Primary model options
    pub generation: GenerationOptions,

    /// Timeout for one primary model call
    pub model_timeout: Duration,

    /// Buffered events per stream
    pub stream_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            preamble: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            generation: GenerationOptions::default(),
            model_timeout: Duration::from_secs(120),
            stream_capacity: 16,
        }
    }
}

/// System preamble stating today's date
pub fn default_preamble(today: DateTime<Utc>) -> String {
    format!(
        "Today is {}. You are an expert orchestrator. Your main goal is to determine the user's \
intent and select the most suitable tool from your list. If the request is a greeting or a general \
question without a clear task, answer directly. When a tool returns information, synthesize it into \
a clear and concise answer for the user, always taking the current date into account.",
        today.format("%d %B %Y")
    )
}

/// Supplies dynamically discovered tools before each snapshot
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Bring the registry up to date with this source
    async fn refresh(&self, registry: &ToolRegistry);
}

/// One user turn
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub message: String,

    /// Primary model override
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model: None,
        }
    }
}

/// Loop states; `Done` and `Aborted` are terminal
#[derive(Debug)]
pub enum LoopState {
    Deciding,
    Acting(Vec<ToolCall>),
    Done(String),
    Aborted(AgentError),
}

/// Summary of one execution
#[derive(Debug)]
pub struct RunReport {
    pub thread_id: ThreadId,

    /// Final answer, `None` when aborted
    pub answer: Option<String>,

    /// Why the loop aborted
    pub error: Option<AgentError>,

    /// DECIDING → ACTING transitions taken
    pub rounds: usize,

    /// Whether the thread's store received this execution's messages
    pub persisted: bool,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.answer.is_some()
    }
}

/// The main orchestrator
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    sources: Vec<Arc<dyn ToolSource>>,
    compactor: Arc<Compactor>,
    memory: Arc<ConversationMemory>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Refresh dynamic sources and take this execution's snapshot
    pub async fn snapshot(&self) -> ToolSnapshot {
        for source in &self.sources {
            source.refresh(&self.registry).await;
        }
        self.registry.snapshot()
    }

    /// Start an execution in the background and return its event stream.
    ///
    /// A missing `thread_id` starts a new thread; the id actually used is
    /// returned so the caller can resume later.
    pub fn stream(
        self: &Arc<Self>,
        thread_id: Option<ThreadId>,
        request: ChatRequest,
    ) -> (ThreadId, mpsc::Receiver<StreamEvent>) {
        let thread_id = thread_id.unwrap_or_default();
        let (emitter, rx) = Emitter::channel(thread_id.clone(), self.config.stream_capacity);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(request, emitter).await;
        });

        (thread_id, rx)
    }

    /// Run to completion and return the final answer
    pub async fn ask(
        &self,
        thread_id: Option<ThreadId>,
        request: ChatRequest,
    ) -> Result<(ThreadId, String)> {
        let thread_id = thread_id.unwrap_or_default();
        let (emitter, mut rx) = Emitter::channel(thread_id.clone(), self.config.stream_capacity);

        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let report = self.run(request, emitter).await;
        let _ = drain.await;

        match (report.answer, report.error) {
            (Some(answer), _) => Ok((thread_id, answer)),
            (None, Some(e)) => Err(e),
            (None, None) => Err(AgentError::Other("execution ended without an answer".into())),
        }
    }

    /// Execute one request against the emitter's thread
    pub async fn run(&self, request: ChatRequest, emitter: Emitter) -> RunReport {
        let thread_id = emitter.thread_id().clone();
        let _thread_guard = self.memory.lock(&thread_id).await;

        let mut report = RunReport {
            thread_id: thread_id.clone(),
            answer: None,
            error: None,
            rounds: 0,
            persisted: false,
        };

        let (mut conversation, mut persist) = match self.memory.load(&thread_id).await {
            Ok(Loaded::History(history)) => (Conversation::resume(history), true),
            Ok(Loaded::Fresh) => (self.opening(), true),
            Ok(Loaded::Stateless) => (self.opening(), false),
            Err(e) => {
                tracing::error!(thread_id = %thread_id, error = %e, "Failed to load conversation");
                self.finish(emitter, Some(&e)).await;
                report.error = Some(e);
                return report;
            }
        };
        conversation.push(Message::user(&request.message));

        let snapshot = self.snapshot().await;
        let mut options = self.config.generation.clone();
        if let Some(model) = request.model {
            options.model = model;
        }

        tracing::info!(
            thread_id = %thread_id,
            tools = snapshot.len(),
            history = conversation.len(),
            "Starting orchestration"
        );

        let mut state = LoopState::Deciding;
        loop {
            state = match state {
                LoopState::Deciding => {
                    if emitter.is_closed() {
                        LoopState::Aborted(AgentError::Cancelled)
                    } else {
                        match self.decide(&conversation, &snapshot, &options).await {
                            Err(e) => LoopState::Aborted(e),
                            Ok(completion) => {
                                let message = completion.into_message();
                                if !message.has_tool_calls() {
                                    let answer = message.text().to_string();
                                    conversation.push(message);
                                    match self.flush(&thread_id, &mut conversation, &mut persist).await {
                                        Ok(()) => LoopState::Done(answer),
                                        Err(e) => LoopState::Aborted(e),
                                    }
                                } else if report.rounds >= self.config.recursion_limit {
                                    LoopState::Aborted(AgentError::RecursionLimitExceeded(
                                        self.config.recursion_limit,
                                    ))
                                } else {
                                    report.rounds += 1;
                                    let calls = message.tool_calls.clone();
                                    conversation.push(message);
                                    LoopState::Acting(calls)
                                }
                            }
                        }
                    }
                }
                LoopState::Acting(calls) => {
                    let checkpoint = conversation.len() - 1;
                    match self.act(&calls, &snapshot, &mut conversation, &emitter).await {
                        Err(e) => {
                            conversation.rollback_to(checkpoint);
                            LoopState::Aborted(e)
                        }
                        Ok(()) => match self.flush(&thread_id, &mut conversation, &mut persist).await {
                            Ok(()) => LoopState::Deciding,
                            Err(e) => LoopState::Aborted(e),
                        },
                    }
                }
                LoopState::Done(answer) => {
                    tracing::info!(thread_id = %thread_id, rounds = report.rounds, "Orchestration done");
                    if !answer.trim().is_empty() {
                        emitter.content(&answer).await;
                    }
                    report.answer = Some(answer);
                    break;
                }
                LoopState::Aborted(e) => {
                    match &e {
                        AgentError::Cancelled => {
                            tracing::info!(thread_id = %thread_id, "Caller disconnected, results discarded");
                        }
                        _ => tracing::error!(thread_id = %thread_id, rounds = report.rounds, error = %e, "Orchestration aborted"),
                    }
                    report.error = Some(e);
                    break;
                }
            };
        }

        report.persisted = persist;
        self.finish(emitter, report.error.as_ref()).await;
        report
    }

    /// Messages opening a thread with no prior state
    fn opening(&self) -> Conversation {
        let preamble = self
            .config
            .preamble
            .clone()
            .unwrap_or_else(|| default_preamble(Utc::now()));
        let mut conversation = Conversation::new();
        conversation.push(Message::system(preamble));
        conversation
    }

    /// DECIDING: one primary model call
    async fn decide(
        &self,
        conversation: &Conversation,
        snapshot: &ToolSnapshot,
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let call = self
            .provider
            .complete(conversation.messages(), snapshot.schemas(), options);

        match tokio::time::timeout(self.config.model_timeout, call).await {
            Err(_) => Err(AgentError::ModelCallFailed(format!(
                "{} did not answer within {:?}",
                self.provider.name(),
                self.config.model_timeout
            ))),
            Ok(Err(e @ AgentError::ModelCallFailed(_))) => Err(e),
            Ok(Err(e)) => Err(AgentError::ModelCallFailed(e.to_string())),
            Ok(Ok(completion)) => Ok(completion),
        }
    }

    /// ACTING: run every pending call concurrently, fold results in call order
    async fn act(
        &self,
        calls: &[ToolCall],
        snapshot: &ToolSnapshot,
        conversation: &mut Conversation,
        emitter: &Emitter,
    ) -> Result<()> {
        for call in calls {
            tracing::debug!(tool = %call.name, call_id = %call.id, "Dispatching tool");
        }

        let results = join_all(calls.iter().map(|call| snapshot.invoke(call))).await;

        if emitter.is_closed() {
            return Err(AgentError::Cancelled);
        }

        let query = conversation.last_user_text().to_string();
        for result in results {
            tracing::debug!(
                tool = %result.name,
                call_id = %result.call_id,
                success = result.is_success(),
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Tool finished"
            );
            let content = self.compactor.compact(&query, result.content()).await;
            conversation.push(Message::tool_result(result.call_id, result.name, content));
        }
        Ok(())
    }

    /// Append the unsaved complete message set to the thread
    async fn flush(
        &self,
        thread_id: &ThreadId,
        conversation: &mut Conversation,
        persist: &mut bool,
    ) -> Result<()> {
        if *persist {
            *persist = self.memory.append(thread_id, conversation.unsaved()).await?;
        }
        conversation.checkpoint();
        Ok(())
    }

    /// Terminal events: error (if any) then end marker
    async fn finish(&self, emitter: Emitter, error: Option<&AgentError>) {
        if let Some(e) = error {
            if !matches!(e, AgentError::Cancelled) {
                emitter.error(e.code(), e.user_message()).await;
            }
        }
        emitter.done().await;
    }

    /// Get the tool registry
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Get the conversation memory
    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Get the primary provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

/// Builder for Orchestrator configuration
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    registry: Arc<ToolRegistry>,
    sources: Vec<Arc<dyn ToolSource>>,
    compactor: Option<Compactor>,
    memory: Option<ConversationMemory>,
    config: OrchestratorConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            registry: Arc::new(ToolRegistry::new()),
            sources: Vec::new(),
            compactor: None,
            memory: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn tool<T: crate::tool::Tool + 'static>(self, tool: T) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn source(mut self, source: Arc<dyn ToolSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn compactor(mut self, compactor: Compactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.config.preamble = Some(preamble.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.config.recursion_limit = limit;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        let compactor = self
            .compactor
            .unwrap_or_else(|| Compactor::truncate_only(crate::compaction::DEFAULT_THRESHOLD));

        Ok(Orchestrator {
            provider,
            registry: self.registry,
            sources: self.sources,
            compactor: Arc::new(compactor),
            memory: Arc::new(self.memory.unwrap_or_else(ConversationMemory::stateless)),
            config: self.config,
        })
    }
}
