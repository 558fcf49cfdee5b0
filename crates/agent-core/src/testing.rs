//! Test doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, GenerationOptions, LlmProvider, ModelInfo};
use crate::tool::ToolSchema;

/// Provider that replays a fixed script of completions
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Completion>>>,
    fallback: Option<Completion>,
    fail_always: bool,
    delay: Option<Duration>,
    requests: Mutex<Vec<(Vec<Message>, Vec<ToolSchema>, String)>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Completion>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            fail_always: false,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call returns `completion`
    pub fn repeating(completion: Completion) -> Self {
        Self {
            fallback: Some(completion),
            ..Self::new(vec![])
        }
    }

    /// Every call fails
    pub fn failing() -> Self {
        Self {
            fail_always: true,
            ..Self::new(vec![])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<Vec<Message>> {
        self.requests.lock().unwrap().last().map(|(m, _, _)| m.clone())
    }

    pub fn request(&self, idx: usize) -> Option<Vec<Message>> {
        self.requests.lock().unwrap().get(idx).map(|(m, _, _)| m.clone())
    }

    pub fn tools_offered(&self, idx: usize) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .get(idx)
            .map(|(_, t, _)| t.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn model_used(&self, idx: usize) -> Option<String> {
        self.requests.lock().unwrap().get(idx).map(|(_, _, m)| m.clone())
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail_always)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.to_vec(), options.model.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_always {
            return Err(AgentError::ModelCallFailed("scripted failure".into()));
        }

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(completion)) => Ok(completion.clone()),
            (None, None) => Err(AgentError::ModelCallFailed("script exhausted".into())),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![])
    }
}
