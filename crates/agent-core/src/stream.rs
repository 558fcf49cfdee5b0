//! Streaming Emitter
//!
//! Surfaces final assistant text to the caller as discrete events. Tool
//! requests and tool results stay internal to the loop. Every stream ends
//! with exactly one [`StreamEvent::Done`].

use serde::Serialize;
use tokio::sync::mpsc;

use crate::memory::ThreadId;

/// Event delivered to the caller
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Assistant message with final textual content
    Content { thread_id: ThreadId, content: String },
    /// Terminal failure; always followed by `Done`
    Error { thread_id: ThreadId, code: String, error: String },
    /// End-of-stream marker
    Done { thread_id: ThreadId },
}

/// Sending half owned by the orchestration loop
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    thread_id: ThreadId,
}

impl Emitter {
    /// Channel pair for one execution
    pub fn channel(thread_id: ThreadId, capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, thread_id }, rx)
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Caller went away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn content(&self, content: impl Into<String>) -> bool {
        self.send(StreamEvent::Content {
            thread_id: self.thread_id.clone(),
            content: content.into(),
        })
        .await
    }

    pub async fn error(&self, code: &str, error: impl Into<String>) -> bool {
        self.send(StreamEvent::Error {
            thread_id: self.thread_id.clone(),
            code: code.into(),
            error: error.into(),
        })
        .await
    }

    /// Close the stream
    pub async fn done(self) {
        let thread_id = self.thread_id.clone();
        self.send(StreamEvent::Done { thread_id }).await;
    }

    async fn send(&self, event: StreamEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            tracing::debug!(thread_id = %self.thread_id, "Stream receiver dropped");
            return false;
        }
        true
    }
}
