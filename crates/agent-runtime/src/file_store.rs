//! File-backed conversation store
//!
//! One JSON Lines file per thread under a directory. Each append writes the
//! whole message set with a single write so a thread file never ends in the
//! middle of a tool-call pair.

use std::path::{Path, PathBuf};

use agent_core::{
    error::{AgentError, Result},
    memory::{title_for, ConversationStore, ThreadId, ThreadSummary},
    message::Message,
};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store under `dir`, created if missing
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| unavailable(&dir, e))?;
        tracing::info!(dir = %dir.display(), "Using file conversation store");
        Ok(Self { dir })
    }

    fn thread_path(&self, thread: &ThreadId) -> Result<PathBuf> {
        let id = thread.as_str();
        let valid = !id.is_empty()
            && id.len() <= 128
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AgentError::StoreUnavailable(format!("invalid thread id '{}'", id)));
        }
        Ok(self.dir.join(format!("{}.jsonl", id)))
    }

    async fn read_messages(path: &Path) -> Result<Option<Vec<Message>>> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(path, e)),
        };

        let messages = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable message");
                    None
                }
            })
            .collect();
        Ok(Some(messages))
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> AgentError {
    AgentError::StoreUnavailable(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn load(&self, thread: &ThreadId) -> Result<Option<Vec<Message>>> {
        Self::read_messages(&self.thread_path(thread)?).await
    }

    async fn append(&self, thread: &ThreadId, messages: &[Message]) -> Result<()> {
        let path = self.thread_path(thread)?;

        let mut batch = String::new();
        for message in messages {
            batch.push_str(&serde_json::to_string(message)?);
            batch.push('\n');
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| unavailable(&path, e))?;
        file.write_all(batch.as_bytes()).await.map_err(|e| unavailable(&path, e))?;
        file.flush().await.map_err(|e| unavailable(&path, e))?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ThreadSummary>> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| unavailable(&self.dir, e))?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(|e| unavailable(&self.dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(messages) = Self::read_messages(&path).await? else {
                continue;
            };
            let (Some(first), Some(last)) = (messages.first(), messages.last()) else {
                continue;
            };

            summaries.push(ThreadSummary {
                id: ThreadId::from_string(id),
                title: title_for(&messages),
                message_count: messages.len(),
                created_at: first.timestamp,
                updated_at: last.timestamp,
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::ToolCall;

    #[tokio::test]
    async fn test_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let thread = ThreadId::new();

        assert!(store.load(&thread).await.unwrap().is_none());

        let call = ToolCall::new("calculate").with_arg("expression", "2+2");
        store
            .append(&thread, &[Message::system("preamble"), Message::user("What's 2+2?\nthanks")])
            .await
            .unwrap();
        store
            .append(
                &thread,
                &[
                    Message::assistant_with_calls(None, vec![call.clone()]),
                    Message::tool_result(call.id.clone(), "calculate", "2 + 2 = 4"),
                    Message::assistant("4"),
                ],
            )
            .await
            .unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        let messages = reopened.load(&thread).await.unwrap().unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].tool_calls[0].id, call.id);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some(call.id.as_str()));

        let listed = reopened.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "What's 2+2?");
        assert_eq!(listed[0].message_count, 5);
    }

    #[tokio::test]
    async fn test_rejects_path_like_thread_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let thread = ThreadId::from_string("../escape");

        assert!(matches!(store.load(&thread).await, Err(AgentError::StoreUnavailable(_))));
        assert!(matches!(
            store.append(&thread, &[Message::user("x")]).await,
            Err(AgentError::StoreUnavailable(_))
        ));
    }
}
