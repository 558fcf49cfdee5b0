//! Output Compaction
//!
//! Bounds tool output before it re-enters the conversation. Oversized
//! results are summarized by an auxiliary model with the user's question as
//! context; when that call fails the result is hard-truncated instead.

use std::sync::Arc;

use crate::error::truncate_chars;
use crate::message::Message;
use crate::provider::{GenerationOptions, LlmProvider};

/// Default size threshold in characters
pub const DEFAULT_THRESHOLD: usize = 32_000;

const TRUNCATION_MARKER: &str = "\n\n[output truncated]";

/// Compaction settings
#[derive(Clone, Debug)]
pub struct CompactionConfig {
    /// Results longer than this (in chars) are compacted
    pub threshold: usize,

    /// Options for the auxiliary summarization call
    pub generation: GenerationOptions,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            generation: GenerationOptions::default(),
        }
    }
}

/// Post-processes raw tool output
pub struct Compactor {
    provider: Option<Arc<dyn LlmProvider>>,
    config: CompactionConfig,
}

impl Compactor {
    /// Summarize with `provider` above the threshold
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompactionConfig) -> Self {
        Self {
            provider: Some(provider),
            config,
        }
    }

    /// Only hard-truncate, never call a model
    pub fn truncate_only(threshold: usize) -> Self {
        Self {
            provider: None,
            config: CompactionConfig {
                threshold,
                ..Default::default()
            },
        }
    }

    /// Compact `raw` for the question `query`.
    ///
    /// Text at or under the threshold is returned unchanged. The result is
    /// never longer than the threshold plus a short marker.
    pub async fn compact(&self, query: &str, raw: String) -> String {
        let threshold = self.config.threshold;
        let raw_len = raw.chars().count();
        if raw_len <= threshold {
            return raw;
        }

        let prefix = truncate_chars(&raw, threshold);
        let Some(provider) = &self.provider else {
            return format!("{}{}", prefix, TRUNCATION_MARKER);
        };

        tracing::warn!(chars = raw_len, threshold, "Tool output too long, summarizing");

        let prompt = format!(
            "Original question: \"{}\"\n\nTool result:\n---\n{}\n---\n\nConcisely summarize the information relevant to answering the question:",
            query, prefix
        );

        match provider
            .complete(&[Message::user(prompt)], &[], &self.config.generation)
            .await
        {
            Ok(completion) => {
                let summary = completion.content.unwrap_or_default();
                if summary.trim().is_empty() {
                    tracing::warn!("Summarizer returned nothing, truncating instead");
                    format!("{}{}", prefix, TRUNCATION_MARKER)
                } else if summary.chars().count() > threshold {
                    format!("{}{}", truncate_chars(&summary, threshold), TRUNCATION_MARKER)
                } else {
                    summary
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Summarization failed, truncating tool output");
                format!("{}{}", prefix, TRUNCATION_MARKER)
            }
        }
    }
}
