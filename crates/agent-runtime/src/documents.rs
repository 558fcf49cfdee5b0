//! Document search tool
//!
//! Queries a similarity-search RPC endpoint that embeds the query and returns
//! scored chunks of the user's documents.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    tool::{Arguments, FieldKind, ParameterSchema, Tool, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::web::{http_client, missing_key, required_str};

const MATCH_THRESHOLD: f64 = 0.5;
const MATCH_COUNT: usize = 10;
const TOP_MATCHES: usize = 5;

/// One scored chunk
#[derive(Clone, Debug, Deserialize)]
pub struct DocumentMatch {
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub similarity: f64,
}

/// Best matches first, relevance-prefixed, separated by `---`
pub fn format_matches(query: &str, mut matches: Vec<DocumentMatch>) -> String {
    if matches.is_empty() {
        return format!("No information about '{}' was found in the documents.", query);
    }

    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    let chunks: Vec<String> = matches
        .iter()
        .take(TOP_MATCHES)
        .map(|m| format!("[Relevance: {:.2}] {}", m.similarity, m.content))
        .collect();

    format!("Information found in your documents:\n\n{}", chunks.join("\n---\n"))
}

pub struct DocumentSearchTool {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl DocumentSearchTool {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(20)),
            endpoint,
            api_key,
        }
    }

    /// `DOCUMENT_SEARCH_URL` and `DOCUMENT_SEARCH_KEY`
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("DOCUMENT_SEARCH_URL").ok().filter(|v| !v.is_empty()),
            std::env::var("DOCUMENT_SEARCH_KEY").ok().filter(|v| !v.is_empty()),
        )
    }
}

#[async_trait]
impl Tool for DocumentSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "search_my_documents".into(),
            description: "Search the user's personal documents for relevant information".into(),
            parameters: vec![ParameterSchema::required(
                "query",
                FieldKind::String,
                "What to look for in the documents",
            )],
        }
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<String> {
        let query = required_str(arguments, "query")?;
        let Some(endpoint) = &self.endpoint else {
            return Ok(missing_key("DOCUMENT_SEARCH_URL"));
        };

        tracing::info!(query, "Searching documents");

        let mut request = self.client.post(endpoint).json(&json!({
            "query": query,
            "match_threshold": MATCH_THRESHOLD,
            "match_count": MATCH_COUNT,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let matches: Vec<DocumentMatch> = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AgentError::tool_failed("search_my_documents", e))?
            .json()
            .await
            .map_err(|e| AgentError::tool_failed("search_my_documents", e))?;

        tracing::debug!(found = matches.len(), "Document matches");
        Ok(format_matches(query, matches))
    }
}
