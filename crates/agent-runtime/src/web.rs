//! Web Tools
//!
//! `internet_search` (Jina search) and `analyze_url_content` (OCR.space).
//! A tool whose API key is missing stays registered and answers with a
//! configuration error text, so the model can tell the user.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    tool::{Arguments, FieldKind, ParameterSchema, Tool, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;

const JINA_SEARCH_URL: &str = "https://s.jina.ai/";
const OCR_SPACE_URL: &str = "https://api.ocr.space/parse/image";

pub(crate) fn missing_key(var: &str) -> String {
    format!("Error: {} is not configured.", var)
}

pub(crate) fn required_str<'a>(arguments: &'a Arguments, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AgentError::ToolValidation(format!("Missing {}", key)))
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

/// Web search through the Jina search endpoint
pub struct InternetSearchTool {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl InternetSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(20)),
            api_key,
            base_url: JINA_SEARCH_URL.into(),
        }
    }

    /// Key from `JINA_API_KEY`
    pub fn from_env() -> Self {
        Self::new(env_key("JINA_API_KEY"))
    }

    fn search_url(&self, query: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| AgentError::Config(format!("Invalid search URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|()| AgentError::Config("Search URL cannot take a path".into()))?
            .pop_if_empty()
            .push(query);
        Ok(url)
    }
}

#[async_trait]
impl Tool for InternetSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "internet_search".into(),
            description: "Search the internet for up-to-date information".into(),
            parameters: vec![ParameterSchema::required(
                "query",
                FieldKind::String,
                "What to search for",
            )],
        }
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<String> {
        let query = required_str(arguments, "query")?;
        let Some(api_key) = &self.api_key else {
            return Ok(missing_key("JINA_API_KEY"));
        };

        tracing::info!(query, "Searching the web");

        let response = self
            .client
            .get(self.search_url(query)?)
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AgentError::tool_failed("internet_search", e))?;

        response
            .text()
            .await
            .map_err(|e| AgentError::tool_failed("internet_search", e))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    is_errored_on_processing: bool,

    #[serde(default)]
    error_message: Option<serde_json::Value>,

    #[serde(default)]
    parsed_results: Vec<OcrParsed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrParsed {
    #[serde(default)]
    parsed_text: Option<String>,
}

impl OcrResponse {
    fn into_text(self) -> std::result::Result<String, String> {
        if self.is_errored_on_processing {
            let message = match self.error_message {
                Some(serde_json::Value::String(s)) => s,
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
                _ => "unknown error".into(),
            };
            return Err(message);
        }

        let text = self
            .parsed_results
            .into_iter()
            .next()
            .and_then(|r| r.parsed_text)
            .unwrap_or_else(|| "No text could be extracted.".into());
        Ok(format!("Text extracted from the URL:\n\n{}", text))
    }
}

/// OCR over an image or document URL
pub struct UrlAnalyzerTool {
    client: reqwest::Client,
    api_key: Option<String>,
    language: String,
}

impl UrlAnalyzerTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(30)),
            api_key,
            language: "spa".into(),
        }
    }

    /// Key from `OCR_SPACE_API_KEY`
    pub fn from_env() -> Self {
        Self::new(env_key("OCR_SPACE_API_KEY"))
    }
}

#[async_trait]
impl Tool for UrlAnalyzerTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "analyze_url_content".into(),
            description: "Extract the text of an image or document at a URL using OCR".into(),
            parameters: vec![ParameterSchema::required(
                "url",
                FieldKind::String,
                "Public URL of the image or document",
            )],
        }
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<String> {
        let url = required_str(arguments, "url")?;
        let Some(api_key) = &self.api_key else {
            return Ok(missing_key("OCR_SPACE_API_KEY"));
        };

        tracing::info!(url, "Analyzing URL content");

        let form = [
            ("url", url),
            ("apikey", api_key.as_str()),
            ("language", self.language.as_str()),
        ];
        let parsed: OcrResponse = self
            .client
            .post(OCR_SPACE_URL)
            .form(&form)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AgentError::tool_failed("analyze_url_content", e))?
            .json()
            .await
            .map_err(|e| AgentError::tool_failed("analyze_url_content", e))?;

        parsed
            .into_text()
            .map_err(|e| AgentError::tool_failed("analyze_url_content", format!("OCR error: {}", e)))
    }
}
