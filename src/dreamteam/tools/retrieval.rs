//! Retrieval over a search index.
//!
//! A retrieval agent owns one [`RetrievalTool`] bound to its index. A query is sent as a
//! text vector query against the `text_vector` field with `k = 1`, exhaustive search, and only
//! the single best document is kept. The tool's answer is the `chunk` text of what came back,
//! concatenated; an index with no match yields the empty string.

use crate::dreamteam::config::{ConfigurationError, DreamTeamConfig};
use crate::dreamteam::credential::{Credential, SEARCH_SCOPE};
use crate::dreamteam::http_client_pool;
use crate::dreamteam::tool_protocol::{
    required_str, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use crate::dreamteam::tool_protocols::CustomToolProtocol;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

pub const SEARCH_API_VERSION: &str = "2024-07-01";
pub const SEARCH_TOOL_NAME: &str = "search";
const VECTOR_FIELD: &str = "text_vector";
const SELECTED_FIELDS: &str = "parent_id,chunk_id,chunk";

/// One indexed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub chunk: String,
}

#[derive(Debug)]
pub enum RetrievalError {
    Transport(String),
    Auth(String),
    Malformed(String),
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalError::Transport(msg) => write!(f, "Search request failed: {}", msg),
            RetrievalError::Auth(msg) => write!(f, "Search service rejected credentials: {}", msg),
            RetrievalError::Malformed(msg) => write!(f, "Unreadable search response: {}", msg),
        }
    }
}

impl Error for RetrievalError {}

/// Anything able to answer a vector query against a named index.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn top_passages(
        &self,
        index_name: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Passage>,
}

/// The hosted search service's REST API.
pub struct AzureSearchBackend {
    endpoint: String,
    credential: Credential,
}

impl AzureSearchBackend {
    pub fn new(endpoint: impl Into<String>, credential: Credential) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    pub fn from_config(config: &DreamTeamConfig) -> Result<Self, ConfigurationError> {
        let endpoint = config.require_search_endpoint()?;
        Ok(Self::new(endpoint, config.search_credential()))
    }

    fn request_body(query: &str, k: usize) -> serde_json::Value {
        json!({
            "vectorQueries": [{
                "kind": "text",
                "text": query,
                "k": k,
                "fields": VECTOR_FIELD,
                "exhaustive": true,
            }],
            "select": SELECTED_FIELDS,
            "top": k,
        })
    }
}

#[async_trait]
impl SearchBackend for AzureSearchBackend {
    async fn top_passages(
        &self,
        index_name: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, index_name, SEARCH_API_VERSION
        );
        let request = http_client_pool::get_or_create_client(&self.endpoint)
            .post(&url)
            .json(&Self::request_body(query, k));
        let request = self
            .credential
            .authorize(request, SEARCH_SCOPE)
            .await
            .map_err(|e| RetrievalError::Auth(e.to_string()))?;

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Transport(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(RetrievalError::Auth(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        Ok(parsed.value.into_iter().take(k).collect())
    }
}

/// The `search` tool of one retrieval agent.
#[derive(Clone)]
pub struct RetrievalTool {
    backend: Arc<dyn SearchBackend>,
    index_name: String,
}

impl RetrievalTool {
    pub fn new(backend: Arc<dyn SearchBackend>, index_name: impl Into<String>) -> Self {
        Self {
            backend,
            index_name: index_name.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Chunk text of the best match, or `""` when the index has nothing relevant.
    pub async fn search(&self, query: &str) -> Result<String, RetrievalError> {
        log::debug!(
            "dreamteam::tools::retrieval: querying '{}' for {:?}",
            self.index_name,
            query
        );
        let passages = self.backend.top_passages(&self.index_name, query, 1).await?;
        Ok(passages
            .into_iter()
            .map(|p| p.chunk)
            .collect::<Vec<_>>()
            .join(""))
    }

    /// Expose [`search`](RetrievalTool::search) as the `search` tool on `protocol`.
    pub async fn register(&self, protocol: &CustomToolProtocol) {
        let tool = self.clone();
        protocol
            .register_async_tool(
                ToolMetadata::new(
                    SEARCH_TOOL_NAME,
                    format!(
                        "Search the '{}' index and return the most relevant passage.",
                        self.index_name
                    ),
                )
                .with_parameter(
                    ToolParameter::new("query", ToolParameterType::String)
                        .with_description("The question to look up")
                        .required(),
                ),
                Arc::new(move |params| {
                    let tool = tool.clone();
                    Box::pin(async move {
                        let query = match required_str(&params, "query") {
                            Ok(query) => query.to_string(),
                            Err(e) => return Ok(ToolResult::failure(e.to_string())),
                        };
                        match tool.search(&query).await {
                            Ok(text) => Ok(ToolResult::success(json!(text))),
                            Err(e) => Ok(ToolResult::failure(e.to_string())),
                        }
                    })
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dreamteam::tool_protocol::ToolProtocol;
    use std::sync::Mutex;

    struct FixedBackend {
        passages: Vec<Passage>,
        calls: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl SearchBackend for FixedBackend {
        async fn top_passages(
            &self,
            index_name: &str,
            query: &str,
            k: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            self.calls
                .lock()
                .unwrap()
                .push((index_name.to_string(), query.to_string(), k));
            Ok(self.passages.iter().take(k).cloned().collect())
        }
    }

    fn passage(chunk: &str) -> Passage {
        Passage {
            parent_id: Some("p1".to_string()),
            chunk_id: Some("c1".to_string()),
            chunk: chunk.to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_asks_for_exactly_one_passage() {
        let backend = Arc::new(FixedBackend {
            passages: vec![passage("first"), passage("second")],
            calls: Mutex::new(Vec::new()),
        });
        let tool = RetrievalTool::new(backend.clone(), "docs-index");

        assert_eq!(tool.search("q").await.unwrap(), "first");
        assert_eq!(
            backend.calls.lock().unwrap()[0],
            ("docs-index".to_string(), "q".to_string(), 1)
        );
    }

    #[tokio::test]
    async fn test_no_match_is_empty_text() {
        let backend = Arc::new(FixedBackend {
            passages: Vec::new(),
            calls: Mutex::new(Vec::new()),
        });
        let tool = RetrievalTool::new(backend, "docs-index");
        assert_eq!(tool.search("anything").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_registered_tool_returns_raw_chunk() {
        let backend = Arc::new(FixedBackend {
            passages: vec![passage("Refunds within 30 days.")],
            calls: Mutex::new(Vec::new()),
        });
        let protocol = CustomToolProtocol::new();
        RetrievalTool::new(backend, "docs-index")
            .register(&protocol)
            .await;

        let result = protocol
            .execute("search", json!({"query": "refund policy"}))
            .await
            .unwrap();
        assert_eq!(result.content_text(), "Refunds within 30 days.");

        let missing = protocol.execute("search", json!({})).await.unwrap();
        assert!(!missing.success);
    }

    #[test]
    fn test_request_body_shape() {
        let body = AzureSearchBackend::request_body("hello", 1);
        assert_eq!(body["vectorQueries"][0]["fields"], "text_vector");
        assert_eq!(body["vectorQueries"][0]["k"], 1);
        assert_eq!(body["vectorQueries"][0]["exhaustive"], true);
        assert_eq!(body["select"], "parent_id,chunk_id,chunk");
        assert_eq!(body["top"], 1);
    }
}
