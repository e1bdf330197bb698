//! Tool Protocol Implementations
//!
//! [`CustomToolProtocol`] lets plain Rust closures act as tools. The builtin tools (file
//! browsing, web browsing, index search) are registered on it when a member is built.
//!
//! ```rust,no_run
//! use dreamteam::tool_protocols::CustomToolProtocol;
//! use dreamteam::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType, ToolResult};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let protocol = CustomToolProtocol::new();
//! protocol
//!     .register_tool(
//!         ToolMetadata::new("shout", "Upper-case the text")
//!             .with_parameter(ToolParameter::new("text", ToolParameterType::String).required()),
//!         Arc::new(|params| {
//!             let text = params["text"].as_str().unwrap_or("");
//!             Ok(ToolResult::success(serde_json::json!(text.to_uppercase())))
//!         }),
//!     )
//!     .await;
//! # }
//! ```

use crate::dreamteam::tool_protocol::{ToolError, ToolMetadata, ToolProtocol, ToolResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Type alias for synchronous tool functions.
pub type ToolFunction =
    Arc<dyn Fn(JsonValue) -> Result<ToolResult, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Type alias for asynchronous tool functions.
pub type AsyncToolFunction = Arc<
    dyn Fn(
            JsonValue,
        )
            -> Pin<Box<dyn Future<Output = Result<ToolResult, Box<dyn Error + Send + Sync>>> + Send>>
        + Send
        + Sync,
>;

enum Handler {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

/// Closure-backed tools, listed in registration order.
pub struct CustomToolProtocol {
    tools: RwLock<Vec<ToolMetadata>>,
    handlers: RwLock<HashMap<String, Handler>>,
}

impl CustomToolProtocol {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a synchronous tool function. Re-registering a name replaces it.
    pub async fn register_tool(&self, metadata: ToolMetadata, function: ToolFunction) {
        self.insert(metadata, Handler::Sync(function)).await;
    }

    /// Register an asynchronous tool function.
    pub async fn register_async_tool(&self, metadata: ToolMetadata, function: AsyncToolFunction) {
        self.insert(metadata, Handler::Async(function)).await;
    }

    async fn insert(&self, metadata: ToolMetadata, handler: Handler) {
        let name = metadata.name.clone();
        let mut tools = self.tools.write().await;
        tools.retain(|t| t.name != name);
        tools.push(metadata);
        self.handlers.write().await.insert(name, handler);
    }
}

impl Default for CustomToolProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProtocol for CustomToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let pending = {
            let handlers = self.handlers.read().await;
            match handlers.get(tool_name) {
                Some(Handler::Sync(func)) => return func(parameters),
                Some(Handler::Async(func)) => func(parameters),
                None => return Err(Box::new(ToolError::NotFound(tool_name.to_string()))),
            }
        };
        pending.await
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(self.tools.read().await.clone())
    }

    fn protocol_name(&self) -> &str {
        "custom"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_and_async_tools() {
        let protocol = CustomToolProtocol::new();
        protocol
            .register_tool(
                ToolMetadata::new("double", "Double a number"),
                Arc::new(|params| {
                    let n = params["n"].as_f64().unwrap_or(0.0);
                    Ok(ToolResult::success(serde_json::json!(n * 2.0)))
                }),
            )
            .await;
        protocol
            .register_async_tool(
                ToolMetadata::new("greet", "Greet someone"),
                Arc::new(|params| {
                    Box::pin(async move {
                        let who = params["who"].as_str().unwrap_or("nobody").to_string();
                        Ok(ToolResult::success(serde_json::json!(format!("hi {}", who))))
                    })
                }),
            )
            .await;

        let doubled = protocol
            .execute("double", serde_json::json!({"n": 21}))
            .await
            .unwrap();
        assert_eq!(doubled.output, serde_json::json!(42.0));

        let greeting = protocol
            .execute("greet", serde_json::json!({"who": "team"}))
            .await
            .unwrap();
        assert_eq!(greeting.content_text(), "hi team");

        let names: Vec<String> = protocol
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["double", "greet"]);

        assert!(protocol
            .execute("missing", serde_json::json!({}))
            .await
            .is_err());
    }
}
