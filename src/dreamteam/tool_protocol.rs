//! Tool abstraction shared by every LLM-backed team member.
//!
//! ```text
//! Agent → ToolRegistry → ToolProtocol (trait) → [CustomToolProtocol | user-defined]
//! ```
//!
//! A member advertises its tools in the system prompt (see
//! [`ToolRegistry::prompt_section`]) and the model asks for one with a
//! `{"tool_call": {"name": ..., "parameters": {...}}}` fragment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Metadata key under which a tool may return an image for the transcript.
pub const IMAGE_METADATA_KEY: &str = "image";

/// Represents the result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    /// Side-channel data (e.g. an image for the transcript).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Text handed back to the model and shown in the transcript. Plain strings are passed
    /// through untouched, anything else is rendered as JSON.
    pub fn content_text(&self) -> String {
        if !self.success {
            return self
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
        }
        match &self.output {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Defines the type of a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// Defines a parameter for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Metadata about a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Trait for implementing tool execution protocols
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    /// Protocol identifier (e.g. "custom")
    fn protocol_name(&self) -> &str;
}

/// Error types for tool operations
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
    /// The provided JSON parameters failed validation.
    InvalidParameters(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Pull a required string parameter out of a tool call payload.
pub fn required_str<'a>(
    parameters: &'a serde_json::Value,
    name: &str,
) -> Result<&'a str, ToolError> {
    parameters
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("'{}' must be a string", name)))
}

/// The tools one member may call, backed by a single protocol.
pub struct ToolRegistry {
    tools: Vec<ToolMetadata>,
    protocol: Arc<dyn ToolProtocol>,
}

impl ToolRegistry {
    /// Snapshot the protocol's tool list.
    pub async fn from_protocol(
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let tools = protocol.list_tools().await?;
        Ok(Self { tools, protocol })
    }

    pub fn list_tools(&self) -> &[ToolMetadata] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a named tool with serialized parameters.
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        if !self.tools.iter().any(|t| t.name == tool_name) {
            return Err(Box::new(ToolError::NotFound(tool_name.to_string())));
        }
        self.protocol.execute(tool_name, parameters).await
    }

    /// System prompt addendum describing the tools and the call format.
    pub fn prompt_section(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }
        let mut section = String::from("\n\nYou have access to the following tools:\n");
        for tool in &self.tools {
            section.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            if !tool.parameters.is_empty() {
                section.push_str("  Parameters:\n");
                for param in &tool.parameters {
                    section.push_str(&format!(
                        "    - {} ({:?}{}): {}\n",
                        param.name,
                        param.param_type,
                        if param.required { ", required" } else { "" },
                        param.description.as_deref().unwrap_or("No description")
                    ));
                }
            }
        }
        section.push_str(
            "\nTo use a tool, respond with a JSON object in the following format:\n\
             {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
             After tool execution, I'll provide the result and you can continue.\n",
        );
        section
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProtocol;

    #[async_trait]
    impl ToolProtocol for EchoProtocol {
        async fn execute(
            &self,
            tool_name: &str,
            parameters: serde_json::Value,
        ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Ok(ToolResult::success(serde_json::json!({
                "tool": tool_name,
                "echo": parameters
            })))
        }

        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
            Ok(vec![ToolMetadata::new("echo", "Echo the parameters").with_parameter(
                ToolParameter::new("text", ToolParameterType::String).required(),
            )])
        }

        fn protocol_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_registry_executes_listed_tools_only() {
        let registry = ToolRegistry::from_protocol(Arc::new(EchoProtocol))
            .await
            .unwrap();

        let result = registry
            .execute_tool("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["echo"]["text"], "hi");

        let missing = registry
            .execute_tool("missing", serde_json::json!({}))
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_prompt_section_lists_tools_and_format() {
        let registry = ToolRegistry::from_protocol(Arc::new(EchoProtocol))
            .await
            .unwrap();
        let section = registry.prompt_section();
        assert!(section.contains("- echo: Echo the parameters"));
        assert!(section.contains("text (String, required)"));
        assert!(section.contains("{\"tool_call\""));
    }

    #[test]
    fn test_content_text_passes_strings_through() {
        let plain = ToolResult::success(serde_json::json!("Refunds within 30 days."));
        assert_eq!(plain.content_text(), "Refunds within 30 days.");

        let failed = ToolResult::failure("boom".to_string());
        assert_eq!(failed.content_text(), "boom");
    }
}
