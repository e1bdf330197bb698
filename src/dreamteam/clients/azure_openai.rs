//! The `AzureOpenAIClient` struct implements `ClientWrapper` for an Azure OpenAI chat
//! deployment, capturing both the assistant response and the token usage of each call.
//!
//! Requests go to
//! `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={version}` and
//! authenticate with either an `api-key` header or a bearer token for the Cognitive Services
//! scope, depending on the [`Credential`] chosen at configuration time.
//!
//! # Example
//!
//! ```rust,no_run
//! use dreamteam::clients::azure_openai::AzureOpenAIClient;
//! use dreamteam::client_wrapper::{ClientWrapper, Message, Role};
//! use dreamteam::DreamTeamConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = AzureOpenAIClient::from_config(&DreamTeamConfig::from_env())?;
//! let reply = client
//!     .send_message(&[
//!         Message::new(Role::System, "You are terse."),
//!         Message::new(Role::User, "Hello!"),
//!     ])
//!     .await?;
//! println!("Assistant: {}", reply.content);
//! if let Some(usage) = client.get_last_usage() {
//!     println!("total tokens: {}", usage.total_tokens);
//! }
//! # Ok(())
//! # }
//! ```

use crate::dreamteam::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use crate::dreamteam::config::{ConfigurationError, DreamTeamConfig};
use crate::dreamteam::credential::{Credential, CredentialError, COGNITIVE_SERVICES_SCOPE};
use crate::dreamteam::http_client_pool;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

/// Errors surfaced by the chat-completion client.
#[derive(Debug)]
pub enum ClientError {
    Credential(CredentialError),
    Transport(String),
    Status { status: u16, body: String },
    MalformedResponse(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Credential(e) => write!(f, "{}", e),
            ClientError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ClientError::Status { status, body } => {
                write!(f, "Chat completion failed with HTTP {}: {}", status, body)
            }
            ClientError::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl Error for ClientError {}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

pub struct AzureOpenAIClient {
    endpoint: String,
    deployment: String,
    api_version: String,
    model: String,
    credential: Credential,
    usage: Mutex<Option<TokenUsage>>,
}

impl AzureOpenAIClient {
    pub fn new(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
        model: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            deployment: deployment.into(),
            api_version: api_version.into(),
            model: model.into(),
            credential,
            usage: Mutex::new(None),
        }
    }

    /// Build a client from the environment-derived configuration.
    pub fn from_config(config: &DreamTeamConfig) -> Result<Self, ConfigurationError> {
        let endpoint = config.require_openai_endpoint()?;
        url::Url::parse(endpoint).map_err(|e| ConfigurationError::InvalidSetting {
            name: crate::dreamteam::config::ENV_OPENAI_ENDPOINT.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(
            endpoint,
            config.deployment.clone(),
            config.api_version.clone(),
            config.model.clone(),
            config.openai_credential(),
        ))
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl ClientWrapper for AzureOpenAIClient {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let body = json!({
            "messages": messages
                .iter()
                .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                .collect::<Vec<_>>(),
        });

        let request = http_client_pool::get_or_create_client(&self.endpoint)
            .post(self.completions_url())
            .json(&body);
        let request = self
            .credential
            .authorize(request, COGNITIVE_SERVICES_SCOPE)
            .await
            .map_err(ClientError::Credential)?;

        let response = request.send().await.map_err(|e| {
            log::error!(
                "dreamteam::clients::azure_openai: request to {} failed: {}",
                self.deployment,
                e
            );
            ClientError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "dreamteam::clients::azure_openai: HTTP {} from {}",
                status,
                self.deployment
            );
            return Err(Box::new(ClientError::Status {
                status: status.as_u16(),
                body,
            }));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;

        if let Some(usage) = parsed.usage {
            if let Ok(mut slot) = self.usage.lock() {
                *slot = Some(TokenUsage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                });
            }
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::MalformedResponse("no choices returned".to_string()))?
            .message
            .content
            .unwrap_or_default();

        Ok(Message::new(Role::Assistant, content))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}
