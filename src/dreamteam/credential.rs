//! Credentials for the model endpoint, the search service and the remote session pool.
//!
//! A [`Credential`] is either a static key sent in a service-specific header, or a
//! [`TokenProvider`] producing bearer tokens for a scope. [`DeveloperCliCredential`] shells out
//! to the Azure developer CLI and caches each scope's token until shortly before it expires.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";
pub const SEARCH_SCOPE: &str = "https://search.azure.com/.default";
pub const DYNAMIC_SESSIONS_SCOPE: &str = "https://dynamicsessions.io/.default";

/// Tokens this close to expiry are refreshed.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Errors raised while obtaining a token.
#[derive(Debug)]
pub enum CredentialError {
    /// The CLI could not be spawned.
    Io(std::io::Error),
    /// The CLI ran but refused to hand out a token.
    CommandFailed(String),
    /// The CLI output could not be understood.
    Parse(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Io(e) => write!(f, "Credential IO error: {}", e),
            CredentialError::CommandFailed(msg) => write!(f, "Token request failed: {}", msg),
            CredentialError::Parse(msg) => write!(f, "Unreadable token response: {}", msg),
        }
    }
}

impl Error for CredentialError {}

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Source of bearer tokens for a scope.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError>;
}

/// How a request authenticates.
#[derive(Clone)]
pub enum Credential {
    /// Static key placed in a service-specific header (`api-key` for both services).
    ApiKey(String),
    /// Bearer token from a provider.
    Token(Arc<dyn TokenProvider>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => write!(f, "Credential::ApiKey(<redacted>)"),
            Credential::Token(_) => write!(f, "Credential::Token(..)"),
        }
    }
}

impl Credential {
    /// Attach this credential to `request`, fetching a token for `scope` when needed.
    pub async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        scope: &str,
    ) -> Result<reqwest::RequestBuilder, CredentialError> {
        match self {
            Credential::ApiKey(key) => Ok(request.header("api-key", key)),
            Credential::Token(provider) => {
                let token = provider.get_token(scope).await?;
                Ok(request.bearer_auth(token.token))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    token: String,
    expires_on: String,
}

/// Token provider backed by `azd auth token`.
pub struct DeveloperCliCredential {
    tenant_id: Option<String>,
    process_timeout: std::time::Duration,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl DeveloperCliCredential {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self {
            tenant_id,
            process_timeout: std::time::Duration::from_secs(60),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut command = tokio::process::Command::new("azd");
        command
            .args(["auth", "token", "--output", "json", "--scope", scope])
            .kill_on_drop(true);
        if let Some(tenant) = &self.tenant_id {
            command.args(["--tenant-id", tenant]);
        }

        let output = tokio::time::timeout(self.process_timeout, command.output())
            .await
            .map_err(|_| {
                CredentialError::CommandFailed(format!(
                    "azd did not answer within {}s",
                    self.process_timeout.as_secs()
                ))
            })?
            .map_err(CredentialError::Io)?;

        if !output.status.success() {
            return Err(CredentialError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_cli_token(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl TokenProvider for DeveloperCliCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope) {
            if token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
        }

        log::debug!("dreamteam::credential: requesting token for {}", scope);
        let token = self.request_token(scope).await?;
        cache.insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

fn parse_cli_token(stdout: &str) -> Result<AccessToken, CredentialError> {
    let response: CliTokenResponse =
        serde_json::from_str(stdout.trim()).map_err(|e| CredentialError::Parse(e.to_string()))?;
    let expires_on = DateTime::parse_from_rfc3339(&response.expires_on)
        .map_err(|e| CredentialError::Parse(e.to_string()))?
        .with_timezone(&Utc);
    Ok(AccessToken {
        token: response.token,
        expires_on,
    })
}

/// A fixed token, for pre-authenticated environments.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, CredentialError> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: Utc::now() + Duration::hours(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_token() {
        let token =
            parse_cli_token(r#"{"token":"abc","expiresOn":"2030-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(token.token, "abc");
        assert!(token.is_fresh(Utc::now()));
    }

    #[test]
    fn test_parse_cli_token_rejects_garbage() {
        assert!(matches!(
            parse_cli_token("not json"),
            Err(CredentialError::Parse(_))
        ));
    }

    #[test]
    fn test_expiring_token_is_not_fresh() {
        let token = AccessToken {
            token: "t".to_string(),
            expires_on: Utc::now() + Duration::seconds(60),
        };
        assert!(!token.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_bearer_credential_sets_authorization_header() {
        let credential = Credential::Token(Arc::new(StaticTokenProvider::new("secret")));
        let request = reqwest::Client::new().get("http://localhost/");
        let request = credential
            .authorize(request, SEARCH_SCOPE)
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer secret"
        );
    }
}
