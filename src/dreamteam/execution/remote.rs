//! Remote execution against a managed session pool.
//!
//! Each executor gets its own session identifier; the pool keeps interpreter state per
//! identifier, so consecutive blocks from the same run share variables and files. Calls are
//! authenticated with a bearer token for the dynamic-sessions scope. A scoped temporary
//! directory stands in for the working directory on this side and is removed by `stop`.

use crate::dreamteam::config::{ConfigurationError, ENV_POOL_MANAGEMENT_ENDPOINT};
use crate::dreamteam::credential::{Credential, TokenProvider, DYNAMIC_SESSIONS_SCOPE};
use crate::dreamteam::execution::{
    normalize_language, CodeResult, ExecutionBackend, ExecutionError,
};
use crate::dreamteam::http_client_pool;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SESSIONS_API_VERSION: &str = "2024-02-02-preview";

#[derive(Deserialize)]
struct ExecutionResponse {
    properties: ExecutionProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionProperties {
    status: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

pub struct DynamicSessionsExecutor {
    pool_endpoint: url::Url,
    credential: Credential,
    session_id: String,
    work_dir: Option<TempDir>,
}

impl DynamicSessionsExecutor {
    /// Fails with [`ConfigurationError`] when the pool endpoint is missing or unparsable.
    pub fn new(
        pool_endpoint: Option<&str>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Result<Self, ConfigurationError> {
        let raw = pool_endpoint
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                ConfigurationError::MissingSetting(ENV_POOL_MANAGEMENT_ENDPOINT.to_string())
            })?;
        let pool_endpoint =
            url::Url::parse(raw).map_err(|e| ConfigurationError::InvalidSetting {
                name: ENV_POOL_MANAGEMENT_ENDPOINT.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool_endpoint,
            credential: Credential::Token(token_provider),
            session_id: uuid::Uuid::new_v4().to_string(),
            work_dir: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn execute_url(&self) -> Result<url::Url, ExecutionError> {
        let base = self.pool_endpoint.as_str().trim_end_matches('/');
        let mut url = url::Url::parse(&format!("{}/code/execute", base))
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("api-version", SESSIONS_API_VERSION)
            .append_pair("identifier", &self.session_id);
        Ok(url)
    }
}

#[async_trait]
impl ExecutionBackend for DynamicSessionsExecutor {
    async fn start(&mut self) -> Result<(), ExecutionError> {
        if self.work_dir.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("dreamteam-session-")
                .tempdir()?;
            log::info!(
                "dreamteam::execution::remote: session {} using {:?}",
                self.session_id,
                dir.path()
            );
            self.work_dir = Some(dir);
        }
        Ok(())
    }

    async fn execute(&self, code: &str, language: &str) -> Result<CodeResult, ExecutionError> {
        if self.work_dir.is_none() {
            return Err(ExecutionError::NotStarted);
        }
        if normalize_language(language) != Some("python") {
            return Err(ExecutionError::UnsupportedLanguage(language.to_string()));
        }

        let url = self.execute_url()?;
        let body = json!({
            "properties": {
                "codeInputType": "inline",
                "executionType": "synchronous",
                "code": code,
            }
        });
        let request = http_client_pool::get_or_create_client(
            &http_client_pool::base_url_of(self.pool_endpoint.as_str()),
        )
        .post(url)
        .json(&body);
        let request = self
            .credential
            .authorize(request, DYNAMIC_SESSIONS_SCOPE)
            .await
            .map_err(|e| ExecutionError::Unavailable(e.to_string()))?;

        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ExecutionError::Unavailable(format!(
                "session pool refused credentials (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExecutionError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: ExecutionResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;
        Ok(result_from_properties(parsed.properties))
    }

    async fn stop(&mut self) -> Result<(), ExecutionError> {
        if let Some(dir) = self.work_dir.take() {
            dir.close()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "dynamic-sessions"
    }

    fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_ref().map(|d| d.path())
    }
}

fn result_from_properties(properties: ExecutionProperties) -> CodeResult {
    let mut stdout = properties.stdout;
    if let Some(result) = properties.result.filter(|r| !r.is_null()) {
        if !stdout.is_empty() && !stdout.ends_with('\n') {
            stdout.push('\n');
        }
        match result {
            serde_json::Value::String(s) => stdout.push_str(&s),
            other => stdout.push_str(&other.to_string()),
        }
    }
    CodeResult {
        stdout,
        stderr: properties.stderr,
        exit_status: if properties.status == "Success" { 0 } else { 1 },
        artifacts: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dreamteam::credential::StaticTokenProvider;

    fn provider() -> Arc<dyn TokenProvider> {
        Arc::new(StaticTokenProvider::new("t"))
    }

    #[test]
    fn test_missing_endpoint_is_a_configuration_error() {
        assert!(matches!(
            DynamicSessionsExecutor::new(None, provider()),
            Err(ConfigurationError::MissingSetting(ref name)) if name == "POOL_MANAGEMENT_ENDPOINT"
        ));
        assert!(matches!(
            DynamicSessionsExecutor::new(Some("   "), provider()),
            Err(ConfigurationError::MissingSetting(_))
        ));
        assert!(matches!(
            DynamicSessionsExecutor::new(Some("not a url"), provider()),
            Err(ConfigurationError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_execute_url_carries_session_identifier() {
        let executor = DynamicSessionsExecutor::new(
            Some("https://eastus.dynamicsessions.io/subscriptions/s/sessionPools/p/"),
            provider(),
        )
        .unwrap();
        let url = executor.execute_url().unwrap();
        assert_eq!(
            url.path(),
            "/subscriptions/s/sessionPools/p/code/execute"
        );
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("api-version".to_string(), SESSIONS_API_VERSION.to_string())));
        assert!(query.contains(&(
            "identifier".to_string(),
            executor.session_id().to_string()
        )));
    }

    #[tokio::test]
    async fn test_work_dir_lives_between_start_and_stop() {
        let mut executor =
            DynamicSessionsExecutor::new(Some("https://pool.example.io"), provider()).unwrap();
        assert!(matches!(
            executor.execute("print(1)", "python").await,
            Err(ExecutionError::NotStarted)
        ));

        executor.start().await.unwrap();
        let dir = executor.work_dir().unwrap().to_path_buf();
        assert!(dir.exists());

        executor.stop().await.unwrap();
        assert!(!dir.exists());
        assert!(executor.work_dir().is_none());
    }

    #[test]
    fn test_result_mapping() {
        let properties: ExecutionProperties = serde_json::from_str(
            r#"{"status":"Success","stdout":"4\n","stderr":"","result":""}"#,
        )
        .unwrap();
        let result = result_from_properties(properties);
        assert_eq!(result.stdout, "4\n");
        assert_eq!(result.exit_status, 0);
    }
}
