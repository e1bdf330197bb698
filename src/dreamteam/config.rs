//! Configuration for Dream Team.
//!
//! [`DreamTeamConfig`] gathers the endpoints, credentials and filesystem locations a run needs.
//! It can be built by hand, or read from the process environment with
//! [`DreamTeamConfig::from_env`], which loads a `.env` file first when one is present.
//!
//! # Example
//!
//! ```rust
//! use dreamteam::{DreamTeamConfig, ExecutionMode};
//! use std::path::PathBuf;
//!
//! let config = DreamTeamConfig {
//!     logs_dir: PathBuf::from("/tmp/dream_team_logs"),
//!     execution_mode: ExecutionMode::Local,
//!     ..DreamTeamConfig::default()
//! };
//! assert!(config.pool_management_endpoint.is_none());
//! ```

use crate::dreamteam::credential::{Credential, DeveloperCliCredential, TokenProvider};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub const ENV_OPENAI_MODEL: &str = "AZURE_OPENAI_MODEL";
pub const ENV_OPENAI_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT_NAME";
pub const ENV_OPENAI_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
pub const ENV_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_OPENAI_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_SEARCH_ENDPOINT: &str = "AZURE_SEARCH_SERVICE_ENDPOINT";
pub const ENV_SEARCH_ADMIN_KEY: &str = "AZURE_SEARCH_ADMIN_KEY";
pub const ENV_POOL_MANAGEMENT_ENDPOINT: &str = "POOL_MANAGEMENT_ENDPOINT";
pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";

/// Where coder-produced code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// A container on this machine, bound to the logs directory.
    Local,
    /// A managed session pool reached over HTTPS.
    Remote,
}

/// Raised when a required setting is absent or malformed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A required setting was not provided. Carries the variable name.
    MissingSetting(String),
    /// A setting was present but unusable.
    InvalidSetting { name: String, reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingSetting(name) => {
                write!(f, "`{}` environment variable is not set.", name)
            }
            ConfigurationError::InvalidSetting { name, reason } => {
                write!(f, "Invalid value for `{}`: {}", name, reason)
            }
        }
    }
}

impl Error for ConfigurationError {}

/// Process-wide settings for a Dream Team deployment.
///
/// Keys are optional where a developer-CLI token can stand in for them: a missing
/// `AZURE_OPENAI_API_KEY` or `AZURE_SEARCH_ADMIN_KEY` means bearer tokens are used instead.
#[derive(Debug, Clone)]
pub struct DreamTeamConfig {
    pub model: String,
    pub deployment: String,
    pub api_version: String,
    pub openai_endpoint: Option<String>,
    pub openai_api_key: Option<String>,
    pub search_endpoint: Option<String>,
    pub search_admin_key: Option<String>,
    /// Mandatory only when `execution_mode` is [`ExecutionMode::Remote`].
    pub pool_management_endpoint: Option<String>,
    pub tenant_id: Option<String>,
    pub execution_mode: ExecutionMode,
    /// Logs, downloads and the local sandbox's working directory.
    pub logs_dir: PathBuf,
    /// Persist images the web surfer receives into `logs_dir`.
    pub save_screenshots: bool,
}

impl Default for DreamTeamConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-08-01-preview".to_string(),
            openai_endpoint: None,
            openai_api_key: None,
            search_endpoint: None,
            search_admin_key: None,
            pool_management_endpoint: None,
            tenant_id: None,
            execution_mode: ExecutionMode::Remote,
            logs_dir: PathBuf::from("./logs"),
            save_screenshots: false,
        }
    }
}

impl DreamTeamConfig {
    /// Load `.env` (if any) and read the settings from the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("dreamteam::config: no .env file loaded ({})", e);
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            model: get(ENV_OPENAI_MODEL).unwrap_or(defaults.model),
            deployment: get(ENV_OPENAI_DEPLOYMENT).unwrap_or(defaults.deployment),
            api_version: get(ENV_OPENAI_API_VERSION).unwrap_or(defaults.api_version),
            openai_endpoint: get(ENV_OPENAI_ENDPOINT),
            openai_api_key: get(ENV_OPENAI_API_KEY),
            search_endpoint: get(ENV_SEARCH_ENDPOINT),
            search_admin_key: get(ENV_SEARCH_ADMIN_KEY),
            pool_management_endpoint: get(ENV_POOL_MANAGEMENT_ENDPOINT),
            tenant_id: get(ENV_TENANT_ID),
            ..defaults
        }
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = logs_dir.into();
        self
    }

    pub fn with_save_screenshots(mut self, save: bool) -> Self {
        self.save_screenshots = save;
        self
    }

    /// Token provider used whenever a static key is missing.
    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        Arc::new(DeveloperCliCredential::new(self.tenant_id.clone()))
    }

    /// Credential for the model endpoint.
    pub fn openai_credential(&self) -> Credential {
        match &self.openai_api_key {
            Some(key) => Credential::ApiKey(key.clone()),
            None => Credential::Token(self.token_provider()),
        }
    }

    /// Credential for the search service.
    pub fn search_credential(&self) -> Credential {
        match &self.search_admin_key {
            Some(key) => Credential::ApiKey(key.clone()),
            None => Credential::Token(self.token_provider()),
        }
    }

    pub fn require_openai_endpoint(&self) -> Result<&str, ConfigurationError> {
        self.openai_endpoint
            .as_deref()
            .ok_or_else(|| ConfigurationError::MissingSetting(ENV_OPENAI_ENDPOINT.to_string()))
    }

    pub fn require_search_endpoint(&self) -> Result<&str, ConfigurationError> {
        self.search_endpoint
            .as_deref()
            .ok_or_else(|| ConfigurationError::MissingSetting(ENV_SEARCH_ENDPOINT.to_string()))
    }
}
