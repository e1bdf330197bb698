//! Sandboxed execution of coder-produced code.
//!
//! An [`ExecutionBackend`] runs one code block at a time and returns its stdout, stderr, exit
//! status and any files it created. Which backend a run uses is decided once, from
//! [`DreamTeamConfig::execution_mode`](crate::DreamTeamConfig):
//!
//! - [`docker::DockerCommandLineExecutor`]: a container on this machine whose `/workspace` is
//!   the logs directory. It must be started before first use and is removed when the run ends.
//! - [`remote::DynamicSessionsExecutor`]: a managed session pool. Each executor owns a session
//!   identifier and a scoped temporary working directory.
//! - [`local::LocalCommandLineExecutor`]: host processes with no isolation, for development and
//!   tests.
//!
//! A non-zero exit status is a normal [`CodeResult`]. [`ExecutionError`] is reserved for
//! failures to execute at all.

pub mod docker;
pub mod local;
pub mod remote;

use crate::dreamteam::config::{ConfigurationError, DreamTeamConfig, ExecutionMode};
use async_trait::async_trait;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-execution limit used when a backend is built from configuration.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);

/// A fenced block extracted from a markdown message.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

/// What one execution produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
    /// Files created in the working directory by this execution.
    pub artifacts: Vec<PathBuf>,
}

impl CodeResult {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }

    /// Console-style rendering fed back to the team.
    pub fn output(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.stderr);
        }
        output
    }
}

#[derive(Debug)]
pub enum ExecutionError {
    /// `execute` was called before `start`.
    NotStarted,
    /// The sandbox could not be reached or created.
    Unavailable(String),
    /// The sandbox existed but has gone away. The run cannot continue.
    SandboxLost(String),
    Timeout(Duration),
    UnsupportedLanguage(String),
    Transport(String),
    Io(std::io::Error),
}

impl ExecutionError {
    /// Whether the executor member should stop the run instead of reporting a failed call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::SandboxLost(_))
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::NotStarted => write!(f, "Execution backend has not been started"),
            ExecutionError::Unavailable(msg) => write!(f, "Sandbox unavailable: {}", msg),
            ExecutionError::SandboxLost(msg) => write!(f, "Sandbox terminated: {}", msg),
            ExecutionError::Timeout(limit) => {
                write!(f, "Execution timed out after {}s", limit.as_secs())
            }
            ExecutionError::UnsupportedLanguage(lang) => {
                write!(f, "Unsupported language: {}", lang)
            }
            ExecutionError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ExecutionError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for ExecutionError {}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        ExecutionError::Io(e)
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Prepare the sandbox. Idempotent.
    async fn start(&mut self) -> Result<(), ExecutionError>;

    /// Run `code` written in `language` (`python` or `sh`).
    async fn execute(&self, code: &str, language: &str) -> Result<CodeResult, ExecutionError>;

    /// Release the sandbox. Idempotent.
    async fn stop(&mut self) -> Result<(), ExecutionError>;

    fn name(&self) -> &str;

    /// Host directory mirrored into the sandbox, when there is one.
    fn work_dir(&self) -> Option<&Path>;
}

/// A backend shared between the run controller (start/stop) and the executor member.
pub type SharedBackend = Arc<Mutex<Box<dyn ExecutionBackend>>>;

/// Builds the backend for a run. Swappable so tests can run without a container runtime.
pub type BackendFactory = Arc<
    dyn Fn(&DreamTeamConfig) -> Result<Box<dyn ExecutionBackend>, ConfigurationError>
        + Send
        + Sync,
>;

/// Backend selection used by default.
pub fn backend_from_config(
    config: &DreamTeamConfig,
) -> Result<Box<dyn ExecutionBackend>, ConfigurationError> {
    match config.execution_mode {
        ExecutionMode::Local => Ok(Box::new(docker::DockerCommandLineExecutor::new(
            config.logs_dir.clone(),
        ))),
        ExecutionMode::Remote => Ok(Box::new(remote::DynamicSessionsExecutor::new(
            config.pool_management_endpoint.as_deref(),
            config.token_provider(),
        )?)),
    }
}

pub fn default_backend_factory() -> BackendFactory {
    Arc::new(backend_from_config)
}

/// Canonical interpreter name for a fence tag, `None` when unsupported.
pub fn normalize_language(language: &str) -> Option<&'static str> {
    match language.trim().to_lowercase().as_str() {
        "" | "python" | "py" | "python3" => Some("python"),
        "sh" | "bash" | "shell" | "console" => Some("sh"),
        _ => None,
    }
}

pub(crate) fn file_extension(language: &str) -> &'static str {
    if language == "python" {
        "py"
    } else {
        "sh"
    }
}

/// Extract every fenced code block from `markdown`, in order.
pub fn extract_code_blocks(markdown: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(tag) = trimmed.strip_prefix("```") {
                    current = Some((tag.trim().to_string(), Vec::new()));
                }
            }
            Some((language, mut lines)) => {
                if trimmed.trim_end() == "```" {
                    let mut code = lines.join("\n");
                    code.push('\n');
                    blocks.push(CodeBlock { language, code });
                } else {
                    lines.push(line);
                    current = Some((language, lines));
                }
            }
        }
    }
    blocks
}

/// Files currently under `dir`, used to find what an execution created.
pub(crate) fn snapshot_files(dir: &Path) -> HashSet<PathBuf> {
    let mut files = HashSet::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        let entries = match std::fs::read_dir(&next) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.insert(path);
            }
        }
    }
    files
}

/// Runs [`snapshot_files`] on the blocking pool so the directory walk stays off the runtime.
pub(crate) async fn snapshot_files_blocking(dir: PathBuf) -> HashSet<PathBuf> {
    match tokio::task::spawn_blocking(move || snapshot_files(&dir)).await {
        Ok(files) => files,
        Err(e) => {
            log::warn!("dreamteam::execution: directory snapshot failed: {}", e);
            HashSet::new()
        }
    }
}

/// Files present in `after` but not `before`, excluding `ignore`, sorted.
pub(crate) fn new_artifacts(
    before: &HashSet<PathBuf>,
    after: HashSet<PathBuf>,
    ignore: &Path,
) -> Vec<PathBuf> {
    let mut created: Vec<PathBuf> = after
        .into_iter()
        .filter(|p| !before.contains(p) && p != ignore)
        .collect();
    created.sort();
    created
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_blocks_keeps_order_and_language() {
        let text = "Run this:\n```python\nprint(2+2)\n```\nthen\n```sh\necho hi\n```\n";
        let blocks = extract_code_blocks(text);
        assert_eq!(
            blocks,
            vec![
                CodeBlock {
                    language: "python".to_string(),
                    code: "print(2+2)\n".to_string()
                },
                CodeBlock {
                    language: "sh".to_string(),
                    code: "echo hi\n".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_unterminated_block_is_ignored() {
        assert!(extract_code_blocks("```python\nprint(1)\n").is_empty());
        assert!(extract_code_blocks("no code here").is_empty());
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("Python3"), Some("python"));
        assert_eq!(normalize_language(""), Some("python"));
        assert_eq!(normalize_language("bash"), Some("sh"));
        assert_eq!(normalize_language("rust"), None);
    }

    #[test]
    fn test_remote_selection_without_endpoint_is_a_configuration_error() {
        let config = DreamTeamConfig::default().with_execution_mode(ExecutionMode::Remote);
        assert!(matches!(
            backend_from_config(&config),
            Err(ConfigurationError::MissingSetting(ref name)) if name == "POOL_MANAGEMENT_ENDPOINT"
        ));
    }

    #[tokio::test]
    async fn test_snapshot_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out/plots")).unwrap();
        std::fs::write(dir.path().join("top.txt"), "a").unwrap();
        std::fs::write(dir.path().join("out/plots/chart.png"), "b").unwrap();

        let before = HashSet::new();
        let after = snapshot_files_blocking(dir.path().to_path_buf()).await;
        let created = new_artifacts(&before, after, &dir.path().join("top.txt"));
        assert_eq!(created, vec![dir.path().join("out/plots/chart.png")]);
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(snapshot_files_blocking(dir.path().join("absent")).await.is_empty());
    }

    #[test]
    fn test_code_result_output_joins_streams() {
        let result = CodeResult {
            stdout: "out".to_string(),
            stderr: "err\n".to_string(),
            exit_status: 1,
            artifacts: Vec::new(),
        };
        assert_eq!(result.output(), "out\nerr\n");
        assert!(!result.succeeded());
    }
}
