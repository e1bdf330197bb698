//! Host-process execution with a timeout.
//!
//! Code is written to a file in the working directory and run with `python3` or `sh` from
//! that directory. There is no isolation; use [`DockerCommandLineExecutor`] for untrusted code.
//!
//! [`DockerCommandLineExecutor`]: crate::execution::docker::DockerCommandLineExecutor

use crate::dreamteam::execution::{
    file_extension, new_artifacts, normalize_language, snapshot_files_blocking, CodeResult,
    ExecutionBackend, ExecutionError, DEFAULT_EXECUTION_TIMEOUT,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

pub struct LocalCommandLineExecutor {
    work_dir: PathBuf,
    timeout: Duration,
    python: String,
    started: bool,
}

impl LocalCommandLineExecutor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
            python: "python3".to_string(),
            started: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interpreter used for python blocks.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

#[async_trait]
impl ExecutionBackend for LocalCommandLineExecutor {
    async fn start(&mut self) -> Result<(), ExecutionError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        self.started = true;
        Ok(())
    }

    async fn execute(&self, code: &str, language: &str) -> Result<CodeResult, ExecutionError> {
        if !self.started {
            return Err(ExecutionError::NotStarted);
        }
        let language = normalize_language(language)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))?;

        let script_name = format!(
            "tmp_code_{}.{}",
            uuid::Uuid::new_v4().simple(),
            file_extension(language)
        );
        let script = self.work_dir.join(&script_name);
        tokio::fs::write(&script, code).await?;
        let before = snapshot_files_blocking(self.work_dir.clone()).await;

        let program = if language == "python" {
            self.python.as_str()
        } else {
            "sh"
        };
        let child = tokio::process::Command::new(program)
            .arg(&script_name)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Unavailable(format!("{}: {}", program, e)))?;

        let outcome = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let after = snapshot_files_blocking(self.work_dir.clone()).await;
        if let Err(e) = tokio::fs::remove_file(&script).await {
            log::warn!("dreamteam::execution::local: could not remove {:?}: {}", script, e);
        }

        let output = outcome.map_err(|_| ExecutionError::Timeout(self.timeout))??;
        Ok(CodeResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_status: output.status.code().unwrap_or(-1),
            artifacts: new_artifacts(&before, after, &script),
        })
    }

    async fn stop(&mut self) -> Result<(), ExecutionError> {
        self.started = false;
        Ok(())
    }

    fn name(&self) -> &str {
        "local-command-line"
    }

    fn work_dir(&self) -> Option<&Path> {
        Some(&self.work_dir)
    }
}
