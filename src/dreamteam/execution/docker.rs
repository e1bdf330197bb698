//! Local container execution through the `docker` CLI.
//!
//! `start` launches a long-lived container with the working directory bind-mounted at
//! `/workspace`; every code block is written into that directory and run with `docker exec`.
//! `stop` removes the container. If the executor is dropped while the container is still
//! running, removal is attempted from `Drop`.

use crate::dreamteam::execution::{
    file_extension, new_artifacts, normalize_language, snapshot_files_blocking, CodeResult,
    ExecutionBackend, ExecutionError, DEFAULT_EXECUTION_TIMEOUT,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_IMAGE: &str = "python:3-slim";
const CONTAINER_WORKSPACE: &str = "/workspace";

pub struct DockerCommandLineExecutor {
    image: String,
    work_dir: PathBuf,
    container_name: String,
    timeout: Duration,
    running: bool,
}

impl DockerCommandLineExecutor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            work_dir: work_dir.into(),
            container_name: format!("dreamteam-exec-{}", uuid::Uuid::new_v4().simple()),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
            running: false,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    async fn docker(args: &[&str]) -> Result<std::process::Output, ExecutionError> {
        Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecutionError::Unavailable(format!("docker CLI: {}", e)))
    }

    /// `docker exec` arguments that kill a timed-out script inside the container.
    fn kill_args<'a>(container: &'a str, script_name: &'a str) -> [&'a str; 5] {
        ["exec", container, "pkill", "-f", script_name]
    }

    /// Killing the host-side `docker exec` client leaves the script running in the container.
    async fn kill_script(&self, script_name: &str) {
        match Self::docker(&Self::kill_args(&self.container_name, script_name)).await {
            Ok(output) if output.status.success() => {
                log::info!(
                    "dreamteam::execution::docker: killed timed-out {} in {}",
                    script_name,
                    self.container_name
                );
            }
            Ok(output) => log::warn!(
                "dreamteam::execution::docker: pkill {} in {} exited with {:?}: {}",
                script_name,
                self.container_name,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => log::warn!(
                "dreamteam::execution::docker: could not kill {}: {}",
                script_name,
                e
            ),
        }
    }

    /// Distinguish "the container went away" from an ordinary non-zero exit.
    fn container_gone(stderr: &str) -> bool {
        stderr.contains("No such container") || stderr.contains("is not running")
    }
}

#[async_trait]
impl ExecutionBackend for DockerCommandLineExecutor {
    async fn start(&mut self) -> Result<(), ExecutionError> {
        if self.running {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let host_dir = tokio::fs::canonicalize(&self.work_dir).await?;
        let mount = format!("{}:{}", host_dir.display(), CONTAINER_WORKSPACE);

        let output = Self::docker(&[
            "run",
            "-d",
            "--rm",
            "--name",
            &self.container_name,
            "-v",
            &mount,
            "-w",
            CONTAINER_WORKSPACE,
            &self.image,
            "sleep",
            "infinity",
        ])
        .await?;

        if !output.status.success() {
            return Err(ExecutionError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        log::info!(
            "dreamteam::execution::docker: started {} ({}) on {:?}",
            self.container_name,
            self.image,
            host_dir
        );
        self.running = true;
        Ok(())
    }

    async fn execute(&self, code: &str, language: &str) -> Result<CodeResult, ExecutionError> {
        if !self.running {
            return Err(ExecutionError::NotStarted);
        }
        let language = normalize_language(language)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))?;

        let file_name = format!(
            "tmp_code_{}.{}",
            uuid::Uuid::new_v4().simple(),
            file_extension(language)
        );
        let host_file = self.work_dir.join(&file_name);
        tokio::fs::write(&host_file, code).await?;
        let before = snapshot_files_blocking(self.work_dir.clone()).await;

        let interpreter = if language == "python" { "python" } else { "sh" };
        let child = Command::new("docker")
            .args(["exec", &self.container_name, interpreter, &file_name])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Unavailable(format!("docker CLI: {}", e)))?;

        let outcome = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let after = snapshot_files_blocking(self.work_dir.clone()).await;
        if let Err(e) = tokio::fs::remove_file(&host_file).await {
            log::warn!(
                "dreamteam::execution::docker: could not remove {:?}: {}",
                host_file,
                e
            );
        }

        let output = match outcome {
            Ok(output) => output?,
            Err(_) => {
                self.kill_script(&file_name).await;
                return Err(ExecutionError::Timeout(self.timeout));
            }
        };
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() && Self::container_gone(&stderr) {
            return Err(ExecutionError::SandboxLost(stderr.trim().to_string()));
        }

        Ok(CodeResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            exit_status: output.status.code().unwrap_or(-1),
            artifacts: new_artifacts(&before, after, &host_file),
        })
    }

    async fn stop(&mut self) -> Result<(), ExecutionError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        let output = Self::docker(&["rm", "-f", &self.container_name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !Self::container_gone(&stderr) {
                return Err(ExecutionError::Unavailable(stderr.trim().to_string()));
            }
        }
        log::info!(
            "dreamteam::execution::docker: removed {}",
            self.container_name
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "docker"
    }

    fn work_dir(&self) -> Option<&Path> {
        Some(&self.work_dir)
    }
}

impl Drop for DockerCommandLineExecutor {
    fn drop(&mut self) {
        if self.running {
            log::warn!(
                "dreamteam::execution::docker: {} still running on drop, removing",
                self.container_name
            );
            let _ = std::process::Command::new("docker")
                .args(["rm", "-f", &self.container_name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_requires_start() {
        let dir = tempfile::tempdir().unwrap();
        let executor = DockerCommandLineExecutor::new(dir.path());
        assert!(!executor.is_running());
        assert!(executor.container_name().starts_with("dreamteam-exec-"));
        assert!(matches!(
            executor.execute("print(1)", "python").await,
            Err(ExecutionError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = DockerCommandLineExecutor::new(dir.path());
        assert!(executor.stop().await.is_ok());
    }

    #[test]
    fn test_timeout_cleanup_targets_the_script_inside_the_container() {
        assert_eq!(
            DockerCommandLineExecutor::kill_args("dreamteam-exec-1", "tmp_code_ab12.py"),
            ["exec", "dreamteam-exec-1", "pkill", "-f", "tmp_code_ab12.py"]
        );
    }

    #[test]
    fn test_container_gone_detection() {
        assert!(DockerCommandLineExecutor::container_gone(
            "Error response from daemon: No such container: dreamteam-exec-1"
        ));
        assert!(!DockerCommandLineExecutor::container_gone(
            "Traceback (most recent call last):"
        ));
    }
}
