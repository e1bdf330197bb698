use dreamteam::execution::local::LocalCommandLineExecutor;
use dreamteam::execution::{backend_from_config, extract_code_blocks, ExecutionBackend, ExecutionError};
use dreamteam::{DreamTeamConfig, ExecutionMode};
use std::time::Duration;

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_python_block_prints_its_result() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut executor = LocalCommandLineExecutor::new(dir.path()).with_python("python3");
    executor.start().await.unwrap();

    let blocks = extract_code_blocks("Here you go:\n```python\nprint(2+2)\n```\n");
    let result = executor
        .execute(&blocks[0].code, &blocks[0].language)
        .await
        .unwrap();
    assert_eq!(result.stdout, "4\n");
    assert!(result.succeeded());
    assert!(result.artifacts.is_empty());
    executor.stop().await.unwrap();
}

#[tokio::test]
async fn test_long_running_code_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut executor =
        LocalCommandLineExecutor::new(dir.path()).with_timeout(Duration::from_millis(200));
    executor.start().await.unwrap();
    assert!(matches!(
        executor.execute("sleep 5", "sh").await,
        Err(ExecutionError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_local_mode_uses_a_container_that_must_be_started() {
    let dir = tempfile::tempdir().unwrap();
    let config = DreamTeamConfig::default()
        .with_execution_mode(ExecutionMode::Local)
        .with_logs_dir(dir.path());
    let backend = backend_from_config(&config).unwrap();
    assert_eq!(backend.name(), "docker");
    assert_eq!(backend.work_dir(), Some(dir.path()));
    assert!(matches!(
        backend.execute("print(1)", "python").await,
        Err(ExecutionError::NotStarted)
    ));
}

#[test]
fn test_remote_mode_needs_a_pool_endpoint() {
    let config = DreamTeamConfig::default().with_execution_mode(ExecutionMode::Remote);
    assert!(backend_from_config(&config).is_err());

    let mut config = config;
    config.pool_management_endpoint = Some("https://pool.example.com".to_string());
    let backend = backend_from_config(&config).unwrap();
    assert_eq!(backend.name(), "dynamic-sessions");
}
