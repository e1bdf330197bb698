//! Run lifecycle: start, cancel, collect the outcome.
//!
//! A [`RunController`] runs one team at a time. [`RunController::start_run`] validates the
//! request, builds the team's members from their [`AgentSpec`]s, prepares the execution
//! sandbox when the team has an executor and spawns the orchestrator. The caller reads the
//! transcript from the returned [`RunHandle`], may [`cancel_run`](RunController::cancel_run)
//! at any point, and finally hands the handle to [`finish`](RunController::finish), which
//! records the final answer and stop reason in [`RunState`].
//!
//! The sandbox is stopped by the run task itself once the orchestrator returns, so it is
//! released on success, failure and cancellation alike.

use crate::dreamteam::agent::Agent;
use crate::dreamteam::client_wrapper::ClientWrapper;
use crate::dreamteam::clients::azure_openai::AzureOpenAIClient;
use crate::dreamteam::config::{ConfigurationError, DreamTeamConfig, ENV_SEARCH_ENDPOINT};
use crate::dreamteam::execution::{default_backend_factory, BackendFactory, SharedBackend};
use crate::dreamteam::executor_agent::CodeExecutorAgent;
use crate::dreamteam::member::TeamMember;
use crate::dreamteam::orchestrator::{Orchestrator, RunOutcome};
use crate::dreamteam::registry::{AgentKind, AgentSpec};
use crate::dreamteam::team::TeamConfig;
use crate::dreamteam::tool_protocol::ToolRegistry;
use crate::dreamteam::tool_protocols::CustomToolProtocol;
use crate::dreamteam::tools::{AzureSearchBackend, FileBrowser, RetrievalTool, SearchBackend, WebBrowser};
use crate::dreamteam::transcript::{self, TranscriptStream};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Events buffered between the run task and a slow consumer.
pub const TRANSCRIPT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// What the presentation layer shows about the current or last run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub status: RunStatus,
    pub instructions: String,
    pub final_answer: Option<String>,
    pub stop_reason: Option<String>,
}

impl RunState {
    pub fn reset(&mut self) {
        *self = RunState::default();
    }
}

#[derive(Debug)]
pub enum SessionError {
    Validation(String),
    Configuration(ConfigurationError),
    /// A run is still in progress on this controller.
    RunAlreadyActive,
    /// Members or the sandbox could not be prepared.
    Setup(String),
    Io(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Validation(msg) => write!(f, "Validation error: {}", msg),
            SessionError::Configuration(e) => write!(f, "Configuration error: {}", e),
            SessionError::RunAlreadyActive => write!(f, "A run is already in progress"),
            SessionError::Setup(msg) => write!(f, "Could not prepare the run: {}", msg),
            SessionError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for SessionError {}

impl From<ConfigurationError> for SessionError {
    fn from(e: ConfigurationError) -> Self {
        SessionError::Configuration(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// External collaborators a run needs.
#[derive(Clone)]
pub struct RunServices {
    pub config: DreamTeamConfig,
    /// Model used by the coordinator and every LLM-backed member.
    pub model: Arc<dyn ClientWrapper>,
    pub search: Option<Arc<dyn SearchBackend>>,
    pub backend_factory: BackendFactory,
}

impl RunServices {
    /// Search is wired to the configured search service when it has an endpoint.
    pub fn new(config: DreamTeamConfig, model: Arc<dyn ClientWrapper>) -> Self {
        let search = AzureSearchBackend::from_config(&config)
            .ok()
            .map(|backend| Arc::new(backend) as Arc<dyn SearchBackend>);
        Self {
            config,
            model,
            search,
            backend_factory: default_backend_factory(),
        }
    }

    /// Services backed by the configured model deployment.
    pub fn from_config(config: DreamTeamConfig) -> Result<Self, ConfigurationError> {
        let model = Arc::new(AzureOpenAIClient::from_config(&config)?);
        Ok(Self::new(config, model))
    }

    pub fn with_search_backend(mut self, search: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.backend_factory = factory;
        self
    }
}

/// A run in progress.
pub struct RunHandle {
    pub events: TranscriptStream,
    cancel: CancellationToken,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Clears the controller's busy flag when the run task ends, however it ends.
struct ActiveRun(Arc<AtomicBool>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RunController {
    services: RunServices,
    state: RunState,
    active: Arc<AtomicBool>,
}

impl RunController {
    pub fn new(services: RunServices) -> Self {
        Self {
            services,
            state: RunState::default(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn start_run(
        &mut self,
        instructions: &str,
        team: &TeamConfig,
    ) -> Result<RunHandle, SessionError> {
        if instructions.trim().is_empty() {
            return Err(SessionError::Validation(
                "Instructions can't be empty.".to_string(),
            ));
        }
        if self.is_running() {
            return Err(SessionError::RunAlreadyActive);
        }
        team.validate()
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        self.state.reset();
        let config = &self.services.config;
        tokio::fs::create_dir_all(&config.logs_dir).await?;

        let backend: Option<SharedBackend> = if team
            .agents
            .iter()
            .any(|spec| spec.kind == AgentKind::BuiltinExecutor)
        {
            let backend = (self.services.backend_factory)(config)?;
            Some(Arc::new(Mutex::new(backend)))
        } else {
            None
        };

        let mut members: Vec<Box<dyn TeamMember>> = Vec::with_capacity(team.agents.len());
        for spec in &team.agents {
            members.push(self.build_member(spec, team, backend.as_ref()).await?);
        }

        if let Some(backend) = &backend {
            let mut guard = backend.lock().await;
            guard
                .start()
                .await
                .map_err(|e| SessionError::Setup(e.to_string()))?;
            log::info!("dreamteam::session: sandbox '{}' started", guard.name());
        }

        let cancel = CancellationToken::new();
        let (sender, events) = transcript::channel(TRANSCRIPT_CAPACITY, cancel.clone());
        let orchestrator = Orchestrator::new(
            Arc::clone(&self.services.model),
            members,
            team.clone(),
            sender,
            cancel.clone(),
        );

        self.active.store(true, Ordering::SeqCst);
        let active = ActiveRun(Arc::clone(&self.active));
        let task_text = instructions.to_string();
        let task = tokio::spawn(async move {
            let _active = active;
            let outcome = orchestrator.run(&task_text).await;
            if let Some(backend) = backend {
                let mut guard = backend.lock().await;
                match guard.stop().await {
                    Ok(()) => log::info!("dreamteam::session: sandbox '{}' stopped", guard.name()),
                    Err(e) => log::warn!("dreamteam::session: could not stop sandbox: {}", e),
                }
            }
            outcome
        });

        self.state.status = RunStatus::Running;
        self.state.instructions = instructions.to_string();
        log::info!(
            "dreamteam::session: run started with {} agent(s)",
            team.agents.len()
        );
        Ok(RunHandle {
            events,
            cancel,
            task,
        })
    }

    /// Stop the run. The transcript ends at the consumer's next read.
    pub fn cancel_run(&mut self, handle: &RunHandle) {
        handle.cancel.cancel();
        if self.state.status == RunStatus::Running {
            self.state.status = RunStatus::Cancelled;
        }
        log::info!("dreamteam::session: run cancelled");
    }

    /// Drain what is left of the transcript, wait for the run task and record its outcome.
    pub async fn finish(&mut self, mut handle: RunHandle) -> &RunState {
        while handle.events.next().await.is_some() {}
        let outcome = match handle.task.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed {
                reason: format!("run task aborted: {}", e),
            },
        };

        match outcome {
            RunOutcome::Completed {
                final_answer: Some(answer),
                stop_reason,
            } if !answer.trim().is_empty() => {
                self.state.status = RunStatus::Completed;
                self.state.final_answer = Some(answer);
                self.state.stop_reason = stop_reason;
            }
            RunOutcome::Completed { stop_reason, .. } => {
                self.state.status = RunStatus::Failed;
                self.state.stop_reason = stop_reason;
            }
            RunOutcome::Cancelled => {
                self.state.status = RunStatus::Cancelled;
            }
            RunOutcome::Failed { reason } => {
                self.state.status = RunStatus::Failed;
                self.state.stop_reason = Some(reason);
            }
        }
        log::info!("dreamteam::session: run ended as {:?}", self.state.status);
        &self.state
    }

    async fn build_member(
        &self,
        spec: &AgentSpec,
        team: &TeamConfig,
        backend: Option<&SharedBackend>,
    ) -> Result<Box<dyn TeamMember>, SessionError> {
        let config = &self.services.config;
        let model = Arc::clone(&self.services.model);
        let llm_member = || {
            Agent::new(
                spec.name.clone(),
                spec.description.clone(),
                spec.system_prompt.clone(),
                Arc::clone(&model),
            )
        };

        let member: Box<dyn TeamMember> = match spec.kind {
            AgentKind::BuiltinCoder | AgentKind::Custom => Box::new(llm_member()),
            AgentKind::BuiltinExecutor => {
                let backend = backend.ok_or_else(|| {
                    SessionError::Setup("executor has no execution backend".to_string())
                })?;
                Box::new(CodeExecutorAgent::new(
                    spec.name.clone(),
                    spec.description.clone(),
                    Arc::clone(backend),
                ))
            }
            AgentKind::BuiltinFileBrowser => {
                let protocol = CustomToolProtocol::new();
                FileBrowser::new(config.logs_dir.clone())
                    .register(&protocol)
                    .await;
                Box::new(llm_member().with_tools(tool_registry(protocol).await?))
            }
            AgentKind::BuiltinWebBrowser => {
                let protocol = CustomToolProtocol::new();
                WebBrowser::new(team.start_page.clone(), config.logs_dir.clone())
                    .with_save_screenshots(config.save_screenshots)
                    .register(&protocol)
                    .await;
                Box::new(llm_member().with_tools(tool_registry(protocol).await?))
            }
            AgentKind::Retrieval => {
                let search = self.services.search.clone().ok_or_else(|| {
                    ConfigurationError::MissingSetting(ENV_SEARCH_ENDPOINT.to_string())
                })?;
                let index_name = spec.index_name.clone().unwrap_or_default();
                let protocol = CustomToolProtocol::new();
                RetrievalTool::new(search, index_name)
                    .register(&protocol)
                    .await;
                Box::new(llm_member().with_tools(tool_registry(protocol).await?))
            }
        };
        log::info!(
            "dreamteam::session: added {} ({})",
            spec.name,
            spec.kind.label()
        );
        Ok(member)
    }
}

async fn tool_registry(protocol: CustomToolProtocol) -> Result<ToolRegistry, SessionError> {
    ToolRegistry::from_protocol(Arc::new(protocol))
        .await
        .map_err(|e| SessionError::Setup(e.to_string()))
}
