//! # Dream Team
//!
//! Dream Team runs a small team of LLM-backed agents against a natural-language task. A
//! coordinator keeps a fact sheet and a plan, picks the next speaker each round, notices when
//! the team is stalling and re-plans, and decides when the task is done. Every message, tool
//! call and tool result is pushed onto an ordered transcript that a caller consumes live.
//!
//! The crate is organised in layers:
//!
//! * **Agent definitions**: [`registry::AgentRegistry`] holds the saved [`AgentSpec`]s. The four
//!   builtin roles (Coder, Executor, FileSurfer, WebSurfer) can be restored at any time; custom
//!   and retrieval agents are user-authored.
//! * **Team members**: [`Agent`] wraps an [`LLMSession`] with an optional tool registry, and
//!   [`executor_agent::CodeExecutorAgent`] runs fenced code blocks through an
//!   [`execution::ExecutionBackend`] (local container, host process or remote session pool).
//! * **Coordination**: [`orchestrator::Orchestrator`] drives the ledger loop with bounded
//!   rounds, wall-clock limits and a pluggable [`orchestrator::StallPolicy`].
//! * **Streaming**: [`transcript`] is a single-producer single-consumer channel of
//!   [`TranscriptEvent`]s that stops promptly on cancellation.
//! * **Run lifecycle**: [`session::RunController`] validates input, builds the team from specs,
//!   owns the sandbox for the duration of a run and records the final answer.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dreamteam::clients::azure_openai::AzureOpenAIClient;
//! use dreamteam::registry::AgentRegistry;
//! use dreamteam::session::{RunController, RunServices};
//! use dreamteam::{DreamTeamConfig, TeamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     dreamteam::init_logger();
//!
//!     let config = DreamTeamConfig::from_env();
//!     let client = Arc::new(AzureOpenAIClient::from_config(&config)?);
//!     let services = RunServices::new(config, client);
//!
//!     let mut registry = AgentRegistry::new();
//!     registry.restore_defaults();
//!     let team = TeamConfig::new(registry.specs().to_vec());
//!
//!     let mut controller = RunController::new(services);
//!     let mut handle = controller.start_run("How many moons does Mars have?", &team).await?;
//!     while let Some(event) = handle.events.next().await {
//!         println!("{}", dreamteam::render::render_event(&event));
//!     }
//!     let state = controller.finish(handle).await;
//!     println!("{:?}", state.final_answer);
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding Dream Team can opt in to `RUST_LOG` driven diagnostics without
/// choosing a logging backend upfront.
///
/// ```rust
/// dreamteam::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod dreamteam;

// Re-exporting key items for easier external access.
pub use dreamteam::agent::Agent;
pub use dreamteam::client_wrapper;
pub use dreamteam::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
pub use dreamteam::clients;
pub use dreamteam::config::{ConfigurationError, DreamTeamConfig, ExecutionMode};
pub use dreamteam::credential;
pub use dreamteam::execution;
pub use dreamteam::executor_agent;
pub use dreamteam::llm_session::LLMSession;
pub use dreamteam::member::{ChatEntry, MemberError, TeamMember, TurnContext};
pub use dreamteam::orchestrator;
pub use dreamteam::registry;
pub use dreamteam::registry::{AgentKind, AgentSpec};
pub use dreamteam::render;
pub use dreamteam::session;
pub use dreamteam::team::TeamConfig;
pub use dreamteam::tool_protocol;
pub use dreamteam::tool_protocols;
pub use dreamteam::tools;
pub use dreamteam::transcript;
pub use dreamteam::transcript::{TranscriptEvent, TranscriptStream};
