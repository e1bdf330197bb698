//! The seam between the orchestrator and the agents it coordinates.
//!
//! The orchestrator owns the shared conversation (a list of [`ChatEntry`]s) and, each round,
//! hands exactly one [`TeamMember`] a [`TurnContext`]. The member catches up on the entries
//! it has not seen yet, acts on the coordinator's instruction, emits its own transcript events
//! and returns the text it wants appended to the shared conversation.

use crate::dreamteam::transcript::{TranscriptClosed, TranscriptEvent, TranscriptSender};
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// One message in the team's shared conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub source: String,
    pub text: String,
}

impl ChatEntry {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// Everything a member sees during its turn.
pub struct TurnContext<'a> {
    /// The shared conversation so far, instruction included.
    pub conversation: &'a [ChatEntry],
    /// What the coordinator asked this member to do.
    pub instruction: &'a str,
    pub transcript: &'a TranscriptSender,
    pub cancel: &'a CancellationToken,
}

impl<'a> TurnContext<'a> {
    /// Emit an event, mapping a closed transcript to [`MemberError::Cancelled`].
    pub async fn emit(&self, event: TranscriptEvent) -> Result<(), MemberError> {
        self.transcript
            .send(event)
            .await
            .map_err(|TranscriptClosed| MemberError::Cancelled)
    }
}

/// Why a member's turn did not produce a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberError {
    /// The run was cancelled mid-turn.
    Cancelled,
    /// The turn failed; the team can carry on.
    TurnFailed(String),
    /// The member can no longer work (e.g. its sandbox is gone); the run must stop.
    Fatal(String),
}

impl fmt::Display for MemberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberError::Cancelled => write!(f, "Turn cancelled"),
            MemberError::TurnFailed(msg) => write!(f, "Turn failed: {}", msg),
            MemberError::Fatal(msg) => write!(f, "Member unusable: {}", msg),
        }
    }
}

impl Error for MemberError {}

/// A participant the orchestrator can address by name.
#[async_trait]
pub trait TeamMember: Send {
    /// Unique within the team; the coordinator names the next speaker by this.
    fn name(&self) -> &str;

    /// What the coordinator is told about this member when planning.
    fn description(&self) -> &str;

    /// Act once on `ctx.instruction`. Returns the message appended to the conversation.
    async fn take_turn(&mut self, ctx: TurnContext<'_>) -> Result<String, MemberError>;

    /// Forget private state. Called for every member after a re-plan.
    fn reset(&mut self) {}
}
