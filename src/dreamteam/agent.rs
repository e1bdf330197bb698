//! LLM-backed team members.
//!
//! An [`Agent`] keeps a private [`LLMSession`] seeded with its system prompt. On each turn it
//! replays the shared conversation entries it has not seen yet, asks the model for a reply and,
//! when tools are attached, runs the tool loop:
//!
//! 1. The model answers with a `{"tool_call": {"name": ..., "parameters": {...}}}` fragment.
//! 2. The call is announced as a [`TranscriptEvent::ToolCallRequest`] and executed.
//! 3. The outcome is announced as a [`TranscriptEvent::ToolCallResult`] (plus a multimodal
//!    message when the tool returned an image) and fed back to the model.
//!
//! At most [`MAX_TOOL_ITERATIONS`] calls are made per turn. The final reply is emitted as a
//! [`TranscriptEvent::AgentMessage`] and returned to the orchestrator.
//!
//! Coder, FileSurfer, WebSurfer, custom and retrieval agents are all `Agent`s; they differ in
//! prompt and tools only.

use crate::dreamteam::client_wrapper::{ClientWrapper, Role};
use crate::dreamteam::llm_session::LLMSession;
use crate::dreamteam::member::{MemberError, TeamMember, TurnContext};
use crate::dreamteam::tool_protocol::{ToolRegistry, IMAGE_METADATA_KEY};
use crate::dreamteam::transcript::{
    FunctionCall, FunctionExecutionResult, ImageContent, TranscriptEvent,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MAX_TOOL_ITERATIONS: usize = 5;
pub const DEFAULT_MAX_TOKENS: usize = 128_000;

/// A tool invocation found in model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
}

pub struct Agent {
    name: String,
    description: String,
    session: LLMSession,
    tools: Option<ToolRegistry>,
    /// How many shared conversation entries have been replayed into `session`.
    seen: usize,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            session: LLMSession::new(client, system_prompt.into(), DEFAULT_MAX_TOKENS),
            tools: None,
            seen: 0,
        }
    }

    /// Attach tools and advertise them in the system prompt.
    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        let prompt = format!("{}{}", self.session.system_prompt(), registry.prompt_section());
        self.session.set_system_prompt(prompt);
        self.tools = Some(registry);
        self
    }

    pub fn session(&self) -> &LLMSession {
        &self.session
    }

    pub fn tools(&self) -> Option<&ToolRegistry> {
        self.tools.as_ref()
    }

    fn catch_up(&mut self, ctx: &TurnContext<'_>) {
        for entry in ctx.conversation.iter().skip(self.seen) {
            if entry.source == self.name {
                self.session
                    .receive_message(Role::Assistant, entry.text.clone());
            } else {
                self.session
                    .receive_message(Role::User, format!("{}: {}", entry.source, entry.text));
            }
        }
        self.seen = ctx.conversation.len();
    }

    async fn complete(&mut self, cancel: &CancellationToken) -> Result<String, MemberError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MemberError::Cancelled),
            reply = self.session.complete() => reply
                .map(|message| message.content)
                .map_err(|e| MemberError::TurnFailed(e.to_string())),
        }
    }

    /// Execute one call and announce it. Returns the text fed back to the model.
    async fn run_tool(&self, ctx: &TurnContext<'_>, call: ToolCall) -> Result<String, MemberError> {
        let registry = match &self.tools {
            Some(registry) => registry,
            None => return Ok(String::new()),
        };
        let call_id = uuid::Uuid::new_v4().to_string();
        ctx.emit(TranscriptEvent::ToolCallRequest {
            source: self.name.clone(),
            call_details: vec![FunctionCall {
                id: call_id.clone(),
                name: call.name.clone(),
                arguments: call.parameters.to_string(),
            }],
        })
        .await?;

        let (content, is_error, image) = match registry
            .execute_tool(&call.name, call.parameters)
            .await
        {
            Ok(result) => {
                let image = result
                    .metadata
                    .get(IMAGE_METADATA_KEY)
                    .and_then(|v| serde_json::from_value::<ImageContent>(v.clone()).ok());
                (result.content_text(), !result.success, image)
            }
            Err(e) => (format!("Tool execution error: {}", e), true, None),
        };
        log::debug!(
            "dreamteam::agent: {} called {} (error: {})",
            self.name,
            call.name,
            is_error
        );

        ctx.emit(TranscriptEvent::ToolCallResult {
            source: self.name.clone(),
            result: vec![FunctionExecutionResult {
                call_id,
                content: content.clone(),
                is_error,
            }],
        })
        .await?;
        if let Some(image) = image {
            ctx.emit(TranscriptEvent::MultiModalAgentMessage {
                source: self.name.clone(),
                text: content.clone(),
                image,
            })
            .await?;
        }

        Ok(if is_error {
            format!("Tool '{}' failed. Error: {}", call.name, content)
        } else {
            format!("Tool '{}' executed successfully. Result: {}", call.name, content)
        })
    }
}

#[async_trait]
impl TeamMember for Agent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn take_turn(&mut self, ctx: TurnContext<'_>) -> Result<String, MemberError> {
        self.catch_up(&ctx);
        let mut reply = self.complete(ctx.cancel).await?;

        let mut iterations = 0;
        while self.tools.is_some() {
            let call = match parse_tool_call(&reply) {
                Some(call) => call,
                None => break,
            };
            if iterations >= MAX_TOOL_ITERATIONS {
                reply = format!("{}\n\n[Warning: Maximum tool iterations reached]", reply);
                break;
            }
            iterations += 1;

            let feedback = self.run_tool(&ctx, call).await?;
            self.session.receive_message(Role::User, feedback);
            reply = self.complete(ctx.cancel).await?;
        }

        ctx.emit(TranscriptEvent::agent_message(self.name.clone(), reply.clone()))
            .await?;
        // The reply is already in the session; don't replay it next turn.
        self.seen += 1;
        Ok(reply)
    }

    fn reset(&mut self) {
        self.session.clear_history();
        self.seen = 0;
    }
}

/// Find the first `{"tool_call": ...}` fragment in `response`, by brace counting so that
/// surrounding prose is tolerated.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let start = response.find("{\"tool_call\"")?;
    let mut depth = 0usize;
    let mut end = None;
    for (offset, ch) in response[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    end = Some(start + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let parsed: serde_json::Value = serde_json::from_str(&response[start..end?]).ok()?;
    let call = parsed.get("tool_call")?;
    Some(ToolCall {
        name: call.get("name")?.as_str()?.to_string(),
        parameters: call
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})),
    })
}
