//! The Executor: runs the code blocks other members wrote.
//!
//! It takes no model calls. On its turn it looks backwards through the shared conversation for
//! the latest message containing fenced code, runs every block through the run's
//! [`SharedBackend`] and reports the console output. Losing the sandbox is fatal to the run;
//! any other execution error is reported as a failed call and the team carries on.

use crate::dreamteam::execution::{extract_code_blocks, CodeBlock, SharedBackend};
use crate::dreamteam::member::{MemberError, TeamMember, TurnContext};
use crate::dreamteam::transcript::{FunctionCall, FunctionExecutionResult, TranscriptEvent};
use async_trait::async_trait;

pub const EXECUTE_CODE_TOOL: &str = "execute_code";

const NO_CODE_REPLY: &str = "No code blocks found in the thread. Please provide at least one markdown-encoded code block to execute (i.e., quoting code in ```python or ```sh code blocks).";

pub struct CodeExecutorAgent {
    name: String,
    description: String,
    backend: SharedBackend,
}

impl CodeExecutorAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        backend: SharedBackend,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            backend,
        }
    }

    fn latest_code(&self, ctx: &TurnContext<'_>) -> Vec<CodeBlock> {
        ctx.conversation
            .iter()
            .rev()
            .filter(|entry| entry.source != self.name)
            .map(|entry| extract_code_blocks(&entry.text))
            .find(|blocks| !blocks.is_empty())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TeamMember for CodeExecutorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn take_turn(&mut self, ctx: TurnContext<'_>) -> Result<String, MemberError> {
        let blocks = self.latest_code(&ctx);
        if blocks.is_empty() {
            ctx.emit(TranscriptEvent::agent_message(self.name.clone(), NO_CODE_REPLY))
                .await?;
            return Ok(NO_CODE_REPLY.to_string());
        }

        let mut output = String::new();
        let mut exit_status = 0;
        for block in blocks {
            if ctx.cancel.is_cancelled() {
                return Err(MemberError::Cancelled);
            }
            let call_id = uuid::Uuid::new_v4().to_string();
            ctx.emit(TranscriptEvent::ToolCallRequest {
                source: self.name.clone(),
                call_details: vec![FunctionCall {
                    id: call_id.clone(),
                    name: EXECUTE_CODE_TOOL.to_string(),
                    arguments: serde_json::json!({
                        "language": block.language,
                        "code": block.code,
                    })
                    .to_string(),
                }],
            })
            .await?;

            let outcome = {
                let backend = self.backend.lock().await;
                backend.execute(&block.code, &block.language).await
            };
            let (content, is_error) = match outcome {
                Ok(result) => {
                    exit_status = result.exit_status;
                    (result.output(), !result.succeeded())
                }
                Err(e) if e.is_fatal() => {
                    log::error!("dreamteam::executor_agent: {}", e);
                    return Err(MemberError::Fatal(e.to_string()));
                }
                Err(e) => {
                    exit_status = 1;
                    (e.to_string(), true)
                }
            };

            ctx.emit(TranscriptEvent::ToolCallResult {
                source: self.name.clone(),
                result: vec![FunctionExecutionResult {
                    call_id,
                    content: content.clone(),
                    is_error,
                }],
            })
            .await?;
            output.push_str(&content);
            if is_error {
                break;
            }
        }

        let summary = format!(
            "The script ran, then exited with Unix exit code: {}\nIts output was:\n{}",
            exit_status, output
        );
        ctx.emit(TranscriptEvent::agent_message(self.name.clone(), summary.clone()))
            .await?;
        Ok(summary)
    }
}
