//! Plain-text rendering of a run for terminals and logs.

use crate::dreamteam::orchestrator::COORDINATOR_NAME;
use crate::dreamteam::session::{RunState, RunStatus};
use crate::dreamteam::transcript::TranscriptEvent;
use chrono::{DateTime, Local};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Tasks offered to users who don't want to type their own.
pub const SAMPLE_TASKS: [&str; 5] = [
    "How do I setup my Surface Pro?",
    "Find me a French restaurant in Dubai with 2 Michelin stars.",
    "When and where is the next game of Arsenal? Print a link for purchase.",
    "Based on your knowledge base how much taxes has Elon Musk paid in 2024?",
    "Generate a Python script and execute Fibonacci sequence below 1000",
];

pub fn icon_for(source: &str) -> &'static str {
    match source {
        COORDINATOR_NAME => "🎻",
        "WebSurfer" => "🏄‍♂️",
        "Coder" => "👨‍💻",
        "FileSurfer" => "📂",
        "Executor" => "💻",
        "user" => "👤",
        _ => "🤖",
    }
}

pub fn render_event(event: &TranscriptEvent) -> String {
    render_event_at(event, Local::now())
}

/// `icon source @ timestamp` heading followed by the event body.
pub fn render_event_at(event: &TranscriptEvent, at: DateTime<Local>) -> String {
    let timestamp = at.format(TIMESTAMP_FORMAT);
    match event {
        TranscriptEvent::AgentMessage { source, text } => {
            format!("{} {} @ {}\n{}\n", icon_for(source), source, timestamp, text)
        }
        TranscriptEvent::MultiModalAgentMessage {
            source,
            text,
            image,
        } => format!(
            "{} {} @ {}\n{}\n[image: {}, {} base64 bytes]\n",
            icon_for(source),
            source,
            timestamp,
            text,
            image.mime_type,
            image.data.len()
        ),
        TranscriptEvent::ToolCallRequest {
            source,
            call_details,
        } => {
            let mut out = format!("{} {} @ {}\n", icon_for(source), source, timestamp);
            for call in call_details {
                out.push_str(&format!("→ {}({})\n", call.name, call.arguments));
            }
            out
        }
        TranscriptEvent::ToolCallResult { source, result } => {
            let mut out = format!("{} {} @ {}\n", icon_for(source), source, timestamp);
            for item in result {
                let marker = if item.is_error { "✗" } else { "←" };
                out.push_str(&format!("{} {}\n", marker, item.content));
            }
            out
        }
        TranscriptEvent::RunResult {
            last_message,
            stop_reason,
        } => format!(
            "🎯 RunResult @ {}\n{}\nStop reason: {}\n",
            timestamp,
            last_message.as_deref().unwrap_or("(no final answer)"),
            stop_reason.as_deref().unwrap_or("(none)")
        ),
    }
}

/// Closing summary of a finished run.
pub fn render_outcome(state: &RunState) -> String {
    match (&state.status, &state.final_answer) {
        (RunStatus::Completed, Some(answer)) => format!(
            "Task completed successfully.\n\n## Final answer:\n{}\n\n## Stop reason:\n{}\n",
            answer,
            state.stop_reason.as_deref().unwrap_or("")
        ),
        (RunStatus::Cancelled, _) => "Task cancelled.\n".to_string(),
        _ => {
            let mut out = "Task failed.\nFinal answer not found.\n".to_string();
            if let Some(reason) = &state.stop_reason {
                out.push_str(&format!("Reason: {}\n", reason));
            }
            out
        }
    }
}
