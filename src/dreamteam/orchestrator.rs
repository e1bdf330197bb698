//! The coordinator that drives a team through a task.
//!
//! # Loops
//!
//! **Outer loop (planning).** The coordinator model writes a fact sheet for the task, then a
//! plan for the team it has been given. Both are announced on the transcript as the *task
//! ledger* and become the first entry of the shared conversation.
//!
//! **Inner loop (one iteration per round).**
//!
//! 1. A tripped cancellation token ends the run silently ([`RunOutcome::Cancelled`]).
//! 2. `max_rounds` and `max_wall_time` end the run with `"Max rounds (N) reached."` or
//!    `"Max time (Ns) reached."`.
//! 3. The coordinator fills in a JSON *progress ledger*: is the request satisfied, is the team
//!    looping, is it making progress, who speaks next and with what instruction. Unreadable
//!    ledgers are re-requested up to [`MAX_LEDGER_ATTEMPTS`] times.
//! 4. A satisfied request ends the run with a final answer written by the coordinator.
//! 5. The [`StallPolicy`] judges the ledger. A stall (or an unknown next speaker) adds one to
//!    the stall counter, anything else takes one off. When the counter reaches
//!    `max_stalls_before_replan` the team is re-planned before anyone speaks again: facts and
//!    plan are rewritten, the conversation restarts from the new task ledger and every member
//!    forgets its private history. [`MAX_REPLAN_FAILURES`] consecutive failed re-plans are fatal.
//! 6. Otherwise the instruction is announced and the chosen member takes exactly one turn.
//!    A reply containing [`TERMINATION_TOKEN`] ends the run.
//!
//! Every terminated or failed run ends its transcript with exactly one
//! [`TranscriptEvent::RunResult`]; a cancelled one emits nothing further.

use crate::dreamteam::client_wrapper::{ClientWrapper, Message, Role};
use crate::dreamteam::member::{ChatEntry, MemberError, TeamMember, TurnContext};
use crate::dreamteam::team::TeamConfig;
use crate::dreamteam::transcript::{TranscriptEvent, TranscriptSender};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Transcript source of everything the coordinator says.
pub const COORDINATOR_NAME: &str = "Orchestrator";
pub const TERMINATION_TOKEN: &str = "TERMINATE";
pub const MAX_REPLAN_FAILURES: usize = 3;
pub const MAX_LEDGER_ATTEMPTS: usize = 3;

const COORDINATOR_SYSTEM_PROMPT: &str = "You are the orchestrator of a team of AI agents. You plan how the team should solve the user's request, choose who acts next and decide when the request has been answered.";

/// One judgement in the progress ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerItem<T> {
    #[serde(default)]
    pub reason: String,
    pub answer: T,
}

/// The coordinator's assessment of the conversation after each round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLedger {
    pub is_request_satisfied: LedgerItem<bool>,
    pub is_in_loop: LedgerItem<bool>,
    pub is_progress_being_made: LedgerItem<bool>,
    pub next_speaker: LedgerItem<String>,
    pub instruction_or_question: LedgerItem<String>,
}

impl ProgressLedger {
    /// Parse the JSON object embedded in `text` (first `{` to last `}`).
    pub fn parse(text: &str) -> Result<Self, String> {
        let start = text
            .find('{')
            .ok_or_else(|| "no JSON object in ledger".to_string())?;
        let end = text
            .rfind('}')
            .filter(|end| *end > start)
            .ok_or_else(|| "unterminated JSON object in ledger".to_string())?;
        serde_json::from_str(&text[start..=end]).map_err(|e| e.to_string())
    }
}

/// Decides whether a ledger describes a stalled team.
pub trait StallPolicy: Send + Sync {
    fn is_stalled(&self, ledger: &ProgressLedger) -> bool;
}

/// Stalled when the coordinator reports no progress or a loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerStallPolicy;

impl StallPolicy for LedgerStallPolicy {
    fn is_stalled(&self, ledger: &ProgressLedger) -> bool {
        !ledger.is_progress_being_made.answer || ledger.is_in_loop.answer
    }
}

/// Errors that stop a run.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    /// The run cannot continue; the message becomes the stop reason.
    Fatal(String),
    /// The cancellation token was tripped or the transcript consumer went away.
    Cancelled,
    NoAgents,
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::Fatal(msg) => write!(f, "Orchestration failed: {}", msg),
            OrchestrationError::Cancelled => write!(f, "Run cancelled"),
            OrchestrationError::NoAgents => write!(f, "No agents in team"),
        }
    }
}

impl Error for OrchestrationError {}

impl From<MemberError> for OrchestrationError {
    fn from(e: MemberError) -> Self {
        match e {
            MemberError::Cancelled => OrchestrationError::Cancelled,
            MemberError::TurnFailed(msg) | MemberError::Fatal(msg) => OrchestrationError::Fatal(msg),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run reached a stop condition. Both fields are `None` when the team was configured
    /// not to return a final answer.
    Completed {
        final_answer: Option<String>,
        stop_reason: Option<String>,
    },
    Cancelled,
    Failed { reason: String },
}

/// Why the inner loop stopped.
struct Termination {
    final_answer: String,
    stop_reason: String,
}

pub struct Orchestrator {
    coordinator: Arc<dyn ClientWrapper>,
    members: Vec<Box<dyn TeamMember>>,
    team: TeamConfig,
    transcript: TranscriptSender,
    cancel: CancellationToken,
    stall_policy: Box<dyn StallPolicy>,
    task: String,
    facts: String,
    plan: String,
    thread: Vec<ChatEntry>,
    stalls: usize,
    replan_failures: usize,
    round: usize,
}

impl Orchestrator {
    pub fn new(
        coordinator: Arc<dyn ClientWrapper>,
        members: Vec<Box<dyn TeamMember>>,
        team: TeamConfig,
        transcript: TranscriptSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            members,
            team,
            transcript,
            cancel,
            stall_policy: Box::new(LedgerStallPolicy),
            task: String::new(),
            facts: String::new(),
            plan: String::new(),
            thread: Vec::new(),
            stalls: 0,
            replan_failures: 0,
            round: 0,
        }
    }

    pub fn with_stall_policy(mut self, policy: Box<dyn StallPolicy>) -> Self {
        self.stall_policy = policy;
        self
    }

    /// Drive the team until a stop condition, then close the transcript with the result.
    pub async fn run(mut self, task: &str) -> RunOutcome {
        log::info!(
            "dreamteam::orchestrator: starting run with {} member(s)",
            self.members.len()
        );
        let outcome = self.drive(task).await;
        let rounds = self.round;

        let (event, outcome) = match outcome {
            Ok(termination) if self.team.return_final_answer => (
                TranscriptEvent::RunResult {
                    last_message: Some(termination.final_answer.clone()),
                    stop_reason: Some(termination.stop_reason.clone()),
                },
                RunOutcome::Completed {
                    final_answer: Some(termination.final_answer),
                    stop_reason: Some(termination.stop_reason),
                },
            ),
            Ok(_) => (
                TranscriptEvent::RunResult {
                    last_message: None,
                    stop_reason: None,
                },
                RunOutcome::Completed {
                    final_answer: None,
                    stop_reason: None,
                },
            ),
            Err(OrchestrationError::Cancelled) => {
                log::info!("dreamteam::orchestrator: run cancelled after {} round(s)", rounds);
                return RunOutcome::Cancelled;
            }
            Err(e) => {
                let reason = match e {
                    OrchestrationError::Fatal(msg) => msg,
                    other => other.to_string(),
                };
                log::error!("dreamteam::orchestrator: {}", reason);
                (
                    TranscriptEvent::RunResult {
                        last_message: None,
                        stop_reason: Some(reason.clone()),
                    },
                    RunOutcome::Failed { reason },
                )
            }
        };

        if self.transcript.send(event).await.is_err() {
            return RunOutcome::Cancelled;
        }
        log::info!("dreamteam::orchestrator: run finished after {} round(s)", rounds);
        outcome
    }

    async fn drive(&mut self, task: &str) -> Result<Termination, OrchestrationError> {
        if self.members.is_empty() {
            return Err(OrchestrationError::NoAgents);
        }
        self.check_cancelled()?;
        self.task = task.to_string();
        let started = Instant::now();

        self.plan_task().await?;
        self.announce_task_ledger().await?;

        loop {
            self.check_cancelled()?;
            if self.round >= self.team.max_rounds {
                return Ok(self.terminate(format!("Max rounds ({}) reached.", self.team.max_rounds)));
            }
            if started.elapsed() >= self.team.max_wall_time {
                return Ok(self.terminate(format!(
                    "Max time ({}s) reached.",
                    self.team.max_wall_time.as_secs()
                )));
            }
            self.round += 1;

            let ledger = self.progress_ledger().await?;
            log::debug!(
                "dreamteam::orchestrator: round {} ledger {:?}",
                self.round,
                ledger
            );

            if ledger.is_request_satisfied.answer {
                let reason = ledger.is_request_satisfied.reason.clone();
                return self.final_answer(reason).await;
            }

            let speaker = self.member_index(&ledger.next_speaker.answer);
            if speaker.is_none() || self.stall_policy.is_stalled(&ledger) {
                self.stalls += 1;
            } else {
                self.stalls = self.stalls.saturating_sub(1);
            }

            if self.stalls >= self.team.max_stalls_before_replan {
                self.replan().await?;
                continue;
            }

            let index = match speaker {
                Some(index) => index,
                None => {
                    log::warn!(
                        "dreamteam::orchestrator: unknown next speaker '{}'",
                        ledger.next_speaker.answer
                    );
                    continue;
                }
            };

            let instruction = ledger.instruction_or_question.answer;
            self.emit(TranscriptEvent::agent_message(COORDINATOR_NAME, instruction.clone()))
                .await?;
            self.thread.push(ChatEntry::new(COORDINATOR_NAME, instruction.clone()));

            let name = self.members[index].name().to_string();
            let turn = self.members[index]
                .take_turn(TurnContext {
                    conversation: &self.thread,
                    instruction: &instruction,
                    transcript: &self.transcript,
                    cancel: &self.cancel,
                })
                .await;

            let reply = match turn {
                Ok(reply) => reply,
                Err(MemberError::TurnFailed(msg)) => {
                    log::warn!("dreamteam::orchestrator: {} failed its turn: {}", name, msg);
                    let text = format!("Error: {}", msg);
                    self.emit(TranscriptEvent::agent_message(name.clone(), text.clone()))
                        .await?;
                    text
                }
                Err(e) => return Err(e.into()),
            };
            let terminated = reply.contains(TERMINATION_TOKEN);
            self.thread.push(ChatEntry::new(name, reply));
            if terminated {
                return Ok(self.terminate(format!("Text '{}' mentioned", TERMINATION_TOKEN)));
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), OrchestrationError> {
        if self.cancel.is_cancelled() {
            Err(OrchestrationError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn emit(&mut self, event: TranscriptEvent) -> Result<(), OrchestrationError> {
        self.transcript
            .send(event)
            .await
            .map_err(|_| OrchestrationError::Cancelled)
    }

    fn member_index(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.members.iter().position(|m| m.name() == name)
    }

    fn team_description(&self) -> String {
        self.members
            .iter()
            .map(|m| format!("{}: {}", m.name(), m.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn member_names(&self) -> String {
        self.members
            .iter()
            .map(|m| m.name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The system prompt plus the shared conversation, as seen by the coordinator.
    fn thread_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::new(Role::System, COORDINATOR_SYSTEM_PROMPT)];
        for entry in &self.thread {
            if entry.source == COORDINATOR_NAME {
                messages.push(Message::new(Role::Assistant, entry.text.clone()));
            } else {
                messages.push(Message::new(
                    Role::User,
                    format!("{}: {}", entry.source, entry.text),
                ));
            }
        }
        messages
    }

    /// One coordinator call, raced against cancellation.
    async fn ask(&mut self, messages: Vec<Message>) -> Result<String, OrchestrationError> {
        let coordinator = Arc::clone(&self.coordinator);
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestrationError::Cancelled),
            reply = coordinator.send_message(&messages) => reply
                .map(|m| m.content)
                .map_err(|e| OrchestrationError::Fatal(format!("coordinator call failed: {}", e))),
        }
    }

    /// Fact sheet, then plan, as a short two-step conversation.
    async fn plan_task(&mut self) -> Result<(), OrchestrationError> {
        let facts_request = facts_prompt(&self.task);
        let mut messages = vec![
            Message::new(Role::System, COORDINATOR_SYSTEM_PROMPT),
            Message::new(Role::User, facts_request),
        ];
        self.facts = self.ask(messages.clone()).await?;

        messages.push(Message::new(Role::Assistant, self.facts.clone()));
        messages.push(Message::new(Role::User, plan_prompt(&self.team_description())));
        self.plan = self.ask(messages).await?;
        Ok(())
    }

    async fn announce_task_ledger(&mut self) -> Result<(), OrchestrationError> {
        let ledger = task_ledger(
            &self.task,
            &self.team_description(),
            &self.facts,
            &self.plan,
        );
        self.emit(TranscriptEvent::agent_message(COORDINATOR_NAME, ledger.clone()))
            .await?;
        self.thread.push(ChatEntry::new(COORDINATOR_NAME, ledger));
        Ok(())
    }

    async fn progress_ledger(&mut self) -> Result<ProgressLedger, OrchestrationError> {
        let mut messages = self.thread_messages();
        messages.push(Message::new(
            Role::User,
            progress_ledger_prompt(&self.task, &self.team_description(), &self.member_names()),
        ));

        let mut last_error = String::new();
        for attempt in 1..=MAX_LEDGER_ATTEMPTS {
            let reply = match self.ask(messages.clone()).await {
                Ok(reply) => reply,
                Err(OrchestrationError::Fatal(e)) => {
                    last_error = e;
                    continue;
                }
                Err(e) => return Err(e),
            };
            match ProgressLedger::parse(&reply) {
                Ok(ledger) => return Ok(ledger),
                Err(e) => {
                    log::warn!(
                        "dreamteam::orchestrator: unreadable progress ledger (attempt {}): {}",
                        attempt,
                        e
                    );
                    last_error = e;
                }
            }
        }
        Err(OrchestrationError::Fatal(format!(
            "No usable progress ledger after {} attempts: {}",
            MAX_LEDGER_ATTEMPTS, last_error
        )))
    }

    async fn final_answer(&mut self, reason: String) -> Result<Termination, OrchestrationError> {
        let stop_reason = if reason.trim().is_empty() {
            "Request satisfied.".to_string()
        } else {
            reason
        };
        if !self.team.return_final_answer {
            return Ok(Termination {
                final_answer: String::new(),
                stop_reason,
            });
        }

        let mut messages = self.thread_messages();
        messages.push(Message::new(Role::User, final_answer_prompt(&self.task)));
        let answer = self.ask(messages).await?;
        self.emit(TranscriptEvent::agent_message(COORDINATOR_NAME, answer.clone()))
            .await?;
        self.thread.push(ChatEntry::new(COORDINATOR_NAME, answer.clone()));
        Ok(Termination {
            final_answer: answer,
            stop_reason,
        })
    }

    /// Rewrite facts and plan and restart the conversation. Fails the run after
    /// [`MAX_REPLAN_FAILURES`] consecutive failures.
    async fn replan(&mut self) -> Result<(), OrchestrationError> {
        log::info!(
            "dreamteam::orchestrator: {} stall(s) in round {}, re-planning",
            self.stalls,
            self.round
        );
        match self.rewrite_plan().await {
            Ok(()) => {
                self.replan_failures = 0;
                self.stalls = 0;
                self.thread.clear();
                for member in self.members.iter_mut() {
                    member.reset();
                }
                self.announce_task_ledger().await
            }
            Err(OrchestrationError::Fatal(e)) => {
                self.replan_failures += 1;
                log::warn!(
                    "dreamteam::orchestrator: re-plan failed ({}/{}): {}",
                    self.replan_failures,
                    MAX_REPLAN_FAILURES,
                    e
                );
                if self.replan_failures >= MAX_REPLAN_FAILURES {
                    Err(OrchestrationError::Fatal(format!(
                        "Re-planning failed {} times in a row: {}",
                        MAX_REPLAN_FAILURES, e
                    )))
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn rewrite_plan(&mut self) -> Result<(), OrchestrationError> {
        let mut messages = self.thread_messages();
        messages.push(Message::new(
            Role::User,
            update_facts_prompt(&self.task, &self.facts),
        ));
        let facts = self.ask(messages.clone()).await?;

        messages.push(Message::new(Role::Assistant, facts.clone()));
        messages.push(Message::new(
            Role::User,
            update_plan_prompt(&self.team_description()),
        ));
        let plan = self.ask(messages).await?;

        if facts.trim().is_empty() || plan.trim().is_empty() {
            return Err(OrchestrationError::Fatal(
                "coordinator returned an empty fact sheet or plan".to_string(),
            ));
        }
        self.facts = facts;
        self.plan = plan;
        Ok(())
    }

    /// Stop on a limit or the termination token: the last thing a member said is the answer.
    fn terminate(&self, stop_reason: String) -> Termination {
        let final_answer = self
            .thread
            .iter()
            .rev()
            .filter(|entry| entry.source != COORDINATOR_NAME)
            .map(|entry| entry.text.replace(TERMINATION_TOKEN, "").trim().to_string())
            .find(|text| !text.is_empty())
            .unwrap_or_default();
        Termination {
            final_answer,
            stop_reason,
        }
    }
}

fn facts_prompt(task: &str) -> String {
    format!(
        "Below I will present you a request. Before we begin addressing the request, please answer the following pre-survey to the best of your ability.\n\n\
         Here is the request:\n\n{}\n\n\
         Here is the pre-survey:\n\n\
         1. Please list any specific facts or figures that are GIVEN in the request itself.\n\
         2. Please list any facts that may need to be looked up, and WHERE SPECIFICALLY they might be found.\n\
         3. Please list any facts that may need to be derived (e.g., via logical deduction, simulation, or computation).\n\
         4. Please list any facts that are recalled from memory, hunches, well-reasoned guesses, etc.\n\n\
         Answer with the headings GIVEN OR VERIFIED FACTS, FACTS TO LOOK UP, FACTS TO DERIVE and EDUCATED GUESSES only.",
        task
    )
}

fn plan_prompt(team: &str) -> String {
    format!(
        "To address this request we have assembled the following team:\n\n{}\n\n\
         Based on the team composition, and known and unknown facts, please devise a short bullet-point plan for addressing the original request. Remember, there is no requirement to involve all team members.",
        team
    )
}

fn task_ledger(task: &str, team: &str, facts: &str, plan: &str) -> String {
    format!(
        "We are working to address the following user request:\n\n{}\n\n\
         To answer this request we have assembled the following team:\n\n{}\n\n\
         Here is an initial fact sheet to consider:\n\n{}\n\n\
         Here is the plan to follow as best as possible:\n\n{}",
        task, team, facts, plan
    )
}

fn progress_ledger_prompt(task: &str, team: &str, names: &str) -> String {
    format!(
        "Recall we are working on the following request:\n\n{}\n\n\
         And we have assembled the following team:\n\n{}\n\n\
         To make progress on the request, please answer the following questions, including necessary reasoning, and fill in this progress ledger:\n\n\
         - Is the request fully satisfied? (True if complete, or False if the original request has yet to be SUCCESSFULLY and FULLY addressed)\n\
         - Are we in a loop where we are repeating the same requests and/or getting the same responses as before?\n\
         - Are we making forward progress? (True if just starting, or recent messages are adding value. False if recent messages show evidence of being stuck in a loop or if there is evidence of significant barriers to success)\n\
         - Who should speak next? (select from: {})\n\
         - What instruction or question would you give this team member? (Phrase as if speaking directly to them, and include any specific information they may need)\n\n\
         Please output an answer in pure JSON format according to the following schema. The JSON object must be parsable as-is. DO NOT OUTPUT ANYTHING OTHER THAN JSON, AND DO NOT DEVIATE FROM THIS SCHEMA:\n\n\
         {{\"is_request_satisfied\": {{\"reason\": string, \"answer\": boolean}}, \
         \"is_in_loop\": {{\"reason\": string, \"answer\": boolean}}, \
         \"is_progress_being_made\": {{\"reason\": string, \"answer\": boolean}}, \
         \"next_speaker\": {{\"reason\": string, \"answer\": string}}, \
         \"instruction_or_question\": {{\"reason\": string, \"answer\": string}}}}",
        task, team, names
    )
}

fn final_answer_prompt(task: &str) -> String {
    format!(
        "We are working on the following task:\n{}\n\n\
         We have completed the task.\n\n\
         The above messages contain the conversation that took place to complete the task.\n\n\
         Based on the information gathered, provide the final answer to the original request.\n\
         The answer should be phrased as if you were speaking to the user.",
        task
    )
}

fn update_facts_prompt(task: &str, facts: &str) -> String {
    format!(
        "As a reminder, we are working to solve the following task:\n\n{}\n\n\
         It's clear we aren't making as much progress as we would like, but we may have learned something new. \
         Please rewrite the following fact sheet, updating it to include anything new we have learned that may be helpful. \
         Example edits can include (but are not limited to) adding new guesses, moving educated guesses to verified facts if appropriate, etc. \
         Updates may be made to any section of the fact sheet, and more than one section can be edited.\n\n\
         Here is the old fact sheet:\n\n{}",
        task, facts
    )
}

fn update_plan_prompt(team: &str) -> String {
    format!(
        "Please briefly explain what went wrong on this last run (the root cause of the failure), and then come up with a new plan that takes steps and/or includes hints to overcome prior challenges and especially avoids repeating the same mistakes. \
         As before, the new plan should be concise, be expressed in bullet-point form, and consider the following team composition:\n\n{}",
        team
    )
}
