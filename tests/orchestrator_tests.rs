use async_trait::async_trait;
use dreamteam::client_wrapper::{ClientWrapper, Message, Role};
use dreamteam::orchestrator::{Orchestrator, RunOutcome};
use dreamteam::transcript;
use dreamteam::{MemberError, TeamConfig, TeamMember, TranscriptEvent, TurnContext};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn ledger(satisfied: bool, progress: bool, speaker: &str, instruction: &str) -> String {
    serde_json::json!({
        "is_request_satisfied": {"reason": "The team answered", "answer": satisfied},
        "is_in_loop": {"reason": "", "answer": false},
        "is_progress_being_made": {"reason": "", "answer": progress},
        "next_speaker": {"reason": "", "answer": speaker},
        "instruction_or_question": {"reason": "", "answer": instruction},
    })
    .to_string()
}

/// Plans with canned text and hands out progress ledgers in order, repeating the last one.
struct ScriptedCoordinator {
    ledgers: Mutex<Vec<String>>,
    delay: Option<Duration>,
    blank_fact_rewrites: bool,
    fact_rewrites: Arc<AtomicUsize>,
}

impl ScriptedCoordinator {
    fn new(ledgers: Vec<String>) -> Self {
        Self {
            ledgers: Mutex::new(ledgers),
            delay: None,
            blank_fact_rewrites: false,
            fact_rewrites: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer every request to rewrite the fact sheet with nothing.
    fn with_blank_fact_rewrites(mut self) -> Self {
        self.blank_fact_rewrites = true;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ClientWrapper for ScriptedCoordinator {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let reply = if last.contains("progress ledger") {
            let mut queue = self.ledgers.lock().unwrap();
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue.first().cloned().unwrap_or_default()
            }
        } else if last.contains("final answer") {
            "Four.".to_string()
        } else if last.contains("rewrite the following fact sheet") {
            self.fact_rewrites.fetch_add(1, Ordering::SeqCst);
            if self.blank_fact_rewrites {
                String::new()
            } else {
                "GIVEN OR VERIFIED FACTS\n- none".to_string()
            }
        } else if last.contains("pre-survey") {
            "GIVEN OR VERIFIED FACTS\n- none".to_string()
        } else {
            "- Coder writes the script".to_string()
        };
        Ok(Message::new(Role::Assistant, reply))
    }

    fn model_name(&self) -> &str {
        "scripted-coordinator"
    }
}

/// Never answers; only cancellation ends its calls.
struct Hanging;

#[async_trait]
impl ClientWrapper for Hanging {
    async fn send_message(
        &self,
        _messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        futures_util::future::pending::<()>().await;
        Ok(Message::new(Role::Assistant, ""))
    }

    fn model_name(&self) -> &str {
        "hanging"
    }
}

/// Replies with a fixed text, or fails its turn when the text is empty.
struct Scripted {
    name: &'static str,
    reply: &'static str,
    turns: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(name: &'static str, reply: &'static str) -> Self {
        Self {
            name,
            reply,
            turns: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl TeamMember for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test member"
    }

    async fn take_turn(&mut self, ctx: TurnContext<'_>) -> Result<String, MemberError> {
        self.turns.fetch_add(1, Ordering::SeqCst);
        if self.reply.is_empty() {
            return Err(MemberError::TurnFailed("model unavailable".to_string()));
        }
        ctx.emit(TranscriptEvent::agent_message(self.name, self.reply))
            .await?;
        Ok(self.reply.to_string())
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn is_task_ledger(event: &TranscriptEvent) -> bool {
    matches!(event, TranscriptEvent::AgentMessage { text, .. } if text.starts_with("We are working to address"))
}

fn run_results(events: &[TranscriptEvent]) -> usize {
    events.iter().filter(|e| e.is_run_result()).count()
}

#[tokio::test]
async fn test_run_stops_at_max_rounds() {
    let coordinator = Arc::new(ScriptedCoordinator::new(vec![ledger(
        false,
        true,
        "Coder",
        "Keep going",
    )]));
    let member = Scripted::new("Coder", "Still working");
    let turns = Arc::clone(&member.turns);
    let cancel = CancellationToken::new();
    let (tx, stream) = transcript::channel(128, cancel.clone());

    let outcome = Orchestrator::new(
        coordinator,
        vec![Box::new(member)],
        TeamConfig::default().with_max_rounds(3),
        tx,
        cancel,
    )
    .run("Count to infinity")
    .await;

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            final_answer: Some("Still working".to_string()),
            stop_reason: Some("Max rounds (3) reached.".to_string()),
        }
    );
    assert_eq!(turns.load(Ordering::SeqCst), 3);
    let events = stream.collect_all().await;
    assert_eq!(run_results(&events), 1);
    assert!(events.last().unwrap().is_run_result());
}

#[tokio::test]
async fn test_run_stops_at_max_wall_time() {
    let coordinator = Arc::new(
        ScriptedCoordinator::new(vec![ledger(false, true, "Coder", "Keep going")])
            .with_delay(Duration::from_millis(20)),
    );
    let cancel = CancellationToken::new();
    let (tx, stream) = transcript::channel(128, cancel.clone());

    let outcome = Orchestrator::new(
        coordinator,
        vec![Box::new(Scripted::new("Coder", "Working"))],
        TeamConfig::default().with_max_wall_time(Duration::from_millis(5)),
        tx,
        cancel,
    )
    .run("Slow task")
    .await;

    assert!(matches!(
        outcome,
        RunOutcome::Completed { stop_reason: Some(ref reason), .. } if reason == "Max time (0s) reached."
    ));
    let events = stream.collect_all().await;
    assert_eq!(run_results(&events), 1);
}

#[tokio::test]
async fn test_termination_token_ends_the_run() {
    let coordinator = Arc::new(ScriptedCoordinator::new(vec![ledger(
        false,
        true,
        "Coder",
        "Compute 2+2",
    )]));
    let member = Scripted::new("Coder", "The result is 4. TERMINATE");
    let turns = Arc::clone(&member.turns);
    let cancel = CancellationToken::new();
    let (tx, stream) = transcript::channel(64, cancel.clone());

    let outcome = Orchestrator::new(
        coordinator,
        vec![Box::new(member)],
        TeamConfig::default(),
        tx,
        cancel,
    )
    .run("What is 2+2?")
    .await;

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            final_answer: Some("The result is 4.".to_string()),
            stop_reason: Some("Text 'TERMINATE' mentioned".to_string()),
        }
    );
    assert_eq!(turns.load(Ordering::SeqCst), 1);
    let events = stream.collect_all().await;
    assert!(events.last().unwrap().is_run_result());
}

#[tokio::test]
async fn test_stalls_trigger_one_replan_before_the_next_turn() {
    let coordinator = Arc::new(ScriptedCoordinator::new(vec![
        ledger(false, false, "Coder", "Try again"),
        ledger(false, true, "Coder", "Write the script"),
        ledger(true, true, "Coder", ""),
    ]));
    let member = Scripted::new("Coder", "print(2+2)");
    let turns = Arc::clone(&member.turns);
    let resets = Arc::clone(&member.resets);
    let cancel = CancellationToken::new();
    let (tx, stream) = transcript::channel(64, cancel.clone());

    let outcome = Orchestrator::new(
        coordinator,
        vec![Box::new(member)],
        TeamConfig::default().with_max_stalls_before_replan(1),
        tx,
        cancel,
    )
    .run("Print four")
    .await;

    assert!(matches!(outcome, RunOutcome::Completed { final_answer: Some(ref a), .. } if a == "Four."));
    assert_eq!(resets.load(Ordering::SeqCst), 1);
    assert_eq!(turns.load(Ordering::SeqCst), 1);

    let events = stream.collect_all().await;
    let ledgers: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| is_task_ledger(e))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(ledgers, vec![0, 1]);
    let first_turn = events
        .iter()
        .position(|e| e.source() == Some("Coder"))
        .unwrap();
    assert!(first_turn > ledgers[1]);
    assert_eq!(run_results(&events), 1);
}

#[tokio::test]
async fn test_three_failed_replans_end_the_run() {
    let coordinator = ScriptedCoordinator::new(vec![ledger(false, false, "Coder", "Try again")])
        .with_blank_fact_rewrites();
    let fact_rewrites = Arc::clone(&coordinator.fact_rewrites);
    let member = Scripted::new("Coder", "print(2+2)");
    let turns = Arc::clone(&member.turns);
    let cancel = CancellationToken::new();
    let (tx, stream) = transcript::channel(64, cancel.clone());

    let outcome = Orchestrator::new(
        Arc::new(coordinator),
        vec![Box::new(member)],
        TeamConfig::default().with_max_stalls_before_replan(1),
        tx,
        cancel,
    )
    .run("Print four")
    .await;

    let reason = match outcome {
        RunOutcome::Failed { reason } => reason,
        other => panic!("expected a failed run, got {:?}", other),
    };
    assert!(reason.starts_with("Re-planning failed 3 times in a row"));
    assert_eq!(fact_rewrites.load(Ordering::SeqCst), 3);
    assert_eq!(turns.load(Ordering::SeqCst), 0);

    let events = stream.collect_all().await;
    assert_eq!(events.iter().filter(|e| is_task_ledger(e)).count(), 1);
    assert_eq!(run_results(&events), 1);
    assert_eq!(
        events.last(),
        Some(&TranscriptEvent::RunResult {
            last_message: None,
            stop_reason: Some(reason),
        })
    );
}

#[tokio::test]
async fn test_failed_turn_is_reported_and_the_run_continues() {
    let coordinator = Arc::new(ScriptedCoordinator::new(vec![
        ledger(false, true, "Coder", "Write it"),
        ledger(true, true, "Coder", ""),
    ]));
    let cancel = CancellationToken::new();
    let (tx, stream) = transcript::channel(64, cancel.clone());

    let outcome = Orchestrator::new(
        coordinator,
        vec![Box::new(Scripted::new("Coder", ""))],
        TeamConfig::default(),
        tx,
        cancel,
    )
    .run("Anything")
    .await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    let events = stream.collect_all().await;
    assert!(events.iter().any(|e| matches!(
        e,
        TranscriptEvent::AgentMessage { source, text } if source == "Coder" && text == "Error: model unavailable"
    )));
}

#[tokio::test]
async fn test_cancelled_run_emits_no_result() {
    let cancel = CancellationToken::new();
    let (tx, mut stream) = transcript::channel(8, cancel.clone());
    let orchestrator = Orchestrator::new(
        Arc::new(Hanging),
        vec![Box::new(Scripted::new("Coder", "hi"))],
        TeamConfig::default(),
        tx,
        cancel.clone(),
    );
    let task = tokio::spawn(orchestrator.run("Never answered"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    assert_eq!(task.await.unwrap(), RunOutcome::Cancelled);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_empty_team_fails() {
    let cancel = CancellationToken::new();
    let (tx, stream) = transcript::channel(8, cancel.clone());
    let outcome = Orchestrator::new(
        Arc::new(ScriptedCoordinator::new(Vec::new())),
        Vec::new(),
        TeamConfig::default(),
        tx,
        cancel,
    )
    .run("Nobody home")
    .await;

    assert!(matches!(outcome, RunOutcome::Failed { .. }));
    assert_eq!(run_results(&stream.collect_all().await), 1);
}
