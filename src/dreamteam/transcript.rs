//! Transcript events and the single-producer, single-consumer stream that carries them.
//!
//! A run produces a finite, strictly ordered sequence of [`TranscriptEvent`]s. The
//! orchestrator and the team members push through a [`TranscriptSender`]; the caller pulls
//! from the [`TranscriptStream`] either with [`TranscriptStream::next`] or through the
//! [`futures_util::Stream`] impl.
//!
//! Both halves watch the run's [`CancellationToken`]. Once it is tripped the sender refuses
//! further events and the stream reports end-of-stream on its next poll, even if events are
//! still buffered. A successful run ends with exactly one [`TranscriptEvent::RunResult`].
//!
//! ```rust
//! use dreamteam::transcript::{self, TranscriptEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (tx, mut stream) = transcript::channel(8, CancellationToken::new());
//! tokio::spawn(async move {
//!     let _ = tx.send(TranscriptEvent::agent_message("Coder", "print('hi')")).await;
//! });
//! while let Some(event) = stream.next().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// An image attached to a multimodal message, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub mime_type: String,
    pub data: String,
}

impl ImageContent {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        use base64::Engine;
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A tool invocation requested by a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    /// JSON encoded arguments.
    pub arguments: String,
}

/// Outcome of a [`FunctionCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExecutionResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// One entry of a run's transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEvent {
    AgentMessage {
        source: String,
        text: String,
    },
    MultiModalAgentMessage {
        source: String,
        text: String,
        image: ImageContent,
    },
    ToolCallRequest {
        source: String,
        call_details: Vec<FunctionCall>,
    },
    ToolCallResult {
        source: String,
        result: Vec<FunctionExecutionResult>,
    },
    /// Always the last event of a run that was not cancelled.
    RunResult {
        last_message: Option<String>,
        stop_reason: Option<String>,
    },
}

impl TranscriptEvent {
    pub fn agent_message(source: impl Into<String>, text: impl Into<String>) -> Self {
        TranscriptEvent::AgentMessage {
            source: source.into(),
            text: text.into(),
        }
    }

    /// The member or coordinator that produced the event, `None` for [`TranscriptEvent::RunResult`].
    pub fn source(&self) -> Option<&str> {
        match self {
            TranscriptEvent::AgentMessage { source, .. }
            | TranscriptEvent::MultiModalAgentMessage { source, .. }
            | TranscriptEvent::ToolCallRequest { source, .. }
            | TranscriptEvent::ToolCallResult { source, .. } => Some(source),
            TranscriptEvent::RunResult { .. } => None,
        }
    }

    pub fn is_run_result(&self) -> bool {
        matches!(self, TranscriptEvent::RunResult { .. })
    }
}

/// Returned by [`TranscriptSender::send`] once the run is cancelled or the consumer is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptClosed;

impl fmt::Display for TranscriptClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transcript closed")
    }
}

impl Error for TranscriptClosed {}

/// Create a bounded transcript channel tied to `cancel`.
pub fn channel(capacity: usize, cancel: CancellationToken) -> (TranscriptSender, TranscriptStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancelled = Box::pin(cancel.clone().cancelled_owned());
    (
        TranscriptSender { tx, cancel },
        TranscriptStream {
            rx,
            cancelled,
            finished: false,
        },
    )
}

/// Producer half. Clones share the same channel; only one task sends at a time.
#[derive(Clone)]
pub struct TranscriptSender {
    tx: mpsc::Sender<TranscriptEvent>,
    cancel: CancellationToken,
}

impl TranscriptSender {
    /// Push `event`, suspending while the buffer is full. Nothing is sent after cancellation.
    pub async fn send(&self, event: TranscriptEvent) -> Result<(), TranscriptClosed> {
        if self.cancel.is_cancelled() {
            return Err(TranscriptClosed);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TranscriptClosed),
            sent = self.tx.send(event) => sent.map_err(|_| TranscriptClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Consumer half.
pub struct TranscriptStream {
    rx: mpsc::Receiver<TranscriptEvent>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
}

impl TranscriptStream {
    /// Wait for the next event. `None` means the run ended or was cancelled.
    pub async fn next(&mut self) -> Option<TranscriptEvent> {
        futures_util::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    /// Drain every remaining event.
    pub async fn collect_all(mut self) -> Vec<TranscriptEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for TranscriptStream {
    type Item = TranscriptEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if self.cancelled.as_mut().poll(cx).is_ready() {
            self.finished = true;
            self.rx.close();
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order_then_end() {
        let (tx, stream) = channel(2, CancellationToken::new());
        let producer = tokio::spawn(async move {
            for i in 0..5 {
                tx.send(TranscriptEvent::agent_message("Coder", format!("{}", i)))
                    .await
                    .unwrap();
            }
        });

        let events = stream.collect_all().await;
        producer.await.unwrap();
        let texts: Vec<String> = events
            .iter()
            .map(|e| match e {
                TranscriptEvent::AgentMessage { text, .. } => text.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(texts, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream_with_buffered_events() {
        let cancel = CancellationToken::new();
        let (tx, mut stream) = channel(8, cancel.clone());
        tx.send(TranscriptEvent::agent_message("Coder", "a"))
            .await
            .unwrap();
        tx.send(TranscriptEvent::agent_message("Coder", "b"))
            .await
            .unwrap();

        assert!(stream.next().await.is_some());
        cancel.cancel();
        assert!(stream.next().await.is_none());
        assert_eq!(
            tx.send(TranscriptEvent::agent_message("Coder", "c")).await,
            Err(TranscriptClosed)
        );
    }

    #[tokio::test]
    async fn test_blocked_sender_is_released_by_cancellation() {
        let cancel = CancellationToken::new();
        let (tx, _stream) = channel(1, cancel.clone());
        tx.send(TranscriptEvent::agent_message("Coder", "fills buffer"))
            .await
            .unwrap();

        let blocked =
            tokio::spawn(async move { tx.send(TranscriptEvent::agent_message("Coder", "x")).await });
        cancel.cancel();
        assert_eq!(blocked.await.unwrap(), Err(TranscriptClosed));
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = TranscriptEvent::RunResult {
            last_message: Some("done".to_string()),
            stop_reason: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RunResult");
        assert!(event.source().is_none());
    }
}
