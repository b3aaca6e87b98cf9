use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

use codex_api::ResponseEvent;
use codex_api::ResponseStream;
use codex_protocol::TokenUsage;
use futures::Stream;
use futures::StreamExt;

use crate::error::CodexErr;
use crate::error::ErrorKind;
use crate::error::classify;

/// One piece of assistant output text. The wire format supports richer
/// content (images, tool calls); this transport only ever produces
/// assistant text, so a single variant is sufficient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnContentPart {
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Aborted,
    Error,
}

/// The fold of one turn's event sequence: role, content, stop reason,
/// error message, usage, and the id of the last completed output item.
/// Produced exactly once per `stream()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub role: &'static str,
    pub content: Vec<TurnContentPart>,
    pub stop_reason: StopReason,
    pub error_message: Option<String>,
    pub usage: Option<TokenUsage>,
    pub message_id: Option<String>,
}

impl TurnResult {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|part| match part {
                TurnContentPart::Text(text) => text.as_str(),
            })
            .collect()
    }
}

/// Wraps a raw [`ResponseStream`] and folds it into a [`TurnResult`] while
/// still exposing every event lazily to callers that want token-level
/// updates. `events()` is this type itself (it implements [`Stream`]);
/// `result()` drains whatever remains of the sequence and returns the
/// final fold.
pub struct TurnStream {
    inner: ResponseStream,
    done: bool,
    aborted: bool,
    text: String,
    content: Vec<TurnContentPart>,
    usage: Option<TokenUsage>,
    message_id: Option<String>,
    error: Option<(ErrorKind, String)>,
}

impl TurnStream {
    pub fn new(inner: ResponseStream) -> Self {
        Self {
            inner,
            done: false,
            aborted: false,
            text: String::new(),
            content: Vec::new(),
            usage: None,
            message_id: None,
            error: None,
        }
    }

    /// Called by the transport selector when the caller's cancellation
    /// signal fires. Overrides whatever the event stream itself would
    /// have concluded: an aborted turn always reports `stop_reason =
    /// "aborted"`, with no error message, per §7.
    pub fn mark_aborted(&mut self) {
        self.aborted = true;
        self.done = true;
    }

    fn flush_pending_text(&mut self) {
        if !self.text.is_empty() {
            self.content
                .push(TurnContentPart::Text(std::mem::take(&mut self.text)));
        }
    }

    fn apply(&mut self, event: &ResponseEvent) {
        match event {
            ResponseEvent::OutputItemAdded(_) | ResponseEvent::ContentPartAdded(_) => {}
            ResponseEvent::OutputTextDelta(delta) => self.text.push_str(delta),
            ResponseEvent::OutputItemDone(item) => {
                self.flush_pending_text();
                if let Some(id) = &item.id {
                    self.message_id = Some(id.clone());
                }
            }
            ResponseEvent::Completed { usage } => {
                self.flush_pending_text();
                if usage.is_some() {
                    self.usage = *usage;
                }
                self.done = true;
            }
            ResponseEvent::Error { code, message } => {
                self.flush_pending_text();
                self.error = Some((error_kind_from_code(code), message.clone()));
                self.done = true;
            }
        }
    }

    /// Drains any remaining events and returns the final [`TurnResult`].
    /// Safe to call after partially consuming `self` as a [`Stream`]; it
    /// only observes events no prior caller already took.
    pub async fn result(mut self) -> TurnResult {
        while let Some(event) = self.next().await {
            let _ = event;
        }
        self.into_result()
    }

    fn into_result(self) -> TurnResult {
        let stop_reason = if self.aborted {
            StopReason::Aborted
        } else if self.error.is_some() {
            StopReason::Error
        } else {
            StopReason::Completed
        };

        TurnResult {
            role: "assistant",
            content: self.content,
            stop_reason,
            error_message: self.error.map(|(_, message)| message),
            usage: self.usage,
            message_id: self.message_id,
        }
    }
}

fn error_kind_from_code(code: &str) -> ErrorKind {
    match code {
        "rate_limit" => ErrorKind::RateLimit,
        "idle" => ErrorKind::Idle,
        "truncated" => ErrorKind::Truncated,
        _ => ErrorKind::ServerError,
    }
}

impl Stream for TurnStream {
    type Item = Result<ResponseEvent, CodexErr>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                self.apply(&event);
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(Some(Err(api_err))) => {
                let (kind, message) = classify(&api_err);
                self.error = Some((kind, message));
                self.done = true;
                Poll::Ready(Some(Err(CodexErr::Other(api_err))))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
