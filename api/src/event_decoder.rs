//! Pure translation from one raw wire event (an SSE `data:` payload or a
//! WebSocket text frame) into a [`ResponseEvent`]. Shared verbatim between
//! the SSE and WebSocket transports so the two only differ in how they
//! frame bytes into individual JSON payloads, never in how they interpret
//! them.

use crate::common::ContentPart;
use crate::common::OutputItem;
use crate::common::ResponseEvent;
use crate::error::ApiError;
use codex_protocol::TokenUsage;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    item: Option<OutputItem>,
    #[serde(default)]
    part: Option<ContentPart>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    response: Option<RawResponse>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<RawUsageDetails>,
}

#[derive(Debug, Deserialize, Default)]
struct RawUsageDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl From<RawUsage> for TokenUsage {
    fn from(raw: RawUsage) -> Self {
        TokenUsage {
            input_tokens: raw.input_tokens,
            output_tokens: raw.output_tokens,
            cached_input_tokens: raw.input_tokens_details.unwrap_or_default().cached_tokens,
            reasoning_output_tokens: 0,
        }
    }
}

/// Parses one already-isolated JSON payload and dispatches on `type`.
/// Returns `None` for payloads of an unrecognized type, which are dropped
/// silently rather than surfaced as a parse error.
pub fn decode_event(payload: &str) -> Option<Result<ResponseEvent, ApiError>> {
    let raw: RawEvent = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(_) => return None,
    };

    let event = match raw.kind.as_str() {
        "response.output_item.added" => ResponseEvent::OutputItemAdded(raw.item?),
        "response.content_part.added" => ResponseEvent::ContentPartAdded(raw.part?),
        "response.output_text.delta" => ResponseEvent::OutputTextDelta(raw.delta?),
        "response.output_item.done" => ResponseEvent::OutputItemDone(raw.item?),
        "response.completed" | "response.done" => ResponseEvent::Completed {
            usage: raw.response.and_then(|r| r.usage).map(TokenUsage::from),
        },
        "error" => ResponseEvent::Error {
            code: raw.code.unwrap_or_default(),
            message: raw.message.unwrap_or_default(),
        },
        _ => return None,
    };

    Some(Ok(event))
}

pub fn is_terminal(event: &ResponseEvent) -> bool {
    matches!(event, ResponseEvent::Completed { .. })
}

/// Structured `{ error: { code, message } }` body parsed out of a 429
/// response. Deliberately tolerant: any missing field falls back to an
/// empty string rather than failing to parse, because a truncated or
/// partially-written rate-limit body must still yield a usable error.
#[derive(Debug, Deserialize, Default)]
pub struct RateLimitBody {
    #[serde(default)]
    pub error: RateLimitError,
}

#[derive(Debug, Deserialize, Default)]
pub struct RateLimitError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

pub fn parse_rate_limit_body(body: &str) -> RateLimitBody {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}
