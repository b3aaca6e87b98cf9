use serde::Deserialize;
use serde::Serialize;

/// Identifies the model provider's wire dialect. Both variants speak the
/// OpenAI Responses API; they differ in transport preference and in the
/// request/response envelope quirks the caller must account for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFamily {
    Codex,
    Openai,
}

/// Static description of a target model: where to send requests and which
/// turn-level capabilities it supports. One `Model` is shared across many
/// turns and sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub family: ModelFamily,
    pub base_url: String,
    /// Whether this model accepts `reasoning` turn parameters at all.
    pub supports_reasoning: bool,
    /// Caller preference for WebSocket over SSE when both are available.
    /// The transport selector may still fall back to SSE regardless.
    pub prefer_websocket: bool,
    pub context_window: u64,
    pub max_output_tokens: u64,
}

impl Model {
    /// `gpt-5.3-codex*` models reject `minimal` reasoning effort; callers
    /// must clamp requests to `low` before sending.
    pub fn rejects_minimal_reasoning_effort(&self) -> bool {
        self.id.starts_with("gpt-5.3-codex")
    }
}
