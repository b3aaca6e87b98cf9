use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One piece of message content. Images carry an opaque URL (data: or https:)
/// rather than raw bytes; encoding/fetching is the caller's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    /// Unix epoch milliseconds; used only for ordering/diagnostics, never
    /// interpreted by the transport.
    pub timestamp: i64,
}

impl Message {
    pub fn user(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
            timestamp,
        }
    }

    pub fn assistant(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
            timestamp,
        }
    }
}

/// Immutable per-turn conversation context: the system prompt plus the
/// ordered message history leading up to this turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

impl Context {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
        }
    }

    /// True when `self` is `previous` plus zero or more additional messages,
    /// with an unchanged system prompt. This is the precondition for framing
    /// a WebSocket request as `response.append` instead of `response.create`.
    pub fn extends(&self, previous: &Context) -> bool {
        self.system_prompt == previous.system_prompt
            && previous.messages.len() < self.messages.len()
            && self.messages[..previous.messages.len()] == previous.messages[..]
    }

    /// The messages in `self` that come after everything in `previous`.
    /// Only meaningful when [`Context::extends`] holds.
    pub fn new_messages_since<'a>(&'a self, previous: &Context) -> &'a [Message] {
        &self.messages[previous.messages.len()..]
    }
}
