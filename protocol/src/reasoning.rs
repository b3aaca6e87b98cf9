use serde::Deserialize;
use serde::Serialize;

/// Reasoning effort requested for a turn. Serialized lowercase to match the
/// OpenAI Responses API wire vocabulary.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Off,
    Minimal,
    #[default]
    Low,
    Medium,
    High,
    Xhigh,
}

/// Controls the style of reasoning summary the server should stream back,
/// when the model supports reasoning summaries at all.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    #[default]
    Auto,
    Concise,
    Detailed,
    None,
}
