use codex_client::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Failures raised at the Responses-API endpoint layer: either a bare
/// transport failure, or a stream-level condition specific to this wire
/// format (rate limiting, truncation, context overflow).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("context window exceeded")]
    ContextWindowExceeded,

    #[error("stream error: {0}")]
    Stream(String),

    /// The WebSocket connection dropped mid-turn (unexpected close, no
    /// close frame at all) after at least one frame had already been sent.
    /// Distinct from [`ApiError::Stream`]'s `"terminal completion"`
    /// truncation case: this is a transport-level loss the WebSocket
    /// transport retries by reconnecting and reissuing `response.create`,
    /// not a semantic failure to surface to the caller.
    #[error("websocket connection lost: {0}")]
    ConnectionLost(String),
}

impl ApiError {
    /// Stable classification used by callers that need to distinguish error
    /// kinds without matching on every variant (logging, metrics labels).
    /// Mirrors the `http_<status>` / `rate_limit` / `transport_unavailable`
    /// vocabulary the core crate surfaces to its own callers.
    pub fn kind(&self) -> String {
        match self {
            ApiError::Transport(TransportError::Http { status, .. })
                if status.as_u16() == 429 =>
            {
                "rate_limit".to_string()
            }
            ApiError::Transport(TransportError::Http { status, .. }) => {
                format!("http_{}", status.as_u16())
            }
            ApiError::Transport(_) => "transport_unavailable".to_string(),
            ApiError::RateLimit(_) => "rate_limit".to_string(),
            ApiError::ContextWindowExceeded => "http_400".to_string(),
            ApiError::Stream(msg) if msg.contains("idle timeout") => "idle".to_string(),
            ApiError::Stream(msg) if msg.contains("terminal completion") => {
                "truncated".to_string()
            }
            ApiError::Stream(_) => "server_error".to_string(),
            ApiError::ConnectionLost(_) => "transport_unavailable".to_string(),
        }
    }
}
