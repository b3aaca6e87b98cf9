use codex_api::ApiError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodexErr>;

/// Caller-visible failure classification, matching the seven error kinds
/// from the error handling design: every `CodexErr` maps to exactly one of
/// these, and the mapping is what `transport_unavailable` papers over
/// (those never escape the turn driver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimit,
    Http,
    Truncated,
    Idle,
    ServerError,
    TransportUnavailable,
    Aborted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Http => "http",
            ErrorKind::Truncated => "truncated",
            ErrorKind::Idle => "idle",
            ErrorKind::ServerError => "server_error",
            ErrorKind::TransportUnavailable => "transport_unavailable",
            ErrorKind::Aborted => "aborted",
        }
    }
}

/// Turn-level error surfaced to callers of [`crate::selector::TurnDriver`].
/// Wraps an [`ApiError`] with the stable classification from §7 of the
/// component design; `kind_label()` renders the `http_<status>` / etc.
/// vocabulary used in `TurnResult::error_message`.
#[derive(Debug, Error)]
pub enum CodexErr {
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("stream ended without terminal completion event")]
    Truncated,

    #[error("idle timeout waiting for websocket")]
    Idle,

    #[error("server error: {0}")]
    ServerError(String),

    #[error("turn aborted by caller")]
    Aborted,

    #[error(transparent)]
    Other(#[from] ApiError),
}

impl CodexErr {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodexErr::RateLimit(_) => ErrorKind::RateLimit,
            CodexErr::Http(_) => ErrorKind::Http,
            CodexErr::Truncated => ErrorKind::Truncated,
            CodexErr::Idle => ErrorKind::Idle,
            CodexErr::ServerError(_) => ErrorKind::ServerError,
            CodexErr::Aborted => ErrorKind::Aborted,
            CodexErr::Other(api_err) => match api_err.kind().as_str() {
                "rate_limit" => ErrorKind::RateLimit,
                "idle" => ErrorKind::Idle,
                "truncated" => ErrorKind::Truncated,
                "server_error" => ErrorKind::ServerError,
                "transport_unavailable" => ErrorKind::TransportUnavailable,
                kind if kind.starts_with("http_") => ErrorKind::Http,
                _ => ErrorKind::ServerError,
            },
        }
    }

    /// Renders the `http_<status>` / `rate_limit` / ... label used as the
    /// error "code" in caller-visible error events.
    pub fn kind_label(&self) -> String {
        match self {
            CodexErr::Other(api_err) => api_err.kind(),
            other => other.kind().as_str().to_string(),
        }
    }

    /// `transport_unavailable` is deliberately excluded from the surfaced
    /// kinds the selector returns to callers: it is always consumed
    /// internally and translated into a sticky-SSE fallback.
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(self, CodexErr::Other(api_err) if api_err.kind() == "transport_unavailable")
    }
}

/// Converts a raw API-layer error into the error frame shape used for
/// turn results: `(kind, message)`.
pub fn classify(err: &ApiError) -> (ErrorKind, String) {
    let kind = match err.kind().as_str() {
        "rate_limit" => ErrorKind::RateLimit,
        "idle" => ErrorKind::Idle,
        "truncated" => ErrorKind::Truncated,
        "server_error" => ErrorKind::ServerError,
        "transport_unavailable" => ErrorKind::TransportUnavailable,
        _ => ErrorKind::Http,
    };
    (kind, err.to_string())
}
