use http::HeaderMap;
use http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised below the Responses-API layer, at the raw HTTP/WebSocket
/// transport boundary. Callers map these into the richer `ApiError` once
/// they know which endpoint was in flight.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request build failed: {0}")]
    Build(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("http error {status} from {url:?}")]
    Http {
        status: StatusCode,
        url: Option<String>,
        headers: Option<HeaderMap>,
        body: Option<String>,
    },

    #[error("websocket error: {0}")]
    Websocket(String),
}
