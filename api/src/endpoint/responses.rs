use crate::auth::AuthProvider;
use crate::auth::add_auth_headers;
use crate::common::ResponseStream;
use crate::error::ApiError;
use crate::event_decoder::parse_rate_limit_body;
use crate::provider::Provider;
use crate::sse::spawn_response_stream;
use codex_client::HttpTransport;
use codex_client::TransportError;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use serde_json::Value;
use tracing::instrument;

/// Executes a single SSE turn: one POST, one body read, one decoded event
/// stream. No retry loop — a failed attempt is the caller's to retry or
/// fall back from.
pub struct ResponsesClient<T: HttpTransport, A: AuthProvider> {
    transport: T,
    provider: Provider,
    auth: A,
}

/// The response headers plus the decoded event stream for one SSE turn.
/// Headers are kept separate from the events because handshake metadata
/// (`x-codex-turn-state`, `x-models-etag`) arrives on the HTTP response
/// head, before any event has been decoded.
pub struct SseResponse {
    pub headers: HeaderMap,
    pub events: ResponseStream,
}

impl<T: HttpTransport, A: AuthProvider> ResponsesClient<T, A> {
    pub fn new(transport: T, provider: Provider, auth: A) -> Self {
        Self {
            transport,
            provider,
            auth,
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    fn path() -> &'static str {
        "responses"
    }

    #[instrument(level = "trace", skip_all, err)]
    pub async fn stream(&self, body: Value, extra_headers: HeaderMap) -> Result<SseResponse, ApiError> {
        let mut req = self.provider.build_request(Method::POST, Self::path());
        req.headers.extend(extra_headers);
        req.headers.insert(
            http::header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        req.body = Some(body);
        let req = add_auth_headers(&self.auth, req);

        let stream_response = match self.transport.stream(req).await {
            Ok(stream_response) => stream_response,
            Err(TransportError::Http {
                status,
                headers,
                body,
                ..
            }) if status.as_u16() == 429 => {
                let retry_after = headers
                    .as_ref()
                    .and_then(|h| h.get("retry-after"))
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                let parsed = parse_rate_limit_body(body.as_deref().unwrap_or_default());
                let detail = if parsed.error.message.is_empty() {
                    "no further detail available".to_string()
                } else {
                    parsed.error.message
                };
                let message = format!("rate limit reached: {detail} (retry-after: {retry_after}s)");
                return Err(ApiError::RateLimit(message));
            }
            Err(err) => return Err(ApiError::Transport(err)),
        };

        let headers = stream_response.headers.clone();
        let events = spawn_response_stream(stream_response, self.provider.stream_idle_timeout);
        Ok(SseResponse { headers, events })
    }
}
