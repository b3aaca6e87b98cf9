//! Wire-level client for the OpenAI-Codex Responses API: request/response
//! shapes, the SSE and WebSocket endpoint clients, and the event decoder
//! shared between them. This crate knows nothing about sessions, retries
//! across turns, or transport selection — that lives in `codex-core`.

pub mod auth;
pub mod common;
pub mod endpoint;
pub mod error;
pub mod event_decoder;
pub mod provider;
pub mod requests;
pub mod sse;

pub use auth::AuthProvider;
pub use common::ContentPart;
pub use common::OutputItem;
pub use common::Reasoning;
pub use common::ResponseAppendWsRequest;
pub use common::ResponseCreateWsRequest;
pub use common::ResponseEvent;
pub use common::ResponseStream;
pub use common::ResponsesApiRequest;
pub use common::ResponsesWsRequest;
pub use endpoint::responses::ResponsesClient;
pub use endpoint::responses::SseResponse;
pub use endpoint::responses_websocket::ResponsesWebsocketClient;
pub use endpoint::responses_websocket::ResponsesWebsocketConnection;
pub use endpoint::responses_websocket::WebsocketHandshake;
pub use endpoint::responses_websocket::X_CODEX_TURN_STATE_HEADER;
pub use endpoint::responses_websocket::X_MODELS_ETAG_HEADER;
pub use endpoint::responses_websocket::X_REASONING_INCLUDED_HEADER;
pub use error::ApiError;
pub use provider::Provider;
