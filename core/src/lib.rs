//! Session-aware transport selection for the OpenAI-Codex Responses API:
//! decides WebSocket vs SSE per turn, maintains per-session transport
//! state (sticky fallback, append-state, handshake replay), and folds the
//! resulting event stream into a [`TurnResult`](aggregator::TurnResult).
//! Builds on the wire-level primitives in `codex-api`.

pub mod aggregator;
pub mod auth;
pub mod config;
pub mod error;
pub mod request_builder;
pub mod selector;
pub mod session;
pub mod token_source;

pub use aggregator::StopReason;
pub use aggregator::TurnContentPart;
pub use aggregator::TurnResult;
pub use aggregator::TurnStream;
pub use auth::TokenAuthProvider;
pub use config::TransportConfig;
pub use error::CodexErr;
pub use error::ErrorKind;
pub use selector::StreamOptions;
pub use selector::TransportDetails;
pub use selector::TurnDriver;
pub use session::HandshakeMeta;
pub use session::SessionRegistry;
pub use session::SessionTransportState;
pub use session::Transport;
pub use token_source::RoutingMetadata;
pub use token_source::extract_routing_metadata;
