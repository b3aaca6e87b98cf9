pub mod headers;

pub use headers::X_CODEX_TURN_STATE_HEADER;
pub use headers::X_MODELS_ETAG_HEADER;
pub use headers::X_REASONING_INCLUDED_HEADER;
pub use headers::build_conversation_headers;
pub use headers::insert_header;
