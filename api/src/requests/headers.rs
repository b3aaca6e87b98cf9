use http::HeaderMap;
use http::HeaderValue;

pub const X_CODEX_TURN_STATE_HEADER: &str = "x-codex-turn-state";
pub const X_MODELS_ETAG_HEADER: &str = "x-models-etag";
pub const X_REASONING_INCLUDED_HEADER: &str = "x-reasoning-included";

/// `conversation_id` / `session_id` headers sent when a turn is scoped to a
/// persistent session.
pub fn build_conversation_headers(session_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(id) = session_id {
        insert_header(&mut headers, "conversation_id", id);
        insert_header(&mut headers, "session_id", id);
    }
    headers
}

pub fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(header_name), Ok(header_value)) = (
        name.parse::<http::HeaderName>(),
        HeaderValue::from_str(value),
    ) {
        headers.insert(header_name, header_value);
    }
}
