use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

/// Server-routing metadata recovered from an auth token. Every field is
/// optional: a token that fails to decode, or decodes but carries no
/// routing claim, still authenticates — it just routes without the hint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingMetadata {
    pub account_id: Option<String>,
}

/// Decodes the middle (payload) segment of a three-part dot-delimited JWT
/// and pulls the ChatGPT account id out of the `"https://api.openai.com/auth"`
/// claim. Never returns an error: a malformed or absent claim yields an
/// empty [`RoutingMetadata`] rather than failing the caller's request,
/// since the token itself may still be a valid bearer credential.
pub fn extract_routing_metadata(token: &str) -> RoutingMetadata {
    let Some(payload) = decode_jwt_payload(token) else {
        return RoutingMetadata::default();
    };

    let account_id = payload
        .get("https://api.openai.com/auth")
        .and_then(Value::as_object)
        .and_then(|auth| auth.get("chatgpt_account_id"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    RoutingMetadata { account_id }
}

fn decode_jwt_payload(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    if parts.next().is_none() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}
