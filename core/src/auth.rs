use crate::token_source::extract_routing_metadata;
use codex_api::AuthProvider;

/// [`AuthProvider`] backed by a single opaque bearer token, decoding its
/// routing metadata once at construction (the token doesn't change within
/// a turn, so there is no reason to re-decode it per request).
#[derive(Debug, Clone)]
pub struct TokenAuthProvider {
    token: String,
    account_id: Option<String>,
}

impl TokenAuthProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let account_id = extract_routing_metadata(&token).account_id;
        Self { token, account_id }
    }
}

impl AuthProvider for TokenAuthProvider {
    fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    fn account_id(&self) -> Option<String> {
        self.account_id.clone()
    }
}
