use codex_api::AuthProvider;
use codex_api::Reasoning;
use codex_api::ResponsesApiRequest;
use codex_api::requests::build_conversation_headers;
use codex_api::requests::insert_header;
use codex_protocol::Context;
use codex_protocol::ContentPart;
use codex_protocol::Model;
use codex_protocol::ReasoningEffort;
use codex_protocol::ReasoningSummary;
use codex_protocol::Role;
use codex_protocol::SessionId;
use http::HeaderMap;
use http::HeaderValue;
use serde_json::Value;
use serde_json::json;

use crate::config::TransportConfig;
use crate::session::HandshakeMeta;

pub const ORIGINATOR: &str = "pi";
pub const OPENAI_BETA_RESPONSES_HEADER: &str = "responses=experimental";

/// Everything the Turn Request Builder needs to produce a canonical body
/// and header set for one turn. Deliberately flat (no builder pattern):
/// every field is required at the call site so omissions are visible in
/// the diff rather than hidden behind a default.
pub struct BuildRequestInput<'a> {
    pub model: &'a Model,
    pub context: &'a Context,
    pub session_id: Option<&'a SessionId>,
    pub reasoning_effort: ReasoningEffort,
    pub handshake: Option<&'a HandshakeMeta>,
    /// The `previous_response_id` carried when this request continues a
    /// prior response (reserved for forward compatibility with the wire
    /// schema; the WebSocket append path carries continuation implicitly
    /// via the open socket instead, so this is `None` on every path this
    /// crate currently drives).
    pub previous_response_id: Option<&'a str>,
}

/// Applies the per-model reasoning-effort clamp: `gpt-5.3-codex*` rejects
/// `minimal`, so requests are silently raised to `low` rather than sent
/// as-is and rejected by the server.
pub fn clamp_reasoning_effort(model: &Model, effort: ReasoningEffort) -> ReasoningEffort {
    if effort == ReasoningEffort::Minimal && model.rejects_minimal_reasoning_effort() {
        ReasoningEffort::Low
    } else {
        effort
    }
}

/// Translates ordered message history into the Responses API `input`
/// array: one object per message, one content item per [`ContentPart`].
pub fn translate_context_to_input(context: &Context) -> Vec<Value> {
    translate_messages_to_input(&context.messages)
}

/// As [`translate_context_to_input`], but over a bare message slice — used
/// by the WebSocket append path, which only ever sends the messages new
/// since the last successful turn rather than the full context.
pub fn translate_messages_to_input(messages: &[codex_protocol::Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content: Vec<Value> = message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({
                        "type": "input_text",
                        "text": text,
                    }),
                    ContentPart::Image { url } => json!({
                        "type": "input_image",
                        "image_url": url,
                    }),
                })
                .collect();
            json!({
                "type": "message",
                "role": role,
                "content": content,
            })
        })
        .collect()
}

/// Builds the canonical request body shared by both transports. Pure: no
/// I/O, no retry, no knowledge of which transport will send it.
pub fn build_request_body(input: &BuildRequestInput<'_>) -> ResponsesApiRequest {
    let effort = clamp_reasoning_effort(input.model, input.reasoning_effort);
    let reasoning = input.model.supports_reasoning.then(|| Reasoning {
        effort: Some(effort),
        summary: Some(ReasoningSummary::Auto),
    });

    ResponsesApiRequest {
        model: input.model.id.clone(),
        instructions: input.context.system_prompt.clone(),
        input: translate_context_to_input(input.context),
        stream: true,
        reasoning,
        prompt_cache_key: input.session_id.map(|id| id.as_str().to_string()),
        previous_response_id: input.previous_response_id.map(ToString::to_string),
    }
}

/// Builds the headers layered on top of whatever [`codex_api::auth`]
/// contributes (`Authorization`, `chatgpt-account-id`): `OpenAI-Beta`,
/// `originator`, session correlation headers, and any pending handshake
/// replay.
pub fn build_extra_headers(
    config: &TransportConfig,
    session_id: Option<&SessionId>,
    handshake: Option<&HandshakeMeta>,
    websocket: bool,
) -> HeaderMap {
    let mut headers = build_conversation_headers(session_id.map(SessionId::as_str));

    let beta = if websocket {
        format!("responses_websockets={}", config.websocket_beta_header())
    } else {
        OPENAI_BETA_RESPONSES_HEADER.to_string()
    };
    insert_header(&mut headers, "OpenAI-Beta", &beta);
    insert_header(&mut headers, "originator", ORIGINATOR);

    if let Some(handshake) = handshake {
        if let Some(turn_state) = &handshake.turn_state {
            insert_header(&mut headers, "x-codex-turn-state", turn_state);
        }
        if let Some(models_etag) = &handshake.models_etag {
            insert_header(&mut headers, "x-models-etag", models_etag);
        }
    }

    headers
}

/// Convenience wrapper combining [`build_extra_headers`] with the
/// `Authorization`/`chatgpt-account-id` headers an [`AuthProvider`]
/// contributes, for callers that want one header set for the whole
/// request rather than composing it themselves.
pub fn build_headers<A: AuthProvider>(
    auth: &A,
    config: &TransportConfig,
    session_id: Option<&SessionId>,
    handshake: Option<&HandshakeMeta>,
    websocket: bool,
) -> HeaderMap {
    let mut headers = build_extra_headers(config, session_id, handshake, websocket);
    if let Some(token) = auth.bearer_token() {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(http::header::AUTHORIZATION, value);
        }
    }
    if let Some(account_id) = auth.account_id() {
        if let Ok(value) = HeaderValue::from_str(&account_id) {
            headers.insert("chatgpt-account-id", value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_protocol::Message;
    use codex_protocol::ModelFamily;

    fn model(id: &str) -> Model {
        Model {
            id: id.to_string(),
            family: ModelFamily::Codex,
            base_url: "https://example.invalid".to_string(),
            supports_reasoning: true,
            prefer_websocket: true,
            context_window: 128_000,
            max_output_tokens: 4096,
        }
    }

    #[test]
    fn clamps_minimal_effort_for_codex_5_3() {
        let model = model("gpt-5.3-codex");
        assert_eq!(
            clamp_reasoning_effort(&model, ReasoningEffort::Minimal),
            ReasoningEffort::Low
        );
        assert_eq!(
            clamp_reasoning_effort(&model, ReasoningEffort::High),
            ReasoningEffort::High
        );
    }

    #[test]
    fn passes_through_minimal_for_other_models() {
        let model = model("gpt-5.2-codex");
        assert_eq!(
            clamp_reasoning_effort(&model, ReasoningEffort::Minimal),
            ReasoningEffort::Minimal
        );
    }

    #[test]
    fn translates_text_and_image_parts() {
        let context = Context::new(
            "be helpful",
            vec![Message {
                role: Role::User,
                content: vec![
                    ContentPart::text("hi"),
                    ContentPart::Image {
                        url: "https://example.invalid/a.png".to_string(),
                    },
                ],
                timestamp: 1,
            }],
        );
        let input = translate_context_to_input(&context);
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["role"], "user");
        assert_eq!(input[0]["content"][0]["type"], "input_text");
        assert_eq!(input[0]["content"][1]["type"], "input_image");
    }

    #[test]
    fn build_request_body_sets_prompt_cache_key_from_session() {
        let model = model("gpt-5.2-codex");
        let context = Context::new("sys", vec![Message::user("hi", 1)]);
        let session_id = SessionId::from("sess-1");
        let input = BuildRequestInput {
            model: &model,
            context: &context,
            session_id: Some(&session_id),
            reasoning_effort: ReasoningEffort::Low,
            handshake: None,
            previous_response_id: None,
        };
        let body = build_request_body(&input);
        assert_eq!(body.prompt_cache_key.as_deref(), Some("sess-1"));
        assert!(body.stream);
        assert_eq!(body.instructions, "sys");
    }

    #[test]
    fn extra_headers_replay_handshake_and_select_beta_version() {
        let config = TransportConfig {
            websocket_v2: true,
            ..TransportConfig::default()
        };
        let handshake = HandshakeMeta {
            turn_state: Some("turn-state-1".to_string()),
            models_etag: Some("etag-1".to_string()),
            reasoning_included: false,
        };
        let headers = build_extra_headers(&config, None, Some(&handshake), true);
        assert_eq!(
            headers.get("OpenAI-Beta").unwrap(),
            "responses_websockets=2026-02-06"
        );
        assert_eq!(headers.get("x-codex-turn-state").unwrap(), "turn-state-1");
        assert_eq!(headers.get("x-models-etag").unwrap(), "etag-1");
    }

    #[test]
    fn extra_headers_include_session_correlation_when_present() {
        let config = TransportConfig::default();
        let session_id = SessionId::from("sess-7");
        let headers = build_extra_headers(&config, Some(&session_id), None, false);
        assert_eq!(headers.get("conversation_id").unwrap(), "sess-7");
        assert_eq!(headers.get("session_id").unwrap(), "sess-7");
        assert_eq!(headers.get("OpenAI-Beta").unwrap(), OPENAI_BETA_RESPONSES_HEADER);
    }
}
