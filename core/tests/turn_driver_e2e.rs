//! End-to-end scenarios for [`codex_core::TurnDriver`], exercised through
//! its public `stream` surface rather than the individual transports: a
//! fake `HttpTransport` stands in for the SSE path, and a real local
//! WebSocket server (bound on `127.0.0.1:0`, accepted with
//! `tokio_tungstenite::accept_hdr_async`) stands in for the WebSocket path,
//! mirroring `codex-api`'s own `sse_end_to_end.rs` and
//! `responses_websocket_e2e.rs`.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use codex_api::AuthProvider;
use codex_client::HttpTransport;
use codex_client::Request as HttpRequest;
use codex_client::Response as HttpResponse;
use codex_client::StreamResponse;
use codex_client::TransportError;
use codex_core::SessionRegistry;
use codex_core::StreamOptions;
use codex_core::StopReason;
use codex_core::Transport;
use codex_core::TransportConfig;
use codex_core::TurnDriver;
use codex_protocol::Context;
use codex_protocol::Message;
use codex_protocol::Model;
use codex_protocol::ModelFamily;
use codex_protocol::ReasoningEffort;
use codex_protocol::SessionId;
use futures::SinkExt;
use futures::StreamExt;
use http::HeaderMap;
use http::StatusCode;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::Request as HandshakeRequest;
use tokio_tungstenite::tungstenite::handshake::server::Response as HandshakeResponse;

type RealtimeWsStream = WebSocketStream<tokio::net::TcpStream>;

#[derive(Clone, Default)]
struct NoAuth;

impl AuthProvider for NoAuth {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Fake [`HttpTransport`] replying with a scripted SSE body per call, one
/// entry per expected request; the last entry repeats if more calls land
/// than scripts were supplied. Captures the request headers of every call.
#[derive(Clone)]
struct FakeSseTransport {
    bodies: Arc<StdMutex<Vec<String>>>,
    calls: Arc<StdMutex<Vec<HeaderMap>>>,
}

impl FakeSseTransport {
    fn new(bodies: Vec<String>) -> Self {
        Self {
            bodies: Arc::new(StdMutex::new(bodies)),
            calls: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    fn call_headers(&self, index: usize) -> Option<HeaderMap> {
        self.calls.lock().unwrap().get(index).cloned()
    }
}

#[async_trait]
impl HttpTransport for FakeSseTransport {
    async fn execute(&self, _req: HttpRequest) -> Result<HttpResponse, TransportError> {
        unimplemented!("these scenarios only exercise streaming requests")
    }

    async fn stream(&self, req: HttpRequest) -> Result<StreamResponse, TransportError> {
        self.calls.lock().unwrap().push(req.headers.clone());
        let bodies = self.bodies.lock().unwrap();
        let index = self.calls.lock().unwrap().len() - 1;
        let body = bodies
            .get(index)
            .or_else(|| bodies.last())
            .cloned()
            .unwrap_or_default();
        Ok(StreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            bytes: Box::pin(futures::stream::once(async move {
                Ok(Bytes::from(body))
            })),
        })
    }
}

fn sse_body(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {event}\n\n"));
    }
    body
}

fn model(prefer_websocket: bool, base_url: String) -> Model {
    Model {
        id: "gpt-5.2-codex".to_string(),
        family: ModelFamily::Codex,
        base_url,
        supports_reasoning: true,
        prefer_websocket,
        context_window: 128_000,
        max_output_tokens: 4096,
    }
}

fn context(messages: Vec<Message>) -> Context {
    Context::new("be helpful", messages)
}

/// Binds an ephemeral local port, accepts exactly one TCP connection, and
/// hands the upgraded WebSocket stream to `handler`. The handshake
/// callback lets tests inject the handshake-metadata headers the
/// transport selector captures from the `101` response.
async fn spawn_ws_server<Handler, Fut>(
    extra_handshake_headers: Vec<(&'static str, String)>,
    handler: Handler,
) -> (String, tokio::task::JoinHandle<()>)
where
    Handler: FnOnce(RealtimeWsStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(_) => return,
        };
        let callback = move |_req: &HandshakeRequest, mut response: HandshakeResponse| {
            for (name, value) in &extra_handshake_headers {
                response
                    .headers_mut()
                    .insert(*name, value.parse().expect("valid header value"));
            }
            Ok(response)
        };
        let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(_) => return,
        };
        handler(ws).await;
    });

    (format!("http://{addr}"), server)
}

/// A connection refused immediately: bind a port, then drop the listener
/// before returning its address, so any connect attempt fails fast without
/// a real peer ever being involved.
async fn unreachable_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

async fn read_json(ws: &mut RealtimeWsStream) -> Value {
    let msg = ws
        .next()
        .await
        .expect("expected a message")
        .expect("message ok")
        .into_text()
        .expect("text frame");
    serde_json::from_str(&msg).expect("valid json")
}

async fn send_json(ws: &mut RealtimeWsStream, value: Value) {
    ws.send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("send event");
}

// --- Scenario 1: happy-path SSE ---------------------------------------

#[tokio::test]
async fn happy_path_sse_turn_produces_expected_turn_result() {
    let body = sse_body(&[
        serde_json::json!({"type": "response.output_text.delta", "delta": "Hel"}),
        serde_json::json!({"type": "response.output_text.delta", "delta": "lo"}),
        serde_json::json!({"type": "response.output_item.done", "item": {
            "type": "message", "id": "msg_1", "role": "assistant", "status": "completed", "content": []
        }}),
        serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
    ]);
    let transport = FakeSseTransport::new(vec![body]);
    let driver = TurnDriver::new(transport, NoAuth, TransportConfig::default());
    let mut registry = SessionRegistry::new();
    let session_id = SessionId::from("sess-happy");
    let options = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);

    let stream = driver
        .stream(
            &model(false, "https://example.invalid".to_string()),
            &context(vec![Message::user("hi", 1)]),
            &options,
            &mut registry,
        )
        .await
        .expect("sse turn should succeed");

    let result = stream.result().await;
    assert_eq!(result.text(), "Hello");
    assert_eq!(result.stop_reason, StopReason::Completed);
    assert_eq!(result.message_id.as_deref(), Some("msg_1"));
}

// --- Scenario 2: truncated SSE -----------------------------------------

#[tokio::test]
async fn truncated_sse_stream_surfaces_truncated_error() {
    // No `response.completed` ever arrives: the body ends after a delta.
    let body = sse_body(&[
        serde_json::json!({"type": "response.output_text.delta", "delta": "partial"}),
    ]);
    let transport = FakeSseTransport::new(vec![body]);
    let driver = TurnDriver::new(transport, NoAuth, TransportConfig::default());
    let mut registry = SessionRegistry::new();
    let session_id = SessionId::from("sess-truncated");
    let options = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);

    let stream = driver
        .stream(
            &model(false, "https://example.invalid".to_string()),
            &context(vec![Message::user("hi", 1)]),
            &options,
            &mut registry,
        )
        .await
        .expect("stream setup should succeed even though it truncates");

    let mut saw_error = false;
    let mut events = stream;
    while let Some(event) = events.next().await {
        if event.is_err() {
            saw_error = true;
        }
    }
    assert!(saw_error, "truncated stream must surface an error event");
}

// --- Scenario 3: WebSocket unavailable triggers sticky SSE fallback ----

#[tokio::test]
async fn websocket_connect_failure_triggers_sticky_sse_fallback() {
    let unreachable = unreachable_address().await;
    let sse_completed = sse_body(&[
        serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
    ]);
    let transport = FakeSseTransport::new(vec![sse_completed]);
    let driver = TurnDriver::new(transport, NoAuth, TransportConfig::default());
    let mut registry = SessionRegistry::new();
    let session_id = SessionId::from("sess-fallback");
    let options = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);

    let stream = driver
        .stream(
            &model(true, unreachable),
            &context(vec![Message::user("hi", 1)]),
            &options,
            &mut registry,
        )
        .await
        .expect("turn should fall back to sse and succeed");
    let _ = stream.result().await;

    let details = driver.transport_details(&registry, &session_id);
    assert_eq!(details.last_transport, Some(Transport::Sse));
    assert!(details.websocket_disabled, "websocket must be stickily disabled after exhausting connect retries");
    assert_eq!(details.fallback_count, 1);

    // A second turn on the same session must not even attempt websocket.
    let stream2 = driver
        .stream(
            &model(true, "http://127.0.0.1:0".to_string()),
            &context(vec![Message::user("hi", 1), Message::assistant("hello", 2)]),
            &options,
            &mut registry,
        )
        .await
        .expect("second turn should also go over sse");
    let _ = stream2.result().await;
    let details = driver.transport_details(&registry, &session_id);
    assert_eq!(details.fallback_count, 1, "sticky fallback must not re-attempt websocket");
}

// --- Scenario 4: WebSocket idle timeout does not fall back -------------

#[tokio::test]
async fn websocket_idle_timeout_surfaces_idle_without_sse_fallback() {
    let (addr, server) = spawn_ws_server(Vec::new(), |mut ws: RealtimeWsStream| async move {
        let created = read_json(&mut ws).await;
        assert_eq!(created["type"], "response.create");
        // Never respond: the client must time out waiting for a frame.
        tokio::time::sleep(Duration::from_secs(5)).await;
    })
    .await;

    let config = TransportConfig {
        idle_timeout: Duration::from_millis(20),
        ..TransportConfig::default()
    };
    let transport = FakeSseTransport::new(vec!["".to_string()]);
    let driver = TurnDriver::new(transport, NoAuth, config);
    let mut registry = SessionRegistry::new();
    let session_id = SessionId::from("sess-idle");
    let options = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);

    let stream = driver
        .stream(
            &model(true, addr),
            &context(vec![Message::user("hi", 1)]),
            &options,
            &mut registry,
        )
        .await
        .expect("stream setup should succeed even though it idles out");

    // The websocket path folds the turn to completion internally before
    // returning it (see try_websocket_turn), so the idle failure is only
    // observable via the final result, not by polling events again.
    let result = stream.result().await;
    assert_eq!(result.stop_reason, StopReason::Error);
    assert!(
        result
            .error_message
            .as_deref()
            .is_some_and(|msg| msg.contains("idle timeout")),
        "expected an idle-timeout error message, got {:?}",
        result.error_message
    );

    let details = driver.transport_details(&registry, &session_id);
    assert_eq!(
        details.last_transport,
        Some(Transport::Websocket),
        "idle timeout must not trigger sse fallback"
    );
    assert!(!details.websocket_disabled);
    assert_eq!(details.fallback_count, 0);

    server.abort();
}

// --- Scenario 5: append-state preserved across turns on a live socket --

#[tokio::test]
async fn append_state_preserved_across_turns_on_live_socket() {
    let (addr, server) = spawn_ws_server(Vec::new(), |mut ws: RealtimeWsStream| async move {
        let first = read_json(&mut ws).await;
        assert_eq!(first["type"], "response.create");
        send_json(
            &mut ws,
            serde_json::json!({"type": "response.output_text.delta", "delta": "hi"}),
        )
        .await;
        send_json(
            &mut ws,
            serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
        )
        .await;

        let second = read_json(&mut ws).await;
        assert_eq!(second["type"], "response.append");
        send_json(
            &mut ws,
            serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
        )
        .await;
    })
    .await;

    let transport = FakeSseTransport::new(vec![]);
    let driver = TurnDriver::new(transport, NoAuth, TransportConfig::default());
    let mut registry = SessionRegistry::new();
    let session_id = SessionId::from("sess-append");
    let options = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);
    let model = model(true, addr);

    let ctx1 = context(vec![Message::user("hi", 1)]);
    let stream1 = driver
        .stream(&model, &ctx1, &options, &mut registry)
        .await
        .expect("first turn should complete over websocket");
    let result1 = stream1.result().await;
    assert_eq!(result1.stop_reason, StopReason::Completed);

    let details = driver.transport_details(&registry, &session_id);
    assert!(details.can_append, "a clean completion should leave append state set");

    let ctx2 = context(vec![Message::user("hi", 1), Message::assistant("hi", 2)]);
    let stream2 = driver
        .stream(&model, &ctx2, &options, &mut registry)
        .await
        .expect("second turn should append on the same socket");
    let result2 = stream2.result().await;
    assert_eq!(result2.stop_reason, StopReason::Completed);

    server.await.expect("server task should not panic");
}

// --- Scenario 6: append-state reset on abort, socket not reused --------

#[tokio::test]
async fn append_state_reset_and_socket_not_reused_on_abort() {
    let (addr, server) = spawn_ws_server(Vec::new(), |mut ws: RealtimeWsStream| async move {
        let first = read_json(&mut ws).await;
        assert_eq!(first["type"], "response.create");
        send_json(
            &mut ws,
            serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
        )
        .await;

        // Second turn appends, then the client aborts: hang instead of
        // replying so the cancellation is what ends the turn.
        let second = read_json(&mut ws).await;
        assert_eq!(second["type"], "response.append");
        let _ = tokio::time::timeout(Duration::from_secs(5), ws.next()).await;
    })
    .await;

    let (addr2, server2) = spawn_ws_server(Vec::new(), |mut ws: RealtimeWsStream| async move {
        // Third turn must reconnect fresh and re-issue response.create.
        let third = read_json(&mut ws).await;
        assert_eq!(third["type"], "response.create");
        send_json(
            &mut ws,
            serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
        )
        .await;
    })
    .await;

    let transport = FakeSseTransport::new(vec![]);
    let driver = TurnDriver::new(transport, NoAuth, TransportConfig::default());
    let mut registry = SessionRegistry::new();
    let session_id = SessionId::from("sess-abort");

    let options1 = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);
    let model1 = model(true, addr);
    let ctx1 = context(vec![Message::user("hi", 1)]);
    let stream1 = driver
        .stream(&model1, &ctx1, &options1, &mut registry)
        .await
        .expect("first turn should complete");
    let _ = stream1.result().await;
    assert!(driver.transport_details(&registry, &session_id).can_append);

    let signal = tokio_util::sync::CancellationToken::new();
    let options2 = StreamOptions::new(ReasoningEffort::Low)
        .with_session(&session_id)
        .with_signal(signal.clone());
    let ctx2 = context(vec![Message::user("hi", 1), Message::assistant("hi", 2)]);

    tokio::spawn({
        let signal = signal.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            signal.cancel();
        }
    });
    let stream2 = driver
        .stream(&model1, &ctx2, &options2, &mut registry)
        .await
        .expect("aborted turn still returns a stream");
    let result2 = stream2.result().await;
    assert_eq!(result2.stop_reason, StopReason::Aborted);

    let details = driver.transport_details(&registry, &session_id);
    assert!(!details.can_append, "abort must reset append state");
    assert!(!details.websocket_connected, "abort must not leave the socket registered for reuse");

    let options3 = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);
    let model3 = model(true, addr2);
    let ctx3 = context(vec![Message::user("hi", 1)]);
    let stream3 = driver
        .stream(&model3, &ctx3, &options3, &mut registry)
        .await
        .expect("third turn should open a fresh connection");
    let result3 = stream3.result().await;
    assert_eq!(result3.stop_reason, StopReason::Completed);

    server.abort();
    server2.await.expect("second server task should not panic");
}

// --- Scenario 7: handshake replay then clear ---------------------------

#[tokio::test]
async fn handshake_metadata_replays_once_then_clears() {
    let (addr, server) = spawn_ws_server(
        vec![
            ("x-codex-turn-state", "turn-abc".to_string()),
            ("x-models-etag", "etag-1".to_string()),
        ],
        |mut ws: RealtimeWsStream| async move {
            let created = read_json(&mut ws).await;
            assert_eq!(created["type"], "response.create");
            send_json(
                &mut ws,
                serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
            )
            .await;
        },
    )
    .await;

    let sse_completed = sse_body(&[
        serde_json::json!({"type": "response.completed", "response": {"usage": null}}),
    ]);
    let transport = FakeSseTransport::new(vec![sse_completed.clone(), sse_completed]);
    let driver = TurnDriver::new(transport.clone(), NoAuth, TransportConfig::default());
    let mut registry = SessionRegistry::new();
    let session_id = SessionId::from("sess-handshake");

    // Turn 1: over websocket, captures handshake metadata from the 101
    // response headers.
    let options1 = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);
    let ws_model = model(true, addr);
    let ctx1 = context(vec![Message::user("hi", 1)]);
    let stream1 = driver
        .stream(&ws_model, &ctx1, &options1, &mut registry)
        .await
        .expect("websocket turn should succeed");
    let _ = stream1.result().await;

    // Turn 2: over SSE (prefer_websocket off), should replay the captured
    // handshake as request headers exactly once.
    let sse_model = model(false, "https://example.invalid".to_string());
    let options2 = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);
    let ctx2 = context(vec![Message::user("hi", 1), Message::assistant("hi", 2)]);
    let stream2 = driver
        .stream(&sse_model, &ctx2, &options2, &mut registry)
        .await
        .expect("sse turn should succeed");
    let _ = stream2.result().await;

    let replay_headers = transport.call_headers(0).expect("first sse call recorded");
    assert_eq!(
        replay_headers.get("x-codex-turn-state").and_then(|v| v.to_str().ok()),
        Some("turn-abc")
    );
    assert_eq!(
        replay_headers.get("x-models-etag").and_then(|v| v.to_str().ok()),
        Some("etag-1")
    );

    // Turn 3: another SSE turn must not replay the same metadata again.
    let ctx3 = context(vec![
        Message::user("hi", 1),
        Message::assistant("hi", 2),
        Message::user("again", 3),
    ]);
    let options3 = StreamOptions::new(ReasoningEffort::Low).with_session(&session_id);
    let stream3 = driver
        .stream(&sse_model, &ctx3, &options3, &mut registry)
        .await
        .expect("third turn should succeed");
    let _ = stream3.result().await;

    let no_replay_headers = transport.call_headers(1).expect("second sse call recorded");
    assert!(no_replay_headers.get("x-codex-turn-state").is_none());

    server.await.expect("server task should not panic");
}
