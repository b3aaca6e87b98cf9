use crate::auth::AuthProvider;
use crate::auth::add_auth_headers_to_header_map;
use crate::common::ResponseEvent;
use crate::common::ResponseStream;
use crate::common::ResponsesWsRequest;
use crate::error::ApiError;
use crate::event_decoder::decode_event;
use crate::event_decoder::is_terminal;
use crate::provider::Provider;
use codex_client::TransportError;
use codex_utils_rustls_provider::ensure_rustls_crypto_provider;
use futures::SinkExt;
use futures::StreamExt;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use serde_json::map::Map as JsonMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use url::Url;

/// Drives the socket on its own task so the public surface is a plain
/// async request/response pair regardless of what's arriving concurrently
/// (pings, the next frame, a close).
struct WsStream {
    tx_command: mpsc::Sender<WsCommand>,
    rx_message: mpsc::UnboundedReceiver<Result<Message, WsError>>,
    pump_task: tokio::task::JoinHandle<()>,
}

enum WsCommand {
    Send {
        message: Message,
        tx_result: oneshot::Sender<Result<(), WsError>>,
    },
    Close {
        tx_result: oneshot::Sender<Result<(), WsError>>,
    },
}

impl WsStream {
    fn new(inner: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let (tx_command, mut rx_command) = mpsc::channel::<WsCommand>(32);
        let (tx_message, rx_message) = mpsc::unbounded_channel::<Result<Message, WsError>>();

        let pump_task = tokio::spawn(async move {
            let mut inner = inner;
            loop {
                tokio::select! {
                    command = rx_command.recv() => {
                        let Some(command) = command else {
                            break;
                        };
                        match command {
                            WsCommand::Send { message, tx_result } => {
                                let result = inner.send(message).await;
                                let should_break = result.is_err();
                                let _ = tx_result.send(result);
                                if should_break {
                                    break;
                                }
                            }
                            WsCommand::Close { tx_result } => {
                                let result = inner.close(None).await;
                                let _ = tx_result.send(result);
                                break;
                            }
                        }
                    }
                    message = inner.next() => {
                        let Some(message) = message else {
                            break;
                        };
                        match message {
                            Ok(Message::Ping(payload)) => {
                                if let Err(err) = inner.send(Message::Pong(payload)).await {
                                    let _ = tx_message.send(Err(err));
                                    break;
                                }
                            }
                            Ok(Message::Pong(_)) => {}
                            Ok(message @ (Message::Text(_)
                            | Message::Binary(_)
                            | Message::Close(_)
                            | Message::Frame(_))) => {
                                let is_close = matches!(message, Message::Close(_));
                                if tx_message.send(Ok(message)).is_err() {
                                    break;
                                }
                                if is_close {
                                    break;
                                }
                            }
                            Err(err) => {
                                let _ = tx_message.send(Err(err));
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            tx_command,
            rx_message,
            pump_task,
        }
    }

    async fn request(
        &self,
        make_command: impl FnOnce(oneshot::Sender<Result<(), WsError>>) -> WsCommand,
    ) -> Result<(), WsError> {
        let (tx_result, rx_result) = oneshot::channel();
        if self.tx_command.send(make_command(tx_result)).await.is_err() {
            return Err(WsError::ConnectionClosed);
        }
        rx_result.await.unwrap_or(Err(WsError::ConnectionClosed))
    }

    async fn send(&self, message: Message) -> Result<(), WsError> {
        self.request(|tx_result| WsCommand::Send { message, tx_result })
            .await
    }

    async fn close(&self) -> Result<(), WsError> {
        self.request(|tx_result| WsCommand::Close { tx_result })
            .await
    }

    async fn next(&mut self) -> Option<Result<Message, WsError>> {
        self.rx_message.recv().await
    }
}

impl Drop for WsStream {
    fn drop(&mut self) {
        self.pump_task.abort();
    }
}

pub const X_CODEX_TURN_STATE_HEADER: &str = "x-codex-turn-state";
pub const X_MODELS_ETAG_HEADER: &str = "x-models-etag";
pub const X_REASONING_INCLUDED_HEADER: &str = "x-reasoning-included";

/// Handshake metadata captured from the `101 Switching Protocols` response,
/// before any turn is sent. Corresponds to §4.5 step 1 of the connect
/// protocol.
#[derive(Debug, Clone, Default)]
pub struct WebsocketHandshake {
    pub reasoning_included: bool,
    pub models_etag: Option<String>,
    pub turn_state: Option<String>,
}

/// A single open WebSocket for one session. Exactly one `stream_request`
/// call is expected to be in flight at a time; the caller (Transport
/// Selector) enforces this by holding exclusive use of the session.
pub struct ResponsesWebsocketConnection {
    stream: Arc<Mutex<Option<WsStream>>>,
    idle_timeout: Duration,
    pub handshake: WebsocketHandshake,
    /// Cancelled by [`Self::close`] to interrupt an in-flight
    /// `stream_request` promptly rather than waiting for it to notice the
    /// caller lost interest on its own (idle timeout, server close, etc).
    close_signal: CancellationToken,
}

impl ResponsesWebsocketConnection {
    fn new(stream: WsStream, idle_timeout: Duration, handshake: WebsocketHandshake) -> Self {
        Self {
            stream: Arc::new(Mutex::new(Some(stream))),
            idle_timeout,
            handshake,
            close_signal: CancellationToken::new(),
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.stream.lock().await.is_none()
    }

    /// Aborts any in-flight `stream_request` and closes the socket. Used
    /// on turn cancellation: the socket is never reused afterward, so this
    /// releases it promptly instead of leaving it to idle out.
    pub async fn close(&self) {
        self.close_signal.cancel();
        if let Some(mut ws_stream) = self.stream.lock().await.take() {
            let _ = ws_stream.close().await;
        }
    }

    pub async fn stream_request(
        &self,
        request: ResponsesWsRequest,
    ) -> Result<ResponseStream, ApiError> {
        let (tx_event, rx_event) = mpsc::channel::<Result<ResponseEvent, ApiError>>(1600);
        let stream = Arc::clone(&self.stream);
        let idle_timeout = self.idle_timeout;
        let close_signal = self.close_signal.clone();
        let request_body = serde_json::to_value(&request).map_err(|err| {
            ApiError::Stream(format!("failed to encode websocket request: {err}"))
        })?;

        tokio::spawn(async move {
            let mut guard = stream.lock().await;
            let Some(ws_stream) = guard.as_mut() else {
                let _ = tx_event
                    .send(Err(ApiError::Stream(
                        "websocket connection is closed".to_string(),
                    )))
                    .await;
                return;
            };

            let outcome = tokio::select! {
                biased;
                () = close_signal.cancelled() => {
                    Err(ApiError::Stream("websocket turn cancelled by caller".into()))
                }
                result = run_websocket_response_stream(ws_stream, tx_event.clone(), request_body, idle_timeout) => result,
            };

            if let Err(err) = outcome {
                let _ = ws_stream.close().await;
                *guard = None;
                let _ = tx_event.send(Err(err)).await;
            }
        });

        Ok(ResponseStream { rx_event })
    }
}

pub struct ResponsesWebsocketClient<A: AuthProvider> {
    provider: Provider,
    auth: A,
}

impl<A: AuthProvider> ResponsesWebsocketClient<A> {
    pub fn new(provider: Provider, auth: A) -> Self {
        Self { provider, auth }
    }

    /// Connects once. Retry-budget handling (§4.5 step 3) is the caller's
    /// concern, since each attempt here is independent and stateless.
    pub async fn connect(
        &self,
        extra_headers: HeaderMap,
    ) -> Result<ResponsesWebsocketConnection, ApiError> {
        let ws_url = self
            .provider
            .websocket_url_for_path("responses")
            .map_err(|err| ApiError::Stream(format!("failed to build websocket URL: {err}")))?;

        let mut headers = self.provider.headers.clone();
        headers.extend(extra_headers);
        add_auth_headers_to_header_map(&self.auth, &mut headers);

        let (stream, handshake) = connect_websocket(ws_url, headers).await?;
        Ok(ResponsesWebsocketConnection::new(
            stream,
            self.provider.stream_idle_timeout,
            handshake,
        ))
    }
}

async fn connect_websocket(
    url: Url,
    headers: HeaderMap,
) -> Result<(WsStream, WebsocketHandshake), ApiError> {
    ensure_rustls_crypto_provider();
    info!("connecting to websocket: {url}");

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| ApiError::Stream(format!("failed to build websocket request: {err}")))?;
    request.headers_mut().extend(headers);

    let response = tokio_tungstenite::connect_async(request).await;

    let (stream, response) = match response {
        Ok((stream, response)) => {
            info!("connected to websocket: {url}");
            (stream, response)
        }
        Err(err) => {
            error!("failed to connect to websocket: {err}, url: {url}");
            return Err(map_ws_error(err, &url));
        }
    };

    let handshake = WebsocketHandshake {
        reasoning_included: response.headers().contains_key(X_REASONING_INCLUDED_HEADER),
        models_etag: response
            .headers()
            .get(X_MODELS_ETAG_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string),
        turn_state: response
            .headers()
            .get(X_CODEX_TURN_STATE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string),
    };

    Ok((WsStream::new(stream), handshake))
}

fn map_ws_error(err: WsError, url: &Url) -> ApiError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .body()
                .as_ref()
                .and_then(|bytes| String::from_utf8(bytes.clone()).ok());
            ApiError::Transport(TransportError::Http {
                status,
                url: Some(url.to_string()),
                headers: Some(headers),
                body,
            })
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            ApiError::Stream("websocket closed".to_string())
        }
        WsError::Io(err) => ApiError::Transport(TransportError::Network(err.to_string())),
        other => ApiError::Transport(TransportError::Network(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct WrappedWebsocketErrorEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(alias = "status_code")]
    status: Option<u16>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    headers: Option<JsonMap<String, Value>>,
}

fn parse_wrapped_websocket_error_event(payload: &str) -> Option<WrappedWebsocketErrorEvent> {
    let event: WrappedWebsocketErrorEvent = serde_json::from_str(payload).ok()?;
    if event.kind != "error" {
        return None;
    }
    Some(event)
}

fn map_wrapped_websocket_error_event(event: WrappedWebsocketErrorEvent) -> Option<ApiError> {
    let WrappedWebsocketErrorEvent {
        status,
        error,
        headers,
        ..
    } = event;

    let status = StatusCode::from_u16(status?).ok()?;
    if status.is_success() {
        return None;
    }

    let body = error.map(|error| {
        serde_json::to_string_pretty(&serde_json::json!({ "error": error }))
            .unwrap_or_else(|_| serde_json::json!({ "error": error }).to_string())
    });

    Some(ApiError::Transport(TransportError::Http {
        status,
        url: None,
        headers: headers.map(json_headers_to_http_headers),
        body,
    }))
}

fn json_headers_to_http_headers(headers: JsonMap<String, Value>) -> HeaderMap {
    let mut mapped = HeaderMap::new();
    for (name, value) in headers {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Some(header_value) = json_header_value(value) else {
            continue;
        };
        mapped.insert(header_name, header_value);
    }
    mapped
}

fn json_header_value(value: Value) -> Option<HeaderValue> {
    let value = match value {
        Value::String(value) => value,
        Value::Number(value) => value.to_string(),
        Value::Bool(value) => value.to_string(),
        _ => return None,
    };
    HeaderValue::from_str(&value).ok()
}

async fn run_websocket_response_stream(
    ws_stream: &mut WsStream,
    tx_event: mpsc::Sender<Result<ResponseEvent, ApiError>>,
    request_body: Value,
    idle_timeout: Duration,
) -> Result<(), ApiError> {
    let request_text = serde_json::to_string(&request_body).map_err(|err| {
        ApiError::Stream(format!("failed to encode websocket request: {err}"))
    })?;
    trace!("websocket request: {request_text}");

    ws_stream
        .send(Message::Text(request_text.into()))
        .await
        .map_err(|err| ApiError::Stream(format!("failed to send websocket request: {err}")))?;

    loop {
        let poll_start = Instant::now();
        let response = tokio::time::timeout(idle_timeout, ws_stream.next())
            .await
            .map_err(|_| ApiError::Stream("idle timeout waiting for websocket".into()));
        trace!(elapsed_ms = poll_start.elapsed().as_millis() as u64, "polled websocket frame");

        let message = match response {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(err))) => return Err(ApiError::ConnectionLost(err.to_string())),
            Ok(None) => {
                return Err(ApiError::ConnectionLost(
                    "websocket connection lost before a terminal event".into(),
                ));
            }
            Err(err) => return Err(err),
        };

        match message {
            Message::Text(text) => {
                trace!("websocket event: {text}");
                if let Some(wrapped_error) = parse_wrapped_websocket_error_event(&text) {
                    if let Some(error) = map_wrapped_websocket_error_event(wrapped_error) {
                        return Err(error);
                    }
                }

                match decode_event(&text) {
                    Some(Ok(event)) => {
                        let terminal = is_terminal(&event);
                        let is_error = matches!(event, ResponseEvent::Error { .. });
                        let _ = tx_event.send(Ok(event)).await;
                        if terminal || is_error {
                            break;
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        debug!("dropping unrecognized websocket event: {text}");
                    }
                }
            }
            Message::Binary(_) => {
                return Err(ApiError::Stream("unexpected binary websocket event".into()));
            }
            Message::Close(_) => {
                return Err(ApiError::ConnectionLost(
                    "websocket closed by server before response.completed".into(),
                ));
            }
            Message::Frame(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    Ok(())
}
