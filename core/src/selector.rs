use std::sync::Arc;

use codex_api::AuthProvider;
use codex_api::Provider;
use codex_api::ResponseAppendWsRequest;
use codex_api::ResponsesClient;
use codex_api::ResponsesWebsocketClient;
use codex_api::ResponsesWebsocketConnection;
use codex_api::ResponsesWsRequest;
use codex_client::HttpTransport;
use codex_protocol::Context;
use codex_protocol::Model;
use codex_protocol::ReasoningEffort;
use codex_protocol::SessionId;
use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::aggregator::TurnStream;
use crate::config::TransportConfig;
use crate::error::CodexErr;
use crate::request_builder::BuildRequestInput;
use crate::request_builder::build_extra_headers;
use crate::request_builder::build_headers;
use crate::request_builder::build_request_body;
use crate::request_builder::translate_messages_to_input;
use crate::session::SessionRegistry;
use crate::session::Transport;

/// Per-call options a caller supplies to [`TurnDriver::stream`]. The auth
/// token and HTTP transport are session/process-scoped and live on
/// `TurnDriver` itself (see its doc comment); the session registry is
/// passed explicitly rather than embedded here, matching the redesign
/// note that module-level session state becomes a caller-owned value.
pub struct StreamOptions<'a> {
    pub session_id: Option<&'a SessionId>,
    pub reasoning_effort: ReasoningEffort,
    /// Cancels the in-flight turn. Does not disable the session; the next
    /// turn always starts fresh.
    pub signal: Option<CancellationToken>,
}

impl<'a> StreamOptions<'a> {
    pub fn new(reasoning_effort: ReasoningEffort) -> Self {
        Self {
            session_id: None,
            reasoning_effort,
            signal: None,
        }
    }

    pub fn with_session(mut self, session_id: &'a SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Read-only snapshot of a session's transport state, for callers and
/// tests that want to observe the selector's decisions without reaching
/// into [`SessionRegistry`] internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportDetails {
    pub last_transport: Option<Transport>,
    pub websocket_disabled: bool,
    pub fallback_count: u32,
    pub websocket_connected: bool,
    pub prewarmed: bool,
    pub can_append: bool,
}

/// Top-level entry point: decides WebSocket vs SSE, drives the chosen
/// transport for one turn, and updates [`SessionRegistry`] on completion
/// or failure. `T`/`A` are session/process-scoped (one HTTP transport and
/// one auth provider serve every turn this driver handles), matching how
/// the upstream client holds its transport and auth manager for the
/// lifetime of a session rather than re-resolving them per turn.
pub struct TurnDriver<T, A>
where
    T: HttpTransport + Clone,
    A: AuthProvider + Clone,
{
    transport: T,
    auth: A,
    config: TransportConfig,
}

enum WebsocketTurnOutcome {
    Completed,
    /// Idle timeout, truncation, or a semantic `error` frame from the
    /// server: surfaced to the caller as-is, with append state reset and
    /// no retry, no SSE fallback (§7's policy table).
    Failed,
    /// The connection dropped mid-turn (unexpected close, dead socket)
    /// rather than reporting anything semantic. Retried by reconnecting
    /// and reissuing `response.create`, per §4.5 step 5.
    ConnectionLost,
    Aborted,
}

impl<T, A> TurnDriver<T, A>
where
    T: HttpTransport + Clone,
    A: AuthProvider + Clone,
{
    pub fn new(transport: T, auth: A, config: TransportConfig) -> Self {
        Self {
            transport,
            auth,
            config,
        }
    }

    fn provider_for(&self, model: &Model) -> Provider {
        Provider {
            name: model.id.clone(),
            base_url: model.base_url.clone(),
            headers: HeaderMap::new(),
            stream_idle_timeout: self.config.idle_timeout,
        }
    }

    /// Decides WebSocket vs SSE for one turn and drives it to completion.
    #[instrument(level = "trace", skip_all, err)]
    pub async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions<'_>,
        registry: &mut SessionRegistry,
    ) -> Result<TurnStream, CodexErr> {
        let provider = self.provider_for(model);

        let Some(session_id) = options.session_id else {
            // Stateless: no reuse, no append, no sticky fallback, no
            // handshake replay.
            let events = self
                .sse_turn(model, context, None, options.reasoning_effort, None, &provider)
                .await?;
            let mut turn_stream = TurnStream::new(events);
            if options.signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
                turn_stream.mark_aborted();
            }
            return Ok(turn_stream);
        };

        let websocket_eligible =
            model.prefer_websocket && !registry.get_or_create(session_id).websocket_disabled();

        if websocket_eligible {
            match self
                .try_websocket_turn(model, context, options, session_id, &provider, registry)
                .await?
            {
                Some(turn_stream) => return Ok(turn_stream),
                None => {
                    // transport_unavailable: try_websocket_turn already
                    // marked the session sticky-SSE. Fall through below.
                }
            }
        }

        self.sse_fallback_turn(model, context, options, session_id, &provider, registry)
            .await
    }

    /// Attempts the WebSocket path for one turn, including the connect
    /// retry budget and, separately, the mid-stream reconnect budget (a
    /// connection that drops after at least one frame was sent is retried
    /// by reopening and reissuing `response.create`, up to
    /// `config.retry_budget` times). Returns:
    /// - `Ok(Some(stream))` — the turn completed (or failed terminally)
    ///   over WebSocket; the caller should not fall back to SSE.
    /// - `Ok(None)` — WebSocket was unusable after exhausting retries
    ///   (either at connect time or after repeated mid-stream drops); the
    ///   session has been marked sticky-SSE and the caller should fall
    ///   back.
    /// - `Err(_)` — a malformed request body; never produced by a healthy
    ///   turn.
    async fn try_websocket_turn(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions<'_>,
        session_id: &SessionId,
        provider: &Provider,
        registry: &mut SessionRegistry,
    ) -> Result<Option<TurnStream>, CodexErr> {
        let mut retry_attempt = 0u32;
        // Set once a mid-stream connection loss forces a reconnect: the
        // reopened socket has no append baseline, so the reissued request
        // must be framed as `response.create` regardless of what the
        // session's append state said before the drop.
        let mut force_create = false;

        loop {
            let pending_handshake =
                registry.get_or_create(session_id).consume_handshake_for_request();
            let handle = match self
                .connect_with_retry(provider, session_id, pending_handshake.as_ref(), registry)
                .await
            {
                Some(handle) => handle,
                None => {
                    registry.get_or_create(session_id).disable_websocket_sticky();
                    return Ok(None);
                }
            };

            let state = registry.get_or_create(session_id);
            let connect_handshake = handle.handshake.clone();
            state.mark_used(Transport::Websocket);
            state.capture_handshake(
                connect_handshake.turn_state,
                connect_handshake.models_etag,
                connect_handshake.reasoning_included,
            );

            let can_append = !force_create && state.context_extends_appendable_state(context);
            let request = if can_append {
                let baseline = state.last_context().expect("can_append implies a baseline");
                ResponsesWsRequest::ResponseAppend(ResponseAppendWsRequest {
                    input: translate_messages_to_input(context.new_messages_since(baseline)),
                    client_metadata: None,
                })
            } else {
                let input = BuildRequestInput {
                    model,
                    context,
                    session_id: Some(session_id),
                    reasoning_effort: options.reasoning_effort,
                    handshake: None,
                    previous_response_id: None,
                };
                ResponsesWsRequest::ResponseCreate((&build_request_body(&input)).into())
            };

            let raw_stream = handle
                .stream_request(request)
                .await
                .map_err(CodexErr::Other)?;
            let mut turn_stream = TurnStream::new(raw_stream);

            let outcome = match options.signal.clone() {
                Some(signal) => {
                    tokio::select! {
                        biased;
                        _ = signal.cancelled() => {
                            turn_stream.mark_aborted();
                            WebsocketTurnOutcome::Aborted
                        }
                        outcome = drive_to_completion(&mut turn_stream) => outcome,
                    }
                }
                None => drive_to_completion(&mut turn_stream).await,
            };

            let state = registry.get_or_create(session_id);
            match outcome {
                WebsocketTurnOutcome::Completed => {
                    state.mark_appendable(context.clone());
                    state.set_websocket_handle(Some(Arc::new(handle)));
                    return Ok(Some(turn_stream));
                }
                WebsocketTurnOutcome::Failed => {
                    state.reset_append_state("websocket server error or stream integrity failure");
                    state.set_websocket_handle(None);
                    handle.close().await;
                    return Ok(Some(turn_stream));
                }
                WebsocketTurnOutcome::Aborted => {
                    state.reset_append_state("turn aborted");
                    state.set_websocket_handle(None);
                    handle.close().await;
                    return Ok(Some(turn_stream));
                }
                WebsocketTurnOutcome::ConnectionLost => {
                    state.reset_append_state("websocket connection lost mid-stream");
                    state.set_websocket_handle(None);
                    if retry_attempt >= self.config.retry_budget {
                        state.disable_websocket_sticky();
                        return Ok(None);
                    }
                    retry_attempt += 1;
                    force_create = true;
                    warn!(
                        attempt = retry_attempt,
                        "retrying websocket turn after mid-stream connection loss"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// Opens a connection, reusing the session's live handle if one
    /// exists; otherwise retries up to `retry_budget` times with
    /// `retry_delay` between attempts. Returns `None` once the budget is
    /// exhausted.
    async fn connect_with_retry(
        &self,
        provider: &Provider,
        session_id: &SessionId,
        pending_handshake: Option<&crate::session::HandshakeMeta>,
        registry: &mut SessionRegistry,
    ) -> Option<ResponsesWebsocketConnection> {
        if let Some(existing) = registry.get_or_create(session_id).websocket_handle() {
            if !existing.is_closed().await {
                registry.get_or_create(session_id).set_websocket_handle(None);
                // `existing` is the only remaining owner once the registry
                // drops its clone, so this always succeeds.
                if let Ok(handle) = Arc::try_unwrap(existing) {
                    return Some(handle);
                }
            }
        }

        let ws_client = ResponsesWebsocketClient::new(provider.clone(), self.auth.clone());
        let mut attempt = 0u32;
        loop {
            let extra_headers = build_extra_headers(&self.config, Some(session_id), pending_handshake, true);
            match ws_client.connect(extra_headers).await {
                Ok(connection) => return Some(connection),
                Err(err) => {
                    warn!(attempt, error = %err, "websocket connect failed");
                    if attempt >= self.config.retry_budget {
                        return None;
                    }
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn sse_turn(
        &self,
        model: &Model,
        context: &Context,
        session_id: Option<&SessionId>,
        reasoning_effort: ReasoningEffort,
        handshake: Option<&crate::session::HandshakeMeta>,
        provider: &Provider,
    ) -> Result<codex_api::ResponseStream, CodexErr> {
        let input = BuildRequestInput {
            model,
            context,
            session_id,
            reasoning_effort,
            handshake,
            previous_response_id: None,
        };
        let body = build_request_body(&input);
        let headers = build_headers(&self.auth, &self.config, session_id, handshake, false);

        let client = ResponsesClient::new(self.transport.clone(), provider.clone(), self.auth.clone());
        let body_value = serde_json::to_value(&body)
            .map_err(|err| CodexErr::Http(format!("failed to encode request body: {err}")))?;
        let response = client.stream(body_value, headers).await.map_err(CodexErr::Other)?;

        info!(base_url = %provider.base_url, "sse turn started");
        Ok(response.events)
    }

    async fn sse_fallback_turn(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions<'_>,
        session_id: &SessionId,
        provider: &Provider,
        registry: &mut SessionRegistry,
    ) -> Result<TurnStream, CodexErr> {
        let handshake = registry.get_or_create(session_id).consume_handshake_for_request();

        let input = BuildRequestInput {
            model,
            context,
            session_id: Some(session_id),
            reasoning_effort: options.reasoning_effort,
            handshake: handshake.as_ref(),
            previous_response_id: None,
        };
        let body = build_request_body(&input);
        let headers = build_headers(
            &self.auth,
            &self.config,
            Some(session_id),
            handshake.as_ref(),
            false,
        );

        let client =
            ResponsesClient::new(self.transport.clone(), provider.clone(), self.auth.clone());
        let body_value = serde_json::to_value(&body)
            .map_err(|err| CodexErr::Http(format!("failed to encode request body: {err}")))?;
        let response = client.stream(body_value, headers).await.map_err(CodexErr::Other)?;

        let turn_state = header_str(&response.headers, "x-codex-turn-state");
        let models_etag = header_str(&response.headers, "x-models-etag");
        let reasoning_included = response.headers.contains_key("x-reasoning-included");

        let state = registry.get_or_create(session_id);
        // Handshake metadata is replayed at most once: having sent it on
        // this request, record whatever the server returned in its place.
        state.mark_used(Transport::Sse);
        state.capture_handshake(turn_state, models_etag, reasoning_included);
        state.reset_append_state("sse has no append state");

        let mut turn_stream = TurnStream::new(response.events);
        if options.signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
            turn_stream.mark_aborted();
        }
        Ok(turn_stream)
    }

    /// Opens a connection ahead of the first turn if none exists and the
    /// session isn't stickily disabled. Errors never propagate; a failed
    /// prewarm leaves state unchanged rather than disabling WebSocket.
    pub async fn prewarm(&self, model: &Model, session_id: &SessionId, registry: &mut SessionRegistry) {
        let provider = self.provider_for(model);
        let state = registry.get_or_create(session_id);
        if state.websocket_disabled() || state.websocket_connected() {
            return;
        }
        let pending_handshake = state.consume_handshake_for_request();

        let extra_headers =
            build_extra_headers(&self.config, Some(session_id), pending_handshake.as_ref(), true);
        let ws_client = ResponsesWebsocketClient::new(provider, self.auth.clone());
        if let Ok(connection) = ws_client.connect(extra_headers).await {
            let state = registry.get_or_create(session_id);
            state.set_websocket_handle(Some(Arc::new(connection)));
            state.set_prewarmed(true);
        }
    }

    pub fn transport_details(
        &self,
        registry: &SessionRegistry,
        session_id: &SessionId,
    ) -> TransportDetails {
        match registry.get(session_id) {
            Some(state) => TransportDetails {
                last_transport: state.last_transport(),
                websocket_disabled: state.websocket_disabled(),
                fallback_count: state.fallback_count(),
                websocket_connected: state.websocket_connected(),
                prewarmed: state.prewarmed(),
                can_append: state.can_append(),
            },
            None => TransportDetails {
                last_transport: None,
                websocket_disabled: false,
                fallback_count: 0,
                websocket_connected: false,
                prewarmed: false,
                can_append: false,
            },
        }
    }
}

async fn drive_to_completion(turn_stream: &mut TurnStream) -> WebsocketTurnOutcome {
    use futures::StreamExt;

    let mut outcome = WebsocketTurnOutcome::Completed;
    while let Some(event) = turn_stream.next().await {
        match event {
            // A semantic error frame from the server: not a transport
            // problem, so never retried, but it must not be mistaken for
            // a clean completion either (the decoder yields it as `Ok`,
            // since decoding succeeded; only its content is an error).
            Ok(codex_api::ResponseEvent::Error { .. }) => {
                outcome = WebsocketTurnOutcome::Failed;
            }
            Ok(_) => {}
            Err(err) if err.is_transport_unavailable() => {
                outcome = WebsocketTurnOutcome::ConnectionLost;
            }
            Err(_) => {
                outcome = WebsocketTurnOutcome::Failed;
            }
        }
    }
    outcome
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}
