use std::collections::HashMap;
use std::sync::Arc;

use codex_api::ResponsesWebsocketConnection;
use codex_protocol::Context;
use codex_protocol::SessionId;
use tracing::debug;

/// Which transport produced (or is producing) a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Websocket,
    Sse,
}

/// Handshake metadata captured over one transport and due to be replayed
/// on the next request for the same session, regardless of which
/// transport that next request uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeMeta {
    pub turn_state: Option<String>,
    pub models_etag: Option<String>,
    pub reasoning_included: bool,
}

impl HandshakeMeta {
    pub fn is_empty(&self) -> bool {
        self.turn_state.is_none() && self.models_etag.is_none() && !self.reasoning_included
    }
}

/// Per-session mutable record. Created lazily on first use by
/// [`SessionRegistry::get_or_create`] and mutated only by the transport
/// selector and the transports it drives; the caller guarantees at most
/// one turn in flight per session, so no internal locking is needed here.
#[derive(Debug, Default)]
pub struct SessionTransportState {
    last_transport: Option<Transport>,
    websocket_disabled: bool,
    fallback_count: u32,
    prewarmed: bool,
    can_append: bool,
    handshake: Option<HandshakeMeta>,
    websocket: Option<Arc<ResponsesWebsocketConnection>>,
    /// The context a live socket's append-state was last validated
    /// against; required to detect system-prompt/message-prefix
    /// divergence per the append-state invalidation rules.
    last_context: Option<Context>,
}

impl SessionTransportState {
    pub fn last_transport(&self) -> Option<Transport> {
        self.last_transport
    }

    pub fn websocket_disabled(&self) -> bool {
        self.websocket_disabled
    }

    pub fn fallback_count(&self) -> u32 {
        self.fallback_count
    }

    pub fn prewarmed(&self) -> bool {
        self.prewarmed
    }

    pub fn can_append(&self) -> bool {
        self.can_append
    }

    /// The context an open socket's append-state was last validated
    /// against, if any. Used to compute which messages are new since the
    /// last successful turn when framing a `response.append`.
    pub fn last_context(&self) -> Option<&Context> {
        self.last_context.as_ref()
    }

    pub fn websocket_connected(&self) -> bool {
        self.websocket.is_some()
    }

    pub fn websocket_handle(&self) -> Option<Arc<ResponsesWebsocketConnection>> {
        self.websocket.clone()
    }

    pub fn set_websocket_handle(&mut self, handle: Option<Arc<ResponsesWebsocketConnection>>) {
        self.websocket = handle;
    }

    pub fn set_prewarmed(&mut self, prewarmed: bool) {
        self.prewarmed = prewarmed;
    }

    /// Records that `transport` just produced (or attempted) a turn.
    /// Switching transports invalidates any handshake metadata captured
    /// over the previous one: the server side routing context it carried
    /// no longer applies.
    pub fn mark_used(&mut self, transport: Transport) {
        if self.last_transport != Some(transport) {
            self.handshake = None;
        }
        self.last_transport = Some(transport);
    }

    /// Permanently disables WebSocket for this session. Monotonic: once
    /// set, nothing in this type clears it again.
    pub fn disable_websocket_sticky(&mut self) {
        self.websocket_disabled = true;
        self.websocket = None;
        self.fallback_count += 1;
        self.can_append = false;
    }

    pub fn capture_handshake(
        &mut self,
        turn_state: Option<String>,
        models_etag: Option<String>,
        reasoning_included: bool,
    ) {
        let meta = HandshakeMeta {
            turn_state,
            models_etag,
            reasoning_included,
        };
        if !meta.is_empty() {
            self.handshake = Some(meta);
        }
    }

    /// Returns the handshake metadata pending replay, if any. Per the
    /// invariant that metadata is replayed exactly once, callers that
    /// determine the response invalidated it must call
    /// [`Self::clear_handshake`] afterward.
    pub fn consume_handshake_for_request(&self) -> Option<HandshakeMeta> {
        self.handshake.clone()
    }

    pub fn clear_handshake(&mut self) {
        self.handshake = None;
    }

    /// Forces `response.create` on the next WebSocket turn. `reason` is
    /// logged only — it does not affect behavior beyond the reset itself.
    pub fn reset_append_state(&mut self, reason: &str) {
        debug!(reason, "resetting append state");
        self.can_append = false;
        self.last_context = None;
    }

    /// Marks the socket as safe to append to, recording `context` as the
    /// baseline the next turn's context must extend.
    pub fn mark_appendable(&mut self, context: Context) {
        self.can_append = true;
        self.last_context = Some(context);
    }

    /// True when `next` is a strict extension of the context the open
    /// socket's append-state was last validated against (unchanged system
    /// prompt, strictly longer message history with an identical prefix).
    /// A session with no live append baseline (fresh socket, or one whose
    /// state was already reset) never permits append.
    pub fn context_extends_appendable_state(&self, next: &Context) -> bool {
        self.can_append
            && self
                .last_context
                .as_ref()
                .is_some_and(|previous| next.extends(previous))
    }
}

/// Explicit, caller-owned map from [`SessionId`] to its transport state —
/// the replacement for module-level session globals (see the design
/// notes on mutable module-level state). Concurrency across sessions is
/// the caller's to manage; within one session, the caller guarantees at
/// most one turn in flight.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionTransportState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, session_id: &SessionId) -> &mut SessionTransportState {
        self.sessions.entry(session_id.clone()).or_default()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SessionTransportState> {
        self.sessions.get(session_id)
    }

    pub fn remove(&mut self, session_id: &SessionId) {
        self.sessions.remove(session_id);
    }
}
