use std::time::Duration;

/// The four environment-variable reads in the component design, resolved
/// once per process/session rather than on every turn. Tests construct
/// this directly instead of setting environment variables, so test cases
/// stay hermetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Number of times the WebSocket transport retries a transient
    /// connect/close failure before giving up on the socket for a turn.
    pub retry_budget: u32,
    /// Delay between retries.
    pub retry_delay: Duration,
    /// How long the WebSocket and SSE transports wait for a frame/chunk
    /// before treating the connection as idle.
    pub idle_timeout: Duration,
    /// Selects the `responses_websockets` beta header version.
    pub websocket_v2: bool,
}

impl TransportConfig {
    pub const WEBSOCKET_V2_BETA_HEADER: &'static str = "2026-02-06";
    pub const WEBSOCKET_V1_BETA_HEADER: &'static str = "2026-02-04";

    /// Resolves configuration from `WEBSOCKET_RETRY_BUDGET`,
    /// `WEBSOCKET_RETRY_DELAY_MS`, `WEBSOCKET_IDLE_TIMEOUT_MS`, and
    /// `WEBSOCKET_V2`. Unset or unparsable values fall back to their
    /// documented defaults rather than erroring, since a malformed
    /// environment shouldn't prevent the process from starting.
    pub fn from_env() -> Self {
        Self {
            retry_budget: read_env_u32("WEBSOCKET_RETRY_BUDGET", 0),
            retry_delay: Duration::from_millis(read_env_u64("WEBSOCKET_RETRY_DELAY_MS", 1)),
            idle_timeout: Duration::from_millis(read_env_u64("WEBSOCKET_IDLE_TIMEOUT_MS", 10_000)),
            websocket_v2: std::env::var("WEBSOCKET_V2")
                .map(|value| value == "1")
                .unwrap_or(false),
        }
    }

    pub fn websocket_beta_header(&self) -> &'static str {
        if self.websocket_v2 {
            Self::WEBSOCKET_V2_BETA_HEADER
        } else {
            Self::WEBSOCKET_V1_BETA_HEADER
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_budget: 0,
            retry_delay: Duration::from_millis(1),
            idle_timeout: Duration::from_millis(10_000),
            websocket_v2: false,
        }
    }
}

fn read_env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
