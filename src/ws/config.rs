//! Construction-time configuration for a [`super::Supervisor`].

use std::time::Duration;

use bon::Builder;

use super::engine::{HeaderMap, TransportConfig, WsMessage};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// A predicate over inbound messages used to classify heartbeat responses.
pub type HeartbeatValidator = std::sync::Arc<dyn Fn(&WsMessage) -> bool + Send + Sync>;

/// Application-level liveness probing, distinct from any transport-level ping.
///
/// Defaults: `interval` 15s, `timeout` 10s, no validator (keep-alive mode —
/// any inbound message counts as a response), `intercept_response` true.
#[derive(Clone, Builder)]
#[non_exhaustive]
pub struct HeartbeatConfig {
    /// How often a heartbeat request is sent while connected.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    pub interval: Duration,
    /// How long to wait for a response before treating the connection as dead.
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT)]
    pub timeout: Duration,
    /// The payload sent as a heartbeat probe.
    pub request: WsMessage,
    /// Classifies an inbound message as a heartbeat response. Absent means
    /// keep-alive mode: any inbound message while awaiting a response counts.
    pub validator: Option<HeartbeatValidator>,
    /// Whether a classified response is dropped rather than forwarded to
    /// `on_receive`.
    #[builder(default = true)]
    pub intercept_response: bool,
}

impl std::fmt::Debug for HeartbeatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatConfig")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("request", &self.request)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .field("intercept_response", &self.intercept_response)
            .finish()
    }
}

/// Construction arguments for a [`super::Supervisor`].
#[derive(Builder)]
#[non_exhaustive]
pub struct SupervisorOptions {
    /// Target WebSocket URL. Must be non-empty.
    #[builder(into)]
    pub url: String,
    /// Opaque headers passed through to the Engine's handshake.
    pub headers: Option<HeaderMap>,
    /// Transport-level ping interval, independent of the heartbeat.
    pub ping_interval: Option<Duration>,
    /// Opaque transport configuration handle passed through to the Engine.
    pub transport_config: Option<TransportConfig>,
    /// Application-level heartbeat. Absent disables the heartbeat monitor
    /// entirely (invariant: the heartbeat tick timer is armed on `Connected`
    /// iff this is present).
    pub heartbeat: Option<HeartbeatConfig>,
}

impl std::fmt::Debug for SupervisorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorOptions")
            .field("url", &self.url)
            .field("ping_interval", &self.ping_interval)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_config_defaults_match_the_documented_values() {
        let config = HeartbeatConfig::builder()
            .request(WsMessage::Text("ping".to_owned()))
            .build();

        assert_eq!(config.interval, Duration::from_secs(15));
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.intercept_response);
        assert!(config.validator.is_none());
    }

    #[test]
    fn supervisor_options_accepts_a_bare_url() {
        let options = SupervisorOptions::builder().url("ws://localhost:8081").build();

        assert_eq!(options.url, "ws://localhost:8081");
        assert!(options.heartbeat.is_none());
    }
}
