/// Connection state observed by subscribers of [`crate::ws::Supervisor::on_state_change`].
///
/// Carries no payload — `attempt` counters and connection timestamps live on
/// the Supervisor, not here, so that the set of reachable traces stays
/// exactly `{Disconnected -> Connecting -> Connected -> Disconnected -> ...}`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not currently trying to connect.
    #[default]
    Disconnected,
    /// A handshake is in flight.
    Connecting,
    /// The handshake succeeded and the engine is live.
    Connected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}
