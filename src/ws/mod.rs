//! Resilient, stream-oriented supervision for a raw WebSocket transport.
//!
//! # Architecture
//!
//! - [`Supervisor`]: owns state, reconnection, heartbeats, and send-with-wait
//! - [`Engine`]/[`EngineFactory`]: the transport seam; [`TungsteniteEngine`] ships by default
//! - [`Backoff`]: pure attempt-count → delay strategies (`Linear`, `Exponential`)
//!
//! # Example
//!
//! ```no_run
//! use ws_supervisor::ws::{Supervisor, SupervisorOptions, WsMessage};
//!
//! # async fn run() -> ws_supervisor::Result<()> {
//! let supervisor = Supervisor::new(
//!     SupervisorOptions::builder().url("wss://example.invalid/socket").build(),
//! )?;
//! supervisor.connect().await;
//! supervisor.send(WsMessage::Text("hello".to_owned())).await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod state;
pub mod supervisor;

pub use backoff::{Backoff, Exponential, Linear};
pub use config::{HeartbeatConfig, HeartbeatValidator, SupervisorOptions};
pub use engine::{
    BoxMessageStream, ConnectOptions, Engine, EngineFactory, HeaderMap, TransportConfig,
    TungsteniteEngine, TungsteniteEngineFactory, WsMessage,
};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use state::ConnectionState;
pub use supervisor::Supervisor;
