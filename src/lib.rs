//! A resilient, stream-oriented client-side WebSocket connection.
//!
//! This crate does not reimplement the WebSocket handshake or frame codec —
//! that is delegated to an [`ws::Engine`]. What it provides is the
//! **supervision core** around one: a state machine that coordinates connect
//! attempts, backoff-scheduled reconnection, application-level heartbeats,
//! short-window send buffering, and explicit shutdown, while guaranteeing
//! that the state observed by [`ws::Supervisor::state`] always reflects the
//! underlying socket.
//!
//! # Example
//!
//! ```rust, no_run
//! use futures::StreamExt as _;
//! use ws_supervisor::ws::{Supervisor, SupervisorOptions, WsMessage};
//!
//! #[tokio::main]
//! async fn main() -> ws_supervisor::Result<()> {
//!     let supervisor = Supervisor::new(SupervisorOptions::builder().url("wss://example.com").build())?;
//!
//!     let mut on_receive = supervisor.on_receive();
//!     tokio::spawn(async move {
//!         while let Some(message) = on_receive.next().await {
//!             println!("received: {message:?}");
//!         }
//!     });
//!
//!     supervisor.connect().await;
//!     supervisor.send(WsMessage::Text("hello".to_owned())).await;
//!     supervisor.dispose().await;
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod log;
pub mod ws;

pub use error::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
