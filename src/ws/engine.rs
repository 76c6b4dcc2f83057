//! The `Engine` seam: one connection's worth of WebSocket I/O.
//!
//! The Supervisor treats an `Engine` as opaque and assumes no reconnection
//! logic inside it — reconnection is entirely the Supervisor's job. This
//! module defines that seam as a pair of traits ([`EngineFactory`] performs
//! the handshake, [`Engine`] is the live-connection handle) and ships one
//! concrete implementation, [`TungsteniteEngineFactory`], backed by
//! `tokio-tungstenite`, so the crate is usable standalone.

use std::pin::Pin;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::Utf8Bytes;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};

use super::error::WsError;

/// A header map passed opaquely through to the engine's handshake.
pub type HeaderMap = tokio_tungstenite::tungstenite::http::HeaderMap;

/// An inbound or outbound WebSocket payload: either a text string or a byte
/// sequence. There is no third payload kind, which is what lets `send`
/// reject "the wrong message type" at the type system level rather than
/// with a runtime check.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Binary(_) => None,
        }
    }
}

impl From<Message> for WsMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text.to_string()),
            Message::Binary(bytes) => Self::Binary(bytes.to_vec()),
            Message::Ping(bytes) | Message::Pong(bytes) => Self::Binary(bytes.to_vec()),
            Message::Close(_) | Message::Frame(_) => Self::Binary(Vec::new()),
        }
    }
}

impl From<WsMessage> for Message {
    fn from(message: WsMessage) -> Self {
        match message {
            WsMessage::Text(text) => Self::Text(Utf8Bytes::from(text)),
            WsMessage::Binary(bytes) => Self::Binary(Bytes::from(bytes)),
        }
    }
}

/// Opaque, engine-specific transport configuration handle.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct TransportConfig {
    pub websocket_config: Option<WebSocketConfig>,
}

/// Arguments for one handshake attempt.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectOptions {
    pub url: String,
    pub headers: Option<HeaderMap>,
    pub ping_interval: Option<Duration>,
    pub transport_config: Option<TransportConfig>,
}

/// Stream of inbound messages from one live connection; finite, terminates
/// on close or error.
pub type BoxMessageStream = Pin<Box<dyn Stream<Item = Result<WsMessage, WsError>> + Send>>;

/// A live connection's worth of WebSocket I/O.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Fire-and-forget enqueue; does not wait on network I/O. Enqueue
    /// failure (the write side is already gone) is reported synchronously;
    /// all other transport errors surface via the inbound stream instead.
    fn send(&self, message: WsMessage) -> Result<(), WsError>;

    /// Request an orderly shutdown. Idempotent; completes once the
    /// transport is fully torn down.
    async fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), WsError>;
}

/// Performs the handshake for one [`Engine`].
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(std::sync::Arc<dyn Engine>, BoxMessageStream), WsError>;
}

type TungsteniteStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum WriterCommand {
    Send(Message),
    Close,
}

/// The default, production-usable [`Engine`], backed by `tokio-tungstenite`.
pub struct TungsteniteEngine {
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    writer_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait]
impl Engine for TungsteniteEngine {
    fn send(&self, message: WsMessage) -> Result<(), WsError> {
        self.writer_tx
            .send(WriterCommand::Send(message.into()))
            .map_err(|_send_error| WsError::ConnectionClosed)
    }

    async fn close(&self, _code: Option<u16>, _reason: Option<String>) -> Result<(), WsError> {
        // Best-effort: if the writer task is already gone the connection is
        // already torn down, which is exactly what close() requires.
        if self.writer_tx.send(WriterCommand::Close).is_err() {
            return Ok(());
        }

        let handle = self.writer_task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Builds [`TungsteniteEngine`] connections.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct TungsteniteEngineFactory;

#[async_trait]
impl EngineFactory for TungsteniteEngineFactory {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(std::sync::Arc<dyn Engine>, BoxMessageStream), WsError> {
        let mut request = options
            .url
            .as_str()
            .into_client_request()
            .map_err(WsError::Connection)?;

        if let Some(headers) = &options.headers {
            request.headers_mut().extend(headers.clone());
        }

        let websocket_config = options
            .transport_config
            .as_ref()
            .and_then(|config| config.websocket_config);

        let (ws_stream, _response) =
            connect_async_with_config(request, websocket_config, false)
                .await
                .map_err(WsError::Connection)?;

        let (write, read) = ws_stream.split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(run_writer(write, writer_rx, options.ping_interval));

        let engine: std::sync::Arc<dyn Engine> = std::sync::Arc::new(TungsteniteEngine {
            writer_tx,
            writer_task: tokio::sync::Mutex::new(Some(writer_task)),
        });

        Ok((engine, message_stream(read)))
    }
}

async fn run_writer(
    mut write: futures::stream::SplitSink<TungsteniteStream, Message>,
    mut writer_rx: mpsc::UnboundedReceiver<WriterCommand>,
    ping_interval: Option<Duration>,
) {
    use futures::SinkExt as _;

    let mut ping_tick = ping_interval.map(interval);

    loop {
        let tick = async {
            match &mut ping_tick {
                Some(tick) => tick.tick().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = writer_rx.recv() => {
                match command {
                    Some(WriterCommand::Send(message)) => {
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(WriterCommand::Close) => {
                        let _ = write.close().await;
                        break;
                    }
                    None => break,
                }
            }
            () = tick => {
                if write.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn message_stream(
    mut read: futures::stream::SplitStream<TungsteniteStream>,
) -> BoxMessageStream {
    Box::pin(try_stream! {
        while let Some(item) = read.next().await {
            match item {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Ok(message) => yield WsMessage::from(message),
                Err(e) => Err(WsError::Connection(e))?,
            }
        }
    })
}
