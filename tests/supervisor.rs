#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use ws_supervisor::ws::{ConnectionState, HeartbeatConfig, Supervisor, SupervisorOptions, WsMessage};

/// An echo-server mock: replies to every text message with `"Echo: <text>"`.
/// `stop()` forcibly aborts every connection it has accepted so far and
/// stops accepting new ones, simulating a server-initiated close/outage.
struct EchoServer {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::UnboundedSender<()>>,
    connections: Arc<std::sync::Mutex<Vec<tokio::task::AbortHandle>>>,
}

impl EchoServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self::serve(listener, addr)
    }

    fn serve(listener: TcpListener, addr: SocketAddr) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(std::sync::Mutex::new(Vec::new()));
        let connections_clone = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break; };
                        let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                            continue;
                        };
                        let handle = tokio::spawn(handle_connection(ws_stream));
                        connections_clone.lock().unwrap().push(handle.abort_handle());
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            connections,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        for handle in self.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    async fn restart(&mut self) {
        let listener = TcpListener::bind(self.addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        *self = Self::serve(listener, addr);
    }
}

async fn handle_connection(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
) {
    use futures::SinkExt as _;

    let (mut write, mut read) = ws_stream.split();
    while let Some(Ok(message)) = read.next().await {
        match message {
            Message::Text(text) => {
                if write
                    .send(Message::Text(format!("Echo: {text}").into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// A server that accepts the handshake and then never sends anything,
/// regardless of what the client sends — used for heartbeat-timeout tests.
async fn start_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await {
                tokio::spawn(async move {
                    let (_write, mut read) = ws_stream.split();
                    while read.next().await.is_some() {}
                });
            }
        }
    });
    addr
}

async fn next_state(stream: &mut std::pin::Pin<Box<dyn futures::Stream<Item = ConnectionState> + Send>>) -> ConnectionState {
    timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("state change within timeout")
        .expect("state stream should not be closed")
}

#[tokio::test]
async fn happy_path_connects_sends_and_echoes() {
    let server = EchoServer::start().await;
    let supervisor = Supervisor::new(SupervisorOptions::builder().url(server.url()).build()).unwrap();
    let mut states = supervisor.on_state_change();
    let mut inbound = supervisor.on_receive();

    supervisor.connect().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Connected);

    assert!(supervisor.send(WsMessage::Text("hi".to_owned())).await);

    let received = timeout(Duration::from_secs(2), inbound.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, WsMessage::Text("Echo: hi".to_owned()));
}

#[tokio::test]
async fn server_initiated_close_triggers_automatic_reconnect() {
    let mut server = EchoServer::start().await;
    let backoff = ws_supervisor::ws::Linear::new(Duration::from_millis(500));
    let supervisor = Supervisor::with_backoff(
        SupervisorOptions::builder().url(server.url()).build(),
        Box::new(backoff),
    )
    .unwrap();
    let mut states = supervisor.on_state_change();

    supervisor.connect().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Connected);

    // Simulate a server-initiated close by restarting the listener out from
    // under the live connection: the old accept task's write half errors the
    // next time anything tries to use it, forcing the client's read side to
    // observe a stream error/completion.
    server.stop();

    assert_eq!(next_state(&mut states).await, ConnectionState::Disconnected);

    // Give the aborted accept task a moment to release the socket before
    // rebinding the same address.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.restart().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Connected);
}

#[tokio::test]
async fn send_while_disconnected_buffers_until_the_server_comes_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener); // free the port but keep the address for the server to bind later

    let supervisor = Supervisor::with_backoff(
        SupervisorOptions::builder()
            .url(format!("ws://{addr}"))
            .build(),
        Box::new(ws_supervisor::ws::Linear::new(Duration::from_millis(200))),
    )
    .unwrap();

    supervisor.connect().await;
    let send_future = supervisor.send(WsMessage::Text("queued".to_owned()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let new_listener = TcpListener::bind(addr).await.unwrap();
    let _server = EchoServer::serve(new_listener, addr);

    assert!(send_future.await);
}

#[tokio::test]
async fn send_before_any_connect_times_out_after_five_seconds() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let supervisor = Supervisor::new(
        SupervisorOptions::builder()
            .url(format!("ws://{addr}"))
            .build(),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    assert!(!supervisor.send(WsMessage::Text("x".to_owned())).await);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn heartbeat_timeout_produces_exactly_one_disconnected() {
    let addr = start_silent_server().await;
    let heartbeat = HeartbeatConfig::builder()
        .request(WsMessage::Text("ping".to_owned()))
        .interval(Duration::from_secs(1))
        .timeout(Duration::from_millis(500))
        .build();
    let supervisor = Supervisor::with_backoff(
        SupervisorOptions::builder()
            .url(format!("ws://{addr}"))
            .heartbeat(heartbeat)
            .build(),
        Box::new(ws_supervisor::ws::Linear::new(Duration::from_secs(30))),
    )
    .unwrap();
    let mut states = supervisor.on_state_change();

    supervisor.connect().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Connected);
    assert_eq!(next_state(&mut states).await, ConnectionState::Disconnected);

    // No second Disconnected should follow within the observation window.
    let extra = timeout(Duration::from_millis(800), states.next()).await;
    if let Ok(Some(state)) = extra {
        assert_ne!(state, ConnectionState::Disconnected);
    }
}

#[tokio::test]
async fn heartbeat_response_is_intercepted_and_not_forwarded() {
    let server = heartbeat_echo_server("pong").await;
    let heartbeat = HeartbeatConfig::builder()
        .request(WsMessage::Text("ping".to_owned()))
        .interval(Duration::from_millis(300))
        .timeout(Duration::from_millis(250))
        .validator(Arc::new(|message: &WsMessage| {
            message.as_text() == Some("pong")
        }))
        .intercept_response(true)
        .build();
    let supervisor = Supervisor::new(
        SupervisorOptions::builder().url(server).heartbeat(heartbeat).build(),
    )
    .unwrap();
    let mut states = supervisor.on_state_change();
    let mut inbound = supervisor.on_receive();

    supervisor.connect().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Connected);

    let saw_pong = timeout(Duration::from_millis(1500), inbound.next())
        .await
        .ok()
        .flatten();
    assert_ne!(saw_pong, Some(WsMessage::Text("pong".to_owned())));
    assert_eq!(supervisor.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn heartbeat_response_is_forwarded_when_not_intercepted() {
    let server = heartbeat_echo_server("pong").await;
    let heartbeat = HeartbeatConfig::builder()
        .request(WsMessage::Text("ping".to_owned()))
        .interval(Duration::from_millis(300))
        .timeout(Duration::from_millis(250))
        .validator(Arc::new(|message: &WsMessage| {
            message.as_text() == Some("pong")
        }))
        .intercept_response(false)
        .build();
    let supervisor = Supervisor::new(
        SupervisorOptions::builder().url(server).heartbeat(heartbeat).build(),
    )
    .unwrap();
    let mut states = supervisor.on_state_change();
    let mut inbound = supervisor.on_receive();

    supervisor.connect().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Connected);

    let saw_pong = timeout(Duration::from_millis(1500), inbound.next())
        .await
        .ok()
        .flatten();
    assert_eq!(saw_pong, Some(WsMessage::Text("pong".to_owned())));
}

/// Starts a server that, on receiving any text message, replies with
/// `response` verbatim (used to drive keep-alive / validator heartbeat
/// scenarios without an echo prefix).
async fn heartbeat_echo_server(response: &'static str) -> String {
    use futures::SinkExt as _;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await {
                tokio::spawn(async move {
                    let (mut write, mut read) = ws_stream.split();
                    while let Some(Ok(Message::Text(_))) = read.next().await {
                        if write.send(Message::Text(response.into())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        }
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn disconnect_is_terminal_and_dispose_stops_emissions() {
    let server = EchoServer::start().await;
    let supervisor = Supervisor::new(SupervisorOptions::builder().url(server.url()).build()).unwrap();
    let mut states = supervisor.on_state_change();

    supervisor.connect().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next_state(&mut states).await, ConnectionState::Connected);

    supervisor.disconnect().await;
    assert_eq!(next_state(&mut states).await, ConnectionState::Disconnected);
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    // No reconnect should follow a user-initiated disconnect.
    let extra = timeout(Duration::from_millis(500), states.next()).await;
    assert!(extra.is_err(), "disconnect() must suppress reconnection");

    supervisor.dispose().await;
    assert!(!supervisor.send(WsMessage::Text("after dispose".to_owned())).await);

    // dispose() twice must not panic or hang.
    supervisor.dispose().await;
}
