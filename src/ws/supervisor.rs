//! The Connection Supervisor: owns state, lifecycle, reconnection, message
//! routing, and send-with-wait.
//!
//! Implemented as a single actor task driven by one `tokio::select!` loop —
//! the idiomatic encoding of the single-threaded cooperative scheduling model
//! the rest of this crate assumes. [`Supervisor`] is a cheap, cloneable
//! handle that talks to the actor over channels; all mutable state lives
//! inside the actor and is never touched from any other task.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt as _};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, Sleep};

use super::backoff::{Backoff, Linear};
use super::config::SupervisorOptions;
use super::engine::{
    BoxMessageStream, ConnectOptions, Engine, EngineFactory, TungsteniteEngineFactory, WsMessage,
};
use super::error::WsError;
use super::state::ConnectionState;
use crate::log;

const BROADCAST_CAPACITY: usize = 256;
const SEND_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const ENGINE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type ConnectOutcome = Result<(Arc<dyn Engine>, BoxMessageStream), WsError>;

enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Dispose(oneshot::Sender<()>),
    Send(WsMessage, oneshot::Sender<bool>),
}

/// A resilient, stream-oriented handle to one WebSocket connection.
///
/// Cloning shares the same underlying actor and state; every clone observes
/// the same connection. Cheap to clone — the heavy state lives in the
/// spawned actor task, not in this handle.
#[derive(Clone)]
pub struct Supervisor {
    command_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    state_broadcast: Arc<Mutex<Option<broadcast::Sender<ConnectionState>>>>,
    inbound_broadcast: Arc<Mutex<Option<broadcast::Sender<WsMessage>>>>,
}

impl Supervisor {
    /// Create a Supervisor using the default linear backoff and the shipped
    /// `tokio-tungstenite`-backed engine.
    pub fn new(options: SupervisorOptions) -> crate::Result<Self> {
        Self::with_backoff(options, Box::new(Linear::default()))
    }

    /// Create a Supervisor with a custom [`Backoff`] strategy.
    pub fn with_backoff(options: SupervisorOptions, backoff: Box<dyn Backoff>) -> crate::Result<Self> {
        Self::with_engine_factory(options, backoff, Arc::new(TungsteniteEngineFactory))
    }

    /// Create a Supervisor with a custom [`Backoff`] and [`EngineFactory`].
    /// The seam tests and non-WebSocket transports use.
    pub fn with_engine_factory(
        options: SupervisorOptions,
        backoff: Box<dyn Backoff>,
        engine_factory: Arc<dyn EngineFactory>,
    ) -> crate::Result<Self> {
        if options.url.is_empty() {
            return Err(crate::Error::validation("Supervisor url must not be empty"));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let state_broadcast = Arc::new(Mutex::new(Some(broadcast::channel(BROADCAST_CAPACITY).0)));
        let inbound_broadcast = Arc::new(Mutex::new(Some(broadcast::channel(BROADCAST_CAPACITY).0)));

        let actor = Actor {
            options,
            engine_factory,
            backoff,
            state_tx,
            state_broadcast: Arc::clone(&state_broadcast),
            inbound_broadcast: Arc::clone(&inbound_broadcast),
            command_rx,
            engine: None,
            message_stream: None,
            connect_result_rx: None,
            expected_disconnect: false,
            reconnecting: false,
            attempt: 0,
            reconnect_timer: None,
            heartbeat_tick_timer: None,
            heartbeat_timeout_timer: None,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            command_tx,
            state_rx,
            state_broadcast,
            inbound_broadcast,
        })
    }

    /// Synchronous read of the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Broadcast stream of state transitions. Late subscribers receive only
    /// future transitions, never history.
    pub fn on_state_change(&self) -> Pin<Box<dyn Stream<Item = ConnectionState> + Send>> {
        let receiver = self
            .state_broadcast
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe);
        Box::pin(stream! {
            let Some(mut receiver) = receiver else { return; };
            loop {
                match receiver.recv().await {
                    Ok(state) => yield state,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Broadcast stream of inbound messages, after heartbeat filtering.
    pub fn on_receive(&self) -> Pin<Box<dyn Stream<Item = WsMessage> + Send>> {
        let receiver = self
            .inbound_broadcast
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe);
        Box::pin(stream! {
            let Some(mut receiver) = receiver else { return; };
            loop {
                match receiver.recv().await {
                    Ok(message) => yield message,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Begin a handshake if not already `Connecting`/`Connected`. Resolves
    /// once the actor has accepted the request, not once the handshake
    /// itself completes — `state()`/`on_state_change` report the outcome.
    pub async fn connect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(Command::Connect(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Force a terminal `Disconnected`, suppressing any further reconnect
    /// attempts. Resolves once the engine (if any) has been closed.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(Command::Disconnect(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Terminal teardown: disconnects, then closes both broadcast streams.
    /// Idempotent; safe to call more than once.
    pub async fn dispose(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(Command::Dispose(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Send one message, waiting up to 5 seconds for a connection if one
    /// isn't currently live. Returns `false` on any failure: not connected
    /// within the window, engine rejection, or the Supervisor is disposed.
    pub async fn send(&self, message: WsMessage) -> bool {
        if self
            .state_broadcast
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_none()
        {
            return false;
        }

        let mut state_rx = self.state_rx.clone();
        if !state_rx.borrow().is_connected() {
            let wait_for_connected = async {
                loop {
                    if state_rx.changed().await.is_err() {
                        return false;
                    }
                    if state_rx.borrow().is_connected() {
                        return true;
                    }
                }
            };
            match tokio::time::timeout(SEND_WAIT_TIMEOUT, wait_for_connected).await {
                Ok(true) => {}
                _ => return false,
            }
        }

        self.send_via_actor(message).await
    }

    async fn send_via_actor(&self, message: WsMessage) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.command_tx.send(Command::Send(message, reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }
}

struct Actor {
    options: SupervisorOptions,
    engine_factory: Arc<dyn EngineFactory>,
    backoff: Box<dyn Backoff>,
    state_tx: watch::Sender<ConnectionState>,
    state_broadcast: Arc<Mutex<Option<broadcast::Sender<ConnectionState>>>>,
    inbound_broadcast: Arc<Mutex<Option<broadcast::Sender<WsMessage>>>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    engine: Option<Arc<dyn Engine>>,
    message_stream: Option<BoxMessageStream>,
    connect_result_rx: Option<oneshot::Receiver<ConnectOutcome>>,
    expected_disconnect: bool,
    reconnecting: bool,
    attempt: u32,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat_tick_timer: Option<Interval>,
    heartbeat_timeout_timer: Option<Pin<Box<Sleep>>>,
}

async fn sleep_until_armed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

async fn tick_armed(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_from_stream(
    stream: &mut Option<BoxMessageStream>,
) -> Option<Result<WsMessage, WsError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn recv_connect_result(
    rx: &mut Option<oneshot::Receiver<ConnectOutcome>>,
) -> Result<ConnectOutcome, oneshot::error::RecvError> {
    match rx {
        Some(receiver) => receiver.await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::Connect(ack)) => {
                            self.do_connect();
                            let _ = ack.send(());
                        }
                        Some(Command::Disconnect(ack)) => {
                            self.do_disconnect().await;
                            let _ = ack.send(());
                        }
                        Some(Command::Dispose(ack)) => {
                            self.do_dispose().await;
                            let _ = ack.send(());
                            break;
                        }
                        Some(Command::Send(message, reply)) => {
                            let ok = self.try_send(message);
                            let _ = reply.send(ok);
                        }
                        None => break,
                    }
                }
                result = recv_connect_result(&mut self.connect_result_rx) => {
                    self.connect_result_rx = None;
                    self.handle_connect_result(result);
                }
                () = sleep_until_armed(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    if self.expected_disconnect {
                        self.reconnecting = false;
                    } else {
                        self.do_connect();
                    }
                }
                () = tick_armed(&mut self.heartbeat_tick_timer) => {
                    self.handle_heartbeat_tick();
                }
                () = sleep_until_armed(&mut self.heartbeat_timeout_timer) => {
                    self.heartbeat_timeout_timer = None;
                    log::emit("heartbeat timed out waiting for a response");
                    self.disconnect_handler();
                }
                item = next_from_stream(&mut self.message_stream) => {
                    match item {
                        Some(Ok(message)) => self.handle_inbound(message),
                        Some(Err(e)) => {
                            log::emit(format!("engine stream error: {e}"));
                            self.message_stream = None;
                            self.disconnect_handler();
                        }
                        None => {
                            log::emit("engine stream completed");
                            self.message_stream = None;
                            self.disconnect_handler();
                        }
                    }
                }
            }
        }
    }

    fn build_connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            url: self.options.url.clone(),
            headers: self.options.headers.clone(),
            ping_interval: self.options.ping_interval,
            transport_config: self.options.transport_config,
        }
    }

    fn do_connect(&mut self) {
        if matches!(
            *self.state_tx.borrow(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return;
        }

        self.expected_disconnect = false;
        self.reconnecting = false;
        self.set_state(ConnectionState::Connecting);

        let factory = Arc::clone(&self.engine_factory);
        let connect_options = self.build_connect_options();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = factory.connect(&connect_options).await;
            // If nothing is listening any more (this attempt was superseded
            // by a later connect() or the Supervisor was disposed while the
            // handshake was in flight), the receiver is already gone, so
            // close the engine ourselves rather than leak it.
            if let Err(Ok((engine, _stream))) = tx.send(result) {
                log::emit("connect: closing a handshake result superseded before it was claimed");
                tokio::spawn(async move {
                    let _ = engine.close(None, None).await;
                });
            }
        });
        self.connect_result_rx = Some(rx);
    }

    fn handle_connect_result(
        &mut self,
        result: Result<ConnectOutcome, oneshot::error::RecvError>,
    ) {
        match result {
            Ok(Ok((engine, stream))) => {
                if self.expected_disconnect {
                    tokio::spawn(async move {
                        let _ = engine.close(None, None).await;
                    });
                    if !matches!(*self.state_tx.borrow(), ConnectionState::Disconnected) {
                        self.set_state(ConnectionState::Disconnected);
                    }
                } else {
                    self.engine = Some(engine);
                    self.message_stream = Some(stream);
                    self.attempt = 0;
                    self.backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    self.arm_heartbeat_tick();
                }
            }
            Ok(Err(ws_error)) => {
                log::emit(format!("connect: handshake failed: {ws_error}"));
                self.reconnecting = false;
                self.disconnect_handler();
            }
            Err(_recv_error) => {
                log::emit("connect: handshake task ended without a result");
                self.reconnecting = false;
                self.disconnect_handler();
            }
        }
    }

    async fn do_disconnect(&mut self) {
        self.reconnect_timer = None;
        self.expected_disconnect = true;
        self.reconnecting = false;
        self.cancel_heartbeat_timers();

        if !matches!(*self.state_tx.borrow(), ConnectionState::Disconnected) {
            self.set_state(ConnectionState::Disconnected);
        }

        self.message_stream = None;
        if let Some(engine) = self.engine.take() {
            match tokio::time::timeout(ENGINE_CLOSE_TIMEOUT, engine.close(None, None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::emit(format!("disconnect: engine close failed: {e}")),
                Err(_elapsed) => log::emit("disconnect: engine close timed out after 5s"),
            }
        }
    }

    async fn do_dispose(&mut self) {
        self.do_disconnect().await;
        self.state_broadcast
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        self.inbound_broadcast
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }

    /// Invoked on handshake failure, engine stream completion, engine
    /// stream error, or heartbeat timeout.
    fn disconnect_handler(&mut self) {
        self.cancel_heartbeat_timers();
        self.engine = None;
        self.message_stream = None;

        if !matches!(*self.state_tx.borrow(), ConnectionState::Disconnected) {
            self.set_state(ConnectionState::Disconnected);
        }

        if !self.expected_disconnect && !self.reconnecting {
            self.reconnecting = true;
            self.attempt += 1;
            let delay = self.backoff.next(self.attempt);
            log::emit(format!(
                "scheduling reconnect attempt {} in {delay:?}",
                self.attempt
            ));
            self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
        }
    }

    fn cancel_heartbeat_timers(&mut self) {
        self.heartbeat_tick_timer = None;
        self.heartbeat_timeout_timer = None;
    }

    fn arm_heartbeat_tick(&mut self) {
        let Some(heartbeat) = &self.options.heartbeat else {
            return;
        };
        let mut interval =
            tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.heartbeat_tick_timer = Some(interval);
    }

    fn handle_heartbeat_tick(&mut self) {
        let Some(heartbeat) = self.options.heartbeat.clone() else {
            return;
        };
        let Some(engine) = &self.engine else {
            return;
        };

        match engine.send(heartbeat.request.clone()) {
            Ok(()) => {
                self.heartbeat_timeout_timer =
                    Some(Box::pin(tokio::time::sleep(heartbeat.timeout)));
            }
            Err(e) => {
                // The engine's own stream error path drives the disconnect
                // handler; a second call here would double-count it.
                log::emit(format!("heartbeat: send failed: {e}"));
            }
        }
    }

    fn handle_inbound(&mut self, message: WsMessage) {
        let mut is_response = false;
        let mut intercept = false;

        if let Some(heartbeat) = &self.options.heartbeat {
            is_response = match &heartbeat.validator {
                Some(validator) => validator(&message),
                None => true,
            };
            if is_response {
                self.heartbeat_timeout_timer = None;
                intercept = heartbeat.intercept_response;
            }
        }

        if !(is_response && intercept) {
            self.broadcast_inbound(message);
        }
    }

    fn try_send(&self, message: WsMessage) -> bool {
        match (&*self.state_tx.borrow(), &self.engine) {
            (ConnectionState::Connected, Some(engine)) => engine.send(message).is_ok(),
            _ => false,
        }
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        let _ = self.state_tx.send(new_state);
        if let Some(tx) = self
            .state_broadcast
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(new_state);
        }
        log::emit(format!("state -> {new_state:?}"));
        #[cfg(feature = "tracing")]
        tracing::debug!(?new_state, "supervisor state transition");
    }

    fn broadcast_inbound(&self, message: WsMessage) {
        if let Some(tx) = self
            .inbound_broadcast
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(message);
        }
    }
}
