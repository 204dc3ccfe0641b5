//! Engine actor and its public handle.
//!
//! # Tasks
//!
//! | Task | Owns | Loop |
//! |------|------|------|
//! | engine | [`EngineState`], transport handles | commands, transport events, timers |
//! | dispatcher | [`EngineClient`], ack resolution | notifications in engine order |
//!
//! The [`EngineHandle`] is a cheap clone that talks to the engine task over
//! an mpsc channel and shares the [`AckRegistry`] with the dispatcher.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use socketio_engine::{EngineClient, Error, SocketEngine};
//!
//! struct Printer;
//!
//! impl EngineClient for Printer {
//!     fn engine_did_close(&self, reason: &str) { println!("closed: {reason}"); }
//!     fn engine_did_error(&self, error: &Error) { println!("error: {error}"); }
//!     fn parse_engine_message(&self, message: &str) { println!("{message}"); }
//!     fn parse_engine_binary_data(&self, data: &[u8]) { println!("{} bytes", data.len()); }
//! }
//!
//! # async fn example() -> socketio_engine::Result<()> {
//! let engine = SocketEngine::builder("http://localhost:3000")
//!     .client(Arc::new(Printer))
//!     .build()?;
//!
//! engine.open()?;
//! engine.emit("chat", [serde_json::json!("hello")]).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, trace};

use crate::ack::AckRegistry;
use crate::error::{Error, Result};
use crate::identifiers::AckId;
use crate::protocol::{EnginePacket, EnginePacketType, SocketPacket};
use crate::security::CertificateValidator;
use crate::transport::{
    Endpoints, EventSender, PollingHandle, TransportEvent, TransportKind, WebSocketHandle,
};

use super::builder::EngineBuilder;
use super::client::EngineClient;
use super::options::EngineOptions;
use super::state::{ConnectRequest, ConnectionStatus, Dispatch, EngineSnapshot, EngineState};

// ============================================================================
// EngineCommand
// ============================================================================

/// Requests from handles to the engine task.
enum EngineCommand {
    /// Start a connection.
    Open,
    /// Close the connection.
    Close(String),
    /// Close, then open again.
    Reconnect(String),
    /// Send packets in order.
    Write {
        packets: Vec<EnginePacket>,
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Report the current flags.
    Snapshot(oneshot::Sender<EngineSnapshot>),
    /// Close and stop the engine task.
    Shutdown,
}

// ============================================================================
// EngineHandle
// ============================================================================

/// Handle to a running engine.
///
/// Cloning is cheap; all clones drive the same engine. The engine task
/// stops after [`Self::shutdown`] or when every handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    registry: Arc<AckRegistry>,
    options: Arc<EngineOptions>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

/// Entry point alias: `SocketEngine::builder(url)`.
pub type SocketEngine = EngineHandle;

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &self.status())
            .field("pending_acks", &self.pending_acks())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EngineHandle - Construction
// ============================================================================

impl EngineHandle {
    /// Creates a builder for an engine connecting to `url`.
    #[inline]
    #[must_use]
    pub fn builder(url: impl Into<String>) -> EngineBuilder {
        EngineBuilder::new(url)
    }

    /// Spawns the engine and dispatcher tasks.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the HTTP client cannot be created.
    pub(crate) fn spawn(
        options: EngineOptions,
        endpoints: Endpoints,
        client: Arc<dyn EngineClient>,
    ) -> Result<Self> {
        let options = Arc::new(options);

        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::NotConnected);
        let registry = Arc::new(AckRegistry::new());

        let state = EngineState::new(Arc::clone(&options), endpoints, dispatch_tx, status_tx);
        let factory = TransportFactory {
            http,
            validator: options.validator(),
            options: Arc::clone(&options),
            events_tx,
        };

        tokio::spawn(run_engine(state, factory, command_rx, events_rx));
        tokio::spawn(run_dispatcher(dispatch_rx, client, Arc::clone(&registry)));

        debug!("Engine spawned");

        Ok(Self {
            command_tx,
            registry,
            options,
            status_rx,
        })
    }
}

// ============================================================================
// EngineHandle - Public API
// ============================================================================

impl EngineHandle {
    /// Starts connecting. Returns immediately; progress is reported through
    /// [`EngineClient`] and [`Self::status`].
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the engine task has stopped.
    pub fn open(&self) -> Result<()> {
        self.command(EngineCommand::Open)
    }

    /// Closes the connection. Repeated calls are no-ops.
    ///
    /// An engine that was never opened closes without notifying the client.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the engine task has stopped.
    pub fn close(&self, reason: impl Into<String>) -> Result<()> {
        self.command(EngineCommand::Close(reason.into()))
    }

    /// Closes and immediately opens a new connection.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the engine task has stopped.
    pub fn reconnect(&self, reason: impl Into<String>) -> Result<()> {
        self.command(EngineCommand::Reconnect(reason.into()))
    }

    /// Closes the connection and stops the engine task.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
    }

    /// Writes an Engine.IO packet followed by its binary attachments.
    ///
    /// Packets reach the wire in call order. While an upgrade probe is in
    /// flight, or before the handshake, they are queued.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] after `close` or once the engine task has
    /// stopped.
    pub async fn write(
        &self,
        message: impl Into<String>,
        packet_type: EnginePacketType,
        data: Vec<Vec<u8>>,
    ) -> Result<()> {
        let mut packets = Vec::with_capacity(1 + data.len());
        packets.push(EnginePacket::text(packet_type, message));
        packets.extend(data.into_iter().map(EnginePacket::binary));

        let (result_tx, result_rx) = oneshot::channel();
        self.command(EngineCommand::Write { packets, result_tx })?;
        result_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Emits a Socket.IO event on the configured namespace.
    ///
    /// # Errors
    ///
    /// Same as [`Self::write`].
    pub async fn emit(&self, event: &str, args: impl IntoIterator<Item = Value>) -> Result<()> {
        let packet = SocketPacket::event(self.options.namespace.as_str(), event, args, None);
        self.write(packet.encode(), EnginePacketType::Message, Vec::new())
            .await
    }

    /// Emits an event and registers `callback` for the server's ack, using
    /// the configured ack timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Self::write`]; the callback is dropped on error.
    pub async fn emit_with_ack<F>(
        &self,
        event: &str,
        args: impl IntoIterator<Item = Value>,
        callback: F,
    ) -> Result<AckId>
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        self.emit_with_ack_timeout(event, args, self.options.ack_timeout, callback)
            .await
    }

    /// Like [`Self::emit_with_ack`] with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Self::write`]; the callback is dropped on error.
    pub async fn emit_with_ack_timeout<F>(
        &self,
        event: &str,
        args: impl IntoIterator<Item = Value>,
        timeout: Duration,
        callback: F,
    ) -> Result<AckId>
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        let id = self.registry.next_id();
        self.registry.add_ack(id, callback);

        let packet = SocketPacket::event(self.options.namespace.as_str(), event, args, Some(id));
        if let Err(e) = self
            .write(packet.encode(), EnginePacketType::Message, Vec::new())
            .await
        {
            self.registry.timeout_ack(id);
            return Err(e);
        }

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            sleep(timeout).await;
            if registry.timeout_ack(id) {
                let error = Error::ack_timeout(id, timeout.as_millis() as u64);
                debug!(%error, "Discarded ack callback");
            }
        });

        Ok(id)
    }

    /// Answers a server event that requested ack `id`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::write`].
    pub async fn ack(&self, id: AckId, items: Vec<Value>) -> Result<()> {
        let packet = SocketPacket::ack(self.options.namespace.as_str(), id, items);
        self.write(packet.encode(), EnginePacketType::Message, Vec::new())
            .await
    }

    /// Returns the current lifecycle status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Returns a receiver that observes every status change.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Waits until the status equals `status`.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the engine task stops first.
    pub async fn wait_for_status(&self, status: ConnectionStatus) -> Result<()> {
        let mut rx = self.status_rx.clone();
        rx.wait_for(|current| *current == status)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        Ok(())
    }

    /// Returns the current transport flags.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the engine task has stopped.
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(EngineCommand::Snapshot(tx))?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Returns the number of outstanding ack callbacks.
    #[inline]
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.registry.pending_count()
    }

    /// Returns the engine options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn command(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// TransportFactory
// ============================================================================

/// Starts transport tasks on behalf of the engine.
struct TransportFactory {
    http: Client,
    options: Arc<EngineOptions>,
    validator: Option<Arc<CertificateValidator>>,
    events_tx: EventSender,
}

impl TransportFactory {
    fn start(&self, state: &mut EngineState, request: ConnectRequest) {
        debug!(id = request.id, transport = ?request.transport, url = %request.url, "Starting transport");

        match request.transport {
            TransportKind::Polling => state.attach_polling(PollingHandle::open(
                request.id,
                self.http.clone(),
                request.url,
                self.options.polling_config(),
                self.events_tx.clone(),
            )),
            TransportKind::WebSocket => state.attach_websocket(WebSocketHandle::open(
                request.id,
                request.url,
                self.options.websocket_config(self.validator.clone()),
                self.events_tx.clone(),
            )),
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

async fn run_engine(
    mut state: EngineState,
    factory: TransportFactory,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    loop {
        let wake = state.next_wake();

        tokio::select! {
            command = commands.recv() => match command {
                Some(EngineCommand::Open) => state.open(),
                Some(EngineCommand::Close(reason)) => state.close(&reason),
                Some(EngineCommand::Reconnect(reason)) => state.reconnect(&reason),
                Some(EngineCommand::Write { packets, result_tx }) => {
                    let _ = result_tx.send(state.write(packets));
                }
                Some(EngineCommand::Snapshot(tx)) => {
                    let _ = tx.send(state.snapshot());
                }
                Some(EngineCommand::Shutdown) | None => {
                    state.close("engine shut down");
                    break;
                }
            },

            Some(event) = events.recv() => state.handle_event(event, Instant::now()),

            () = sleep_until_wake(wake) => state.on_tick(Instant::now()),
        }

        if let Some(request) = state.take_connect_request() {
            factory.start(&mut state, request);
        }
    }

    debug!("Engine loop terminated");
}

async fn sleep_until_wake(wake: Option<Instant>) {
    match wake {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run_dispatcher(
    mut dispatch_rx: mpsc::UnboundedReceiver<Dispatch>,
    client: Arc<dyn EngineClient>,
    registry: Arc<AckRegistry>,
) {
    while let Some(dispatch) = dispatch_rx.recv().await {
        match dispatch {
            Dispatch::Open(sid) => client.engine_did_open(&sid),
            Dispatch::Message(message) => client.parse_engine_message(&message),
            Dispatch::Binary(data) => client.parse_engine_binary_data(&data),
            Dispatch::Ack { id, items, raw } => {
                if !registry.execute_ack(id, items) {
                    trace!(%id, "Forwarding unmatched ack to client");
                    client.parse_engine_message(&raw);
                }
            }
            Dispatch::Error(error) => client.engine_did_error(&error),
            Dispatch::Close(reason) => client.engine_did_close(&reason),
        }
    }

    debug!("Dispatcher terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::identifiers::SessionId;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EngineClient for Recorder {
        fn engine_did_open(&self, sid: &SessionId) {
            self.events.lock().push(format!("open:{sid}"));
        }

        fn engine_did_close(&self, reason: &str) {
            self.events.lock().push(format!("close:{reason}"));
        }

        fn engine_did_error(&self, error: &Error) {
            self.events.lock().push(format!("error:{error}"));
        }

        fn parse_engine_message(&self, message: &str) {
            self.events.lock().push(format!("message:{message}"));
        }

        fn parse_engine_binary_data(&self, data: &[u8]) {
            self.events.lock().push(format!("binary:{}", data.len()));
        }
    }

    #[tokio::test]
    async fn test_dispatcher_resolves_acks_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(AckRegistry::new());

        let resolved = Arc::new(Mutex::new(Vec::new()));
        let id = registry.next_id();
        let sink = Arc::clone(&resolved);
        registry.add_ack(id, move |items| sink.lock().extend(items));

        tx.send(Dispatch::Open(SessionId::new("s"))).unwrap();
        tx.send(Dispatch::Ack {
            id,
            items: vec![Value::from(1)],
            raw: format!("3{id}[1]"),
        })
        .unwrap();
        tx.send(Dispatch::Ack {
            id: AckId::new(99),
            items: Vec::new(),
            raw: "399[]".to_string(),
        })
        .unwrap();
        tx.send(Dispatch::Binary(vec![0; 3])).unwrap();
        tx.send(Dispatch::Close("bye".to_string())).unwrap();
        drop(tx);

        let client: Arc<dyn EngineClient> = recorder.clone();
        run_dispatcher(rx, client, Arc::clone(&registry)).await;

        assert_eq!(*resolved.lock(), vec![Value::from(1)]);
        assert_eq!(
            *recorder.events.lock(),
            vec!["open:s", "message:399[]", "binary:3", "close:bye"]
        );
    }

    fn spawn_engine(url: &str) -> (EngineHandle, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let engine = EngineHandle::builder(url)
            .client(recorder.clone())
            .build()
            .unwrap();
        (engine, recorder)
    }

    #[tokio::test]
    async fn test_write_before_open_is_queued() {
        let (engine, _recorder) = spawn_engine("http://127.0.0.1:9");

        engine
            .write("hello", EnginePacketType::Message, vec![b"bin".to_vec()])
            .await
            .unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::NotConnected);
        assert_eq!(snapshot.queued, 2);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_close_then_write_fails_and_drops_ack() {
        let (engine, recorder) = spawn_engine("http://127.0.0.1:9");

        engine.close("bye").unwrap();
        engine.close("again").unwrap();
        engine.wait_for_status(ConnectionStatus::Closed).await.unwrap();

        let result = engine.emit_with_ack("ping", [], |_| {}).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(engine.pending_acks(), 0);

        engine.shutdown();
        tokio::task::yield_now().await;
        let closes = recorder
            .events
            .lock()
            .iter()
            .filter(|e| e.starts_with("close:"))
            .count();
        assert!(closes <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout_discards_callback() {
        let (engine, _recorder) = spawn_engine("http://127.0.0.1:9");

        let id = engine
            .emit_with_ack_timeout("ping", [], Duration::from_secs(1), |_| {
                panic!("callback must not run after timeout");
            })
            .await
            .unwrap();
        assert_eq!(engine.pending_acks(), 1);
        assert_eq!(id, AckId::new(0));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.pending_acks(), 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_engine() {
        let (engine, _recorder) = spawn_engine("http://127.0.0.1:9");
        engine.shutdown();
        engine.wait_for_status(ConnectionStatus::Closed).await.unwrap();

        // Give the engine task a chance to exit.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(engine.open(), Err(Error::ConnectionClosed)));
    }
}
