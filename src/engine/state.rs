//! Engine state machine.
//!
//! Owned by the engine actor and mutated only there. Every method is
//! synchronous; transport tasks are started by the actor when
//! [`EngineState::take_connect_request`] yields a request, and the
//! resulting handle is attached back.
//!
//! # Upgrade Sequence
//!
//! ```text
//! polling GET ──► open {upgrades:["websocket"]}
//!                   │ probing = true, writes go to post_wait
//!                   ▼
//! websocket ──► 2probe ──► 3probe ──► 5
//!                   │ websocket = true, polling = false
//!                   ▼
//!         post_wait flushed FIFO, polling closed
//! ```
//!
//! A failed or timed-out probe flushes `post_wait` back onto polling and
//! disables probing until the next `open`.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::frame::CloseCode;
use crate::identifiers::{AckId, SessionId};
use crate::protocol::{
    EnginePacket, EnginePacketType, Handshake, PacketData, ProtocolVersion, SocketPacket,
    SocketPacketType,
};
use crate::protocol::packet::PROBE;
use crate::transport::{
    Endpoints, PollingHandle, TransportEvent, TransportEventKind, TransportKind, WebSocketHandle,
};

use super::options::EngineOptions;

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Engine lifecycle.
///
/// `NotConnected → Connecting → Connected → {Reconnecting → Connecting | Closed}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Never opened.
    #[default]
    NotConnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake completed.
    Connected,
    /// Closed and about to reopen.
    Reconnecting,
    /// Closed.
    Closed,
}

// ============================================================================
// EngineSnapshot
// ============================================================================

/// Point-in-time copy of the engine flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// Lifecycle status.
    pub status: ConnectionStatus,
    /// Session id from the last handshake.
    pub sid: Option<SessionId>,
    /// `close` ran and no `open` followed.
    pub closed: bool,
    /// Handshake completed.
    pub connected: bool,
    /// Polling is the active data path.
    pub polling: bool,
    /// Upgrade probe in progress.
    pub probing: bool,
    /// WebSocket is the active data path.
    pub websocket: bool,
    /// The connection was upgraded through the probe.
    pub fast_upgrade: bool,
    /// Writes held back during the probe.
    pub queued: usize,
}

// ============================================================================
// Dispatch
// ============================================================================

/// Notification for the dispatcher task, delivered in order.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Open(SessionId),
    Message(String),
    Binary(Vec<u8>),
    Ack {
        id: AckId,
        items: Vec<Value>,
        raw: String,
    },
    Error(Error),
    Close(String),
}

// ============================================================================
// ConnectRequest
// ============================================================================

/// Transport the actor should start next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectRequest {
    pub(crate) id: u64,
    pub(crate) transport: TransportKind,
    pub(crate) url: Url,
}

// ============================================================================
// Heartbeat
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatAction {
    Idle,
    SendPing,
    Expired,
}

/// v4: the server pings; the deadline is `interval + timeout` after the
/// last ping. v3: the client pings every `interval` and expects a pong
/// within `timeout`.
#[derive(Debug, Default)]
struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    client_pings: bool,
    deadline: Option<Instant>,
    next_ping: Option<Instant>,
}

impl Heartbeat {
    fn configure(&mut self, handshake: &Handshake, version: ProtocolVersion, now: Instant) {
        self.interval = handshake.ping_interval();
        self.timeout = handshake.ping_timeout();
        self.client_pings = version.client_pings();

        if self.client_pings {
            self.deadline = None;
            self.next_ping = Some(now + self.interval);
        } else {
            self.deadline = Some(now + self.interval + self.timeout);
            self.next_ping = None;
        }
    }

    fn on_ping(&mut self, now: Instant) {
        if !self.client_pings {
            self.deadline = Some(now + self.interval + self.timeout);
        }
    }

    fn on_pong(&mut self) {
        if self.client_pings {
            self.deadline = None;
        }
    }

    fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if self.deadline.is_some_and(|d| now >= d) {
            return HeartbeatAction::Expired;
        }

        if let Some(at) = self.next_ping
            && now >= at
        {
            self.next_ping = Some(now + self.interval);
            if self.deadline.is_none() {
                self.deadline = Some(now + self.timeout);
            }
            return HeartbeatAction::SendPing;
        }

        HeartbeatAction::Idle
    }

    fn next_wake(&self) -> Option<Instant> {
        match (self.deadline, self.next_ping) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn window_ms(&self) -> u64 {
        (self.interval + self.timeout).as_millis() as u64
    }

    fn clear(&mut self) {
        self.deadline = None;
        self.next_ping = None;
    }
}

// ============================================================================
// EngineState
// ============================================================================

/// Transport flags, handles and queues of one engine.
pub(crate) struct EngineState {
    options: Arc<EngineOptions>,
    endpoints: Endpoints,

    closed: bool,
    connected: bool,
    polling: bool,
    probing: bool,
    websocket: bool,
    fast_upgrade: bool,
    probe_disabled: bool,

    status: ConnectionStatus,
    sid: Option<SessionId>,

    polling_transport: Option<PollingHandle>,
    ws_transport: Option<WebSocketHandle>,
    next_transport_id: u64,
    connect_request: Option<ConnectRequest>,

    post_wait: VecDeque<EnginePacket>,
    heartbeat: Heartbeat,
    probe_deadline: Option<Instant>,

    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl EngineState {
    pub(crate) fn new(
        options: Arc<EngineOptions>,
        endpoints: Endpoints,
        dispatch_tx: mpsc::UnboundedSender<Dispatch>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            options,
            endpoints,
            closed: false,
            connected: false,
            polling: false,
            probing: false,
            websocket: false,
            fast_upgrade: false,
            probe_disabled: false,
            status: ConnectionStatus::NotConnected,
            sid: None,
            polling_transport: None,
            ws_transport: None,
            next_transport_id: 0,
            connect_request: None,
            post_wait: VecDeque::new(),
            heartbeat: Heartbeat::default(),
            probe_deadline: None,
            dispatch_tx,
            status_tx,
        }
    }

    pub(crate) fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            status: self.status,
            sid: self.sid.clone(),
            closed: self.closed,
            connected: self.connected,
            polling: self.polling,
            probing: self.probing,
            websocket: self.websocket,
            fast_upgrade: self.fast_upgrade,
            queued: self.post_wait.len(),
        }
    }

    /// Earliest timer the actor must wake for.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        match (self.probe_deadline, self.heartbeat.next_wake()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn take_connect_request(&mut self) -> Option<ConnectRequest> {
        self.connect_request.take()
    }

    fn request_connect(&mut self, transport: TransportKind, url: Url) {
        self.next_transport_id += 1;
        self.connect_request = Some(ConnectRequest {
            id: self.next_transport_id,
            transport,
            url,
        });
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }

    fn dispatch(&self, dispatch: Dispatch) {
        if self.dispatch_tx.send(dispatch).is_err() {
            trace!("Dispatcher gone, dropping notification");
        }
    }

    fn did_error(&self, error: Error) {
        error!(error = %error, "Engine error");
        self.dispatch(Dispatch::Error(error));
    }
}

// ============================================================================
// EngineState - Open / Close
// ============================================================================

impl EngineState {
    /// Starts a connection. No-op while already connecting or connected.
    pub(crate) fn open(&mut self) {
        if !self.closed
            && matches!(
                self.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            )
        {
            debug!(status = ?self.status, "Engine already open");
            return;
        }

        self.closed = false;
        self.connected = false;
        self.polling = false;
        self.probing = false;
        self.websocket = false;
        self.fast_upgrade = false;
        self.probe_disabled = false;
        self.sid = None;
        self.probe_deadline = None;
        self.heartbeat.clear();
        self.polling_transport = None;
        self.ws_transport = None;

        self.set_status(ConnectionStatus::Connecting);

        if self.options.force_websockets {
            debug!("Opening WebSocket directly");
            self.request_connect(TransportKind::WebSocket, self.endpoints.websocket(None));
        } else {
            debug!("Opening polling");
            self.request_connect(TransportKind::Polling, self.endpoints.polling(None));
        }
    }

    /// Closes the connection and notifies the client once.
    pub(crate) fn close(&mut self, reason: &str) {
        if self.closed {
            trace!(reason, "Engine already closed");
            return;
        }

        info!(reason, sid = ?self.sid, "Engine closing");

        if self.connected {
            self.send_active(EnginePacket::text(EnginePacketType::Close, ""));
        }

        self.closed = true;
        self.connected = false;
        self.polling = false;
        self.probing = false;
        self.websocket = false;
        self.heartbeat.clear();
        self.probe_deadline = None;
        self.connect_request = None;
        self.post_wait.clear();

        if let Some(ws) = self.ws_transport.take() {
            ws.close(CloseCode::Normal, reason);
        }
        if let Some(polling) = self.polling_transport.take() {
            polling.close();
        }

        // An engine that never started has no open to pair the close with.
        let notify = self.status != ConnectionStatus::NotConnected;
        self.set_status(ConnectionStatus::Closed);
        if notify {
            self.dispatch(Dispatch::Close(reason.to_string()));
        }
    }

    /// Closes and opens again.
    pub(crate) fn reconnect(&mut self, reason: &str) {
        self.close(reason);
        self.set_status(ConnectionStatus::Reconnecting);
        self.open();
    }

    pub(crate) fn attach_polling(&mut self, handle: PollingHandle) {
        self.polling_transport = Some(handle);
        self.polling = true;
        self.websocket = false;
    }

    /// Attaches a WebSocket: as the probe target while probing, otherwise
    /// as the direct data path.
    pub(crate) fn attach_websocket(&mut self, handle: WebSocketHandle) {
        self.ws_transport = Some(handle);
        if !self.probing {
            self.websocket = true;
            self.polling = false;
        }
    }
}

// ============================================================================
// EngineState - Writes
// ============================================================================

impl EngineState {
    /// Sends packets on the active transport, or queues them while probing
    /// or before the handshake.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] after `close`.
    pub(crate) fn write(&mut self, packets: Vec<EnginePacket>) -> Result<(), Error> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        if self.probing || !self.connected {
            trace!(count = packets.len(), "Queueing write");
            self.post_wait.extend(packets);
            return Ok(());
        }

        for packet in packets {
            if !self.send_active(packet) {
                return Err(Error::ConnectionClosed);
            }
        }
        Ok(())
    }

    fn send_active(&self, packet: EnginePacket) -> bool {
        if self.websocket {
            self.ws_transport.as_ref().is_some_and(|ws| ws.send(packet))
        } else if self.polling {
            self.polling_transport
                .as_ref()
                .is_some_and(|polling| polling.send(packet))
        } else {
            false
        }
    }

    fn flush_post_wait(&mut self) {
        while let Some(packet) = self.post_wait.pop_front() {
            if !self.send_active(packet) {
                warn!(dropped = self.post_wait.len() + 1, "Active transport gone, dropping queued writes");
                self.post_wait.clear();
                return;
            }
        }
    }

    fn flush_waiting_for_post_to_websocket(&mut self) {
        let Some(ws) = &self.ws_transport else {
            return;
        };
        let count = self.post_wait.len();
        for packet in self.post_wait.drain(..) {
            ws.send(packet);
        }
        if count > 0 {
            debug!(count, "Flushed queued writes to WebSocket");
        }
    }
}

// ============================================================================
// EngineState - Transport Events
// ============================================================================

impl EngineState {
    pub(crate) fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        if self.closed {
            trace!(id = event.id, "Discarding event after close");
            return;
        }

        let current = match event.transport {
            TransportKind::Polling => self.polling_transport.as_ref().map(PollingHandle::id),
            TransportKind::WebSocket => self.ws_transport.as_ref().map(WebSocketHandle::id),
        };
        if current != Some(event.id) {
            trace!(id = event.id, transport = ?event.transport, "Discarding stale event");
            return;
        }

        match event.kind {
            TransportEventKind::Connected => {
                if event.transport == TransportKind::WebSocket && self.probing {
                    debug!("Sending upgrade probe");
                    if let Some(ws) = &self.ws_transport {
                        ws.send(EnginePacket::text(EnginePacketType::Ping, PROBE));
                    }
                }
            }
            TransportEventKind::Packets(packets) => {
                for packet in packets {
                    self.parse_engine_packet(packet, event.transport, now);
                    if self.closed {
                        break;
                    }
                }
            }
            TransportEventKind::Closed { code, reason } => {
                debug!(?code, %reason, transport = ?event.transport, "Transport closed");
                self.on_transport_down(event.transport, None, &reason);
            }
            TransportEventKind::Error(error) => {
                let reason = error.to_string();
                self.on_transport_down(event.transport, Some(error), &reason);
            }
        }
    }

    fn on_transport_down(&mut self, transport: TransportKind, error: Option<Error>, reason: &str) {
        if transport == TransportKind::WebSocket && self.probing {
            match error {
                Some(error) if error.is_trust_error() => {
                    self.did_error(error);
                    self.close(reason);
                }
                _ => self.probe_failed(reason),
            }
            return;
        }

        let active = match transport {
            TransportKind::Polling => self.polling,
            TransportKind::WebSocket => self.websocket,
        };

        if !active {
            debug!(?transport, reason, "Inactive transport ended");
            match transport {
                TransportKind::Polling => self.polling_transport = None,
                TransportKind::WebSocket => self.ws_transport = None,
            }
            return;
        }

        if let Some(error) = error {
            self.did_error(error);
        }
        self.close(reason);
    }

    /// Classifies one inbound packet.
    fn parse_engine_packet(&mut self, packet: EnginePacket, transport: TransportKind, now: Instant) {
        trace!(packet_type = ?packet.packet_type, ?transport, "Packet received");

        match packet.packet_type {
            EnginePacketType::Open => self.handle_open(packet.text_data(), transport, now),

            EnginePacketType::Close => {
                if transport == TransportKind::WebSocket && self.probing {
                    self.probe_failed("server closed probe socket");
                } else {
                    self.close("server closed connection");
                }
            }

            EnginePacketType::Ping => {
                self.heartbeat.on_ping(now);
                let pong = EnginePacket::text(EnginePacketType::Pong, packet.text_data());
                if transport == TransportKind::WebSocket && self.probing {
                    if let Some(ws) = &self.ws_transport {
                        ws.send(pong);
                    }
                } else {
                    self.send_active(pong);
                }
            }

            EnginePacketType::Pong => {
                if packet.is_probe(EnginePacketType::Pong) {
                    if transport == TransportKind::WebSocket && self.probing {
                        self.do_fast_upgrade();
                    }
                } else {
                    self.heartbeat.on_pong();
                }
            }

            EnginePacketType::Message => match packet.data {
                PacketData::Text(text) => self.parse_engine_message(text),
                PacketData::Binary(data) => self.dispatch(Dispatch::Binary(data)),
            },

            EnginePacketType::Upgrade | EnginePacketType::Noop => {}
        }
    }

    fn handle_open(&mut self, body: &str, transport: TransportKind, now: Instant) {
        let handshake = match Handshake::parse(body) {
            Ok(handshake) => handshake,
            Err(e) => {
                self.did_error(e);
                self.close("invalid handshake");
                return;
            }
        };

        info!(
            sid = %handshake.sid,
            upgrades = ?handshake.upgrades,
            ping_interval = handshake.ping_interval,
            "Engine opened"
        );

        self.sid = Some(handshake.sid.clone());
        self.heartbeat.configure(&handshake, self.options.protocol, now);
        self.connected = true;
        self.set_status(ConnectionStatus::Connected);
        self.dispatch(Dispatch::Open(handshake.sid.clone()));

        let probe = transport == TransportKind::Polling
            && handshake.can_upgrade()
            && !self.options.force_polling
            && !self.probe_disabled;

        if probe {
            debug!("Server offers WebSocket, probing");
            self.probing = true;
            self.probe_deadline = Some(now + self.options.probe_timeout);
            let url = self.endpoints.websocket(Some(&handshake.sid));
            self.request_connect(TransportKind::WebSocket, url);
        } else {
            self.flush_post_wait();
        }
    }

    /// Routes a Socket.IO message: acks to the registry, everything else to
    /// the client.
    fn parse_engine_message(&mut self, text: String) {
        match SocketPacket::parse(&text) {
            Ok(
                packet @ SocketPacket {
                    packet_type: SocketPacketType::Ack,
                    id: Some(id),
                    ..
                },
            ) => {
                self.dispatch(Dispatch::Ack {
                    id,
                    items: packet.items(),
                    raw: text,
                });
            }
            _ => self.dispatch(Dispatch::Message(text)),
        }
    }

    fn do_fast_upgrade(&mut self) {
        debug!("Probe answered, upgrading to WebSocket");

        if let Some(ws) = &self.ws_transport {
            ws.send(EnginePacket::text(EnginePacketType::Upgrade, ""));
        }

        self.fast_upgrade = true;
        self.websocket = true;
        self.polling = false;
        self.probing = false;
        self.probe_deadline = None;

        self.flush_waiting_for_post_to_websocket();

        if let Some(polling) = self.polling_transport.take() {
            polling.close();
        }
    }

    fn probe_failed(&mut self, reason: &str) {
        warn!(reason, "Upgrade probe failed, staying on polling");

        if let Some(ws) = self.ws_transport.take() {
            ws.close(CloseCode::Normal, "probe failed");
        }

        self.probing = false;
        self.probe_deadline = None;
        self.probe_disabled = true;
        self.flush_post_wait();
    }
}

// ============================================================================
// EngineState - Timers
// ============================================================================

impl EngineState {
    pub(crate) fn on_tick(&mut self, now: Instant) {
        if self.probe_deadline.is_some_and(|d| now >= d) {
            self.probe_failed("probe timed out");
        }

        if self.closed {
            return;
        }

        match self.heartbeat.poll(now) {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendPing => {
                trace!("Sending heartbeat ping");
                self.send_active(EnginePacket::text(EnginePacketType::Ping, ""));
            }
            HeartbeatAction::Expired => {
                let window = self.heartbeat.window_ms();
                self.did_error(Error::timeout("heartbeat", window));
                self.close("ping timeout");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
