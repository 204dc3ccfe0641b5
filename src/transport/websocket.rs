//! WebSocket transport.
//!
//! Opens TCP (plus TLS for `wss` through a [`TlsConnector`]), checks
//! certificate pins, performs the HTTP upgrade, then runs a single task
//! that owns the [`FrameCodec`] and both stream halves.
//!
//! # Event Loop
//!
//! The task handles:
//!
//! - Incoming frames: decoded to Engine.IO packets and batched per read
//! - Outgoing packets from the engine
//! - Ping frames (answered with pong) and close frames (echoed)
//! - Framing errors: close frame with the matching code, then an error event

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::frame::{CloseCode, CodecConfig, FrameCodec, Message, OpCode};
use crate::protocol::{EnginePacket, ProtocolVersion};
use crate::security::CertificateValidator;

use super::{BoxedStream, EventSender, EventSink, TlsConnector, TransportEventKind, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for TCP, TLS and the HTTP upgrade together.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Upper bound on the upgrade response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Socket read size.
const READ_CHUNK: usize = 16 * 1024;

// ============================================================================
// WebSocketConfig
// ============================================================================

/// Connection settings for the WebSocket transport.
#[derive(Clone)]
pub struct WebSocketConfig {
    /// Protocol revision.
    pub version: ProtocolVersion,
    /// Frame limits.
    pub codec: CodecConfig,
    /// Headers added to the upgrade request.
    pub extra_headers: Vec<(String, String)>,
    /// `Cookie` header value.
    pub cookies: Option<String>,
    /// Limit on connecting and upgrading.
    pub connect_timeout: Duration,
    /// TLS connector, required for `wss`.
    pub tls: Option<Arc<dyn TlsConnector>>,
    /// Pin validator applied to the TLS session.
    pub validator: Option<Arc<CertificateValidator>>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::default(),
            codec: CodecConfig::default(),
            extra_headers: Vec::new(),
            cookies: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: None,
            validator: None,
        }
    }
}

impl fmt::Debug for WebSocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConfig")
            .field("version", &self.version)
            .field("codec", &self.codec)
            .field("extra_headers", &self.extra_headers)
            .field("cookies", &self.cookies.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls.is_some())
            .field("validator", &self.validator)
            .finish()
    }
}

// ============================================================================
// WebSocketHandle
// ============================================================================

/// Commands from the engine to the connection task.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WsCommand {
    /// Send one packet.
    Send(EnginePacket),
    /// Send a close frame and stop.
    Close(CloseCode, String),
}

/// Engine-side handle to a WebSocket connection task.
///
/// Dropping the handle closes the connection with [`CloseCode::Normal`].
#[derive(Debug)]
pub struct WebSocketHandle {
    id: u64,
    commands: mpsc::UnboundedSender<WsCommand>,
}

impl WebSocketHandle {
    /// Spawns a connection task for `url`.
    pub(crate) fn open(id: u64, url: Url, config: WebSocketConfig, events: EventSender) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(id, TransportKind::WebSocket, events);

        tokio::spawn(run(url, config, commands_rx, sink));

        Self { id, commands }
    }

    /// Handle whose commands land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(id: u64) -> (Self, mpsc::UnboundedReceiver<WsCommand>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        (Self { id, commands }, commands_rx)
    }

    /// Instance id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sends a packet. Returns `false` if the connection task has ended.
    pub fn send(&self, packet: EnginePacket) -> bool {
        self.commands.send(WsCommand::Send(packet)).is_ok()
    }

    /// Closes the connection with `code`.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        let _ = self.commands.send(WsCommand::Close(code, reason.into()));
    }
}

// ============================================================================
// Connection Task
// ============================================================================

async fn run(
    url: Url,
    config: WebSocketConfig,
    mut commands: mpsc::UnboundedReceiver<WsCommand>,
    sink: EventSink,
) {
    let connect_timeout = config.connect_timeout;

    // Packets queued while connecting are sent right after the upgrade.
    let mut early = Vec::new();

    let (stream, leftover) = {
        let connect = timeout(connect_timeout, establish(&url, &config));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(Ok(established)) => break established,
                    Ok(Err(e)) => {
                        debug!(error = %e, %url, "WebSocket connect failed");
                        sink.error(e);
                        return;
                    }
                    Err(_) => {
                        sink.error(Error::timeout(
                            "websocket connect",
                            connect_timeout.as_millis() as u64,
                        ));
                        return;
                    }
                },

                command = commands.recv() => match command {
                    Some(WsCommand::Send(packet)) => early.push(packet),
                    Some(WsCommand::Close(..)) | None => {
                        debug!("WebSocket closed before upgrade completed");
                        return;
                    }
                },
            }
        }
    };

    debug!(%url, "WebSocket connected");
    if !sink.emit(TransportEventKind::Connected) {
        return;
    }

    let (reader, writer) = tokio::io::split(stream);
    let mut connection = Connection {
        reader,
        writer,
        codec: FrameCodec::new(config.codec),
        version: config.version,
        sink,
    };

    connection.run(commands, early, leftover).await;

    debug!("WebSocket task terminated");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Connection {
    reader: ReadHalf<BoxedStream>,
    writer: WriteHalf<BoxedStream>,
    codec: FrameCodec,
    version: ProtocolVersion,
    sink: EventSink,
}

impl Connection {
    async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<WsCommand>,
        early: Vec<EnginePacket>,
        leftover: Vec<u8>,
    ) {
        for packet in early {
            if self.send_packet(packet).await == Flow::Stop {
                return;
            }
        }

        if !leftover.is_empty() && self.on_bytes(&leftover).await == Flow::Stop {
            return;
        }

        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                read = self.reader.read(&mut buf) => {
                    let flow = match read {
                        Ok(0) => {
                            debug!("WebSocket stream ended");
                            self.sink.closed(None, "stream ended");
                            Flow::Stop
                        }
                        Ok(n) => self.on_bytes(&buf[..n]).await,
                        Err(e) => {
                            warn!(error = %e, "WebSocket read failed");
                            self.sink.error(e.into());
                            Flow::Stop
                        }
                    };
                    if flow == Flow::Stop {
                        break;
                    }
                }

                command = commands.recv() => match command {
                    Some(WsCommand::Send(packet)) => {
                        if self.send_packet(packet).await == Flow::Stop {
                            break;
                        }
                    }
                    Some(WsCommand::Close(code, reason)) => {
                        debug!(?code, %reason, "Closing WebSocket");
                        self.write_close(code, &reason).await;
                        break;
                    }
                    None => {
                        self.write_close(CloseCode::Normal, "").await;
                        break;
                    }
                },
            }
        }
    }

    async fn on_bytes(&mut self, bytes: &[u8]) -> Flow {
        match self.codec.decode(bytes) {
            Ok(messages) => self.on_messages(messages).await,
            Err(err) => {
                let salvaged = self.codec.drain_ready();
                if self.on_messages(salvaged).await == Flow::Stop {
                    return Flow::Stop;
                }

                let code = err.close_code().unwrap_or(CloseCode::ProtocolError);
                warn!(error = %err, ?code, "Framing error, closing WebSocket");
                self.write_close(code, &err.to_string()).await;
                self.sink.error(err);
                Flow::Stop
            }
        }
    }

    async fn on_messages(&mut self, messages: Vec<Message>) -> Flow {
        let mut packets = Vec::with_capacity(messages.len());

        for message in messages {
            match message {
                Message::Text(text) => match EnginePacket::decode_text(&text) {
                    Ok(packet) => packets.push(packet),
                    Err(e) => warn!(error = %e, "Dropping malformed text packet"),
                },

                Message::Binary(data) => match EnginePacket::decode_ws_binary(data, self.version) {
                    Ok(packet) => packets.push(packet),
                    Err(e) => warn!(error = %e, "Dropping malformed binary packet"),
                },

                Message::Ping(data) => {
                    trace!(len = data.len(), "Ping received");
                    if let Err(e) = self.write_frame(&data, OpCode::Pong).await {
                        self.sink.packets(packets);
                        self.sink.error(e);
                        return Flow::Stop;
                    }
                }

                Message::Pong(_) => trace!("Pong received"),

                Message::Close { code, reason } => {
                    debug!(?code, %reason, "WebSocket closed by remote");
                    self.sink.packets(packets);
                    let echo = code
                        .and_then(CloseCode::from_u16)
                        .filter(|c| *c != CloseCode::NoStatusReceived)
                        .unwrap_or(CloseCode::Normal);
                    self.write_close(echo, "").await;
                    self.sink.closed(code, reason);
                    return Flow::Stop;
                }
            }
        }

        if self.sink.packets(packets) {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    async fn send_packet(&mut self, packet: EnginePacket) -> Flow {
        let result = match packet.encode_text() {
            Some(text) => self.write_frame(text.as_bytes(), OpCode::Text).await,
            None => {
                let data = packet.encode_ws_binary(self.version).unwrap_or_default();
                self.write_frame(&data, OpCode::Binary).await
            }
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(error = %e, "WebSocket write failed");
                self.sink.error(e);
                Flow::Stop
            }
        }
    }

    async fn write_frame(&mut self, payload: &[u8], opcode: OpCode) -> Result<()> {
        let bytes = self.codec.encode(payload, opcode, true)?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_close(&mut self, code: CloseCode, reason: &str) {
        if let Ok(bytes) = self.codec.encode_close(code, reason, true) {
            let _ = self.writer.write_all(&bytes).await;
        }
        let _ = self.writer.shutdown().await;
    }
}

// ============================================================================
// Connect and Upgrade
// ============================================================================

/// Connects, wraps in TLS when needed, and upgrades. Returns the stream and
/// any bytes read past the upgrade response.
async fn establish(url: &Url, config: &WebSocketConfig) -> Result<(BoxedStream, Vec<u8>)> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::config(format!("URL has no host: {url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::config(format!("URL has no port: {url}")))?;
    let connect_host = host.trim_start_matches('[').trim_end_matches(']');

    let tcp = TcpStream::connect((connect_host, port)).await?;
    tcp.set_nodelay(true)?;

    let mut stream: BoxedStream = if url.scheme() == "wss" {
        let connector = config
            .tls
            .as_ref()
            .ok_or_else(|| Error::config("wss endpoint requires a TLS connector"))?;
        let (stream, trust) = connector.connect(connect_host, tcp).await?;

        if let Some(validator) = &config.validator {
            validator.validate(&trust, connect_host)?;
            debug!(domain = connect_host, "Pinned certificate accepted");
        }
        stream
    } else {
        Box::new(tcp)
    };

    let (request, key) = build_request(url, config)?;
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let (head, leftover) = read_response_head(&mut stream).await?;
    check_response(&head, &key)?;

    Ok((stream, leftover))
}

/// Renders the upgrade request. Returns the request text and its
/// `Sec-WebSocket-Key`.
fn build_request(url: &Url, config: &WebSocketConfig) -> Result<(String, String)> {
    let mut request = url.as_str().into_client_request()?;

    {
        let headers = request.headers_mut();
        for (name, value) in &config.extra_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("invalid header name {name:?}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid value for header {name:?}: {e}")))?;
            headers.append(header_name, header_value);
        }
        if let Some(cookies) = &config.cookies {
            let value = HeaderValue::from_str(cookies)
                .map_err(|e| Error::config(format!("invalid cookie header: {e}")))?;
            headers.insert(COOKIE, value);
        }
    }

    let key = request
        .headers()
        .get("Sec-WebSocket-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::protocol("upgrade request has no Sec-WebSocket-Key"))?
        .to_string();

    let target = request
        .uri()
        .path_and_query()
        .map_or("/", |p| p.as_str());

    let mut head = format!("GET {target} HTTP/1.1\r\n");
    for (name, value) in request.headers() {
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(&String::from_utf8_lossy(value.as_bytes()));
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    Ok((head, key))
}

async fn read_response_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(String, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let end = end + 4;
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            return Ok((head, buf[end..].to_vec()));
        }

        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(Error::protocol("upgrade response head too large"));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::transport("connection closed during upgrade"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Requires `101` and a matching `Sec-WebSocket-Accept`.
fn check_response(head: &str, key: &str) -> Result<()> {
    let mut lines = head.lines();
    let status = lines.next().unwrap_or_default();

    if status.split_whitespace().nth(1) != Some("101") {
        return Err(Error::transport(format!("upgrade rejected: {status}")));
    }

    let accept = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("sec-websocket-accept"))
        .map(|(_, value)| value.trim());

    let expected = derive_accept_key(key.as_bytes());
    if accept != Some(expected.as_str()) {
        return Err(Error::protocol("Sec-WebSocket-Accept does not match key"));
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
