//! HTTP long-polling transport.
//!
//! # Tasks
//!
//! | Task | Loop |
//! |------|------|
//! | poller | Handshake GET, then one outstanding GET at a time |
//! | poster | Waits for queued packets, batches everything queued, POSTs |
//!
//! Closing sets a stop flag instead of aborting: a GET already in flight
//! runs to completion and its result is dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, RequestBuilder};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::payload::{double_decode_utf8, double_encode_utf8};
use crate::protocol::{
    EnginePacket, EnginePacketType, Handshake, ProtocolVersion, decode_payload, encode_payload,
};

use super::{EventSender, EventSink, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Content type of POST bodies.
const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";

// ============================================================================
// PollingConfig
// ============================================================================

/// Per-request settings for the polling transport.
#[derive(Debug, Clone, Default)]
pub struct PollingConfig {
    /// Protocol revision.
    pub version: ProtocolVersion,
    /// Headers added to every request.
    pub extra_headers: Vec<(String, String)>,
    /// `Cookie` header value.
    pub cookies: Option<String>,
    /// Latin-1 double encoding of bodies (v3 servers only).
    pub double_encode_utf8: bool,
}

// ============================================================================
// PollingHandle
// ============================================================================

/// Engine-side handle to a running polling transport.
///
/// Dropping the handle stops polling; packets already queued are still
/// posted.
#[derive(Debug)]
pub struct PollingHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<EnginePacket>,
    stop: watch::Sender<bool>,
}

impl PollingHandle {
    /// Starts polling `url`.
    ///
    /// If `url` has no `sid` parameter the first GET is the handshake and
    /// the session id is taken from its `open` packet.
    pub(crate) fn open(
        id: u64,
        client: Client,
        url: Url,
        config: PollingConfig,
        events: EventSender,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let sink = EventSink::new(id, TransportKind::Polling, events);
        let http = PollingClient {
            client,
            config: Arc::new(config),
        };

        tokio::spawn(run_poller(http, url, outbound_rx, stop_rx, sink));

        Self { id, outbound, stop }
    }

    /// Handle whose sends land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(id: u64) -> (Self, mpsc::UnboundedReceiver<EnginePacket>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        (Self { id, outbound, stop }, outbound_rx)
    }

    /// Instance id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a packet for the next POST. Returns `false` if the transport
    /// has stopped.
    pub fn send(&self, packet: EnginePacket) -> bool {
        self.outbound.send(packet).is_ok()
    }

    /// Stops polling after the current GET.
    pub fn close(&self) {
        self.stop.send_replace(true);
    }

    /// Returns `true` once [`Self::close`] was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.stop.borrow()
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tasks
// ============================================================================

async fn run_poller(
    http: PollingClient,
    url: Url,
    outbound_rx: mpsc::UnboundedReceiver<EnginePacket>,
    stop_rx: watch::Receiver<bool>,
    sink: EventSink,
) {
    let session_url = if has_sid(&url) {
        url
    } else {
        match handshake(&http, &url).await {
            Ok((sid, packets)) => {
                if *stop_rx.borrow() {
                    trace!("Discarding handshake after close");
                    return;
                }
                if !sink.packets(packets) {
                    return;
                }
                with_sid(&url, &sid)
            }
            Err(e) => {
                warn!(error = %e, "Polling handshake failed");
                sink.error(e);
                return;
            }
        }
    };

    tokio::spawn(run_poster(
        http.clone(),
        session_url.clone(),
        outbound_rx,
        sink.clone(),
    ));

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let result = http.get(&session_url).await;

        if *stop_rx.borrow() {
            trace!("Discarding poll result after close");
            break;
        }

        match result {
            Ok(packets) => {
                let server_closed = packets
                    .iter()
                    .any(|p| p.packet_type == EnginePacketType::Close);
                if !sink.packets(packets) || server_closed {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Poll request failed");
                sink.error(e);
                break;
            }
        }
    }

    debug!("Poller terminated");
}

async fn run_poster(
    http: PollingClient,
    url: Url,
    mut outbound_rx: mpsc::UnboundedReceiver<EnginePacket>,
    sink: EventSink,
) {
    while let Some(first) = outbound_rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = outbound_rx.try_recv() {
            batch.push(next);
        }

        trace!(count = batch.len(), "Posting batch");
        if let Err(e) = http.post(&url, &batch).await {
            debug!(error = %e, "Post request failed");
            sink.error(e);
            break;
        }
    }

    debug!("Poster terminated");
}

/// Performs the handshake GET and returns the session id with all packets
/// of the response.
async fn handshake(http: &PollingClient, url: &Url) -> Result<(SessionId, Vec<EnginePacket>)> {
    let packets = http.get(url).await?;

    let open = packets
        .iter()
        .find(|p| p.packet_type == EnginePacketType::Open)
        .ok_or_else(|| Error::protocol("handshake response has no open packet"))?;
    let handshake = Handshake::parse(open.text_data())?;

    debug!(sid = %handshake.sid, "Polling handshake completed");
    Ok((handshake.sid, packets))
}

// ============================================================================
// PollingClient
// ============================================================================

#[derive(Clone)]
struct PollingClient {
    client: Client,
    config: Arc<PollingConfig>,
}

impl PollingClient {
    async fn get(&self, url: &Url) -> Result<Vec<EnginePacket>> {
        let request = self.decorate(self.client.get(cache_busted(url)));
        let body = request.send().await?.error_for_status()?.text().await?;

        let body = if self.config.double_encode_utf8 {
            double_decode_utf8(&body)
        } else {
            body
        };

        decode_payload(&body, self.config.version)
    }

    async fn post(&self, url: &Url, packets: &[EnginePacket]) -> Result<()> {
        let mut body = encode_payload(packets, self.config.version);
        if self.config.double_encode_utf8 {
            body = double_encode_utf8(&body);
        }

        self.decorate(self.client.post(cache_busted(url)))
            .header(CONTENT_TYPE, TEXT_PLAIN)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn decorate(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.config.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(cookies) = &self.config.cookies {
            request = request.header(COOKIE, cookies.as_str());
        }
        request
    }
}

// ============================================================================
// URL Helpers
// ============================================================================

fn has_sid(url: &Url) -> bool {
    url.query_pairs().any(|(key, _)| key == "sid")
}

fn with_sid(url: &Url, sid: &SessionId) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("sid", sid.as_str());
    url
}

/// Adds a `t` parameter so intermediaries never serve a cached poll.
fn cache_busted(url: &Url) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("t", &format!("{:08x}", rand::random::<u32>()));
    url
}

// ============================================================================
// Tests
// ============================================================================
