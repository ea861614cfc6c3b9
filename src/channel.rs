//! The caller-facing channel: this is where all other parts of the protocol
//! come together. It owns the connection state machine, drives the handshake
//! and close timers, and glues the reliability engine, the fragmentation
//! layer and the event subscriber to an injected carrier.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::carrier::Carrier;
use crate::config::ChannelConfig;
use crate::connection::{ConnectionState, CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::error::ChannelError;
use crate::events::{BinaryMode, Blob, ChannelEvents, CloseEvent, MessageData};
use crate::fragment::{Fragmenter, Reassembler};
use crate::packet::{Packet, PacketFlags};
use crate::reliability::{InboundPacket, ReliabilityEngine};

/// Payload accepted by [`Channel::send`].
pub enum SendPayload {
    /// UTF-8 encoded before transmission.
    Text(String),
    /// Forwarded unchanged.
    Binary(Bytes),
    /// Declared but not supported; sending one fails with
    ///  [`ChannelError::Unsupported`].
    Blob(Blob),
}

impl From<&str> for SendPayload {
    fn from(text: &str) -> Self {
        SendPayload::Text(text.to_owned())
    }
}
impl From<String> for SendPayload {
    fn from(text: String) -> Self {
        SendPayload::Text(text)
    }
}
impl From<Bytes> for SendPayload {
    fn from(bytes: Bytes) -> Self {
        SendPayload::Binary(bytes)
    }
}
impl From<Vec<u8>> for SendPayload {
    fn from(bytes: Vec<u8>) -> Self {
        SendPayload::Binary(Bytes::from(bytes))
    }
}
impl From<&[u8]> for SendPayload {
    fn from(bytes: &[u8]) -> Self {
        SendPayload::Binary(Bytes::copy_from_slice(bytes))
    }
}
impl From<Blob> for SendPayload {
    fn from(blob: Blob) -> Self {
        SendPayload::Blob(blob)
    }
}

struct ChannelInner {
    state: ConnectionState,
    binary_mode: BinaryMode,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    connect_timer: Option<JoinHandle<()>>,
    closing_timer: Option<JoinHandle<()>>,
    reassembly_sweeper: Option<JoinHandle<()>>,
    /// Caller-supplied close arguments, reported if the closing timer
    ///  expires before the peer's FIN arrives.
    requested_close: Option<(Option<u16>, Option<String>)>,
}

/// A reliable, message-oriented channel over an unreliable carrier.
///
/// Cheap to clone; all clones share the same connection.
///
/// Constructing the channel starts the handshake immediately. The owner of
///  the carrier's receive side must call [`handle_incoming`] once per
///  received buffer and [`handle_carrier_error`] for transport errors.
///
/// [`handle_incoming`]: Channel::handle_incoming
/// [`handle_carrier_error`]: Channel::handle_carrier_error
#[derive(Clone)]
pub struct Channel {
    config: Arc<ChannelConfig>,
    carrier: Arc<dyn Carrier>,
    events: Arc<dyn ChannelEvents>,
    engine: ReliabilityEngine,
    inner: Arc<Mutex<ChannelInner>>,
}

impl Channel {
    /// Validates the configuration, transmits the opening SYN and arms the
    ///  connection timer.
    pub async fn new(
        carrier: Arc<dyn Carrier>,
        events: Arc<dyn ChannelEvents>,
        config: ChannelConfig,
    ) -> anyhow::Result<Channel> {
        config.validate()?;
        let config = Arc::new(config);

        let engine = ReliabilityEngine::new(config.clone(), carrier.clone());
        let inner = ChannelInner {
            state: ConnectionState::Connecting,
            binary_mode: BinaryMode::default(),
            fragmenter: Fragmenter::new(config.max_packet_payload_size),
            reassembler: Reassembler::new(),
            connect_timer: None,
            closing_timer: None,
            reassembly_sweeper: None,
            requested_close: None,
        };
        let channel = Channel {
            config: config.clone(),
            carrier: carrier.clone(),
            events,
            engine,
            inner: Arc::new(Mutex::new(inner)),
        };

        info!("channel created - starting handshake");
        carrier.send(&Packet::syn().to_bytes()).await;

        let connect_timer = channel.spawn_connect_timer();
        let sweeper = config.reassembly_timeout.map(|timeout| channel.spawn_reassembly_sweeper(timeout));
        {
            let mut inner = channel.inner.lock().await;
            inner.connect_timer = Some(connect_timer);
            inner.reassembly_sweeper = sweeper;
        }

        Ok(channel)
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Total encoded size of packets sent but not yet acknowledged.
    pub async fn buffered_amount(&self) -> usize {
        self.engine.buffered_amount().await
    }

    pub async fn binary_mode(&self) -> BinaryMode {
        self.inner.lock().await.binary_mode
    }

    pub async fn set_binary_mode(&self, mode: BinaryMode) {
        self.inner.lock().await.binary_mode = mode;
    }

    /// Queues one message for reliable delivery.
    ///
    /// Returns once all packets of the message have been handed to the
    ///  carrier; acknowledgement and retransmission happen in the background.
    ///  Watch [`buffered_amount`] to observe delivery progress.
    ///
    /// [`buffered_amount`]: Channel::buffered_amount
    pub async fn send(&self, payload: impl Into<SendPayload>) -> Result<(), ChannelError> {
        let bytes = match payload.into() {
            SendPayload::Text(text) => Bytes::from(text.into_bytes()),
            SendPayload::Binary(bytes) => bytes,
            SendPayload::Blob(_) => return Err(ChannelError::Unsupported("blob")),
        };

        let payloads = {
            let mut inner = self.inner.lock().await;
            if inner.state != ConnectionState::Open {
                return Err(ChannelError::NotOpen { state: inner.state });
            }
            inner.fragmenter.split(&bytes)?
        };

        debug!("sending message of {} bytes in {} packet(s)", bytes.len(), payloads.len());
        for payload in payloads {
            self.engine.send_packet(PacketFlags::DATA, payload).await;
        }
        Ok(())
    }

    /// Starts a graceful close. A no-op when the channel is already closing
    ///  or closed.
    ///
    /// `code` and `reason` are reported in the close event only if the peer
    ///  never answers our FIN; a clean close always reports 1000.
    pub async fn close(&self, code: Option<u16>, reason: Option<&str>) {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ConnectionState::Closing | ConnectionState::Closed => {
                    trace!("close() in state {} - ignoring", inner.state);
                    return;
                }
                _ => {}
            }
            info!("closing channel (was {})", inner.state);
            inner.state = ConnectionState::Closing;
            inner.requested_close = Some((code, reason.map(str::to_owned)));
            if let Some(handle) = inner.connect_timer.take() {
                handle.abort();
            }
        }

        // the FIN travels twice: once as a bare frame for minimum latency,
        // once through the engine so it survives loss
        let raw_fin_sequence = self.engine.allocate_sequence().await;
        self.carrier.send(&Packet::fin(raw_fin_sequence).to_bytes()).await;
        self.engine.send_packet(PacketFlags::FIN, Bytes::new()).await;

        let closing_timer = self.spawn_closing_timer();
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Closing {
            inner.closing_timer = Some(closing_timer);
        }
        else {
            // the peer's FIN arrived while our own was going out
            closing_timer.abort();
        }
    }

    /// Entry point for buffers delivered by the carrier, exactly one call
    ///  per received buffer. Undecodable input is dropped silently.
    pub async fn handle_incoming(&self, buf: &[u8]) {
        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "inbound_buffer", ?correlation_id);
        self.do_handle_incoming(buf).instrument(span).await
    }

    /// Transport errors reported by the carrier are forwarded once to the
    ///  subscriber; they do not change connection state.
    pub async fn handle_carrier_error(&self, error: anyhow::Error) {
        warn!("carrier reported an error: {}", error);
        self.events.on_error(error).await;
    }

    async fn do_handle_incoming(&self, buf: &[u8]) {
        if self.state().await == ConnectionState::Closed {
            trace!("channel closed - dropping inbound buffer");
            return;
        }

        let Some(packet) = self.engine.handle_inbound(buf).await else {
            return;
        };

        if packet.flags.contains(PacketFlags::SYN) {
            self.on_syn().await;
        }
        else if packet.flags.contains(PacketFlags::FIN) {
            self.on_fin().await;
        }
        else if packet.flags.contains(PacketFlags::DATA) {
            self.on_data(packet).await;
        }
        else {
            debug!("packet #{} with unhandled flags {:?} - ignoring", packet.sequence, packet.flags);
        }
    }

    async fn on_syn(&self) {
        let accepted = {
            let mut inner = self.inner.lock().await;
            if inner.state == ConnectionState::Connecting {
                if let Some(handle) = inner.connect_timer.take() {
                    handle.abort();
                }
                inner.state = ConnectionState::Open;
                true
            }
            else {
                trace!("SYN in state {} - ignoring", inner.state);
                false
            }
        };

        if accepted {
            info!("handshake complete - channel open");
            // re-emit our own SYN so the peer observes one even if its copy
            // of our first SYN was lost
            self.carrier.send(&Packet::syn().to_bytes()).await;
            self.events.on_open().await;
        }
    }

    async fn on_fin(&self) {
        let close = {
            let mut inner = self.inner.lock().await;
            if inner.state == ConnectionState::Closed {
                return;
            }
            info!("FIN received in state {} - closing cleanly", inner.state);
            Self::teardown(&mut inner);
            CloseEvent {
                code: CLOSE_NORMAL,
                reason: String::new(),
                was_clean: true,
            }
        };
        self.engine.shutdown().await;
        self.events.on_close(close).await;
    }

    async fn on_data(&self, packet: InboundPacket) {
        if packet.is_duplicate {
            trace!("duplicate DATA packet #{} - already delivered upstream", packet.sequence);
            return;
        }

        let message = {
            let mut inner = self.inner.lock().await;
            // data may legitimately arrive before our own handshake is done:
            // the peer opens as soon as it observes our SYN, possibly before
            // its SYN reply reaches us
            inner.reassembler.on_payload(packet.payload).map(|message| match inner.binary_mode {
                BinaryMode::Bytes => MessageData::Bytes(message),
                BinaryMode::Blob => MessageData::Blob(Blob(message)),
            })
        };

        if let Some(data) = message {
            self.events.on_message(data).await;
        }
    }

    /// Terminal transition. Cancels every armed timer; the engine is shut
    ///  down by the caller once the lock is released.
    fn teardown(inner: &mut ChannelInner) {
        inner.state = ConnectionState::Closed;
        if let Some(handle) = inner.connect_timer.take() {
            handle.abort();
        }
        if let Some(handle) = inner.closing_timer.take() {
            handle.abort();
        }
        if let Some(handle) = inner.reassembly_sweeper.take() {
            handle.abort();
        }
    }

    fn spawn_connect_timer(&self) -> JoinHandle<()> {
        let channel = self.clone();
        let timeout = self.config.connection_timeout;
        tokio::spawn(async move {
            time::sleep(timeout).await;
            let close = {
                let mut inner = channel.inner.lock().await;
                if inner.state != ConnectionState::Connecting {
                    return;
                }
                warn!("handshake did not complete within {:?} - giving up", timeout);
                // drop our own handle without aborting ourselves
                inner.connect_timer.take();
                Self::teardown(&mut inner);
                CloseEvent {
                    code: CLOSE_ABNORMAL,
                    reason: "Connection timeout".to_owned(),
                    was_clean: false,
                }
            };
            channel.engine.shutdown().await;
            channel.events.on_close(close).await;
        })
    }

    fn spawn_closing_timer(&self) -> JoinHandle<()> {
        let channel = self.clone();
        let timeout = self.config.connection_timeout;
        tokio::spawn(async move {
            time::sleep(timeout).await;
            let close = {
                let mut inner = channel.inner.lock().await;
                if inner.state != ConnectionState::Closing {
                    return;
                }
                warn!("peer did not answer our FIN within {:?} - closing uncleanly", timeout);
                inner.closing_timer.take();
                let (code, reason) = inner.requested_close.take().unwrap_or((None, None));
                Self::teardown(&mut inner);
                CloseEvent {
                    code: code.unwrap_or(CLOSE_ABNORMAL),
                    reason: reason.unwrap_or_default(),
                    was_clean: false,
                }
            };
            channel.engine.shutdown().await;
            channel.events.on_close(close).await;
        })
    }

    fn spawn_reassembly_sweeper(&self, timeout: Duration) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(timeout);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let mut inner = inner.lock().await;
                let evicted = inner.reassembler.evict_stale(timeout);
                if evicted > 0 {
                    debug!("evicted {} stale fragment buffer(s)", evicted);
                }
            }
        })
    }
}
