//! The reliability engine: sequence assignment, bounded retransmission of
//! unacknowledged packets, ACK emission, and duplicate suppression.
//!
//! The engine sits below the connection logic and above the codec. It does
//! not interpret flags beyond ACK and it does not reorder: decoded packets
//! are handed upstream in arrival order.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};

use crate::carrier::Carrier;
use crate::config::ChannelConfig;
use crate::packet::{Packet, PacketFlags};
use crate::receive_window::ReceiveWindow;
use crate::sequence::PacketSeq;

/// One decoded non-ACK packet, ready for dispatch by the connection logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub sequence: PacketSeq,
    pub flags: PacketFlags,
    pub payload: Bytes,
    /// The sequence was already in the receive window. Duplicates are
    ///  acknowledged but must not be delivered upstream again.
    pub is_duplicate: bool,
}

struct OutstandingPacket {
    /// The encoded bytes as they first went out; retransmissions send the
    ///  identical buffer.
    encoded: Bytes,
    /// Retransmissions so far, not counting the initial send.
    attempts: u32,
    retransmit_handle: JoinHandle<()>,
}

struct EngineInner {
    next_sequence: PacketSeq,
    outstanding: BTreeMap<PacketSeq, OutstandingPacket>,
    received: ReceiveWindow,
}

/// Cheap to clone; all clones share the same engine state.
#[derive(Clone)]
pub struct ReliabilityEngine {
    config: Arc<ChannelConfig>,
    carrier: Arc<dyn Carrier>,
    inner: Arc<Mutex<EngineInner>>,
}

impl ReliabilityEngine {
    pub fn new(config: Arc<ChannelConfig>, carrier: Arc<dyn Carrier>) -> ReliabilityEngine {
        let inner = EngineInner {
            next_sequence: PacketSeq::FIRST,
            outstanding: BTreeMap::new(),
            received: ReceiveWindow::new(config.receive_window_capacity),
        };
        ReliabilityEngine {
            config,
            carrier,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Burns the next sequence without sending anything, for frames that are
    ///  transmitted outside the engine.
    pub async fn allocate_sequence(&self) -> PacketSeq {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence = sequence.next();
        sequence
    }

    /// Allocates the next sequence, transmits once, and arms the retransmit
    ///  timer. ACK frames are transmitted but never retained or re-sent.
    pub async fn send_packet(&self, flags: PacketFlags, payload: Bytes) -> PacketSeq {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence = sequence.next();

        let encoded = Packet::new(sequence, flags, payload).to_bytes();
        trace!("sending packet #{} ({:?}, {} bytes)", sequence, flags, encoded.len());
        self.carrier.send(&encoded).await;

        if !flags.contains(PacketFlags::ACK) {
            let retransmit_handle = self.spawn_retransmit_task(sequence);
            inner.outstanding.insert(
                sequence,
                OutstandingPacket {
                    encoded,
                    attempts: 0,
                    retransmit_handle,
                },
            );
        }
        sequence
    }

    /// Decodes one received buffer.
    ///
    /// Undecodable input is dropped silently. ACK frames cancel the matching
    ///  outstanding entry and are consumed here. Everything else is checked
    ///  against the receive window, acknowledged unconditionally (duplicates
    ///  included: the peer retransmits exactly because it never saw our
    ///  previous ACK) and handed back for dispatch.
    pub async fn handle_inbound(&self, buf: &[u8]) -> Option<InboundPacket> {
        let packet = match Packet::try_deser(buf) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping undecodable inbound buffer of {} bytes: {}", buf.len(), e);
                return None;
            }
        };
        let sequence = packet.header.sequence;

        if packet.header.flags.contains(PacketFlags::ACK) {
            let mut inner = self.inner.lock().await;
            match inner.outstanding.remove(&sequence) {
                Some(entry) => {
                    entry.retransmit_handle.abort();
                    trace!("packet #{} acknowledged after {} retransmission(s)", sequence, entry.attempts);
                }
                None => {
                    trace!("ACK for unknown or already acknowledged packet #{}", sequence);
                }
            }
            return None;
        }

        let is_duplicate = {
            let mut inner = self.inner.lock().await;
            if inner.received.contains(sequence) {
                debug!("duplicate packet #{} - suppressing, acknowledging again", sequence);
                true
            }
            else {
                inner.received.insert(sequence);
                false
            }
        };

        self.carrier.send(&Packet::ack(sequence).to_bytes()).await;

        Some(InboundPacket {
            sequence,
            flags: packet.header.flags,
            payload: packet.payload,
            is_duplicate,
        })
    }

    /// Total encoded size of all unacknowledged packets.
    pub async fn buffered_amount(&self) -> usize {
        self.inner.lock().await
            .outstanding
            .values()
            .map(|entry| entry.encoded.len())
            .sum()
    }

    /// Cancels every retransmit timer and drops all outstanding entries.
    ///  Called on the terminal transition so no timer outlives the channel.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let outstanding = std::mem::take(&mut inner.outstanding);
        if !outstanding.is_empty() {
            debug!("shutting down with {} unacknowledged packet(s)", outstanding.len());
        }
        for (_, entry) in outstanding {
            entry.retransmit_handle.abort();
        }
    }

    fn spawn_retransmit_task(&self, sequence: PacketSeq) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let carrier = self.carrier.clone();
        let interval = self.config.retransmission_timeout;
        let budget = self.config.max_retransmission_attempts;

        tokio::spawn(async move {
            loop {
                time::sleep(interval).await;

                let encoded = {
                    let mut guard = inner.lock().await;
                    let Some(entry) = guard.outstanding.get_mut(&sequence) else {
                        // acknowledged in the meantime
                        return;
                    };
                    if entry.attempts >= budget {
                        debug!(
                            "retransmission budget for packet #{} exhausted after {} attempt(s) - abandoning",
                            sequence, entry.attempts
                        );
                        guard.outstanding.remove(&sequence);
                        return;
                    }
                    entry.attempts += 1;
                    trace!("retransmitting packet #{} (attempt {}/{})", sequence, entry.attempts, budget);
                    entry.encoded.clone()
                };
                carrier.send(&encoded).await;
            }
        })
    }
}
