//! Chunking of messages that exceed the per-packet payload budget, and
//! re-assembly of the chunks on the receive side.
//!
//! Every fragment travels in its own reliable DATA packet, so by the time a
//! payload reaches the [`Reassembler`] duplicates have already been
//! suppressed and corruption rejected. Fragments of one message are ordered
//! by index; fragments of distinct messages interleave freely and are told
//! apart by message id.

use std::time::Duration;

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ChannelError;

pub const FRAGMENT_HEADER_LEN: usize = 5;

/// The index field is 7 bits wide, which caps a single message at 128
///  fragments. Larger messages must be chunked by the caller.
pub const MAX_FRAGMENTS_PER_MESSAGE: usize = 128;

const LAST_FRAGMENT_BIT: u8 = 0x80;
const FRAGMENT_INDEX_MASK: u8 = 0x7f;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    pub message_id: u32,
    /// 0 to 127.
    pub index: u8,
    pub is_last: bool,
}

impl FragmentHeader {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.message_id);
        let mut index_and_last = self.index & FRAGMENT_INDEX_MASK;
        if self.is_last {
            index_and_last |= LAST_FRAGMENT_BIT;
        }
        buf.put_u8(index_and_last);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<FragmentHeader> {
        if buf.remaining() < FRAGMENT_HEADER_LEN {
            bail!("fragment header truncated: {} bytes", buf.remaining());
        }
        let message_id = buf.get_u32_le();
        let index_and_last = buf.get_u8();
        Ok(FragmentHeader {
            message_id,
            index: index_and_last & FRAGMENT_INDEX_MASK,
            is_last: index_and_last & LAST_FRAGMENT_BIT != 0,
        })
    }
}

/// Splits outgoing messages into DATA payloads and hands out message ids.
pub struct Fragmenter {
    next_message_id: u32,
    max_fragment_len: usize,
}

impl Fragmenter {
    pub fn new(max_packet_payload_size: usize) -> Fragmenter {
        Fragmenter {
            next_message_id: 1,
            max_fragment_len: max_packet_payload_size,
        }
    }

    /// Frames one outgoing message as a sequence of DATA payloads.
    ///
    /// Messages shorter than the fragment header cannot be mistaken for one
    ///  on the receive side and go out unframed; everything else is framed,
    ///  even when it fits a single packet.
    pub fn split(&mut self, message: &[u8]) -> Result<Vec<Bytes>, ChannelError> {
        if message.len() < FRAGMENT_HEADER_LEN {
            return Ok(vec![Bytes::copy_from_slice(message)]);
        }

        let total = message.len().div_ceil(self.max_fragment_len);
        if total > MAX_FRAGMENTS_PER_MESSAGE {
            return Err(ChannelError::MessageTooLarge {
                size: message.len(),
                limit: MAX_FRAGMENTS_PER_MESSAGE * self.max_fragment_len,
            });
        }

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let mut payloads = Vec::with_capacity(total);
        for (index, chunk) in message.chunks(self.max_fragment_len).enumerate() {
            let header = FragmentHeader {
                message_id,
                index: index as u8,
                is_last: index + 1 == total,
            };
            let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + chunk.len());
            header.ser(&mut buf);
            buf.put_slice(chunk);
            payloads.push(buf.freeze());
        }

        trace!(
            "split message of {} bytes into {} fragment(s) as message #{}",
            message.len(),
            total,
            message_id
        );
        Ok(payloads)
    }
}

struct MessageBuffer {
    fragments: FxHashMap<u8, Bytes>,
    /// Known once the fragment with the last marker has been seen.
    total: Option<usize>,
    last_fragment_at: Instant,
}

/// Buffers inbound fragments per message id until a message is complete.
pub struct Reassembler {
    buffers: FxHashMap<u32, MessageBuffer>,
}

impl Reassembler {
    pub fn new() -> Reassembler {
        Reassembler {
            buffers: FxHashMap::default(),
        }
    }

    /// Feeds one reliable DATA payload. Returns the complete message when
    ///  this payload finished one.
    pub fn on_payload(&mut self, payload: Bytes) -> Option<Bytes> {
        if payload.len() < FRAGMENT_HEADER_LEN {
            trace!("unframed payload of {} bytes - delivering directly", payload.len());
            return Some(payload);
        }

        let mut buf: &[u8] = &payload;
        let header = FragmentHeader::try_deser(&mut buf)
            .expect("this is a bug: payload length was checked against the fragment header size");
        let fragment = payload.slice(FRAGMENT_HEADER_LEN..);

        let message_id = header.message_id;
        let buffer = self.buffers.entry(message_id).or_insert_with(|| MessageBuffer {
            fragments: FxHashMap::default(),
            total: None,
            last_fragment_at: Instant::now(),
        });
        buffer.last_fragment_at = Instant::now();
        if header.is_last {
            buffer.total = Some(header.index as usize + 1);
        }
        // a duplicate index overwrites; harmless since packet-level duplicates
        // were already suppressed
        buffer.fragments.insert(header.index, fragment);

        let complete = match buffer.total {
            Some(total) => (0..total).all(|index| buffer.fragments.contains_key(&(index as u8))),
            None => false,
        };
        if !complete {
            trace!(
                "message #{}: buffered fragment {} ({} of {} known so far)",
                message_id,
                header.index,
                buffer.fragments.len(),
                buffer.total.map(|t| t.to_string()).unwrap_or_else(|| "?".to_owned()),
            );
            return None;
        }

        let mut buffer = self.buffers.remove(&message_id)?;
        let total = buffer.total?;
        let size = buffer.fragments.values().map(Bytes::len).sum();
        let mut message = BytesMut::with_capacity(size);
        for index in 0..total {
            message.put_slice(&buffer.fragments.remove(&(index as u8))?);
        }
        debug!("reassembled message #{} from {} fragment(s) ({} bytes)", message_id, total, size);
        Some(message.freeze())
    }

    /// Drops buffers that have seen no new fragment within `timeout`.
    ///  Returns the number of evicted buffers.
    pub fn evict_stale(&mut self, timeout: Duration) -> usize {
        let now = Instant::now();
        let before = self.buffers.len();
        self.buffers.retain(|message_id, buffer| {
            let stale = now.duration_since(buffer.last_fragment_at) >= timeout;
            if stale {
                debug!(
                    "message #{}: no fragment for {:?} - dropping {} buffered fragment(s)",
                    message_id,
                    timeout,
                    buffer.fragments.len()
                );
            }
            !stale
        });
        before - self.buffers.len()
    }

    /// Number of partially received messages currently buffered.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}
