//! This crate turns an unreliable, datagram-oriented, lossy and potentially
//!  corrupting carrier into a bidirectional, message-oriented reliable channel
//!  with a connection lifecycle. The carrier is fully abstract: anything that
//!  can move opaque byte buffers best-effort (a UDP socket, a radio link, an
//!  acoustic modem) can be plugged in underneath.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages* (defined-length chunks
//!   of data as opposed to streams of bytes)
//!   * a message is delivered to the receiving application exactly once, or
//!     not at all - there is no duplicated and no partial delivery
//! * The carrier may drop, duplicate, reorder or corrupt buffers; the channel
//!   assumes nothing beyond "a sent buffer sometimes arrives"
//!   * corruption is handled by a per-packet CRC32 checksum; packets that fail
//!     the check are silently discarded, and recovery is left to
//!     retransmission
//!   * every non-ACK packet is acknowledged; unacknowledged packets are
//!     re-sent on a fixed timer with a bounded retransmit budget
//!   * duplicates are suppressed by a bounded window of recently accepted
//!     sequence numbers
//! * Messages larger than a single packet are chunked into fragments and
//!   re-assembled on the receiving side; fragments of one message are
//!   ordered, independent messages are not ordered relative to each other
//! * Connections have an explicit lifecycle: a symmetric SYN handshake, an
//!   OPEN phase, and a FIN-based graceful close with timeouts on both the
//!   connect and the close path
//! * No congestion control, no RTT estimation, no encryption - the channel is
//!   designed for simple point-to-point links where a fixed retransmit
//!   interval is appropriate
//!
//! ## Packet header
//!
//! All numbers little-endian:
//!
//! ```ascii
//! 0:  sequence number (u32) - per-packet counter; 0 is reserved for SYN
//! 4:  checksum (u32) - CRC32 (IEEE 802.3) over everything except this field,
//!      i.e. sequence, flags, payload length and payload
//! 8:  flags (u8) - bit set: 0x01 DATA, 0x02 ACK, 0x04 SYN, 0x08 FIN.
//!      In practice each packet carries exactly one flag.
//! 9:  payload length (u16)
//! 11: payload
//! ```
//!
//! ## Control frames
//!
//! *SYN* - sent once at construction and once more when the peer's SYN is
//!  first observed. Carries sequence 0 and bypasses the retransmission
//!  machinery; reliability of the handshake comes from the peer independently
//!  sending its own SYN, backstopped by the connection timer.
//!
//! *ACK* - carries the sequence number being acknowledged. ACKs are not
//!  themselves acknowledged or re-sent; a lost ACK provokes a retransmit,
//!  which is acknowledged again.
//!
//! *FIN* - sent twice on a local close: once as a bare frame for minimum
//!  latency and once through the reliability engine so it survives loss.
//!  Receiving a FIN on either path closes the connection.
//!
//! ## Fragmentation
//!
//! A message that does not fit into one packet is split into up to 128
//! fragments, each carried in a DATA packet whose payload starts with a
//! 5-byte fragment header:
//!
//! ```ascii
//! 0: message id (u32 LE) - fresh per fragmented message, starting at 1
//! 4: index and last marker (u8) - low 7 bits fragment index, high bit set
//!     on the final fragment
//! 5: fragment bytes
//! ```
//!
//! Payloads shorter than the fragment header are sent and delivered as-is.
//!
//! ## Close codes
//!
//! 1000 is a normal close (a FIN was observed), 1006 an abnormal one (the
//! handshake or the close handshake timed out). The numbering follows the
//! browser socket convention the caller-facing API is modeled on.
//!
//! ## Related
//!
//! * TCP: connection lifecycle and retransmission, but TCP is a byte stream
//!   with cumulative ACKs and congestion control
//! * QUIC: message/stream abstraction over datagrams, but connection-id
//!   based, encrypted and congestion controlled
//! * KCP / RUDP-style libraries: closest relatives - selective ACKs and
//!   configurable retransmission over a user-supplied datagram transport

pub mod carrier;
pub mod channel;
pub mod chaos;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod fragment;
pub mod packet;
pub mod receive_window;
pub mod reliability;
pub mod sequence;

#[cfg(test)]
mod test_util;
