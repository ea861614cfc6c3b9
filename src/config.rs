use std::time::Duration;

use anyhow::bail;

use crate::fragment::{FRAGMENT_HEADER_LEN, MAX_FRAGMENTS_PER_MESSAGE};

/// Channel configuration. Immutable after construction; [`validate`] is
///  called before the first packet goes out.
///
/// [`validate`]: ChannelConfig::validate
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upper bound on the number of message bytes placed into a single DATA
    ///  packet before fragmentation kicks in.
    ///
    /// The carrier sees slightly more than this per packet: the 11 byte
    ///  packet header, and for fragmented messages the 5 byte fragment
    ///  header. The default leaves a 1500 byte buffer budget for carriers
    ///  with Ethernet-like framing.
    pub max_packet_payload_size: usize,

    /// Fixed interval between retransmissions of an unacknowledged packet.
    ///  There is no RTT estimation and no backoff; choose this comfortably
    ///  above the round-trip time of the carrier.
    pub retransmission_timeout: Duration,

    /// Number of retransmissions attempted beyond the initial send before a
    ///  packet is silently abandoned.
    pub max_retransmission_attempts: u32,

    /// Grace period for the SYN handshake and for the FIN handshake. When it
    ///  expires the channel closes abnormally.
    pub connection_timeout: Duration,

    /// Capacity of the duplicate-suppression window. Must be large enough
    ///  that a retransmitted packet cannot outlive the window, i.e. well
    ///  above `max_retransmission_attempts` packets worth of traffic per
    ///  `retransmission_timeout`.
    pub receive_window_capacity: usize,

    /// When set, partially received messages that have seen no new fragment
    ///  within this duration are dropped. The default keeps them
    ///  indefinitely, matching the behavior of peers that never evict.
    pub reassembly_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_packet_payload_size: 1489,
            retransmission_timeout: Duration::from_millis(1000),
            max_retransmission_attempts: 5,
            connection_timeout: Duration::from_millis(5000),
            receive_window_capacity: 1024,
            reassembly_timeout: None,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_packet_payload_size <= FRAGMENT_HEADER_LEN {
            bail!(
                "payload size of {} is too small to carry a fragment header",
                self.max_packet_payload_size
            );
        }
        if self.max_packet_payload_size > u16::MAX as usize - FRAGMENT_HEADER_LEN {
            bail!(
                "payload size of {} does not fit the u16 length field",
                self.max_packet_payload_size
            );
        }
        if self.receive_window_capacity < 1000 {
            bail!(
                "receive window of {} is too small to reliably suppress retransmitted duplicates",
                self.receive_window_capacity
            );
        }
        if self.retransmission_timeout.is_zero() {
            bail!("retransmission timeout must be non-zero");
        }
        if self.connection_timeout.is_zero() {
            bail!("connection timeout must be non-zero");
        }
        Ok(())
    }

    /// Largest message that fits the 7-bit fragment index space.
    pub fn max_message_size(&self) -> usize {
        MAX_FRAGMENTS_PER_MESSAGE * self.max_packet_payload_size
    }
}
