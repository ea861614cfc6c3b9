use std::fmt::{Display, Formatter};

/// Sequence number attached to every non-ACK packet, used for ACK correlation
///  and duplicate suppression.
///
/// Sequence numbers wrap around, so 0 follows after FFFFFFFF. The value 0 is
///  reserved for SYN frames; sequenced traffic starts at [`PacketSeq::FIRST`]
///  so the handshake can never collide with a data packet in the receive
///  window.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PacketSeq(u32);

impl Display for PacketSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PacketSeq {
    /// Reserved for SYN frames.
    pub const HANDSHAKE: PacketSeq = PacketSeq(0);

    /// First sequence handed out for sequenced traffic.
    pub const FIRST: PacketSeq = PacketSeq(1);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> PacketSeq {
        PacketSeq(self.0.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 1)]
    #[case::one(1, 2)]
    #[case::large(0xffff_0000, 0xffff_0001)]
    #[case::wrap_around(u32::MAX, 0)]
    fn test_next(#[case] raw: u32, #[case] expected: u32) {
        assert_eq!(PacketSeq::from_raw(raw).next(), PacketSeq::from_raw(expected));
    }

    #[test]
    fn test_handshake_is_below_first() {
        assert!(PacketSeq::HANDSHAKE < PacketSeq::FIRST);
        assert_eq!(PacketSeq::HANDSHAKE.next(), PacketSeq::FIRST);
    }
}
