//! Wire format of a single packet: fixed header, opaque payload, CRC32
//! integrity check. No I/O happens here.

use std::fmt::{Debug, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;

use crate::sequence::PacketSeq;

/// The role of a packet, stored as a bit set. Each packet carries exactly one
///  of these in practice.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const DATA: PacketFlags = PacketFlags(0x01);
    pub const ACK: PacketFlags = PacketFlags(0x02);
    pub const SYN: PacketFlags = PacketFlags(0x04);
    pub const FIN: PacketFlags = PacketFlags(0x08);

    pub fn from_raw(raw: u8) -> PacketFlags {
        PacketFlags(raw)
    }

    pub fn to_raw(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Debug for PacketFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::DATA) { names.push("DATA"); }
        if self.contains(Self::ACK) { names.push("ACK"); }
        if self.contains(Self::SYN) { names.push("SYN"); }
        if self.contains(Self::FIN) { names.push("FIN"); }
        if names.is_empty() {
            write!(f, "{:#04x}", self.0)
        }
        else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: PacketSeq,
    pub flags: PacketFlags,
    pub payload_len: u16,
}

impl PacketHeader {
    pub const SERIALIZED_LEN: usize = 11;
}

/// One packet as it travels over the carrier: header plus `payload_len`
///  payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence: PacketSeq, flags: PacketFlags, payload: Bytes) -> Packet {
        let payload_len = payload.len().try_into()
            .expect("this is a bug: payload length should have been bounded by the fragmentation budget");
        Packet {
            header: PacketHeader { sequence, flags, payload_len },
            payload,
        }
    }

    pub fn data(sequence: PacketSeq, payload: Bytes) -> Packet {
        Self::new(sequence, PacketFlags::DATA, payload)
    }

    pub fn syn() -> Packet {
        Self::new(PacketSeq::HANDSHAKE, PacketFlags::SYN, Bytes::new())
    }

    pub fn fin(sequence: PacketSeq) -> Packet {
        Self::new(sequence, PacketFlags::FIN, Bytes::new())
    }

    /// `sequence` is the sequence being acknowledged, not a fresh one.
    pub fn ack(sequence: PacketSeq) -> Packet {
        Self::new(sequence, PacketFlags::ACK, Bytes::new())
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let checksum = Self::checksum_over(
            self.header.sequence,
            self.header.flags,
            self.header.payload_len,
            &self.payload,
        );
        buf.put_u32_le(self.header.sequence.to_raw());
        buf.put_u32_le(checksum);
        buf.put_u8(self.header.flags.to_raw());
        buf.put_u16_le(self.header.payload_len);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PacketHeader::SERIALIZED_LEN + self.payload.len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// Parses one packet from a received buffer.
    ///
    /// Fails on truncated input and on checksum mismatch; this is the sole
    ///  corruption rejection mechanism, so callers drop the buffer silently
    ///  on error. Bytes beyond the announced payload length are ignored.
    pub fn try_deser(buf: &[u8]) -> anyhow::Result<Packet> {
        if buf.len() < PacketHeader::SERIALIZED_LEN {
            bail!(
                "{} bytes is shorter than the {} byte packet header",
                buf.len(),
                PacketHeader::SERIALIZED_LEN
            );
        }

        let mut b = buf;
        let sequence = PacketSeq::from_raw(b.get_u32_le());
        let stored_checksum = b.get_u32_le();
        let flags = PacketFlags::from_raw(b.get_u8());
        let payload_len = b.get_u16_le();

        if b.remaining() < payload_len as usize {
            bail!(
                "header announces {} payload bytes but only {} are present",
                payload_len,
                b.remaining()
            );
        }
        let payload = Bytes::copy_from_slice(&b[..payload_len as usize]);

        let computed = Self::checksum_over(sequence, flags, payload_len, &payload);
        if computed != stored_checksum {
            bail!("checksum mismatch: stored {stored_checksum:08x}, computed {computed:08x}");
        }

        Ok(Packet {
            header: PacketHeader { sequence, flags, payload_len },
            payload,
        })
    }

    /// CRC32 over everything except the checksum field itself: the logical
    ///  header (sequence, flags, payload length) followed by the payload.
    fn checksum_over(sequence: PacketSeq, flags: PacketFlags, payload_len: u16, payload: &[u8]) -> u32 {
        let hasher = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
        let mut digest = hasher.digest();

        digest.update(&sequence.to_raw().to_le_bytes());
        digest.update(&[flags.to_raw()]);
        digest.update(&payload_len.to_le_bytes());
        digest.update(payload);

        digest.finalize()
    }
}
