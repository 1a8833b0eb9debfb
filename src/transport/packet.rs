//! Transport packet wire format.
//!
//! Two packet shapes share the type byte:
//!
//! Connection-oriented (types `0x01`-`0x0A`):
//!
//! ```text
//! +-----------+--------------+----------+-------------+------------------+
//! | TYPE (1B) | CONN_ID (1B) | SEQ (1B) | LENGTH (1B) | PAYLOAD (0-246B) |
//! +-----------+--------------+----------+-------------+------------------+
//! ```
//!
//! Connectionless datagram (type `0x0B`):
//!
//! ```text
//! +-----------+-------------+------------------+
//! | TYPE (1B) | LENGTH (1B) | PAYLOAD (0-248B) |
//! +-----------+-------------+------------------+
//! ```
//!
//! Control packets (SYN, ACK, FIN, keep-alive, ...) are headers with a
//! zero LENGTH. A packet always fits one link payload (250 bytes).

use thiserror::Error;

use crate::core::constants::TRANSPORT_HEADER_SIZE;

/// Transport packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Connection request (initiator, conn id 0).
    Syn = 0x01,
    /// Connection acceptance carrying the allocated conn id.
    SynAck = 0x02,
    /// Handshake completion / teardown acknowledgment.
    Ack = 0x03,
    /// Disconnection request.
    Fin = 0x04,
    /// Disconnection acknowledgment.
    FinAck = 0x05,
    /// Sequenced payload.
    Data = 0x06,
    /// Positive acknowledgment of a DATA packet.
    DataAck = 0x07,
    /// Negative acknowledgment; requests retransmission.
    DataNack = 0x08,
    /// Keep-alive probe.
    Keepalive = 0x09,
    /// Keep-alive response.
    KeepaliveAck = 0x0A,
    /// Connectionless, unsequenced, unacknowledged payload.
    Datagram = 0x0B,
}

impl PacketType {
    /// Parse a packet type from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Syn),
            0x02 => Some(Self::SynAck),
            0x03 => Some(Self::Ack),
            0x04 => Some(Self::Fin),
            0x05 => Some(Self::FinAck),
            0x06 => Some(Self::Data),
            0x07 => Some(Self::DataAck),
            0x08 => Some(Self::DataNack),
            0x09 => Some(Self::Keepalive),
            0x0A => Some(Self::KeepaliveAck),
            0x0B => Some(Self::Datagram),
            _ => None,
        }
    }

    /// Wire byte for this packet type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Header of a connection-oriented packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type.
    pub packet_type: PacketType,
    /// Connection identifier; `0x00` means unassigned.
    pub conn_id: u8,
    /// Sequence number, or `0` where the type carries none.
    pub seq: u8,
    /// Payload byte count.
    pub len: u8,
}

/// Errors from parsing a packet header.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer bytes than a header.
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    /// The TYPE byte is not a known packet type.
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),
}

impl PacketHeader {
    /// Header for a payload-free control packet.
    pub fn control(packet_type: PacketType, conn_id: u8, seq: u8) -> Self {
        Self {
            packet_type,
            conn_id,
            seq,
            len: 0,
        }
    }

    /// Header for a DATA packet.
    pub fn data(conn_id: u8, seq: u8, len: u8) -> Self {
        Self {
            packet_type: PacketType::Data,
            conn_id,
            seq,
            len,
        }
    }

    /// Serialize to the 4-byte wire form.
    pub fn to_bytes(&self) -> [u8; TRANSPORT_HEADER_SIZE] {
        [
            self.packet_type.as_byte(),
            self.conn_id,
            self.seq,
            self.len,
        ]
    }

    /// Parse from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < TRANSPORT_HEADER_SIZE {
            return Err(PacketError::TooShort(bytes.len()));
        }
        let packet_type =
            PacketType::from_byte(bytes[0]).ok_or(PacketError::UnknownType(bytes[0]))?;
        Ok(Self {
            packet_type,
            conn_id: bytes[1],
            seq: bytes[2],
            len: bytes[3],
        })
    }
}
