//! Protocol constants.
//!
//! These values are fixed by the wire format and MUST NOT be changed:
//! both peers derive buffer sizes and validation limits from them.

// =============================================================================
// COBS FRAMING
// =============================================================================

/// Frame delimiter byte appended after every COBS-encoded frame.
pub const COBS_DELIMITER: u8 = 0x00;

/// Maximum size of a raw block that can be COBS-encoded in one piece.
///
/// COBS code bytes count the distance to the next zero, so a block between
/// delimiters may not exceed 254 bytes.
pub const COBS_MAX_BLOCK_SIZE: usize = 254;

/// Upper bound on an encoded frame including overhead and the delimiter.
///
/// A 254-byte block encodes to at most 256 bytes; one more for the
/// trailing delimiter, rounded up to a conservative 257 used for all
/// scratch and ring sizing.
pub const COBS_MAX_ENCODED_SIZE: usize = 257;

// =============================================================================
// LINK LAYER FRAME
// =============================================================================

/// Link frame header size: type (1) + length (1).
pub const LINK_HEADER_SIZE: usize = 2;

/// CRC-16 trailer size.
pub const LINK_CRC_SIZE: usize = 2;

/// Smallest possible link frame: header + CRC, empty payload.
pub const LINK_MIN_FRAME_SIZE: usize = LINK_HEADER_SIZE + LINK_CRC_SIZE;

/// Largest pre-encoding link frame; bounded by the COBS block size.
pub const LINK_MAX_FRAME_SIZE: usize = COBS_MAX_BLOCK_SIZE;

/// Largest payload a single link frame can carry (254 - 4 overhead).
pub const LINK_MAX_PAYLOAD_SIZE: usize = LINK_MAX_FRAME_SIZE - LINK_HEADER_SIZE - LINK_CRC_SIZE;

/// Egress byte ring capacity: two full encoded frames.
pub const LINK_EGRESS_CAPACITY: usize = COBS_MAX_ENCODED_SIZE * 2;

/// Ingress byte ring capacity: two full encoded frames.
pub const LINK_INGRESS_CAPACITY: usize = COBS_MAX_ENCODED_SIZE * 2;

// =============================================================================
// TRANSPORT LAYER PACKET
// =============================================================================

/// Connection-oriented packet header size: type + conn id + seq + length.
pub const TRANSPORT_HEADER_SIZE: usize = 4;

/// A transport packet must fit in a single link payload.
pub const TRANSPORT_MAX_PACKET_SIZE: usize = LINK_MAX_PAYLOAD_SIZE;

/// Largest payload of a connection-oriented DATA packet (250 - 4).
pub const TRANSPORT_MAX_PAYLOAD_SIZE: usize = TRANSPORT_MAX_PACKET_SIZE - TRANSPORT_HEADER_SIZE;

/// Datagram packet header size: type + length.
pub const DATAGRAM_HEADER_SIZE: usize = 2;

/// Largest payload of a connectionless datagram (250 - 2).
pub const DATAGRAM_MAX_PAYLOAD_SIZE: usize = TRANSPORT_MAX_PACKET_SIZE - DATAGRAM_HEADER_SIZE;

/// Reserved connection id meaning "invalid / unassigned".
pub const CONNECTION_ID_INVALID: u8 = 0x00;

/// First connection id handed out by the acceptor.
pub const CONNECTION_ID_FIRST: u8 = 0x01;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Default interval between keep-alive probes.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u32 = 1000;

/// Default retransmit-and-fail window for connection setup and teardown.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u32 = 3000;

/// Default number of SYN retransmissions before giving up.
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// The connection is declared dead after this many keep-alive intervals
/// without a KEEPALIVE_ACK.
pub const KEEPALIVE_TIMEOUT_FACTOR: u32 = 3;

// =============================================================================
// ERROR CODE BANDS
// =============================================================================
//
// Each layer owns a non-overlapping band of 32 negative codes so the
// embedder can decode an error's origin from its integer value alone.
// Codes are assigned downward from the top of each band.

/// Top (least negative) code of the physical layer band [-32, -1].
pub const ERROR_BAND_PHYSICAL: i32 = -1;

/// Top code of the link layer band [-64, -33].
pub const ERROR_BAND_LINK: i32 = -33;

/// Top code of the transport layer band [-96, -65].
pub const ERROR_BAND_TRANSPORT: i32 = -65;

/// Top code of the stack coordinator band [-128, -97].
pub const ERROR_BAND_STACK: i32 = -97;

/// Width of each error band.
pub const ERROR_BAND_WIDTH: i32 = 32;
