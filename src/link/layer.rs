//! Link layer: delimited, integrity-checked frames over a raw byte stream.
//!
//! Outbound, the layer wraps payloads into CRC-protected frames, COBS
//! encodes them, and queues the result (plus delimiter) in a bounded
//! egress ring drained towards the physical transport by
//! [`LinkLayer::pump_egress`]. Partial hardware acceptance is expected;
//! the ring is compacted by however many bytes the hardware took.
//!
//! Inbound, raw bytes accumulate in a bounded ingress ring and
//! [`LinkLayer::poll_frame`] runs the resynchronization loop over them:
//!
//! 1. Attempt a COBS decode. No delimiter yet means wait for more bytes.
//! 2. On a decode failure or a decoded block shorter than a minimal
//!    frame, drop exactly one byte and retry — sliding byte by byte
//!    until the next valid delimiter.
//! 3. On a decoded block, validate the length field, the CRC, and the
//!    frame type; invalid blocks are dropped whole (`consumed` bytes).
//!
//! Only integrity-verified DATA payloads are handed upward.

use heapless::Vec;
use tracing::{trace, warn};

use super::cobs::{self, CobsError};
use super::frame::{self, FrameError};
use crate::core::constants::{
    COBS_DELIMITER, COBS_MAX_ENCODED_SIZE, LINK_EGRESS_CAPACITY, LINK_INGRESS_CAPACITY,
    LINK_MAX_FRAME_SIZE, LINK_MAX_PAYLOAD_SIZE, LINK_MIN_FRAME_SIZE,
};
use crate::core::{LinkError, PhysicalError, PhysicalTransport};

/// Link layer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Ready to queue and process frames.
    Ready,
    /// Transiently held while handing egress bytes to the hardware.
    Sending,
    /// A CRC or decode failure was observed. Cleared by the next
    /// successful `send` or the next validated inbound frame.
    Error,
}

/// Outcome of one [`LinkLayer::poll_frame`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePoll {
    /// A validated frame payload was written to the output buffer.
    Frame {
        /// Payload length written.
        len: usize,
    },
    /// A frame failed its CRC check and was discarded. The caller may
    /// keep polling; resynchronization already happened.
    CrcError,
    /// The ingress ring holds no complete frame. Wait for more bytes.
    Pending,
}

/// Framing layer over an untyped byte channel.
pub struct LinkLayer {
    state: LinkState,
    egress: Vec<u8, LINK_EGRESS_CAPACITY>,
    ingress: Vec<u8, LINK_INGRESS_CAPACITY>,
    frame_buf: [u8; LINK_MAX_FRAME_SIZE],
    encode_buf: [u8; COBS_MAX_ENCODED_SIZE],
    decode_buf: [u8; LINK_MAX_FRAME_SIZE],
    outgoing_available: bool,
}

impl LinkLayer {
    /// Create a link layer with empty rings, in the ready state.
    pub fn new() -> Self {
        Self {
            state: LinkState::Ready,
            egress: Vec::new(),
            ingress: Vec::new(),
            frame_buf: [0; LINK_MAX_FRAME_SIZE],
            encode_buf: [0; COBS_MAX_ENCODED_SIZE],
            decode_buf: [0; LINK_MAX_FRAME_SIZE],
            outgoing_available: false,
        }
    }

    /// Current layer state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Clear both rings and return to the ready state.
    pub fn reset(&mut self) {
        self.state = LinkState::Ready;
        self.egress.clear();
        self.ingress.clear();
        self.outgoing_available = false;
    }

    /// Number of encoded bytes waiting in the egress ring.
    pub fn egress_len(&self) -> usize {
        self.egress.len()
    }

    /// Frame a payload and queue it for transmission.
    ///
    /// The frame is built, CRC'd, COBS-encoded, delimited, and appended
    /// to the egress ring. Fails with [`LinkError::PayloadTooLarge`] for
    /// payloads over 250 bytes and [`LinkError::BufferFull`] when the
    /// ring lacks space for the whole encoded frame. A successful call
    /// clears a latched error state.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if payload.len() > LINK_MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge);
        }

        if self.state == LinkState::Error {
            // Error latch clears on the next transmission attempt.
            self.state = LinkState::Ready;
        }

        let frame_len = frame::encode_frame(payload, &mut self.frame_buf);

        let encoded_len = cobs::encode(&self.frame_buf[..frame_len], &mut self.encode_buf)
            .expect("frame fits one cobs block by construction");
        self.encode_buf[encoded_len] = COBS_DELIMITER;

        if self.egress.len() + encoded_len + 1 > LINK_EGRESS_CAPACITY {
            return Err(LinkError::BufferFull);
        }
        self.egress
            .extend_from_slice(&self.encode_buf[..encoded_len + 1])
            .map_err(|_| LinkError::BufferFull)?;

        trace!(
            payload_len = payload.len(),
            queued = self.egress.len(),
            "frame queued"
        );
        self.outgoing_available = true;
        Ok(())
    }

    /// Append raw bytes from the physical channel to the ingress ring.
    ///
    /// On overflow the entire ring is discarded (frame boundaries are
    /// lost anyway) and [`LinkError::BufferFull`] is returned.
    pub fn enqueue_received(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.ingress.len() + bytes.len() > LINK_INGRESS_CAPACITY {
            warn!(
                pending = self.ingress.len(),
                incoming = bytes.len(),
                "ingress overflow, ring discarded"
            );
            self.ingress.clear();
            return Err(LinkError::BufferFull);
        }
        self.ingress
            .extend_from_slice(bytes)
            .map_err(|_| LinkError::BufferFull)?;
        Ok(())
    }

    /// Hand queued egress bytes to the physical transport.
    ///
    /// Returns the number of bytes the hardware accepted; zero means try
    /// again later. The ring is compacted by exactly that amount, so a
    /// partial acceptance leaves the remainder queued.
    pub fn pump_egress<P: PhysicalTransport>(
        &mut self,
        phy: &mut P,
    ) -> Result<usize, PhysicalError> {
        if self.egress.is_empty() || self.state != LinkState::Ready {
            return Ok(0);
        }

        self.state = LinkState::Sending;
        let result = phy.send(&self.egress);
        if let Ok(accepted) = result {
            drain_front(&mut self.egress, accepted);
        }
        self.state = LinkState::Ready;
        result
    }

    /// Run the resynchronization loop until one frame is extracted, a
    /// CRC error is observed, or the ring runs out of complete frames.
    ///
    /// `out` must hold at least [`LINK_MAX_PAYLOAD_SIZE`] bytes.
    pub fn poll_frame(&mut self, out: &mut [u8]) -> FramePoll {
        debug_assert!(out.len() >= LINK_MAX_PAYLOAD_SIZE);

        loop {
            if self.ingress.is_empty() {
                return FramePoll::Pending;
            }

            let decoded = match cobs::decode(&self.ingress, &mut self.decode_buf) {
                Ok(d) => d,
                Err(CobsError::Incomplete) => return FramePoll::Pending,
                Err(_) => {
                    // Noise: slide one byte and retry.
                    drain_front(&mut self.ingress, 1);
                    continue;
                }
            };

            if decoded.len < LINK_MIN_FRAME_SIZE {
                drain_front(&mut self.ingress, 1);
                continue;
            }

            match frame::parse_frame(&self.decode_buf[..decoded.len]) {
                Ok(payload) => {
                    let len = payload.len();
                    out[..len].copy_from_slice(payload);
                    self.state = LinkState::Ready;
                    drain_front(&mut self.ingress, decoded.consumed);
                    return FramePoll::Frame { len };
                }
                Err(FrameError::LengthMismatch { declared, frame_len }) => {
                    trace!(declared, frame_len, "frame length invalid, dropped");
                    drain_front(&mut self.ingress, decoded.consumed);
                }
                Err(FrameError::CrcMismatch { computed, received }) => {
                    warn!(computed, received, "frame crc mismatch");
                    self.state = LinkState::Error;
                    drain_front(&mut self.ingress, decoded.consumed);
                    return FramePoll::CrcError;
                }
                Err(FrameError::UnknownType(ty)) => {
                    // Silent by design: state is latched but no event fires.
                    trace!(frame_type = ty, "unknown frame type, dropped");
                    self.state = LinkState::Error;
                    drain_front(&mut self.ingress, decoded.consumed);
                }
            }
        }
    }

    /// True once after any `send` queued new egress bytes; the stack
    /// turns this into an outgoing-data-available event.
    pub(crate) fn take_outgoing_available(&mut self) -> bool {
        std::mem::take(&mut self.outgoing_available)
    }
}

impl Default for LinkLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop `count` bytes from the front of a ring, compacting in place.
fn drain_front<const N: usize>(ring: &mut Vec<u8, N>, count: usize) {
    let len = ring.len();
    let count = count.min(len);
    ring.copy_within(count..len, 0);
    ring.truncate(len - count);
}
