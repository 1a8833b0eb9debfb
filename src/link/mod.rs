//! Link layer: COBS framing, CRC-16 integrity, byte-stream
//! resynchronization, and bounded ingress/egress buffering.
//!
//! The framing primitives ([`cobs`], [`crc16`]) are pure and usable on
//! their own; [`LinkLayer`] combines them into the event-driven layer the
//! stack coordinator drives.

pub mod cobs;
mod crc16;
mod frame;
mod layer;

pub use crc16::{crc16, CRC_INITIAL, CRC_POLYNOMIAL};
pub use frame::{FrameError, FrameType};
pub use layer::{FramePoll, LinkLayer, LinkState};
