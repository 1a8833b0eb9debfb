//! # Tether
//!
//! Tether is a layered, reliable byte-stream protocol stack for embedded
//! point-to-point links (UART, SPI, I2C) between microcontrollers, or
//! between an MCU and a host. On top of an untyped, lossy byte channel
//! it provides:
//!
//! - **Framing**: COBS-delimited, CRC-16-protected frames with
//!   byte-shifting resynchronization after corruption
//! - **Connections**: a SYN / SYN-ACK / ACK handshake, stop-and-wait
//!   acknowledged delivery, keep-alive supervision, graceful teardown
//! - **Datagrams**: connectionless, best-effort packets usable before
//!   any connection exists
//! - **Determinism**: fixed-size buffers sized at compile time, a
//!   single-threaded cooperative model, no allocation after setup
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------+
//! |             user callbacks              |
//! +-----------------------------------------+
//! |           Stack (coordinator)           |  stack
//! +-----------------------------------------+
//! |  Transport: connections, ack, keepalive |  transport
//! +-----------------------------------------+
//! |  Link: COBS framing, CRC-16, resync     |  link
//! +-----------------------------------------+
//! |  PhysicalTransport (embedder-provided)  |
//! +-----------------------------------------+
//! ```
//!
//! The embedder owns the hardware: it implements [`PhysicalTransport`]
//! for byte output, pushes received bytes in through
//! [`Stack::queue_link_data`], supplies a millisecond [`Clock`], and
//! drives progress by calling [`Stack::tick`],
//! [`Stack::process_outgoing_data`] and [`Stack::process_incoming_data`].
//!
//! ## Example
//!
//! ```
//! use tether::prelude::*;
//!
//! struct LoopbackUart(Vec<u8>);
//!
//! impl PhysicalTransport for LoopbackUart {
//!     fn send(&mut self, data: &[u8]) -> Result<usize, PhysicalError> {
//!         self.0.extend_from_slice(data);
//!         Ok(data.len())
//!     }
//! }
//!
//! let mut stack = Stack::new(
//!     LoopbackUart(Vec::new()),
//!     SystemClock::new(),
//!     StackConfig::default(),
//! );
//! stack.set_event_callback(|event| println!("event: {event:?}"));
//! stack.initialize();
//!
//! // Fire-and-forget datagrams work before any connection exists.
//! stack.send_datagram(&[0x01, 0x02]).unwrap();
//! stack.process_outgoing_data().unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod link;
pub mod stack;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        Clock, ErrorBand, LinkError, PhysicalError, PhysicalTransport, StackError, SystemClock,
        TransportError,
    };
    pub use crate::link::{FramePoll, LinkLayer, LinkState};
    pub use crate::stack::{Stack, StackConfig, StackEvent, StackState};
    pub use crate::transport::{TransportEvent, TransportLayer, TransportState};
}

pub use crate::core::{Clock, PhysicalTransport, StackError, SystemClock};
pub use crate::stack::{Stack, StackConfig, StackEvent, StackState};
