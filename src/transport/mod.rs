//! Transport layer: connection lifecycle, stop-and-wait reliable
//! delivery, keep-alive supervision, and connectionless datagrams on
//! top of the link layer's validated frames.

mod layer;
mod packet;

pub use layer::{TransportEvent, TransportLayer, TransportState};
pub use packet::{PacketError, PacketHeader, PacketType};
