//! Connection state machine and reliable delivery.
//!
//! The transport layer owns the connection lifecycle (SYN / SYN-ACK /
//! ACK / FIN / FIN-ACK), stop-and-wait data delivery (DATA / DATA_ACK /
//! DATA_NACK), periodic keep-alive probing, and connectionless datagram
//! pass-through. It performs no I/O of its own: packets go down through
//! a borrowed [`LinkLayer`], timestamps come in as arguments, and
//! upward deliveries come back as [`TransportEvent`] return values the
//! stack coordinator routes to the user.
//!
//! Dispatch is state-gated. A packet type that is not expected in the
//! current state is silently dropped, not treated as a protocol error:
//! retransmitted control packets may arrive late and out of order, and
//! both peers must tolerate that. The only packets accepted with a
//! connection id other than the current one are SYNs carrying the
//! reserved id `0x00`.

use heapless::Vec;
use tracing::{debug, trace, warn};

use super::packet::{PacketHeader, PacketType};
use crate::core::constants::{
    CONNECTION_ID_FIRST, CONNECTION_ID_INVALID, DATAGRAM_HEADER_SIZE, DATAGRAM_MAX_PAYLOAD_SIZE,
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_KEEPALIVE_INTERVAL_MS, DEFAULT_MAX_RETRIES,
    KEEPALIVE_TIMEOUT_FACTOR, TRANSPORT_HEADER_SIZE, TRANSPORT_MAX_PACKET_SIZE,
    TRANSPORT_MAX_PAYLOAD_SIZE,
};
use crate::core::TransportError;
use crate::link::LinkLayer;

/// Transport layer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No connection; initial state.
    Disconnected,
    /// Acceptor mode: waiting for a SYN.
    Listening,
    /// Handshake in progress (either role).
    Connecting,
    /// Connection established; data transfer active.
    Connected,
    /// Graceful teardown in progress.
    Disconnecting,
    /// Connection setup failed; requires a reset.
    Error,
}

/// Upward outcome of a transport operation, routed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent<'a> {
    /// The connection was established.
    Connected,
    /// The connection was torn down (gracefully or by timeout).
    Disconnected,
    /// Connection setup retries were exhausted, or the keep-alive
    /// timeout expired.
    Timeout,
    /// The peer restarted and sent a fresh SYN while we were connected.
    PeerReset,
    /// An in-sequence DATA payload to deliver to the user.
    Data(&'a [u8]),
    /// A connectionless datagram payload to deliver to the user.
    Datagram(&'a [u8]),
}

/// Connection-oriented, sequenced, acknowledged transport.
pub struct TransportLayer {
    state: TransportState,
    /// Current connection id; `0x00` while unassigned.
    connection_id: u8,
    /// Allocation counter for acceptor-side connection ids. Monotonic
    /// across connections; reset only with the layer.
    conn_id_counter: u8,
    /// Next sequence number for outbound DATA.
    local_seq: u8,
    /// Next expected sequence number from the peer.
    peer_seq: u8,
    /// True exactly while the last outbound DATA has no DATA_ACK yet.
    awaiting_ack: bool,
    connect_retries: u8,
    waiting_response: bool,
    last_tx_ms: u32,
    last_keepalive_ack_ms: u32,
    last_keepalive_tx_ms: u32,
    /// Byte-exact copy of the last outbound DATA packet, so a DATA_NACK
    /// can trigger an identical retransmission.
    last_tx: Vec<u8, TRANSPORT_MAX_PACKET_SIZE>,
    /// Scratch for datagram assembly.
    tx_buf: [u8; TRANSPORT_MAX_PACKET_SIZE],

    keepalive_interval_ms: u32,
    connection_timeout_ms: u32,
    max_retries: u8,
}

impl TransportLayer {
    /// Create a disconnected transport layer with default timing.
    pub fn new() -> Self {
        Self {
            state: TransportState::Disconnected,
            connection_id: CONNECTION_ID_INVALID,
            conn_id_counter: 0,
            local_seq: 0,
            peer_seq: 0,
            awaiting_ack: false,
            connect_retries: 0,
            waiting_response: false,
            last_tx_ms: 0,
            last_keepalive_ack_ms: 0,
            last_keepalive_tx_ms: 0,
            last_tx: Vec::new(),
            tx_buf: [0; TRANSPORT_MAX_PACKET_SIZE],
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// True while a connection is established.
    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    /// True exactly while the last outbound DATA has not been ACKed.
    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Adjust the keep-alive interval and the setup/teardown timeout.
    pub fn set_timeouts(&mut self, keepalive_ms: u32, timeout_ms: u32) {
        debug!(keepalive_ms, timeout_ms, "transport timeouts updated");
        self.keepalive_interval_ms = keepalive_ms;
        self.connection_timeout_ms = timeout_ms;
    }

    /// Adjust the number of SYN retransmissions before giving up.
    pub fn set_max_retries(&mut self, retries: u8) {
        self.max_retries = retries;
    }

    /// Drop all connection state and return to `Disconnected`.
    pub fn reset(&mut self) {
        self.state = TransportState::Disconnected;
        self.connection_id = CONNECTION_ID_INVALID;
        self.conn_id_counter = 0;
        self.local_seq = 0;
        self.peer_seq = 0;
        self.awaiting_ack = false;
        self.connect_retries = 0;
        self.waiting_response = false;
        self.last_tx_ms = 0;
        self.last_keepalive_ack_ms = 0;
        self.last_keepalive_tx_ms = 0;
        self.last_tx.clear();
    }

    /// Initiate a connection as the client.
    ///
    /// Sends a SYN and starts the retry timer. Calling this again before
    /// the handshake completes re-sends the SYN without disturbing the
    /// in-progress state; calling it while connected is a no-op.
    pub fn connect(&mut self, link: &mut LinkLayer, now: u32) -> Result<(), TransportError> {
        match self.state {
            TransportState::Connected => Ok(()),
            TransportState::Connecting => {
                debug!("connect retried during handshake, re-sending syn");
                self.send_syn(link, now)
            }
            TransportState::Disconnected => {
                self.state = TransportState::Connecting;
                self.connect_retries = 0;
                self.waiting_response = true;
                // Seed from the clock so sequence numbers are not
                // predictable across resets.
                self.local_seq = (now & 0xFF) as u8;
                self.peer_seq = 0;
                debug!(seq = self.local_seq, "connecting");
                self.send_syn(link, now)
            }
            _ => Err(TransportError::InvalidState),
        }
    }

    /// Start listening for a connection as the server.
    pub fn listen(&mut self) -> Result<(), TransportError> {
        match self.state {
            TransportState::Listening | TransportState::Connected => Ok(()),
            TransportState::Disconnected => {
                self.state = TransportState::Listening;
                self.local_seq = 0;
                self.peer_seq = 0;
                debug!("listening");
                Ok(())
            }
            _ => Err(TransportError::InvalidState),
        }
    }

    /// Start a graceful disconnect.
    pub fn disconnect(&mut self, link: &mut LinkLayer, now: u32) -> Result<(), TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.state = TransportState::Disconnecting;
        self.waiting_response = true;
        debug!("disconnecting");
        self.send_fin(link, now)
    }

    /// Send a sequenced, acknowledged payload.
    ///
    /// The packet is also kept in the retransmission buffer until its
    /// DATA_ACK arrives, so a DATA_NACK can replay it byte for byte.
    pub fn send(
        &mut self,
        payload: &[u8],
        link: &mut LinkLayer,
        now: u32,
    ) -> Result<(), TransportError> {
        if payload.is_empty() || payload.len() > TRANSPORT_MAX_PAYLOAD_SIZE {
            return Err(TransportError::InvalidParam);
        }
        if self.state != TransportState::Connected {
            return Err(TransportError::InvalidState);
        }

        let header = PacketHeader::data(self.connection_id, self.local_seq, payload.len() as u8);
        self.last_tx.clear();
        self.last_tx
            .extend_from_slice(&header.to_bytes())
            .and_then(|_| self.last_tx.extend_from_slice(payload))
            .expect("data packet fits the retransmission buffer");

        link.send(&self.last_tx)?;

        self.waiting_response = true;
        self.awaiting_ack = true;
        self.last_tx_ms = now;
        trace!(seq = self.local_seq, len = payload.len(), "data sent");
        self.local_seq = self.local_seq.wrapping_add(1);
        Ok(())
    }

    /// Send a fire-and-forget datagram, bypassing connection sequencing.
    ///
    /// Allowed in every state except `Error`, including before any
    /// connection exists.
    pub fn send_datagram(
        &mut self,
        payload: &[u8],
        link: &mut LinkLayer,
    ) -> Result<(), TransportError> {
        if payload.len() > DATAGRAM_MAX_PAYLOAD_SIZE {
            return Err(TransportError::InvalidParam);
        }
        if self.state == TransportState::Error {
            return Err(TransportError::InvalidState);
        }

        self.tx_buf[0] = PacketType::Datagram.as_byte();
        self.tx_buf[1] = payload.len() as u8;
        self.tx_buf[DATAGRAM_HEADER_SIZE..DATAGRAM_HEADER_SIZE + payload.len()]
            .copy_from_slice(payload);

        link.send(&self.tx_buf[..DATAGRAM_HEADER_SIZE + payload.len()])?;
        trace!(len = payload.len(), "datagram sent");
        Ok(())
    }

    /// Process one validated link payload.
    ///
    /// Returns the upward outcome, if any. Unexpected packet types and
    /// mismatched connection ids are dropped silently.
    pub fn on_receive<'a>(
        &mut self,
        packet: &'a [u8],
        link: &mut LinkLayer,
        now: u32,
    ) -> Option<TransportEvent<'a>> {
        if packet.len() < TRANSPORT_HEADER_SIZE {
            trace!(len = packet.len(), "runt packet dropped");
            return None;
        }

        let Some(packet_type) = PacketType::from_byte(packet[0]) else {
            trace!(type_byte = packet[0], "unknown packet type dropped");
            return None;
        };

        // Datagrams have their own two-byte header and skip every
        // connection check.
        if packet_type == PacketType::Datagram {
            if self.state == TransportState::Error {
                return None;
            }
            return Some(TransportEvent::Datagram(&packet[DATAGRAM_HEADER_SIZE..]));
        }

        let header = PacketHeader::from_bytes(packet).ok()?;
        trace!(
            ?packet_type,
            conn_id = header.conn_id,
            seq = header.seq,
            state = ?self.state,
            "packet received"
        );

        match packet_type {
            PacketType::Syn => self.handle_syn(&header, link, now),
            PacketType::SynAck => self.handle_syn_ack(&header, link, now),
            PacketType::Ack => self.handle_ack(&header, now),
            PacketType::Fin => self.handle_fin(&header, link, now),
            PacketType::FinAck => self.handle_fin_ack(&header),
            PacketType::Data => self.handle_data(&header, packet, link),
            PacketType::DataAck => {
                self.handle_data_ack(&header);
                None
            }
            PacketType::DataNack => {
                self.handle_data_nack(&header, link);
                None
            }
            PacketType::Keepalive => {
                self.handle_keepalive(&header, link);
                None
            }
            PacketType::KeepaliveAck => {
                self.handle_keepalive_ack(&header, now);
                None
            }
            PacketType::Datagram => unreachable!("handled above"),
        }
    }

    /// Poll timeouts and emit keep-alives. Call periodically.
    pub fn tick(&mut self, link: &mut LinkLayer, now: u32) -> Option<TransportEvent<'static>> {
        match self.state {
            TransportState::Connected => {
                let idle = now.wrapping_sub(self.last_keepalive_ack_ms);
                if idle > self.keepalive_interval_ms * KEEPALIVE_TIMEOUT_FACTOR {
                    warn!(idle_ms = idle, "keep-alive timeout, disconnecting");
                    self.state = TransportState::Disconnecting;
                    self.waiting_response = true;
                    self.last_tx_ms = now;
                    Some(TransportEvent::Timeout)
                } else if idle > self.keepalive_interval_ms
                    && now.wrapping_sub(self.last_keepalive_tx_ms) >= self.keepalive_interval_ms
                {
                    match self.send_keepalive(link) {
                        Ok(()) => self.last_keepalive_tx_ms = now,
                        Err(e) => warn!(error = %e, "keep-alive send failed"),
                    }
                    None
                } else {
                    None
                }
            }

            TransportState::Connecting
                if self.waiting_response
                    && now.wrapping_sub(self.last_tx_ms) > self.connection_timeout_ms =>
            {
                if self.connect_retries < self.max_retries {
                    self.connect_retries += 1;
                    debug!(
                        retry = self.connect_retries,
                        max = self.max_retries,
                        "connection timeout, re-sending syn"
                    );
                    if let Err(e) = self.send_syn(link, now) {
                        warn!(error = %e, "syn retransmission failed");
                    }
                    None
                } else {
                    warn!(retries = self.connect_retries, "connection failed");
                    self.state = TransportState::Error;
                    Some(TransportEvent::Timeout)
                }
            }

            TransportState::Disconnecting
                if self.waiting_response
                    && now.wrapping_sub(self.last_tx_ms) > self.connection_timeout_ms =>
            {
                debug!("disconnect timeout, forcing disconnect");
                self.state = TransportState::Disconnected;
                self.waiting_response = false;
                self.connection_id = CONNECTION_ID_INVALID;
                Some(TransportEvent::Disconnected)
            }

            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Inbound packet handlers
    // ------------------------------------------------------------------

    fn handle_syn<'a>(
        &mut self,
        header: &PacketHeader,
        link: &mut LinkLayer,
        now: u32,
    ) -> Option<TransportEvent<'a>> {
        match self.state {
            // A SYN with the reserved id while connected means the peer
            // restarted. Drop the connection; the peer will handshake anew.
            TransportState::Connected if header.conn_id == CONNECTION_ID_INVALID => {
                debug!("peer reset detected, dropping connection");
                self.peer_seq = header.seq;
                self.state = TransportState::Disconnected;
                self.connection_id = CONNECTION_ID_INVALID;
                Some(TransportEvent::PeerReset)
            }
            TransportState::Listening if header.conn_id == CONNECTION_ID_INVALID => {
                self.peer_seq = header.seq;
                self.state = TransportState::Connecting;
                self.waiting_response = true;
                self.local_seq = (now & 0xFF) as u8;
                debug!(peer_seq = self.peer_seq, "accepting connection");
                if let Err(e) = self.send_syn_ack(link, now) {
                    warn!(error = %e, "syn-ack send failed");
                }
                None
            }
            _ => {
                trace!(state = ?self.state, conn_id = header.conn_id, "syn dropped");
                None
            }
        }
    }

    fn handle_syn_ack<'a>(
        &mut self,
        header: &PacketHeader,
        link: &mut LinkLayer,
        now: u32,
    ) -> Option<TransportEvent<'a>> {
        if self.state != TransportState::Connecting {
            trace!(state = ?self.state, "syn-ack dropped");
            return None;
        }

        // Adopt the server-assigned connection id and the server's
        // initial sequence, then complete the three-way handshake.
        self.connection_id = header.conn_id;
        self.peer_seq = header.seq;
        if let Err(e) = self.send_ack(header.conn_id, header.seq, link) {
            warn!(error = %e, "handshake ack send failed");
        }

        self.establish(now);
        Some(TransportEvent::Connected)
    }

    fn handle_ack<'a>(&mut self, header: &PacketHeader, now: u32) -> Option<TransportEvent<'a>> {
        if header.conn_id != self.connection_id {
            trace!(conn_id = header.conn_id, "ack with foreign conn id dropped");
            return None;
        }

        match self.state {
            // Server side: the client echoed our SYN-ACK sequence.
            TransportState::Connecting if header.seq == self.local_seq => {
                self.establish(now);
                Some(TransportEvent::Connected)
            }
            TransportState::Disconnecting => {
                self.state = TransportState::Disconnected;
                self.waiting_response = false;
                self.connection_id = CONNECTION_ID_INVALID;
                debug!("disconnect completed");
                Some(TransportEvent::Disconnected)
            }
            _ => None,
        }
    }

    fn handle_fin<'a>(
        &mut self,
        header: &PacketHeader,
        link: &mut LinkLayer,
        now: u32,
    ) -> Option<TransportEvent<'a>> {
        if self.state != TransportState::Connected || header.conn_id != self.connection_id {
            return None;
        }

        if let Err(e) = self.send_ack(header.conn_id, self.local_seq, link) {
            warn!(error = %e, "fin ack send failed");
        }
        if let Err(e) = self.send_fin(link, now) {
            warn!(error = %e, "fin send failed");
        }
        self.state = TransportState::Disconnecting;
        self.waiting_response = true;
        None
    }

    fn handle_fin_ack<'a>(&mut self, header: &PacketHeader) -> Option<TransportEvent<'a>> {
        if self.state != TransportState::Disconnecting || header.conn_id != self.connection_id {
            return None;
        }
        self.state = TransportState::Disconnected;
        self.waiting_response = false;
        self.connection_id = CONNECTION_ID_INVALID;
        debug!("disconnect completed");
        Some(TransportEvent::Disconnected)
    }

    fn handle_data<'a>(
        &mut self,
        header: &PacketHeader,
        packet: &'a [u8],
        link: &mut LinkLayer,
    ) -> Option<TransportEvent<'a>> {
        if self.state != TransportState::Connected {
            return None;
        }
        if header.conn_id != self.connection_id {
            trace!(conn_id = header.conn_id, "data with foreign conn id dropped");
            return None;
        }

        if header.seq != self.peer_seq {
            debug!(
                got = header.seq,
                expected = self.peer_seq,
                "sequence mismatch, nacking"
            );
            if let Err(e) = self.send_data_nack(header.seq, link) {
                warn!(error = %e, "data nack send failed");
            }
            return None;
        }

        if let Err(e) = self.send_data_ack(header.seq, link) {
            warn!(error = %e, "data ack send failed");
        }
        self.peer_seq = self.peer_seq.wrapping_add(1);
        Some(TransportEvent::Data(&packet[TRANSPORT_HEADER_SIZE..]))
    }

    fn handle_data_ack(&mut self, header: &PacketHeader) {
        if header.conn_id != self.connection_id || self.state != TransportState::Connected {
            return;
        }
        // Stop-and-wait: while awaiting_ack is set, exactly one DATA
        // (sequence local_seq - 1) is in flight, so a matching ack is
        // unambiguous.
        if !self.awaiting_ack || header.seq != self.local_seq.wrapping_sub(1) {
            return;
        }
        debug_assert!(!self.last_tx.is_empty());
        self.awaiting_ack = false;
        trace!(seq = header.seq, "data acked");
    }

    fn handle_data_nack(&mut self, header: &PacketHeader, link: &mut LinkLayer) {
        if header.conn_id != self.connection_id || self.state != TransportState::Connected {
            return;
        }
        if !self.awaiting_ack || header.seq != self.local_seq.wrapping_sub(1) {
            return;
        }
        debug_assert!(!self.last_tx.is_empty());
        debug!(seq = header.seq, "nack received, retransmitting");
        if let Err(e) = link.send(&self.last_tx) {
            warn!(error = %e, "retransmission failed");
        }
    }

    fn handle_keepalive(&mut self, header: &PacketHeader, link: &mut LinkLayer) {
        if self.state != TransportState::Connected || header.conn_id != self.connection_id {
            return;
        }
        let ack = PacketHeader::control(PacketType::KeepaliveAck, self.connection_id, 0);
        if let Err(e) = link.send(&ack.to_bytes()) {
            warn!(error = %e, "keep-alive ack send failed");
        }
    }

    fn handle_keepalive_ack(&mut self, header: &PacketHeader, now: u32) {
        if self.state != TransportState::Connected || header.conn_id != self.connection_id {
            return;
        }
        self.last_keepalive_ack_ms = now;
    }

    // ------------------------------------------------------------------
    // Outbound control packets
    // ------------------------------------------------------------------

    fn establish(&mut self, now: u32) {
        self.state = TransportState::Connected;
        self.waiting_response = false;
        self.connect_retries = 0;
        self.last_keepalive_ack_ms = now;
        self.last_keepalive_tx_ms = now;
        debug!(conn_id = self.connection_id, "connection established");
    }

    fn send_syn(&mut self, link: &mut LinkLayer, now: u32) -> Result<(), TransportError> {
        let header = PacketHeader::control(PacketType::Syn, CONNECTION_ID_INVALID, self.local_seq);
        link.send(&header.to_bytes())?;
        self.last_tx_ms = now;
        Ok(())
    }

    fn send_syn_ack(&mut self, link: &mut LinkLayer, now: u32) -> Result<(), TransportError> {
        // Allocate the next connection id, skipping the reserved zero.
        self.conn_id_counter = self.conn_id_counter.wrapping_add(1);
        if self.conn_id_counter == CONNECTION_ID_INVALID {
            self.conn_id_counter = CONNECTION_ID_FIRST;
        }
        self.connection_id = self.conn_id_counter;

        debug!(conn_id = self.connection_id, seq = self.local_seq, "syn-ack");
        let header = PacketHeader::control(PacketType::SynAck, self.connection_id, self.local_seq);
        link.send(&header.to_bytes())?;
        self.last_tx_ms = now;
        Ok(())
    }

    fn send_ack(&mut self, conn_id: u8, seq: u8, link: &mut LinkLayer) -> Result<(), TransportError> {
        let header = PacketHeader::control(PacketType::Ack, conn_id, seq);
        link.send(&header.to_bytes()).map_err(Into::into)
    }

    fn send_fin(&mut self, link: &mut LinkLayer, now: u32) -> Result<(), TransportError> {
        let header = PacketHeader::control(PacketType::Fin, self.connection_id, self.local_seq);
        link.send(&header.to_bytes())?;
        self.last_tx_ms = now;
        Ok(())
    }

    fn send_data_ack(&mut self, seq: u8, link: &mut LinkLayer) -> Result<(), TransportError> {
        let header = PacketHeader::control(PacketType::DataAck, self.connection_id, seq);
        link.send(&header.to_bytes()).map_err(Into::into)
    }

    fn send_data_nack(&mut self, seq: u8, link: &mut LinkLayer) -> Result<(), TransportError> {
        let header = PacketHeader::control(PacketType::DataNack, self.connection_id, seq);
        link.send(&header.to_bytes()).map_err(Into::into)
    }

    fn send_keepalive(&mut self, link: &mut LinkLayer) -> Result<(), TransportError> {
        let header = PacketHeader::control(PacketType::Keepalive, self.connection_id, 0);
        link.send(&header.to_bytes()).map_err(Into::into)
    }
}

impl Default for TransportLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::LINK_MAX_PAYLOAD_SIZE;
    use crate::core::{PhysicalError, PhysicalTransport};
    use crate::link::cobs;

    /// Accept-everything physical transport that records the wire bytes.
    struct CapturePhy(std::vec::Vec<u8>);

    impl PhysicalTransport for CapturePhy {
        fn send(&mut self, data: &[u8]) -> Result<usize, PhysicalError> {
            self.0.extend_from_slice(data);
            Ok(data.len())
        }
    }

    /// Drain a link's egress ring and return the raw wire bytes.
    fn wire(link: &mut LinkLayer) -> std::vec::Vec<u8> {
        let mut phy = CapturePhy(std::vec::Vec::new());
        link.pump_egress(&mut phy).unwrap();
        phy.0
    }

    /// Split raw wire bytes into the transport packets they carry.
    fn packets(wire: &[u8]) -> std::vec::Vec<std::vec::Vec<u8>> {
        let mut out = std::vec::Vec::new();
        let mut rest = wire;
        let mut buf = [0u8; 260];
        while !rest.is_empty() {
            let d = cobs::decode(rest, &mut buf).unwrap();
            // Strip the link header and CRC trailer.
            out.push(buf[2..d.len - 2].to_vec());
            rest = &rest[d.consumed..];
        }
        out
    }

    /// Owned mirror of `TransportEvent` for collecting across calls.
    #[derive(Debug, PartialEq, Eq)]
    enum Ev {
        Connected,
        Disconnected,
        Timeout,
        PeerReset,
        Data(std::vec::Vec<u8>),
        Datagram(std::vec::Vec<u8>),
    }

    fn own(e: TransportEvent<'_>) -> Ev {
        match e {
            TransportEvent::Connected => Ev::Connected,
            TransportEvent::Disconnected => Ev::Disconnected,
            TransportEvent::Timeout => Ev::Timeout,
            TransportEvent::PeerReset => Ev::PeerReset,
            TransportEvent::Data(p) => Ev::Data(p.to_vec()),
            TransportEvent::Datagram(p) => Ev::Datagram(p.to_vec()),
        }
    }

    /// Push wire bytes through a peer's link and transport.
    fn deliver(
        bytes: &[u8],
        transport: &mut TransportLayer,
        link: &mut LinkLayer,
        now: u32,
    ) -> std::vec::Vec<Ev> {
        link.enqueue_received(bytes).unwrap();
        let mut out = [0u8; LINK_MAX_PAYLOAD_SIZE];
        let mut events = std::vec::Vec::new();
        loop {
            match link.poll_frame(&mut out) {
                crate::link::FramePoll::Frame { len } => {
                    if let Some(ev) = transport.on_receive(&out[..len], link, now) {
                        events.push(own(ev));
                    }
                }
                crate::link::FramePoll::CrcError => {}
                crate::link::FramePoll::Pending => break,
            }
        }
        events
    }

    /// Frame a hand-built transport packet as one link frame on the wire.
    fn frame_packet(packet: &[u8]) -> std::vec::Vec<u8> {
        let mut link = LinkLayer::new();
        link.send(packet).unwrap();
        wire(&mut link)
    }

    struct Peer {
        transport: TransportLayer,
        link: LinkLayer,
    }

    impl Peer {
        fn new() -> Self {
            Self {
                transport: TransportLayer::new(),
                link: LinkLayer::new(),
            }
        }
    }

    /// Run the full three-way handshake between a client and a server.
    ///
    /// Client sequence comes from `client_now & 0xFF`, server sequence
    /// from `server_now & 0xFF`.
    fn handshake(client: &mut Peer, server: &mut Peer, client_now: u32, server_now: u32) {
        server.transport.listen().unwrap();
        client
            .transport
            .connect(&mut client.link, client_now)
            .unwrap();

        let syn = wire(&mut client.link);
        assert!(deliver(&syn, &mut server.transport, &mut server.link, server_now).is_empty());

        let syn_ack = wire(&mut server.link);
        let evs = deliver(&syn_ack, &mut client.transport, &mut client.link, client_now);
        assert_eq!(evs, vec![Ev::Connected]);

        let ack = wire(&mut client.link);
        let evs = deliver(&ack, &mut server.transport, &mut server.link, server_now);
        assert_eq!(evs, vec![Ev::Connected]);

        assert!(client.transport.is_connected());
        assert!(server.transport.is_connected());
    }

    #[test]
    fn test_handshake_wire_format() {
        let mut client = Peer::new();
        let mut server = Peer::new();

        server.transport.listen().unwrap();
        client.transport.connect(&mut client.link, 0x342).unwrap();

        // SYN: conn id 0, client sequence from the clock's low byte.
        let syn = wire(&mut client.link);
        assert_eq!(packets(&syn), vec![vec![0x01, 0x00, 0x42, 0x00]]);

        deliver(&syn, &mut server.transport, &mut server.link, 0x117);

        // SYN-ACK: first allocated conn id, server sequence.
        let syn_ack = wire(&mut server.link);
        assert_eq!(packets(&syn_ack), vec![vec![0x02, 0x01, 0x17, 0x00]]);

        let evs = deliver(&syn_ack, &mut client.transport, &mut client.link, 0x342);
        assert_eq!(evs, vec![Ev::Connected]);

        // ACK echoes the server sequence on the allocated conn id.
        let ack = wire(&mut client.link);
        assert_eq!(packets(&ack), vec![vec![0x03, 0x01, 0x17, 0x00]]);

        let evs = deliver(&ack, &mut server.transport, &mut server.link, 0x117);
        assert_eq!(evs, vec![Ev::Connected]);
    }

    #[test]
    fn test_connect_idempotence() {
        let mut client = Peer::new();

        client.transport.connect(&mut client.link, 0x42).unwrap();
        let first = packets(&wire(&mut client.link));

        // A second connect during the handshake re-sends the same SYN.
        client.transport.connect(&mut client.link, 0x99).unwrap();
        let second = packets(&wire(&mut client.link));
        assert_eq!(first, second);
        assert_eq!(client.transport.state(), TransportState::Connecting);

        // Connect while connected is a silent no-op.
        let mut server = Peer::new();
        let mut client = Peer::new();
        handshake(&mut client, &mut server, 0x42, 0x17);
        client.transport.connect(&mut client.link, 0x55).unwrap();
        assert!(wire(&mut client.link).is_empty());
        assert!(client.transport.is_connected());
    }

    #[test]
    fn test_listen_idempotence() {
        let mut t = TransportLayer::new();
        t.listen().unwrap();
        t.listen().unwrap();
        assert_eq!(t.state(), TransportState::Listening);
    }

    #[test]
    fn test_data_roundtrip_with_ack() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x342, 0x117);

        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        client
            .transport
            .send(&payload, &mut client.link, 1000)
            .unwrap();
        assert!(client.transport.awaiting_ack());

        let data_wire = wire(&mut client.link);
        assert_eq!(
            packets(&data_wire),
            vec![vec![0x06, 0x01, 0x42, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]]
        );

        let evs = deliver(&data_wire, &mut server.transport, &mut server.link, 1000);
        assert_eq!(evs, vec![Ev::Data(payload.to_vec())]);

        // Server acked with the same sequence; client clears the flag.
        let ack_wire = wire(&mut server.link);
        assert_eq!(packets(&ack_wire), vec![vec![0x07, 0x01, 0x42, 0x00]]);

        deliver(&ack_wire, &mut client.transport, &mut client.link, 1001);
        assert!(!client.transport.awaiting_ack());
    }

    #[test]
    fn test_in_order_sequence_delivery() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x300, 0x100);

        for (i, payload) in [b"one", b"two", b"six"].iter().enumerate() {
            client
                .transport
                .send(*payload, &mut client.link, 1000 + i as u32)
                .unwrap();
            let evs = deliver(
                &wire(&mut client.link),
                &mut server.transport,
                &mut server.link,
                1000,
            );
            assert_eq!(evs, vec![Ev::Data(payload.to_vec())]);
            deliver(
                &wire(&mut server.link),
                &mut client.transport,
                &mut client.link,
                1000,
            );
        }
    }

    #[test]
    fn test_sequence_gap_nacked_not_delivered() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x307, 0x107);

        // Server expects seq 0x07; hand it seq 0x09 on the right conn id.
        let rogue = frame_packet(&[0x06, 0x01, 0x09, 0x01, 0x55]);
        let evs = deliver(&rogue, &mut server.transport, &mut server.link, 2000);
        assert!(evs.is_empty(), "gap packet must not be delivered");

        // The NACK echoes the offending sequence.
        let nack = packets(&wire(&mut server.link));
        assert_eq!(nack, vec![vec![0x08, 0x01, 0x09, 0x00]]);

        // An in-sequence packet still goes through: peer_seq is unchanged.
        let good = frame_packet(&[0x06, 0x01, 0x07, 0x01, 0x66]);
        let evs = deliver(&good, &mut server.transport, &mut server.link, 2001);
        assert_eq!(evs, vec![Ev::Data(vec![0x66])]);
    }

    #[test]
    fn test_nack_triggers_byte_exact_retransmission() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x342, 0x117);

        client
            .transport
            .send(&[0xAB, 0xCD], &mut client.link, 1000)
            .unwrap();
        let original = packets(&wire(&mut client.link));

        // NACK for the in-flight sequence replays the exact packet and
        // consumes no new sequence number.
        let nack = frame_packet(&[0x08, 0x01, 0x42, 0x00]);
        deliver(&nack, &mut client.transport, &mut client.link, 1100);
        let retransmitted = packets(&wire(&mut client.link));
        assert_eq!(retransmitted, original);
        assert!(client.transport.awaiting_ack());

        // The next fresh send uses the next sequence, not one beyond it.
        let ack = frame_packet(&[0x07, 0x01, 0x42, 0x00]);
        deliver(&ack, &mut client.transport, &mut client.link, 1200);
        client
            .transport
            .send(&[0xEE], &mut client.link, 1300)
            .unwrap();
        let next = packets(&wire(&mut client.link));
        assert_eq!(next, vec![vec![0x06, 0x01, 0x43, 0x01, 0xEE]]);
    }

    #[test]
    fn test_stale_nack_ignored() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x342, 0x117);

        // No DATA in flight: a NACK must not replay anything.
        let nack = frame_packet(&[0x08, 0x01, 0x41, 0x00]);
        deliver(&nack, &mut client.transport, &mut client.link, 1000);
        assert!(wire(&mut client.link).is_empty());
    }

    #[test]
    fn test_sequence_wraps_modulo_256() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        // Client initial sequence 0xFF: the first DATA wraps to 0x00 next.
        handshake(&mut client, &mut server, 0x3FF, 0x117);

        client.transport.send(&[0x01], &mut client.link, 1000).unwrap();
        let first_wire = wire(&mut client.link);
        let first = packets(&first_wire);
        assert_eq!(first[0][2], 0xFF);
        deliver(&first_wire, &mut server.transport, &mut server.link, 1000);
        // DATA_ACK for seq 0xFF clears awaiting_ack (0x00 - 1 == 0xFF).
        deliver(
            &wire(&mut server.link),
            &mut client.transport,
            &mut client.link,
            1000,
        );
        assert!(!client.transport.awaiting_ack());

        client.transport.send(&[0x02], &mut client.link, 1001).unwrap();
        let second = packets(&wire(&mut client.link));
        assert_eq!(second[0][2], 0x00);
    }

    #[test]
    fn test_foreign_conn_id_dropped() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x307, 0x107);

        // Right sequence, wrong connection id: no delivery, no ack.
        let rogue = frame_packet(&[0x06, 0x02, 0x07, 0x01, 0x55]);
        let evs = deliver(&rogue, &mut server.transport, &mut server.link, 2000);
        assert!(evs.is_empty());
        assert!(wire(&mut server.link).is_empty());
    }

    #[test]
    fn test_keepalive_probe_and_timeout() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        // Handshake at t=0 so probe times line up with the tick times.
        handshake(&mut client, &mut server, 0, 0);
        client.transport.set_timeouts(100, 3000);

        // Inside the interval: quiet.
        assert!(client.transport.tick(&mut client.link, 50).is_none());
        assert!(wire(&mut client.link).is_empty());

        // Past the interval: one probe, rate-limited afterwards.
        assert!(client.transport.tick(&mut client.link, 101).is_none());
        assert_eq!(
            packets(&wire(&mut client.link)),
            vec![vec![0x09, 0x01, 0x00, 0x00]]
        );
        assert!(client.transport.tick(&mut client.link, 150).is_none());
        assert!(wire(&mut client.link).is_empty());

        // Another interval without an ack: second probe.
        assert!(client.transport.tick(&mut client.link, 201).is_none());
        assert_eq!(
            packets(&wire(&mut client.link)),
            vec![vec![0x09, 0x01, 0x00, 0x00]]
        );

        // Three intervals of silence: timeout, graceful teardown starts.
        let ev = client.transport.tick(&mut client.link, 301);
        assert_eq!(ev, Some(TransportEvent::Timeout));
        assert_eq!(client.transport.state(), TransportState::Disconnecting);
    }

    #[test]
    fn test_keepalive_ack_defers_timeout() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0, 0);
        client.transport.set_timeouts(100, 3000);
        server.transport.set_timeouts(100, 3000);

        // Probe and answer every interval; no timeout ever fires.
        for round in 1..=10u32 {
            let now = round * 101;
            assert!(client.transport.tick(&mut client.link, now).is_none());
            let probe = wire(&mut client.link);
            assert!(!probe.is_empty(), "round {round} should probe");

            deliver(&probe, &mut server.transport, &mut server.link, now);
            let ka_ack = wire(&mut server.link);
            deliver(&ka_ack, &mut client.transport, &mut client.link, now);
        }
        assert!(client.transport.is_connected());
    }

    #[test]
    fn test_keepalive_answered_by_peer() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0, 0);
        client.transport.set_timeouts(100, 3000);

        client.transport.tick(&mut client.link, 101);
        let probe = wire(&mut client.link);
        deliver(&probe, &mut server.transport, &mut server.link, 101);

        assert_eq!(
            packets(&wire(&mut server.link)),
            vec![vec![0x0A, 0x01, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_syn_retry_then_error() {
        let mut client = Peer::new();
        client.transport.connect(&mut client.link, 0).unwrap();
        assert_eq!(packets(&wire(&mut client.link)).len(), 1);

        // Each timeout window re-sends the SYN, up to max_retries.
        for i in 1..=3u32 {
            let now = i * 3001;
            assert!(client.transport.tick(&mut client.link, now).is_none());
            assert_eq!(packets(&wire(&mut client.link)).len(), 1, "retry {i}");
        }

        // Retries exhausted: the next window fails the connection.
        let ev = client.transport.tick(&mut client.link, 4 * 3001);
        assert_eq!(ev, Some(TransportEvent::Timeout));
        assert_eq!(client.transport.state(), TransportState::Error);
        assert!(wire(&mut client.link).is_empty());
    }

    #[test]
    fn test_graceful_teardown() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x342, 0x117);

        client.transport.disconnect(&mut client.link, 5000).unwrap();
        let fin = wire(&mut client.link);
        assert_eq!(packets(&fin), vec![vec![0x04, 0x01, 0x42, 0x00]]);

        // Server acks the FIN and sends its own.
        assert!(deliver(&fin, &mut server.transport, &mut server.link, 5000).is_empty());
        assert_eq!(server.transport.state(), TransportState::Disconnecting);
        let replies = packets(&wire(&mut server.link));
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0][0], 0x03);
        assert_eq!(replies[1][0], 0x04);

        // The ACK completes the client's teardown; the trailing FIN is
        // dropped because the client is no longer connected.
        let mut server_wire = std::vec::Vec::new();
        for p in &replies {
            server_wire.extend_from_slice(&frame_packet(p));
        }
        let evs = deliver(&server_wire, &mut client.transport, &mut client.link, 5001);
        assert_eq!(evs, vec![Ev::Disconnected]);
        assert_eq!(client.transport.state(), TransportState::Disconnected);

        // The server never hears back and times out of DISCONNECTING.
        let ev = server.transport.tick(&mut server.link, 5000 + 3001);
        assert_eq!(ev, Some(TransportEvent::Disconnected));
        assert_eq!(server.transport.state(), TransportState::Disconnected);
    }

    #[test]
    fn test_disconnect_requires_connection() {
        let mut t = TransportLayer::new();
        let mut link = LinkLayer::new();
        assert_eq!(
            t.disconnect(&mut link, 0),
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn test_client_reset_drops_connection() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x342, 0x117);

        // A fresh SYN with the reserved conn id while connected.
        let rogue_syn = frame_packet(&[0x01, 0x00, 0x7A, 0x00]);
        let evs = deliver(&rogue_syn, &mut server.transport, &mut server.link, 9000);
        assert_eq!(evs, vec![Ev::PeerReset]);
        assert_eq!(server.transport.state(), TransportState::Disconnected);
        // No FIN goes out; the peer discovers via keep-alive.
        assert!(wire(&mut server.link).is_empty());
    }

    #[test]
    fn test_datagram_before_connection() {
        let mut a = Peer::new();
        let mut b = Peer::new();
        b.transport.listen().unwrap();

        a.transport
            .send_datagram(&[0x01, 0x02], &mut a.link)
            .unwrap();
        let dgram = wire(&mut a.link);
        assert_eq!(packets(&dgram), vec![vec![0x0B, 0x02, 0x01, 0x02]]);

        let evs = deliver(&dgram, &mut b.transport, &mut b.link, 0);
        assert_eq!(evs, vec![Ev::Datagram(vec![0x01, 0x02])]);
        // No acknowledgment of any kind.
        assert!(wire(&mut b.link).is_empty());
    }

    #[test]
    fn test_datagram_alongside_connection() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x342, 0x117);

        client
            .transport
            .send_datagram(b"side", &mut client.link)
            .unwrap();
        let evs = deliver(
            &wire(&mut client.link),
            &mut server.transport,
            &mut server.link,
            1000,
        );
        assert_eq!(evs, vec![Ev::Datagram(b"side".to_vec())]);
    }

    #[test]
    fn test_datagram_rejected_in_error_state() {
        let mut client = Peer::new();
        client.transport.connect(&mut client.link, 0).unwrap();
        wire(&mut client.link);
        for i in 1..=4u32 {
            client.transport.tick(&mut client.link, i * 3001);
            wire(&mut client.link);
        }
        assert_eq!(client.transport.state(), TransportState::Error);
        assert_eq!(
            client.transport.send_datagram(&[0x01], &mut client.link),
            Err(TransportError::InvalidState)
        );
    }

    #[test]
    fn test_send_parameter_and_state_errors() {
        let mut t = TransportLayer::new();
        let mut link = LinkLayer::new();

        assert_eq!(t.send(&[], &mut link, 0), Err(TransportError::InvalidParam));
        let oversize = [0u8; TRANSPORT_MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            t.send(&oversize, &mut link, 0),
            Err(TransportError::InvalidParam)
        );
        assert_eq!(
            t.send(&[0x01], &mut link, 0),
            Err(TransportError::InvalidState)
        );

        let oversize_dgram = [0u8; DATAGRAM_MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            t.send_datagram(&oversize_dgram, &mut link),
            Err(TransportError::InvalidParam)
        );
    }

    #[test]
    fn test_unexpected_packets_ignored() {
        let mut t = TransportLayer::new();
        let mut link = LinkLayer::new();

        // DATA, ACK and keep-alive mean nothing while disconnected.
        for pkt in [
            [0x06, 0x01, 0x00, 0x00],
            [0x03, 0x01, 0x00, 0x00],
            [0x09, 0x01, 0x00, 0x00],
            [0x02, 0x01, 0x00, 0x00],
        ] {
            assert!(t.on_receive(&pkt, &mut link, 0).is_none());
        }
        assert_eq!(t.state(), TransportState::Disconnected);
        assert!(wire(&mut link).is_empty());
    }

    #[test]
    fn test_conn_id_allocation_skips_zero() {
        let mut server = Peer::new();
        let mut expected: u8 = 0;

        // 256 accept cycles: ids run 1..=255 and then wrap to 1, never 0.
        for cycle in 0..256u32 {
            server.transport.listen().unwrap();
            let syn = frame_packet(&[0x01, 0x00, 0x10, 0x00]);
            deliver(&syn, &mut server.transport, &mut server.link, cycle);

            let syn_ack = packets(&wire(&mut server.link));
            let allocated = syn_ack[0][1];
            expected = expected.wrapping_add(1);
            if expected == 0 {
                expected = 1;
            }
            assert_eq!(allocated, expected, "cycle {cycle}");

            // Complete the handshake, then knock the server back down
            // with a client reset so it can listen again.
            let seq = syn_ack[0][2];
            let ack = frame_packet(&[0x03, allocated, seq, 0x00]);
            let evs = deliver(&ack, &mut server.transport, &mut server.link, cycle);
            assert_eq!(evs, vec![Ev::Connected]);

            let reset = frame_packet(&[0x01, 0x00, 0x20, 0x00]);
            let evs = deliver(&reset, &mut server.transport, &mut server.link, cycle);
            assert_eq!(evs, vec![Ev::PeerReset]);
        }
    }

    #[test]
    fn test_reset_returns_to_disconnected() {
        let mut client = Peer::new();
        let mut server = Peer::new();
        handshake(&mut client, &mut server, 0x342, 0x117);

        client.transport.reset();
        assert_eq!(client.transport.state(), TransportState::Disconnected);
        assert!(!client.transport.awaiting_ack());
    }
}
