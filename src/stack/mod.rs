//! Stack coordinator: owns the layers, drives them, and surfaces a
//! small, stable event set to the embedder.
//!
//! The coordinator is the only component the embedder touches. It owns
//! the link and transport layers plus the injected physical transport
//! and clock, wires packets down and deliveries up, and translates
//! layer outcomes into [`StackEvent`]s delivered through user callbacks.
//!
//! Progress is cooperative. Four entry points drive everything:
//!
//! - [`Stack::tick`] — periodic, for timeouts and keep-alives;
//! - [`Stack::process_outgoing_data`] — after an
//!   [`StackEvent::OutgoingDataAvailable`];
//! - [`Stack::process_incoming_data`] — after an
//!   [`StackEvent::IncomingDataAvailable`], or in a polled loop;
//! - [`Stack::queue_link_data`] — from the byte-arrival path, typically
//!   a driver callback.
//!
//! All user callbacks run synchronously inside these entry points. A
//! callback must not re-enter the stack; re-entrant calls are rejected
//! with the stack's invalid-state error. Only the callback setters are
//! safe to call from a callback.

use tracing::{debug, warn};

use crate::core::constants::{
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_KEEPALIVE_INTERVAL_MS, DEFAULT_MAX_RETRIES,
    LINK_MAX_PAYLOAD_SIZE,
};
use crate::core::{Clock, PhysicalTransport, StackError};
use crate::link::{FramePoll, LinkLayer};
use crate::transport::{TransportEvent, TransportLayer};

/// Tunable timing parameters, applied at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Interval between keep-alive probes; the keep-alive timeout is
    /// three times this value.
    pub keepalive_interval_ms: u32,
    /// Retransmit-and-fail window for connection setup and teardown.
    pub connection_timeout_ms: u32,
    /// SYN retransmissions before the connection attempt fails.
    pub max_retries: u8,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Coordinator state, a user-facing summary of the transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    /// Constructed but not yet initialized.
    Init,
    /// Initialized; disconnected or listening.
    Ready,
    /// Connection setup in progress.
    Connecting,
    /// Connected; stream data may flow.
    Connected,
    /// Connection setup failed or an unrecoverable error occurred;
    /// call [`Stack::reset`].
    Error,
}

/// Events surfaced to the embedder through the event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    /// The stack finished initializing and is ready for use.
    Ready,
    /// A connection was established.
    Connected,
    /// The connection was torn down.
    Disconnected,
    /// An unrecoverable error occurred.
    Error,
    /// Connection setup retries were exhausted or the keep-alive
    /// timeout expired.
    Timeout,
    /// Stream data was delivered to the data callback.
    DataReceived,
    /// A payload was accepted for transmission.
    DataSent,
    /// A datagram was delivered to the datagram callback.
    DatagramReceived,
    /// Encoded bytes are queued; call
    /// [`process_outgoing_data`](Stack::process_outgoing_data).
    OutgoingDataAvailable,
    /// Raw bytes are queued; call
    /// [`process_incoming_data`](Stack::process_incoming_data).
    IncomingDataAvailable,
}

type EventCallback = Box<dyn FnMut(StackEvent)>;
type DataCallback = Box<dyn FnMut(&[u8])>;

/// The full protocol stack: link layer, transport layer, and the glue
/// between them, the physical transport, and the user.
pub struct Stack<P: PhysicalTransport, C: Clock> {
    phy: P,
    clock: C,
    link: LinkLayer,
    transport: TransportLayer,
    state: StackState,
    event_callback: Option<EventCallback>,
    data_callback: Option<DataCallback>,
    datagram_callback: Option<DataCallback>,
    in_callback: bool,
}

impl<P: PhysicalTransport, C: Clock> Stack<P, C> {
    /// Assemble a stack over the given physical transport and clock.
    ///
    /// The stack starts in [`StackState::Init`]; call
    /// [`initialize`](Self::initialize) before anything else.
    pub fn new(phy: P, clock: C, config: StackConfig) -> Self {
        let mut transport = TransportLayer::new();
        transport.set_timeouts(config.keepalive_interval_ms, config.connection_timeout_ms);
        transport.set_max_retries(config.max_retries);

        Self {
            phy,
            clock,
            link: LinkLayer::new(),
            transport,
            state: StackState::Init,
            event_callback: None,
            data_callback: None,
            datagram_callback: None,
            in_callback: false,
        }
    }

    /// Bring all layers to their initial state and report readiness.
    pub fn initialize(&mut self) {
        self.link.reset();
        self.transport.reset();
        self.state = StackState::Ready;
        debug!("stack initialized");
        self.emit(StackEvent::Ready);
    }

    /// Tear down and re-initialize every layer, e.g. after a failed
    /// connection attempt.
    pub fn reset(&mut self) -> Result<(), StackError> {
        self.guard()?;
        self.initialize();
        Ok(())
    }

    /// Current coordinator state.
    pub fn state(&self) -> StackState {
        self.state
    }

    /// True while a connection is established.
    pub fn is_connected(&self) -> bool {
        self.state == StackState::Connected
    }

    /// Adjust the keep-alive interval and connection timeout at runtime.
    pub fn set_timeouts(&mut self, keepalive_ms: u32, timeout_ms: u32) {
        self.transport.set_timeouts(keepalive_ms, timeout_ms);
    }

    /// Set the callback receiving [`StackEvent`]s. Safe from callbacks.
    pub fn set_event_callback(&mut self, callback: impl FnMut(StackEvent) + 'static) {
        self.event_callback = Some(Box::new(callback));
    }

    /// Set the callback receiving in-order stream data. Safe from
    /// callbacks.
    pub fn set_data_callback(&mut self, callback: impl FnMut(&[u8]) + 'static) {
        self.data_callback = Some(Box::new(callback));
    }

    /// Set the callback receiving datagrams. Safe from callbacks.
    pub fn set_datagram_callback(&mut self, callback: impl FnMut(&[u8]) + 'static) {
        self.datagram_callback = Some(Box::new(callback));
    }

    /// Initiate a connection as the client.
    ///
    /// Returns success without effect while already connected; during an
    /// unfinished handshake the SYN is re-sent without duplicating state.
    pub fn connect(&mut self) -> Result<(), StackError> {
        self.guard()?;
        match self.state {
            StackState::Connected => Ok(()),
            StackState::Ready | StackState::Connecting => {
                self.state = StackState::Connecting;
                let now = self.clock.now_ms();
                if let Err(e) = self.transport.connect(&mut self.link, now) {
                    self.fail(e.into());
                    return Err(e.into());
                }
                self.flush_outgoing_available();
                Ok(())
            }
            _ => Err(StackError::InvalidState),
        }
    }

    /// Start listening for a connection as the server.
    ///
    /// The stack stays [`StackState::Ready`] while listening; the state
    /// changes when a handshake completes.
    pub fn listen(&mut self) -> Result<(), StackError> {
        self.guard()?;
        match self.state {
            StackState::Connected => Ok(()),
            StackState::Ready => {
                if let Err(e) = self.transport.listen() {
                    self.fail(e.into());
                    return Err(e.into());
                }
                Ok(())
            }
            _ => Err(StackError::InvalidState),
        }
    }

    /// Start a graceful disconnect.
    pub fn disconnect(&mut self) -> Result<(), StackError> {
        self.guard()?;
        if self.state != StackState::Connected {
            return Err(StackError::NotConnected);
        }
        let now = self.clock.now_ms();
        if let Err(e) = self.transport.disconnect(&mut self.link, now) {
            self.fail(e.into());
            return Err(e.into());
        }
        self.flush_outgoing_available();
        self.state = StackState::Ready;
        self.emit(StackEvent::Disconnected);
        Ok(())
    }

    /// Send a sequenced, acknowledged payload to the peer.
    pub fn send(&mut self, data: &[u8]) -> Result<(), StackError> {
        self.guard()?;
        if data.is_empty() {
            return Err(StackError::InvalidParam);
        }
        if self.state != StackState::Connected {
            return Err(StackError::InvalidState);
        }
        let now = self.clock.now_ms();
        self.transport.send(data, &mut self.link, now)?;
        self.flush_outgoing_available();
        self.emit(StackEvent::DataSent);
        Ok(())
    }

    /// Send a fire-and-forget datagram; usable before any connection.
    pub fn send_datagram(&mut self, data: &[u8]) -> Result<(), StackError> {
        self.guard()?;
        if data.is_empty() {
            return Err(StackError::InvalidParam);
        }
        if self.state != StackState::Ready && self.state != StackState::Connected {
            return Err(StackError::InvalidState);
        }
        self.transport.send_datagram(data, &mut self.link)?;
        self.flush_outgoing_available();
        self.emit(StackEvent::DataSent);
        Ok(())
    }

    /// Poll timeouts and keep-alives. Call periodically.
    pub fn tick(&mut self) -> Result<(), StackError> {
        self.guard()?;
        let now = self.clock.now_ms();
        if let Some(event) = self.transport.tick(&mut self.link, now) {
            self.route(event);
        }
        self.flush_outgoing_available();
        Ok(())
    }

    /// Hand queued egress bytes to the physical transport.
    ///
    /// Returns the number of bytes the hardware accepted; the rest stays
    /// queued for the next call. A physical error is surfaced as an
    /// [`StackEvent::Error`] as well as returned.
    pub fn process_outgoing_data(&mut self) -> Result<usize, StackError> {
        self.guard()?;
        match self.link.pump_egress(&mut self.phy) {
            Ok(accepted) => Ok(accepted),
            Err(e) => {
                warn!(error = %e, "physical send failed");
                self.emit(StackEvent::Error);
                Err(e.into())
            }
        }
    }

    /// Parse queued ingress bytes into frames and dispatch them.
    ///
    /// Runs until the ingress ring has no complete frame left. Stream
    /// and datagram payloads reach their callbacks from here.
    pub fn process_incoming_data(&mut self) -> Result<(), StackError> {
        self.guard()?;
        let mut payload = [0u8; LINK_MAX_PAYLOAD_SIZE];
        loop {
            match self.link.poll_frame(&mut payload) {
                FramePoll::Frame { len } => {
                    let now = self.clock.now_ms();
                    let event = self
                        .transport
                        .on_receive(&payload[..len], &mut self.link, now);
                    if let Some(event) = event {
                        self.route(event);
                    }
                    self.flush_outgoing_available();
                }
                FramePoll::CrcError => {
                    // Resynchronization already happened; keep going.
                    warn!("crc error on inbound frame");
                }
                FramePoll::Pending => return Ok(()),
            }
        }
    }

    /// Queue raw bytes received from the physical channel.
    ///
    /// Intended to be cheap enough for a driver receive path; parsing
    /// happens later in [`process_incoming_data`](Self::process_incoming_data).
    pub fn queue_link_data(&mut self, data: &[u8]) -> Result<(), StackError> {
        self.guard()?;
        self.link.enqueue_received(data)?;
        self.emit(StackEvent::IncomingDataAvailable);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internal plumbing
    // ------------------------------------------------------------------

    /// Reject calls made from inside a user callback.
    fn guard(&self) -> Result<(), StackError> {
        if self.in_callback {
            return Err(StackError::InvalidState);
        }
        Ok(())
    }

    fn fail(&mut self, error: StackError) {
        warn!(code = error.code(), error = %error, "stack error");
        self.state = StackState::Error;
        self.emit(StackEvent::Error);
    }

    /// Translate a transport outcome into state and user events.
    fn route(&mut self, event: TransportEvent<'_>) {
        match event {
            TransportEvent::Connected => {
                self.state = StackState::Connected;
                self.emit(StackEvent::Connected);
            }
            TransportEvent::Disconnected => {
                self.state = StackState::Ready;
                self.emit(StackEvent::Disconnected);
            }
            TransportEvent::Timeout => {
                self.state = StackState::Error;
                self.emit(StackEvent::Timeout);
            }
            TransportEvent::PeerReset => {
                self.state = StackState::Error;
                self.emit(StackEvent::Error);
            }
            TransportEvent::Data(payload) => {
                self.in_callback = true;
                if let Some(cb) = self.data_callback.as_mut() {
                    cb(payload);
                }
                self.in_callback = false;
                self.emit(StackEvent::DataReceived);
            }
            TransportEvent::Datagram(payload) => {
                self.in_callback = true;
                if let Some(cb) = self.datagram_callback.as_mut() {
                    cb(payload);
                }
                self.in_callback = false;
                self.emit(StackEvent::DatagramReceived);
            }
        }
    }

    /// Emit an outgoing-data notification if the link queued new bytes
    /// since the last flush.
    fn flush_outgoing_available(&mut self) {
        if self.link.take_outgoing_available() {
            self.emit(StackEvent::OutgoingDataAvailable);
        }
    }

    fn emit(&mut self, event: StackEvent) {
        self.in_callback = true;
        if let Some(cb) = self.event_callback.as_mut() {
            cb(event);
        }
        self.in_callback = false;
    }
}
