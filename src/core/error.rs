//! Error types for the protocol stack.
//!
//! Every layer has its own error enum, and every error maps to a stable
//! integer code inside that layer's band (see [`crate::core::constants`]):
//! physical `[-32, -1]`, link `[-64, -33]`, transport `[-96, -65]`,
//! stack `[-128, -97]`. `0` is success. Wrapping variants delegate
//! [`code`](StackError::code) to the inner error so the originating band
//! survives propagation across layers.

use thiserror::Error;

use super::constants::{
    ERROR_BAND_LINK, ERROR_BAND_PHYSICAL, ERROR_BAND_STACK, ERROR_BAND_TRANSPORT,
    ERROR_BAND_WIDTH,
};

/// Which layer an error code originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBand {
    /// Physical byte transport, codes in `[-32, -1]`.
    Physical,
    /// Link layer, codes in `[-64, -33]`.
    Link,
    /// Transport layer, codes in `[-96, -65]`.
    Transport,
    /// Stack coordinator, codes in `[-128, -97]`.
    Stack,
}

impl ErrorBand {
    /// Classify an integer error code by its band.
    ///
    /// Returns `None` for `0` (success) and for codes outside every band.
    pub fn of(code: i32) -> Option<Self> {
        match code {
            c if (ERROR_BAND_PHYSICAL - ERROR_BAND_WIDTH + 1..=ERROR_BAND_PHYSICAL).contains(&c) => {
                Some(Self::Physical)
            }
            c if (ERROR_BAND_LINK - ERROR_BAND_WIDTH + 1..=ERROR_BAND_LINK).contains(&c) => {
                Some(Self::Link)
            }
            c if (ERROR_BAND_TRANSPORT - ERROR_BAND_WIDTH + 1..=ERROR_BAND_TRANSPORT)
                .contains(&c) =>
            {
                Some(Self::Transport)
            }
            c if (ERROR_BAND_STACK - ERROR_BAND_WIDTH + 1..=ERROR_BAND_STACK).contains(&c) => {
                Some(Self::Stack)
            }
            _ => None,
        }
    }
}

/// Errors reported by a physical transport implementation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalError {
    /// The device is busy and cannot accept data right now.
    #[error("device busy")]
    Busy,

    /// A hardware buffer overflowed.
    #[error("hardware buffer overflow")]
    Overflow,

    /// The operation timed out at the hardware level.
    #[error("hardware timeout")]
    Timeout,

    /// The hardware reported a failure.
    #[error("hardware failure")]
    Hardware,

    /// The hardware has not been initialized.
    #[error("hardware not initialized")]
    NotInitialized,
}

impl PhysicalError {
    /// Integer code in the physical band `[-32, -1]`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Busy => ERROR_BAND_PHYSICAL,
            Self::Overflow => ERROR_BAND_PHYSICAL - 1,
            Self::Timeout => ERROR_BAND_PHYSICAL - 2,
            Self::Hardware => ERROR_BAND_PHYSICAL - 3,
            Self::NotInitialized => ERROR_BAND_PHYSICAL - 4,
        }
    }
}

/// Errors reported by the link layer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The payload does not fit in a single link frame.
    #[error("payload too large for a single frame")]
    PayloadTooLarge,

    /// The egress ring lacks space for the encoded frame, or the ingress
    /// ring overflowed (the ingress ring is cleared to recover).
    #[error("link buffer full")]
    BufferFull,
}

impl LinkError {
    /// Integer code in the link band `[-64, -33]`.
    pub fn code(&self) -> i32 {
        match self {
            Self::PayloadTooLarge => ERROR_BAND_LINK,
            Self::BufferFull => ERROR_BAND_LINK - 1,
        }
    }
}

/// Errors reported by the transport layer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Empty or oversize payload.
    #[error("invalid payload length")]
    InvalidParam,

    /// The operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// The operation is not valid in the current connection state.
    #[error("invalid state for operation")]
    InvalidState,

    /// The link layer rejected the packet.
    #[error(transparent)]
    Link(#[from] LinkError),
}

impl TransportError {
    /// Integer code: transport band `[-96, -65]`, or the wrapped link code.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParam => ERROR_BAND_TRANSPORT,
            Self::NotConnected => ERROR_BAND_TRANSPORT - 1,
            Self::InvalidState => ERROR_BAND_TRANSPORT - 2,
            Self::Link(e) => e.code(),
        }
    }
}

/// Errors returned by the [`Stack`](crate::stack::Stack) API.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The stack is in the wrong state for this operation, or the call
    /// re-entered the stack from a user callback.
    #[error("invalid stack state for operation")]
    InvalidState,

    /// The operation requires an established connection.
    #[error("stack not connected")]
    NotConnected,

    /// Empty payload or otherwise invalid argument.
    #[error("invalid parameter")]
    InvalidParam,

    /// A transport layer error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A link layer error.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// A physical transport error.
    #[error(transparent)]
    Physical(#[from] PhysicalError),
}

impl StackError {
    /// Integer code: stack band `[-128, -97]`, or the wrapped layer code.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidState => ERROR_BAND_STACK,
            Self::NotConnected => ERROR_BAND_STACK - 1,
            Self::InvalidParam => ERROR_BAND_STACK - 2,
            Self::Transport(e) => e.code(),
            Self::Link(e) => e.code(),
            Self::Physical(e) => e.code(),
        }
    }
}
