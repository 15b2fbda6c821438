//! Error taxonomy for the protocol layer.
//!
//! | Error | Severity | Handling |
//! |-------|----------|----------|
//! | [`FrameDecodeError`] | recoverable | logged and dropped, session continues |
//! | [`UnsupportedMessage`] | informational | logged at debug level, ignored |
//! | [`ProtocolTimeout`] | link-level | surfaced as a link status event |
//! | [`TransportError`] | fatal to the link | session ends with `LinkLost` |
//! | [`CommandError`] | caller error | returned from `apply` |
//!
//! An incomplete frame is not an error: decoders report it through
//! [`Decoded::Incomplete`](crate::codec::Decoded::Incomplete).

use alloc::string::String;
use thiserror::Error;

use crate::session::LinkStatus;

/// A frame could not be decoded.
///
/// Checksum failures are a variant of this error rather than a separate type
/// so callers can treat every malformed frame the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameDecodeError {
    /// Trailing XOR checksum does not match the frame contents.
    #[error("checksum mismatch: expected {expected:#04x}, received {actual:#04x}")]
    Checksum {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum byte found in the frame.
        actual: u8,
    },

    /// Length field is smaller than the fixed part of the frame.
    #[error("declared length {declared} is below the minimum of {minimum}")]
    Length {
        /// Length declared by the frame.
        declared: usize,
        /// Smallest valid length for this frame kind.
        minimum: usize,
    },

    /// Frame is larger than any buffer this crate keeps.
    #[error("frame length {len} exceeds the maximum of {max}")]
    Oversize {
        /// Declared or observed length.
        len: usize,
        /// Largest accepted frame.
        max: usize,
    },

    /// Field contents are invalid for the message kind.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

impl FrameDecodeError {
    /// Returns `true` for checksum failures.
    pub const fn is_checksum(&self) -> bool {
        matches!(self, FrameDecodeError::Checksum { .. })
    }
}

/// A recognized message that the session has no handler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unsupported message {opcode:#06x}")]
pub struct UnsupportedMessage {
    /// Header, xheader or opcode of the message.
    pub opcode: u16,
}

/// An expected reply did not arrive in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[error("no reply to {what} within {after_ms} ms")]
pub struct ProtocolTimeout {
    /// Request that went unanswered.
    pub what: &'static str,
    /// Time waited before giving up.
    pub after_ms: u64,
}

/// Link-level failure. Ends the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer or local side closed the link.
    #[error("link closed")]
    Closed,

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(String),

    /// Link could not be opened.
    #[error("failed to open link: {0}")]
    Open(String),
}

#[cfg(feature = "std")]
impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use alloc::string::ToString;
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// A command from the rest of the system was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Link is not connected.
    #[error("link not ready ({0:?})")]
    LinkNotReady(LinkStatus),

    /// Loco address outside the DCC range.
    #[error("invalid loco address {0}")]
    InvalidAddress(u16),

    /// Function number outside F0..F28.
    #[error("invalid function number {0}")]
    InvalidFunction(u8),

    /// Outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,

    /// Tracking table for turnouts or inputs is full.
    #[error("tracking table full")]
    CacheFull,

    /// Command cannot be expressed on this protocol.
    #[error("unsupported command: {0}")]
    Unsupported(&'static str),

    /// Runtime task for the link has stopped.
    #[error("link task stopped")]
    LinkStopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn checksum_error_display() {
        let err = FrameDecodeError::Checksum {
            expected: 0xA0,
            actual: 0x00,
        };
        assert!(err.is_checksum());
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0xa0, received 0x00"
        );
    }

    #[test]
    fn length_error_is_not_checksum() {
        let err = FrameDecodeError::Length {
            declared: 2,
            minimum: 4,
        };
        assert!(!err.is_checksum());
    }

    #[test]
    fn timeout_display() {
        let err = ProtocolTimeout {
            what: "hardware info",
            after_ms: 3000,
        };
        assert_eq!(err.to_string(), "no reply to hardware info within 3000 ms");
    }

    #[cfg(feature = "std")]
    #[test]
    fn io_error_maps_to_closed() {
        let io = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert_eq!(TransportError::from(io), TransportError::Closed);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(matches!(TransportError::from(io), TransportError::Io(_)));
    }
}
