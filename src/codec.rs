//! Shared pieces of the binary frame codecs.
//!
//! Every protocol module models its messages as a closed enum with one variant
//! per wire layout and implements [`WireMessage`] for it. Encoding always
//! succeeds and yields a bounded [`Frame`]; decoding distinguishes three
//! outcomes:
//!
//! - `Ok(Decoded::Complete { .. })`: one message and the bytes it consumed
//! - `Ok(Decoded::Incomplete { .. })`: the buffer ends inside a frame
//! - `Err(FrameDecodeError)`: the frame is malformed and must be dropped
//!
//! Byte order is a per-field property: helpers here exist for both orders so
//! each codec states explicitly which one a field uses.

use crate::error::FrameDecodeError;

/// Largest frame any codec in this crate produces or accepts.
pub const MAX_FRAME_LEN: usize = 128;

/// One encoded frame.
pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Outcome of a successful decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A whole frame was decoded.
    Complete {
        /// Decoded message.
        message: T,
        /// Number of input bytes the frame occupied.
        consumed: usize,
    },
    /// More bytes are required before the frame can be decoded.
    Incomplete {
        /// Minimum number of additional bytes needed.
        needed: usize,
    },
}

impl<T> Decoded<T> {
    /// Returns the message if complete.
    pub fn complete(self) -> Option<T> {
        match self {
            Decoded::Complete { message, .. } => Some(message),
            Decoded::Incomplete { .. } => None,
        }
    }

    /// Returns `true` if more bytes are needed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Decoded::Incomplete { .. })
    }

    /// Map the decoded message.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Decoded<U> {
        match self {
            Decoded::Complete { message, consumed } => Decoded::Complete {
                message: f(message),
                consumed,
            },
            Decoded::Incomplete { needed } => Decoded::Incomplete { needed },
        }
    }
}

/// A message family with an exact wire layout.
pub trait WireMessage: Sized {
    /// Encode to wire bytes.
    fn encode(&self) -> Frame;

    /// Decode the first frame in `buf`.
    fn decode(buf: &[u8]) -> Result<Decoded<Self>, FrameDecodeError>;
}

// ============================================================================
// Frame Writer
// ============================================================================

/// Append-only builder for frames.
///
/// Frames in this crate are far below [`MAX_FRAME_LEN`]; variable-length
/// payloads are bounded by their own types, so pushes cannot overflow.
#[derive(Debug, Default)]
pub(crate) struct FrameWriter {
    frame: Frame,
}

impl FrameWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
        let _ = self.frame.push(value);
        self
    }

    pub(crate) fn bytes(&mut self, values: &[u8]) -> &mut Self {
        let room = MAX_FRAME_LEN - self.frame.len();
        let take = values.len().min(room);
        let _ = self.frame.extend_from_slice(&values[..take]);
        self
    }

    pub(crate) fn u16_le(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn u16_be(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_be_bytes())
    }

    pub(crate) fn u32_le(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn len(&self) -> usize {
        self.frame.len()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.frame
    }

    /// Overwrite a byte written earlier.
    pub(crate) fn patch(&mut self, index: usize, value: u8) {
        if let Some(slot) = self.frame.get_mut(index) {
            *slot = value;
        }
    }

    pub(crate) fn finish(self) -> Frame {
        self.frame
    }
}

// ============================================================================
// Field Readers
// ============================================================================

#[inline]
pub(crate) fn read_u16_le(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

#[inline]
pub(crate) fn read_u16_be(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

#[inline]
pub(crate) fn read_i16_le(buf: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([buf[at], buf[at + 1]])
}

#[inline]
pub(crate) fn read_u32_le(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_respects_byte_order() {
        let mut w = FrameWriter::new();
        w.u16_le(0x1234).u16_be(0x1234).u32_le(0xA1B2C3D4);
        assert_eq!(
            w.as_slice(),
            &[0x34, 0x12, 0x12, 0x34, 0xD4, 0xC3, 0xB2, 0xA1]
        );
    }

    #[test]
    fn writer_patch_replaces_byte() {
        let mut w = FrameWriter::new();
        w.u16_le(0).u8(0x40);
        let len = w.len() as u8;
        w.patch(0, len);
        assert_eq!(w.finish().as_slice(), &[3, 0, 0x40]);
    }

    #[test]
    fn writer_truncates_at_capacity() {
        let mut w = FrameWriter::new();
        w.bytes(&[0xAA; MAX_FRAME_LEN + 10]);
        assert_eq!(w.len(), MAX_FRAME_LEN);
    }

    #[test]
    fn readers_match_writers() {
        let buf = [0x34, 0x12, 0xFF, 0xFF, 0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_u16_le(&buf, 0), 0x1234);
        assert_eq!(read_u16_be(&buf, 0), 0x3412);
        assert_eq!(read_i16_le(&buf, 2), -1);
        assert_eq!(read_u32_le(&buf, 4), 0x04030201);
    }

    #[test]
    fn decoded_map_and_complete() {
        let d: Decoded<u8> = Decoded::Complete {
            message: 2,
            consumed: 7,
        };
        assert_eq!(
            d.clone().map(|v| v * 2),
            Decoded::Complete {
                message: 4,
                consumed: 7
            }
        );
        assert_eq!(d.complete(), Some(2));

        let i: Decoded<u8> = Decoded::Incomplete { needed: 3 };
        assert!(i.is_incomplete());
        assert_eq!(i.complete(), None);
    }
}
