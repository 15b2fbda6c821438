//! GridConnect ASCII framing used by CAN-USB adapters (CANUSB4, CANRS).
//!
//! One CAN frame per line-less record:
//!
//! ```text
//! :S9FA0N09;
//!  ^^^^^ ^^
//!  |     +-- data bytes in hex, 0 to 8 bytes
//!  +-------- 'S' standard frame, 4 hex digit SID (11-bit id << 5), 'N' normal frame
//! ```
//!
//! The SID carries the CBUS priorities and the sender's CAN id:
//! `major << 14 | minor << 12 | can_id << 5`.

use core::fmt::Write;

use crate::codec::Frame;

use super::opcode::{MajorPriority, MinorPriority, OpCode};

/// Longest accepted record, `:S` + 4 + `N` + 16 + `;`.
pub const MAX_RECORD_LEN: usize = 24;

/// Bytes held while waiting for the end of a record.
const BUFFER_LEN: usize = 64;

/// One received CAN frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    /// Sender CAN id.
    pub can_id: u8,
    /// Frame data, a CBUS message.
    pub data: heapless::Vec<u8, 8>,
}

/// Build the SID for an outgoing frame.
pub const fn sid(major: MajorPriority, minor: MinorPriority, can_id: u8) -> u16 {
    ((major as u16) << 14) | ((minor as u16) << 12) | (((can_id & 0x7F) as u16) << 5)
}

/// Encode one CBUS message as a GridConnect record.
///
/// Priority comes from the opcode; normal traffic always uses the lowest
/// major priority.
pub fn encode(can_id: u8, message: &[u8]) -> Frame {
    let minor = message
        .first()
        .and_then(|op| OpCode::from_u8(*op))
        .map(|op| op.minor_priority())
        .unwrap_or(MinorPriority::Low);
    let mut record: heapless::String<MAX_RECORD_LEN> = heapless::String::new();
    let _ = write!(record, ":S{:04X}N", sid(MajorPriority::Lowest, minor, can_id));
    for byte in message.iter().take(8) {
        let _ = write!(record, "{:02X}", byte);
    }
    let _ = record.push(';');

    let mut frame = Frame::new();
    let _ = frame.extend_from_slice(record.as_bytes());
    frame
}

/// Incremental decoder for a GridConnect byte stream.
///
/// Bytes outside records are counted as dropped. A record that is too long,
/// not a standard data frame, or has bad hex digits is discarded.
#[derive(Debug, Default)]
pub struct GridConnectDecoder {
    buffer: heapless::Vec<u8, BUFFER_LEN>,
    dropped: usize,
}

impl GridConnectDecoder {
    /// Empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    ///
    /// Call [`next_frame`](Self::next_frame) until it returns `None` after
    /// each push, so the buffer never holds more than one partial record.
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buffer.push(b).is_err() {
                // Buffer only fills with a record that will be rejected anyway
                self.dropped += self.buffer.len();
                self.buffer.clear();
                if b == b':' {
                    let _ = self.buffer.push(b);
                } else {
                    self.dropped += 1;
                }
            }
        }
    }

    /// Bytes discarded since the last call.
    pub fn take_dropped(&mut self) -> usize {
        core::mem::take(&mut self.dropped)
    }

    /// Discard all buffered input.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.dropped = 0;
    }

    /// Extract the next complete frame.
    pub fn next_frame(&mut self) -> Option<CanFrame> {
        loop {
            let start = match self.buffer.iter().position(|&b| b == b':') {
                Some(start) => start,
                None => {
                    self.discard(self.buffer.len());
                    return None;
                }
            };
            self.discard(start);

            // Restart at a second ':' before the terminator
            let restart = self.buffer.iter().skip(1).position(|&b| b == b':');
            let end = self.buffer.iter().position(|&b| b == b';');
            match (restart, end) {
                (Some(r), Some(e)) if r + 1 < e => {
                    self.discard(r + 1);
                    continue;
                }
                (Some(r), None) => {
                    self.discard(r + 1);
                    continue;
                }
                (_, None) => {
                    if self.buffer.len() > MAX_RECORD_LEN {
                        self.discard(self.buffer.len());
                    }
                    return None;
                }
                (_, Some(e)) => {
                    let record_len = e + 1;
                    let frame = if record_len <= MAX_RECORD_LEN {
                        parse_record(&self.buffer[..record_len])
                    } else {
                        None
                    };
                    if frame.is_none() {
                        self.dropped += record_len;
                    }
                    self.consume(record_len);
                    if frame.is_some() {
                        return frame;
                    }
                }
            }
        }
    }

    fn discard(&mut self, n: usize) {
        self.dropped += n;
        self.consume(n);
    }

    fn consume(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        if n == 0 {
            return;
        }
        let rest = self.buffer.len() - n;
        self.buffer.copy_within(n.., 0);
        self.buffer.truncate(rest);
    }
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    Some(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?)
}

/// Parse `:S<sid>N<data>;`. `None` for extended, RTR or malformed records.
fn parse_record(record: &[u8]) -> Option<CanFrame> {
    // Shortest record is ":SxxxxN;"
    if record.len() < 8 || record[1] != b'S' || record[6] != b'N' {
        return None;
    }
    let hex = &record[7..record.len() - 1];
    if hex.len() % 2 != 0 {
        return None;
    }
    let sid = u16::from(hex_byte(&record[2..4])?) << 8 | u16::from(hex_byte(&record[4..6])?);
    let mut data = heapless::Vec::new();
    for pair in hex.chunks(2) {
        data.push(hex_byte(pair)?).ok()?;
    }
    Some(CanFrame {
        can_id: ((sid >> 5) & 0x7F) as u8,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(decoder: &mut GridConnectDecoder) -> heapless::Vec<CanFrame, 8> {
        let mut out = heapless::Vec::new();
        while let Some(f) = decoder.next_frame() {
            let _ = out.push(f);
        }
        out
    }

    // =========================================================================
    // Encoding Tests
    // =========================================================================

    #[test]
    fn rton_from_default_can_id() {
        let frame = encode(0x7D, &[0x09]);
        assert_eq!(frame.as_slice(), b":S9FA0N09;");
    }

    #[test]
    fn sid_layout() {
        assert_eq!(sid(MajorPriority::Lowest, MinorPriority::AboveNormal, 0x7D), 0x9FA0);
        assert_eq!(sid(MajorPriority::Highest, MinorPriority::High, 0), 0);
        assert_eq!(sid(MajorPriority::Lowest, MinorPriority::Low, 0x7F), 0xBFE0);
    }

    #[test]
    fn rdcc_record_fits() {
        let frame = encode(0x7D, &[0xE0, 2, 1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.len(), MAX_RECORD_LEN);
        assert!(frame.as_slice().starts_with(b":SAFA0NE0"));
    }

    // =========================================================================
    // Decoding Tests
    // =========================================================================

    #[test]
    fn decode_single_record() {
        let mut d = GridConnectDecoder::new();
        d.push(b":SB020N0C;");
        let f = frames(&mut d);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].can_id, 0x01);
        assert_eq!(f[0].data.as_slice(), &[0x0C]);
        assert_eq!(d.take_dropped(), 0);
    }

    #[test]
    fn record_split_across_pushes() {
        let mut d = GridConnectDecoder::new();
        d.push(b":SAFA0NE3000100");
        assert!(d.next_frame().is_none());
        d.push(b"04040103;");
        let f = frames(&mut d);
        assert_eq!(f[0].data.as_slice(), &[0xE3, 0, 1, 0, 4, 4, 1, 3]);
    }

    #[test]
    fn garbage_before_start_is_dropped() {
        let mut d = GridConnectDecoder::new();
        d.push(b"xyz\r\n:S9FA0N05;");
        let f = frames(&mut d);
        assert_eq!(f.len(), 1);
        assert_eq!(d.take_dropped(), 5);
    }

    #[test]
    fn extended_and_rtr_frames_skipped() {
        let mut d = GridConnectDecoder::new();
        d.push(b":X00000000N05;:S9FA0R;:S9FA0N04;");
        let f = frames(&mut d);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].data.as_slice(), &[0x04]);
    }

    #[test]
    fn overlong_record_dropped() {
        let mut d = GridConnectDecoder::new();
        d.push(b":S9FA0N0102030405060708090A;:S9FA0N05;");
        let f = frames(&mut d);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].data.as_slice(), &[0x05]);
    }

    #[test]
    fn restart_on_new_start_marker() {
        let mut d = GridConnectDecoder::new();
        d.push(b":S9FA:S9FA0N04;");
        let f = frames(&mut d);
        assert_eq!(f.len(), 1);
        assert_eq!(d.take_dropped(), 5);
    }

    #[test]
    fn bad_hex_is_skipped() {
        let mut d = GridConnectDecoder::new();
        d.push(b":S9FA0NZZ;:S9FA0N05;");
        assert_eq!(frames(&mut d).len(), 1);
    }

    #[test]
    fn unterminated_noise_does_not_grow_buffer() {
        let mut d = GridConnectDecoder::new();
        for _ in 0..20 {
            d.push(b":S9FA0N0102030405060708");
            let _ = frames(&mut d);
        }
        d.push(b";:S9FA0N05;");
        let f = frames(&mut d);
        assert_eq!(f.last().map(|f| f.data.as_slice()), Some(&[0x05u8][..]));
    }
}
