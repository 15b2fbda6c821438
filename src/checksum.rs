//! XOR checksums used by the X-Bus family and DCC packets.
//!
//! All three protocols in this crate that carry an integrity byte use the same
//! rule: the byte is the XOR of every byte it covers. What differs is the
//! range covered.
//!
//! | Protocol | Covered bytes |
//! |----------|---------------|
//! | Z21 LAN_X | xheader and all data bytes (not the 4-byte LAN header) |
//! | XpressNet | header byte and all data bytes |
//! | DCC | every packet byte before the error detection byte |
//!
//! CBUS has no checksum; CAN does its own CRC.
//!
//! # Example
//!
//! ```rust
//! use rs_commandstation::checksum;
//!
//! // LAN_X_SET_TRACK_POWER_ON: xheader 0x21, db0 0x81
//! assert_eq!(checksum::xor(&[0x21, 0x81]), 0xA0);
//! assert!(checksum::verify(&[0x21, 0x81, 0xA0]));
//! ```

/// XOR-fold a byte range.
#[inline]
pub const fn xor(bytes: &[u8]) -> u8 {
    let mut acc = 0u8;
    let mut i = 0;
    while i < bytes.len() {
        acc ^= bytes[i];
        i += 1;
    }
    acc
}

/// Verify a range whose last byte is the XOR of the preceding bytes.
///
/// An empty range has no checksum byte and never verifies.
#[inline]
pub fn verify(bytes: &[u8]) -> bool {
    match bytes.split_last() {
        Some((&check, data)) => xor(data) == check,
        None => false,
    }
}

/// Checksum byte that would be expected for `bytes` (last byte excluded),
/// paired with the byte actually present.
///
/// Returns `None` for an empty range.
pub fn expected_and_actual(bytes: &[u8]) -> Option<(u8, u8)> {
    bytes
        .split_last()
        .map(|(&actual, data)| (xor(data), actual))
}

/// XpressNet checksum: header byte XOR data bytes.
#[inline]
pub const fn xpressnet(header: u8, data: &[u8]) -> u8 {
    header ^ xor(data)
}

/// DCC error detection byte for a packet without its trailing byte.
#[inline]
pub const fn dcc_error_byte(packet: &[u8]) -> u8 {
    xor(packet)
}
