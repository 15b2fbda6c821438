//! DCC value types and track packet construction.
//!
//! These types are shared by every protocol driver: a loco is identified by a
//! [`LocoAddress`], driven with a [`Speed`] in one of three [`SpeedSteps`]
//! modes, and has up to 29 functions held in a [`FunctionState`].
//!
//! [`DccPacket`] builds NMRA baseline and extended packets including the
//! trailing error detection byte. The CBUS driver tunnels them to the command
//! station with `RDCCn`.

use core::fmt;

use crate::checksum;
use crate::traits::Direction;

/// Highest short (primary) address.
pub const SHORT_ADDRESS_MAX: u16 = 127;

/// Highest long (extended) address.
pub const LONG_ADDRESS_MAX: u16 = 10239;

/// Highest function number addressable by the drivers.
pub const FUNCTION_MAX: u8 = 28;

// ============================================================================
// Loco Address
// ============================================================================

/// A DCC locomotive address.
///
/// Short addresses are 1..=127, long addresses 1..=10239. The same number can
/// exist in both spaces; they are different locos.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocoAddress {
    number: u16,
    long: bool,
}

impl LocoAddress {
    /// Short address, `None` if out of range.
    pub const fn short(number: u16) -> Option<Self> {
        if number >= 1 && number <= SHORT_ADDRESS_MAX {
            Some(Self {
                number,
                long: false,
            })
        } else {
            None
        }
    }

    /// Long address, `None` if out of range.
    pub const fn long(number: u16) -> Option<Self> {
        if number >= 1 && number <= LONG_ADDRESS_MAX {
            Some(Self { number, long: true })
        } else {
            None
        }
    }

    /// Pick the address space automatically: 1..=127 short, above that long.
    pub const fn new(number: u16) -> Option<Self> {
        if number <= SHORT_ADDRESS_MAX {
            Self::short(number)
        } else {
            Self::long(number)
        }
    }

    /// Address number.
    #[inline]
    pub const fn number(&self) -> u16 {
        self.number
    }

    /// `true` for an extended address.
    #[inline]
    pub const fn is_long(&self) -> bool {
        self.long
    }

    /// X-Bus style two-byte encoding used by Z21 and CBUS.
    ///
    /// Long: `0xC0 | hi`, `lo`. Short: `0x00`, `addr & 0x7F`.
    pub const fn to_bytes(&self) -> [u8; 2] {
        if self.long {
            [0xC0 | (self.number >> 8) as u8, (self.number & 0xFF) as u8]
        } else {
            [0x00, (self.number & 0x7F) as u8]
        }
    }

    /// Decode the X-Bus two-byte encoding.
    ///
    /// Long form is flagged by both top bits of the high byte.
    pub const fn from_bytes(high: u8, low: u8) -> Option<Self> {
        let number = (((high & 0x3F) as u16) << 8) | low as u16;
        if high & 0xC0 == 0xC0 {
            Self::long(number)
        } else {
            Self::short(number)
        }
    }

    /// Address bytes as they appear at the start of a DCC packet.
    fn packet_prefix(&self, out: &mut heapless::Vec<u8, DCC_PACKET_MAX>) {
        if self.long {
            let _ = out.push(0xC0 | (self.number >> 8) as u8);
            let _ = out.push((self.number & 0xFF) as u8);
        } else {
            let _ = out.push(self.number as u8);
        }
    }
}

impl fmt::Display for LocoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.long {
            write!(f, "L{}", self.number)
        } else {
            write!(f, "S{}", self.number)
        }
    }
}

// ============================================================================
// Speed
// ============================================================================

/// Speed step mode of a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpeedSteps {
    /// 14 speed steps.
    S14,
    /// 28 speed steps.
    S28,
    /// 126 speed steps (often called 128).
    #[default]
    S126,
}

impl SpeedSteps {
    /// Highest drivable step.
    pub const fn max_step(&self) -> u8 {
        match self {
            SpeedSteps::S14 => 14,
            SpeedSteps::S28 => 28,
            SpeedSteps::S126 => 126,
        }
    }

    /// Parse from a step count (128 is accepted as 126).
    pub const fn from_count(count: u8) -> Option<Self> {
        match count {
            14 => Some(SpeedSteps::S14),
            28 => Some(SpeedSteps::S28),
            126 | 128 => Some(SpeedSteps::S126),
            _ => None,
        }
    }
}

/// Requested or reported loco speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Speed {
    /// Speed step 0 with normal deceleration.
    #[default]
    Stop,
    /// Stop immediately.
    EmergencyStop,
    /// Drive step, 1..=max for the mode.
    Step(u8),
}

impl Speed {
    /// Step clamped to the mode; `Step(0)` collapses to `Stop`.
    pub const fn clamp_to(self, steps: SpeedSteps) -> Self {
        match self {
            Speed::Step(0) => Speed::Stop,
            Speed::Step(n) if n > steps.max_step() => Speed::Step(steps.max_step()),
            other => other,
        }
    }

    /// Numeric step, 0 for both stop kinds.
    pub const fn step(&self) -> u8 {
        match self {
            Speed::Step(n) => *n,
            _ => 0,
        }
    }
}

/// Bit 7 of an X-Bus speed byte.
pub const DIRECTION_FLAG: u8 = 0x80;

/// Encode speed and direction into the X-Bus speed byte.
///
/// Value 1 is reserved for emergency stop in every mode, so drive steps are
/// shifted by one. 28-step mode additionally moves the intermediate bit into
/// bit 4.
pub const fn encode_speed(steps: SpeedSteps, speed: Speed, direction: Direction) -> u8 {
    let dir = match direction {
        Direction::Forward => DIRECTION_FLAG,
        Direction::Reverse => 0,
    };
    let value = match speed.clamp_to(steps) {
        Speed::Stop => 0,
        Speed::EmergencyStop => 0x01,
        Speed::Step(n) => match steps {
            SpeedSteps::S126 => (n + 1) & 0x7F,
            SpeedSteps::S28 => {
                let s = n + 3;
                ((s >> 1) & 0x0F) | ((s & 0x01) << 4)
            }
            SpeedSteps::S14 => (n + 1) & 0x0F,
        },
    };
    dir | value
}

/// Decode an X-Bus speed byte.
pub const fn decode_speed(steps: SpeedSteps, byte: u8) -> (Speed, Direction) {
    let direction = if byte & DIRECTION_FLAG != 0 {
        Direction::Forward
    } else {
        Direction::Reverse
    };
    let speed = match steps {
        SpeedSteps::S126 => match byte & 0x7F {
            0 => Speed::Stop,
            1 => Speed::EmergencyStop,
            v => Speed::Step(v - 1),
        },
        SpeedSteps::S28 => {
            let raw = byte & 0x1F;
            if raw == 0x01 || raw == 0x11 {
                Speed::EmergencyStop
            } else {
                let s = ((raw & 0x0F) << 1) | ((raw & 0x10) >> 4);
                if s < 4 {
                    Speed::Stop
                } else {
                    Speed::Step(s - 3)
                }
            }
        }
        SpeedSteps::S14 => match byte & 0x0F {
            0 => Speed::Stop,
            1 => Speed::EmergencyStop,
            v => Speed::Step(v - 1),
        },
    };
    (speed, direction)
}

// ============================================================================
// Functions
// ============================================================================

/// On/off state of functions F0..F28, one bit per function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionState(u32);

impl FunctionState {
    /// All functions off.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Raw bitmask, bit n is Fn.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Build from a raw bitmask; bits above F28 are discarded.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0x1FFF_FFFF)
    }

    /// State of one function. Out-of-range numbers read as off.
    pub const fn get(&self, function: u8) -> bool {
        function <= FUNCTION_MAX && self.0 & (1 << function) != 0
    }

    /// Set one function. Out-of-range numbers are ignored.
    pub fn set(&mut self, function: u8, on: bool) {
        if function > FUNCTION_MAX {
            return;
        }
        if on {
            self.0 |= 1 << function;
        } else {
            self.0 &= !(1 << function);
        }
    }

    /// Group one: F0 in bit 4, F1..F4 in bits 0..3.
    pub const fn group_f0_f4(&self) -> u8 {
        (((self.0 & 0x01) as u8) << 4) | ((self.0 >> 1) & 0x0F) as u8
    }

    /// F5..F8 in bits 0..3.
    pub const fn group_f5_f8(&self) -> u8 {
        ((self.0 >> 5) & 0x0F) as u8
    }

    /// F9..F12 in bits 0..3.
    pub const fn group_f9_f12(&self) -> u8 {
        ((self.0 >> 9) & 0x0F) as u8
    }

    /// F5..F12 in one byte, F5 in bit 0.
    pub const fn group_f5_f12(&self) -> u8 {
        ((self.0 >> 5) & 0xFF) as u8
    }

    /// F13..F20 in one byte, F13 in bit 0.
    pub const fn group_f13_f20(&self) -> u8 {
        ((self.0 >> 13) & 0xFF) as u8
    }

    /// F21..F28 in one byte, F21 in bit 0.
    pub const fn group_f21_f28(&self) -> u8 {
        ((self.0 >> 21) & 0xFF) as u8
    }

    /// Replace F0..F4 from a group-one byte.
    pub fn set_f0_f4(&mut self, byte: u8) {
        let f0 = ((byte >> 4) & 0x01) as u32;
        let f1_f4 = (byte & 0x0F) as u32;
        self.0 = (self.0 & !0x1F) | f0 | (f1_f4 << 1);
    }

    /// Replace an 8- or 4-bit wide group starting at `first`.
    pub fn set_range(&mut self, first: u8, width: u8, byte: u8) {
        let mask = ((1u32 << width) - 1) << first;
        self.0 = (self.0 & !mask) | (((byte as u32) << first) & mask);
    }
}

// ============================================================================
// DCC Packets
// ============================================================================

/// Longest packet built here, error byte included.
pub const DCC_PACKET_MAX: usize = 6;

/// A complete DCC packet with trailing error detection byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DccPacket {
    bytes: heapless::Vec<u8, DCC_PACKET_MAX>,
}

impl DccPacket {
    fn finish(mut bytes: heapless::Vec<u8, DCC_PACKET_MAX>) -> Self {
        let err = checksum::dcc_error_byte(&bytes);
        let _ = bytes.push(err);
        Self { bytes }
    }

    /// Packet bytes including the error byte.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total length including the error byte.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true for a built packet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `true` if the error byte matches.
    pub fn is_valid(&self) -> bool {
        checksum::verify(&self.bytes)
    }

    /// Idle packet.
    pub fn idle() -> Self {
        Self::from_parts(&[0xFF, 0x00])
    }

    /// Broadcast emergency stop for all decoders.
    pub fn broadcast_emergency_stop() -> Self {
        Self::from_parts(&[0x00, 0x41])
    }

    /// Speed and direction in the given step mode.
    ///
    /// 126 steps uses the advanced operations instruction, 14 and 28 steps use
    /// the baseline speed instruction.
    pub fn speed(address: LocoAddress, steps: SpeedSteps, speed: Speed, direction: Direction) -> Self {
        let mut bytes = heapless::Vec::new();
        address.packet_prefix(&mut bytes);
        let forward = matches!(direction, Direction::Forward);
        match steps {
            SpeedSteps::S126 => {
                let _ = bytes.push(0x3F);
                let _ = bytes.push(encode_speed(SpeedSteps::S126, speed, direction));
            }
            SpeedSteps::S28 => {
                let v = match speed.clamp_to(steps) {
                    Speed::Stop => 0,
                    Speed::EmergencyStop => 0x01,
                    Speed::Step(n) => {
                        let s = n + 3;
                        ((s >> 1) & 0x0F) | ((s & 0x01) << 4)
                    }
                };
                let _ = bytes.push(0x40 | ((forward as u8) << 5) | v);
            }
            SpeedSteps::S14 => {
                let v = encode_speed(SpeedSteps::S14, speed, direction) & 0x0F;
                let _ = bytes.push(0x40 | ((forward as u8) << 5) | v);
            }
        }
        Self::finish(bytes)
    }

    /// Function group packets needed to set `function` to its value in `state`.
    ///
    /// DCC only transmits whole groups, so the other functions in the group are
    /// taken from `state`.
    pub fn function_group(address: LocoAddress, function: u8, state: &FunctionState) -> Option<Self> {
        let mut bytes = heapless::Vec::new();
        address.packet_prefix(&mut bytes);
        match function {
            0..=4 => {
                let _ = bytes.push(0x80 | state.group_f0_f4());
            }
            5..=8 => {
                let _ = bytes.push(0xB0 | state.group_f5_f8());
            }
            9..=12 => {
                let _ = bytes.push(0xA0 | state.group_f9_f12());
            }
            13..=20 => {
                let _ = bytes.push(0xDE);
                let _ = bytes.push(state.group_f13_f20());
            }
            21..=28 => {
                let _ = bytes.push(0xDF);
                let _ = bytes.push(state.group_f21_f28());
            }
            _ => return None,
        }
        Some(Self::finish(bytes))
    }

    fn from_parts(parts: &[u8]) -> Self {
        let mut bytes = heapless::Vec::new();
        let _ = bytes.extend_from_slice(parts);
        Self::finish(bytes)
    }
}

impl AsRef<[u8]> for DccPacket {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
