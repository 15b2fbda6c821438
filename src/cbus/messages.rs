//! Typed CBUS messages.
//!
//! A message on the wire is one opcode byte followed by `opcode >> 5` data
//! bytes, carried in the data field of a standard CAN frame. Multi-byte
//! numbers (node numbers, event numbers, addresses) are big-endian.
//!
//! # Example
//!
//! ```rust
//! use rs_commandstation::cbus::{Message, RequestDccPacket};
//! use rs_commandstation::codec::WireMessage;
//!
//! let rdcc = Message::RequestDcc3(RequestDccPacket::<3>::new(2, [0xA2, 0x00, 0x00]));
//! assert_eq!(rdcc.encode().as_slice(), &[0x80, 0x02, 0xA2, 0x00, 0x00]);
//! ```

use crate::codec::{read_u16_be, Decoded, Frame, FrameWriter, WireMessage};
use crate::dcc::{decode_speed, encode_speed, DccPacket, LocoAddress, Speed, SpeedSteps};
use crate::error::FrameDecodeError;
use crate::traits::Direction;

use super::opcode::{data_len, OpCode};

/// Largest CBUS message: opcode plus seven data bytes.
pub const MAX_MESSAGE_LEN: usize = 8;

/// Raw data bytes of an unrecognized message.
pub type RawData = heapless::Vec<u8, 7>;

// ============================================================================
// Field Types
// ============================================================================

/// Speed mode set with `STMOD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedMode {
    /// 128 (126) steps.
    Steps128,
    /// 14 steps.
    Steps14,
    /// 28 steps with interleaved half steps.
    Steps28Interleaved,
    /// 28 steps.
    Steps28,
}

impl SpeedMode {
    const fn code(&self) -> u8 {
        match self {
            SpeedMode::Steps128 => 0b00,
            SpeedMode::Steps14 => 0b01,
            SpeedMode::Steps28Interleaved => 0b10,
            SpeedMode::Steps28 => 0b11,
        }
    }

    const fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0b00 => SpeedMode::Steps128,
            0b01 => SpeedMode::Steps14,
            0b10 => SpeedMode::Steps28Interleaved,
            _ => SpeedMode::Steps28,
        }
    }

    /// Matching DCC step mode.
    pub const fn steps(&self) -> SpeedSteps {
        match self {
            SpeedMode::Steps128 => SpeedSteps::S126,
            SpeedMode::Steps14 => SpeedSteps::S14,
            SpeedMode::Steps28Interleaved | SpeedMode::Steps28 => SpeedSteps::S28,
        }
    }
}

impl From<SpeedSteps> for SpeedMode {
    fn from(steps: SpeedSteps) -> Self {
        match steps {
            SpeedSteps::S126 => SpeedMode::Steps128,
            SpeedSteps::S28 => SpeedMode::Steps28,
            SpeedSteps::S14 => SpeedMode::Steps14,
        }
    }
}

/// Function range of a `DFUN` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionRange {
    /// F0..F4, F0 in bit 4.
    F0F4,
    /// F5..F8.
    F5F8,
    /// F9..F12.
    F9F12,
    /// F13..F20.
    F13F20,
    /// F21..F28.
    F21F28,
}

impl FunctionRange {
    const fn code(&self) -> u8 {
        match self {
            FunctionRange::F0F4 => 1,
            FunctionRange::F5F8 => 2,
            FunctionRange::F9F12 => 3,
            FunctionRange::F13F20 => 4,
            FunctionRange::F21F28 => 5,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FunctionRange::F0F4),
            2 => Some(FunctionRange::F5F8),
            3 => Some(FunctionRange::F9F12),
            4 => Some(FunctionRange::F13F20),
            5 => Some(FunctionRange::F21F28),
            _ => None,
        }
    }

    /// First function number and bit width, F0..F4 excluded.
    pub const fn span(&self) -> Option<(u8, u8)> {
        match self {
            FunctionRange::F0F4 => None,
            FunctionRange::F5F8 => Some((5, 4)),
            FunctionRange::F9F12 => Some((9, 4)),
            FunctionRange::F13F20 => Some((13, 8)),
            FunctionRange::F21F28 => Some((21, 8)),
        }
    }
}

/// Session request mode of `GLOC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionRequestMode {
    /// Normal request, fails if the loco is in use.
    Request,
    /// Take over an existing session.
    Steal,
    /// Share an existing session.
    Share,
}

impl SessionRequestMode {
    const fn code(&self) -> u8 {
        match self {
            SessionRequestMode::Request => 0b00,
            SessionRequestMode::Steal => 0b01,
            SessionRequestMode::Share => 0b10,
        }
    }
}

/// Command station status flags in `STAT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    /// Hardware error.
    pub const HARDWARE_ERROR: u8 = 0x01;
    /// Track error (short circuit or overload).
    pub const TRACK_ERROR: u8 = 0x02;
    /// Track power on.
    pub const TRACK_ON: u8 = 0x04;
    /// Bus on.
    pub const BUS_ON: u8 = 0x08;
    /// Emergency stop of all locos performed.
    pub const EMERGENCY_STOP: u8 = 0x10;
    /// Reset done.
    pub const RESET_DONE: u8 = 0x20;
    /// Service (programming) mode on.
    pub const SERVICE_MODE: u8 = 0x40;

    /// `true` if `bit` is set.
    pub const fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// Payload of `STAT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CommandStationStatus {
    /// Node number.
    pub node: u16,
    /// Command station number.
    pub station: u8,
    /// Status flags.
    pub flags: StatusFlags,
    /// Firmware major version.
    pub major: u8,
    /// Firmware minor version (a letter code).
    pub minor: u8,
    /// Firmware build.
    pub build: u8,
}

/// Payload of `PLOC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineReport {
    /// Session number.
    pub session: u8,
    /// Loco address.
    pub address: LocoAddress,
    /// Speed (128-step coding).
    pub speed: Speed,
    /// Direction.
    pub direction: Direction,
    /// F0..F4 group byte, F0 in bit 4.
    pub f0_f4: u8,
    /// F5..F8 in bits 0..3.
    pub f5_f8: u8,
    /// F9..F12 in bits 0..3.
    pub f9_f12: u8,
}

// ============================================================================
// DCC Packet Tunnel
// ============================================================================

/// `RDCCn`: a raw DCC packet for the command station to put on the track.
///
/// `N` is the packet length including the error byte. Only 3 to 6 byte
/// packets exist on CBUS, so `new` is only available for those sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestDccPacket<const N: usize> {
    /// Number of times to repeat the packet.
    pub repeat: u8,
    /// Packet bytes.
    pub packet: [u8; N],
}

/// Sizes of DCC packet that CBUS can carry.
pub trait DccPacketSize {
    /// Opcode for this size.
    const OPCODE: OpCode;
}

impl DccPacketSize for RequestDccPacket<3> {
    const OPCODE: OpCode = OpCode::RDCC3;
}

impl DccPacketSize for RequestDccPacket<4> {
    const OPCODE: OpCode = OpCode::RDCC4;
}

impl DccPacketSize for RequestDccPacket<5> {
    const OPCODE: OpCode = OpCode::RDCC5;
}

impl DccPacketSize for RequestDccPacket<6> {
    const OPCODE: OpCode = OpCode::RDCC6;
}

impl<const N: usize> RequestDccPacket<N>
where
    Self: DccPacketSize,
{
    /// Wrap a packet.
    pub const fn new(repeat: u8, packet: [u8; N]) -> Self {
        Self { repeat, packet }
    }

    /// Opcode used on the wire.
    pub const fn opcode(&self) -> OpCode {
        <Self as DccPacketSize>::OPCODE
    }
}

fn packet_array<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.try_into().ok()
}

// ============================================================================
// Messages
// ============================================================================

/// A CBUS message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// `HLT`: bus halted.
    BusHalt,
    /// `BON`: bus on.
    BusOn,
    /// `TOF`: track power off.
    TrackOff,
    /// `TON`: track power on.
    TrackOn,
    /// `ESTOP`: all locos stopped.
    EmergencyStopped,
    /// `ARST`: system reset.
    SystemReset,
    /// `RTOF`: request track off.
    RequestTrackOff,
    /// `RTON`: request track on.
    RequestTrackOn,
    /// `RESTP`: request emergency stop of all locos.
    RequestEmergencyStop,
    /// `RSTAT`: request command station status.
    RequestStatus,
    /// `QNN`: query node numbers.
    QueryNodeNumber,
    /// `KLOC`: release engine session.
    ReleaseEngine {
        /// Session number.
        session: u8,
    },
    /// `QLOC`: query engine session.
    QueryEngine {
        /// Session number.
        session: u8,
    },
    /// `DKEEP`: session keepalive.
    SessionKeepAlive {
        /// Session number.
        session: u8,
    },
    /// `RLOC`: request engine session.
    RequestEngineSession {
        /// Loco address.
        address: LocoAddress,
    },
    /// `STMOD`: set engine session mode.
    SetSessionMode {
        /// Session number.
        session: u8,
        /// Speed step mode.
        mode: SpeedMode,
        /// Service mode.
        service_mode: bool,
        /// Sound control mode.
        sound_mode: bool,
    },
    /// `DSPD`: set engine speed and direction.
    SetSpeedDirection {
        /// Session number.
        session: u8,
        /// Speed (128-step coding).
        speed: Speed,
        /// Direction.
        direction: Direction,
    },
    /// `DFNON`: one function on.
    FunctionOn {
        /// Session number.
        session: u8,
        /// Function number.
        function: u8,
    },
    /// `DFNOF`: one function off.
    FunctionOff {
        /// Session number.
        session: u8,
        /// Function number.
        function: u8,
    },
    /// `DFUN`: set a function group.
    SetFunctions {
        /// Session number.
        session: u8,
        /// Function range.
        range: FunctionRange,
        /// Group bits.
        value: u8,
    },
    /// `GLOC`: get engine session.
    GetEngineSession {
        /// Loco address.
        address: LocoAddress,
        /// Request mode.
        mode: SessionRequestMode,
    },
    /// `ERR`: command station error.
    CommandStationError {
        /// First data byte (usually address high).
        data1: u8,
        /// Second data byte (usually address low or session).
        data2: u8,
        /// Error number.
        code: u8,
    },
    /// `RDCC3`.
    RequestDcc3(RequestDccPacket<3>),
    /// `RDCC4`.
    RequestDcc4(RequestDccPacket<4>),
    /// `RDCC5`.
    RequestDcc5(RequestDccPacket<5>),
    /// `RDCC6`.
    RequestDcc6(RequestDccPacket<6>),
    /// `ACON`: long accessory event on.
    AccessoryOn {
        /// Node number.
        node: u16,
        /// Event number.
        event: u16,
    },
    /// `ACOF`: long accessory event off.
    AccessoryOff {
        /// Node number.
        node: u16,
        /// Event number.
        event: u16,
    },
    /// `ASON`: short accessory event on.
    ShortEventOn {
        /// Node number of the sender.
        node: u16,
        /// Device number.
        device: u16,
    },
    /// `ASOF`: short accessory event off.
    ShortEventOff {
        /// Node number of the sender.
        node: u16,
        /// Device number.
        device: u16,
    },
    /// `PLOC`: engine report.
    EngineReport(EngineReport),
    /// `STAT`: command station status report.
    Status(CommandStationStatus),
    /// Any other opcode, passed through raw.
    Unrecognized {
        /// Opcode byte.
        opcode: u8,
        /// Data bytes.
        data: RawData,
    },
}

impl Message {
    /// Opcode byte of this message.
    pub fn opcode(&self) -> u8 {
        match self {
            Message::BusHalt => OpCode::HLT.code(),
            Message::BusOn => OpCode::BON.code(),
            Message::TrackOff => OpCode::TOF.code(),
            Message::TrackOn => OpCode::TON.code(),
            Message::EmergencyStopped => OpCode::ESTOP.code(),
            Message::SystemReset => OpCode::ARST.code(),
            Message::RequestTrackOff => OpCode::RTOF.code(),
            Message::RequestTrackOn => OpCode::RTON.code(),
            Message::RequestEmergencyStop => OpCode::RESTP.code(),
            Message::RequestStatus => OpCode::RSTAT.code(),
            Message::QueryNodeNumber => OpCode::QNN.code(),
            Message::ReleaseEngine { .. } => OpCode::KLOC.code(),
            Message::QueryEngine { .. } => OpCode::QLOC.code(),
            Message::SessionKeepAlive { .. } => OpCode::DKEEP.code(),
            Message::RequestEngineSession { .. } => OpCode::RLOC.code(),
            Message::SetSessionMode { .. } => OpCode::STMOD.code(),
            Message::SetSpeedDirection { .. } => OpCode::DSPD.code(),
            Message::FunctionOn { .. } => OpCode::DFNON.code(),
            Message::FunctionOff { .. } => OpCode::DFNOF.code(),
            Message::SetFunctions { .. } => OpCode::DFUN.code(),
            Message::GetEngineSession { .. } => OpCode::GLOC.code(),
            Message::CommandStationError { .. } => OpCode::ERR.code(),
            Message::RequestDcc3(p) => p.opcode().code(),
            Message::RequestDcc4(p) => p.opcode().code(),
            Message::RequestDcc5(p) => p.opcode().code(),
            Message::RequestDcc6(p) => p.opcode().code(),
            Message::AccessoryOn { .. } => OpCode::ACON.code(),
            Message::AccessoryOff { .. } => OpCode::ACOF.code(),
            Message::ShortEventOn { .. } => OpCode::ASON.code(),
            Message::ShortEventOff { .. } => OpCode::ASOF.code(),
            Message::EngineReport(_) => OpCode::PLOC.code(),
            Message::Status(_) => OpCode::STAT.code(),
            Message::Unrecognized { opcode, .. } => *opcode,
        }
    }

    /// Typed opcode, `None` for unassigned values.
    pub fn op(&self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode())
    }

    /// Wrap a built DCC packet in the `RDCCn` message of matching size.
    ///
    /// `None` for packets shorter than 3 or longer than 6 bytes.
    pub fn request_dcc(packet: &DccPacket, repeat: u8) -> Option<Self> {
        let bytes = packet.as_bytes();
        match bytes.len() {
            3 => packet_array(bytes).map(|p| Message::RequestDcc3(RequestDccPacket::new(repeat, p))),
            4 => packet_array(bytes).map(|p| Message::RequestDcc4(RequestDccPacket::new(repeat, p))),
            5 => packet_array(bytes).map(|p| Message::RequestDcc5(RequestDccPacket::new(repeat, p))),
            6 => packet_array(bytes).map(|p| Message::RequestDcc6(RequestDccPacket::new(repeat, p))),
            _ => None,
        }
    }
}

fn speed_byte(speed: Speed, direction: Direction) -> u8 {
    encode_speed(SpeedSteps::S126, speed, direction)
}

impl WireMessage for Message {
    fn encode(&self) -> Frame {
        let mut w = FrameWriter::new();
        w.u8(self.opcode());
        match self {
            Message::ReleaseEngine { session }
            | Message::QueryEngine { session }
            | Message::SessionKeepAlive { session } => {
                w.u8(*session);
            }
            Message::RequestEngineSession { address } => {
                w.bytes(&address.to_bytes());
            }
            Message::SetSessionMode {
                session,
                mode,
                service_mode,
                sound_mode,
            } => {
                let flags = mode.code() | (*service_mode as u8) << 2 | (*sound_mode as u8) << 3;
                w.u8(*session).u8(flags);
            }
            Message::SetSpeedDirection {
                session,
                speed,
                direction,
            } => {
                w.u8(*session).u8(speed_byte(*speed, *direction));
            }
            Message::FunctionOn { session, function } | Message::FunctionOff { session, function } => {
                w.u8(*session).u8(*function);
            }
            Message::SetFunctions {
                session,
                range,
                value,
            } => {
                w.u8(*session).u8(range.code()).u8(*value);
            }
            Message::GetEngineSession { address, mode } => {
                w.bytes(&address.to_bytes()).u8(mode.code());
            }
            Message::CommandStationError { data1, data2, code } => {
                w.u8(*data1).u8(*data2).u8(*code);
            }
            Message::RequestDcc3(p) => {
                w.u8(p.repeat).bytes(&p.packet);
            }
            Message::RequestDcc4(p) => {
                w.u8(p.repeat).bytes(&p.packet);
            }
            Message::RequestDcc5(p) => {
                w.u8(p.repeat).bytes(&p.packet);
            }
            Message::RequestDcc6(p) => {
                w.u8(p.repeat).bytes(&p.packet);
            }
            Message::AccessoryOn { node, event } | Message::AccessoryOff { node, event } => {
                w.u16_be(*node).u16_be(*event);
            }
            Message::ShortEventOn { node, device } | Message::ShortEventOff { node, device } => {
                w.u16_be(*node).u16_be(*device);
            }
            Message::EngineReport(r) => {
                w.u8(r.session)
                    .bytes(&r.address.to_bytes())
                    .u8(speed_byte(r.speed, r.direction))
                    .u8(r.f0_f4)
                    .u8(r.f5_f8)
                    .u8(r.f9_f12);
            }
            Message::Status(s) => {
                w.u16_be(s.node)
                    .u8(s.station)
                    .u8(s.flags.0)
                    .u8(s.major)
                    .u8(s.minor)
                    .u8(s.build);
            }
            Message::Unrecognized { data, .. } => {
                w.bytes(data);
            }
            _ => {}
        }
        w.finish()
    }

    fn decode(buf: &[u8]) -> Result<Decoded<Self>, FrameDecodeError> {
        let Some(&opcode) = buf.first() else {
            return Ok(Decoded::Incomplete { needed: 1 });
        };
        let len = 1 + data_len(opcode);
        if buf.len() < len {
            return Ok(Decoded::Incomplete {
                needed: len - buf.len(),
            });
        }
        let d = &buf[1..len];
        let message = match OpCode::from_u8(opcode) {
            Some(op) => decode_known(op, d)?,
            None => None,
        };
        let message = message.unwrap_or_else(|| Message::Unrecognized {
            opcode,
            data: RawData::from_slice(d).unwrap_or_default(),
        });
        Ok(Decoded::Complete {
            message,
            consumed: len,
        })
    }
}

fn address(high: u8, low: u8) -> Result<LocoAddress, FrameDecodeError> {
    LocoAddress::from_bytes(high, low).ok_or(FrameDecodeError::Malformed("loco address out of range"))
}

/// Decode the data bytes of a known opcode. `Ok(None)` for opcodes without a
/// typed variant.
fn decode_known(op: OpCode, d: &[u8]) -> Result<Option<Message>, FrameDecodeError> {
    let message = match op {
        OpCode::HLT => Message::BusHalt,
        OpCode::BON => Message::BusOn,
        OpCode::TOF => Message::TrackOff,
        OpCode::TON => Message::TrackOn,
        OpCode::ESTOP => Message::EmergencyStopped,
        OpCode::ARST => Message::SystemReset,
        OpCode::RTOF => Message::RequestTrackOff,
        OpCode::RTON => Message::RequestTrackOn,
        OpCode::RESTP => Message::RequestEmergencyStop,
        OpCode::RSTAT => Message::RequestStatus,
        OpCode::QNN => Message::QueryNodeNumber,
        OpCode::KLOC => Message::ReleaseEngine { session: d[0] },
        OpCode::QLOC => Message::QueryEngine { session: d[0] },
        OpCode::DKEEP => Message::SessionKeepAlive { session: d[0] },
        OpCode::RLOC => Message::RequestEngineSession {
            address: address(d[0], d[1])?,
        },
        OpCode::STMOD => Message::SetSessionMode {
            session: d[0],
            mode: SpeedMode::from_code(d[1]),
            service_mode: d[1] & 0x04 != 0,
            sound_mode: d[1] & 0x08 != 0,
        },
        OpCode::DSPD => {
            let (speed, direction) = decode_speed(SpeedSteps::S126, d[1]);
            Message::SetSpeedDirection {
                session: d[0],
                speed,
                direction,
            }
        }
        OpCode::DFNON => Message::FunctionOn {
            session: d[0],
            function: d[1],
        },
        OpCode::DFNOF => Message::FunctionOff {
            session: d[0],
            function: d[1],
        },
        OpCode::DFUN => Message::SetFunctions {
            session: d[0],
            range: FunctionRange::from_code(d[1])
                .ok_or(FrameDecodeError::Malformed("function range"))?,
            value: d[2],
        },
        OpCode::GLOC => Message::GetEngineSession {
            address: address(d[0], d[1])?,
            mode: match d[2] & 0b11 {
                0b00 => SessionRequestMode::Request,
                0b01 => SessionRequestMode::Steal,
                0b10 => SessionRequestMode::Share,
                _ => return Err(FrameDecodeError::Malformed("session request mode")),
            },
        },
        OpCode::ERR => Message::CommandStationError {
            data1: d[0],
            data2: d[1],
            code: d[2],
        },
        OpCode::RDCC3 => Message::RequestDcc3(RequestDccPacket::new(d[0], [d[1], d[2], d[3]])),
        OpCode::RDCC4 => {
            Message::RequestDcc4(RequestDccPacket::new(d[0], [d[1], d[2], d[3], d[4]]))
        }
        OpCode::RDCC5 => {
            Message::RequestDcc5(RequestDccPacket::new(d[0], [d[1], d[2], d[3], d[4], d[5]]))
        }
        OpCode::RDCC6 => Message::RequestDcc6(RequestDccPacket::new(
            d[0],
            [d[1], d[2], d[3], d[4], d[5], d[6]],
        )),
        OpCode::ACON => Message::AccessoryOn {
            node: read_u16_be(d, 0),
            event: read_u16_be(d, 2),
        },
        OpCode::ACOF => Message::AccessoryOff {
            node: read_u16_be(d, 0),
            event: read_u16_be(d, 2),
        },
        OpCode::ASON => Message::ShortEventOn {
            node: read_u16_be(d, 0),
            device: read_u16_be(d, 2),
        },
        OpCode::ASOF => Message::ShortEventOff {
            node: read_u16_be(d, 0),
            device: read_u16_be(d, 2),
        },
        OpCode::PLOC => {
            let (speed, direction) = decode_speed(SpeedSteps::S126, d[3]);
            Message::EngineReport(EngineReport {
                session: d[0],
                address: address(d[1], d[2])?,
                speed,
                direction,
                f0_f4: d[4],
                f5_f8: d[5],
                f9_f12: d[6],
            })
        }
        OpCode::STAT => Message::Status(CommandStationStatus {
            node: read_u16_be(d, 0),
            station: d[2],
            flags: StatusFlags(d[3]),
            major: d[4],
            minor: d[5],
            build: d[6],
        }),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Message {
        match Message::decode(bytes) {
            Ok(Decoded::Complete { message, consumed }) => {
                assert_eq!(consumed, bytes.len());
                message
            }
            other => panic!("unexpected decode result {:?}", other),
        }
    }

    // =========================================================================
    // Encoding Tests
    // =========================================================================

    #[test]
    fn zero_data_requests() {
        assert_eq!(Message::RequestTrackOn.encode().as_slice(), &[0x09]);
        assert_eq!(Message::RequestTrackOff.encode().as_slice(), &[0x08]);
        assert_eq!(Message::RequestEmergencyStop.encode().as_slice(), &[0x0A]);
        assert_eq!(Message::RequestStatus.encode().as_slice(), &[0x0C]);
        assert_eq!(Message::QueryNodeNumber.encode().as_slice(), &[0x0D]);
    }

    #[test]
    fn rdcc3_layout() {
        let m = Message::RequestDcc3(RequestDccPacket::<3>::new(2, [0xA2, 0x00, 0x00]));
        assert_eq!(m.encode().as_slice(), &[0x80, 0x02, 0xA2, 0x00, 0x00]);
    }

    #[test]
    fn request_dcc_picks_size() {
        let addr = LocoAddress::short(3).unwrap();
        let speed = DccPacket::speed(addr, SpeedSteps::S126, Speed::Step(10), Direction::Forward);
        let m = Message::request_dcc(&speed, 2).unwrap();
        assert_eq!(m.opcode(), 0xA0);
        let frame = m.encode();
        assert_eq!(frame.len(), 6);
        assert_eq!(&frame[2..], speed.as_bytes());

        let long = LocoAddress::long(1234).unwrap();
        let speed = DccPacket::speed(long, SpeedSteps::S126, Speed::Step(10), Direction::Forward);
        assert_eq!(Message::request_dcc(&speed, 1).unwrap().opcode(), 0xC0);

        let idle = DccPacket::idle();
        assert_eq!(Message::request_dcc(&idle, 1).unwrap().opcode(), 0x80);
    }

    #[test]
    fn engine_request_uses_long_form() {
        let m = Message::RequestEngineSession {
            address: LocoAddress::long(1000).unwrap(),
        };
        assert_eq!(m.encode().as_slice(), &[0x40, 0xC3, 0xE8]);
    }

    #[test]
    fn accessory_numbers_are_big_endian() {
        let m = Message::AccessoryOn {
            node: 0x0102,
            event: 0x0304,
        };
        assert_eq!(m.encode().as_slice(), &[0x90, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn stmod_flags() {
        let m = Message::SetSessionMode {
            session: 5,
            mode: SpeedMode::Steps28,
            service_mode: true,
            sound_mode: false,
        };
        assert_eq!(m.encode().as_slice(), &[0x44, 0x05, 0x07]);
    }

    // =========================================================================
    // Decoding Tests
    // =========================================================================

    #[test]
    fn decode_stat() {
        let m = decode(&[0xE3, 0x00, 0x01, 0x00, 0x04, 0x04, 0x61, 0x03]);
        let Message::Status(s) = m else {
            panic!("not a status");
        };
        assert_eq!(s.node, 1);
        assert!(s.flags.has(StatusFlags::TRACK_ON));
        assert!(!s.flags.has(StatusFlags::EMERGENCY_STOP));
        assert_eq!((s.major, s.minor, s.build), (4, 0x61, 3));
    }

    #[test]
    fn decode_ploc() {
        let m = decode(&[0xE1, 0x07, 0xC3, 0xE8, 0x8B, 0x10, 0x01, 0x00]);
        let Message::EngineReport(r) = m else {
            panic!("not a report");
        };
        assert_eq!(r.session, 7);
        assert_eq!(r.address, LocoAddress::long(1000).unwrap());
        assert_eq!(r.speed, Speed::Step(10));
        assert_eq!(r.direction, Direction::Forward);
        assert_eq!(r.f0_f4, 0x10);
    }

    #[test]
    fn decode_dspd_direction_bit() {
        let m = decode(&[0x47, 0x02, 0x05]);
        assert_eq!(
            m,
            Message::SetSpeedDirection {
                session: 2,
                speed: Speed::Step(4),
                direction: Direction::Reverse,
            }
        );
    }

    #[test]
    fn short_buffer_is_incomplete() {
        assert_eq!(
            Message::decode(&[0xE3, 0x00, 0x01]),
            Ok(Decoded::Incomplete { needed: 5 })
        );
        assert_eq!(Message::decode(&[]), Ok(Decoded::Incomplete { needed: 1 }));
    }

    #[test]
    fn unassigned_opcode_is_unrecognized() {
        let m = decode(&[0x81, 1, 2, 3, 4]);
        assert!(matches!(m, Message::Unrecognized { opcode: 0x81, .. }));
        assert_eq!(m.encode().as_slice(), &[0x81, 1, 2, 3, 4]);
    }

    #[test]
    fn known_opcode_without_variant_passes_through() {
        let m = decode(&[0x42, 0x01, 0x02]);
        assert!(matches!(m, Message::Unrecognized { opcode: 0x42, .. }));
        assert_eq!(m.op(), Some(OpCode::SNN));
    }

    #[test]
    fn bad_function_range_is_malformed() {
        assert!(Message::decode(&[0x60, 0x01, 0x09, 0x00]).is_err());
    }

    #[test]
    fn rdcc_decodes_to_matching_size() {
        let m = decode(&[0xA0, 0x02, 0x03, 0x3F, 0x8B, 0xB7]);
        let Message::RequestDcc4(p) = m else {
            panic!("not RDCC4");
        };
        assert_eq!(p.repeat, 2);
        assert_eq!(p.packet, [0x03, 0x3F, 0x8B, 0xB7]);
    }

    // =========================================================================
    // Round Trip Tests
    // =========================================================================

    #[test]
    fn every_message_round_trips() {
        let short = LocoAddress::short(3).unwrap();
        let long = LocoAddress::long(4321).unwrap();
        let messages = [
            Message::BusHalt,
            Message::BusOn,
            Message::TrackOff,
            Message::TrackOn,
            Message::EmergencyStopped,
            Message::SystemReset,
            Message::RequestTrackOff,
            Message::RequestTrackOn,
            Message::RequestEmergencyStop,
            Message::RequestStatus,
            Message::QueryNodeNumber,
            Message::ReleaseEngine { session: 1 },
            Message::QueryEngine { session: 2 },
            Message::SessionKeepAlive { session: 3 },
            Message::RequestEngineSession { address: long },
            Message::SetSessionMode {
                session: 4,
                mode: SpeedMode::Steps28Interleaved,
                service_mode: true,
                sound_mode: false,
            },
            Message::SetSessionMode {
                session: 5,
                mode: SpeedMode::Steps14,
                service_mode: false,
                sound_mode: true,
            },
            Message::SetSpeedDirection {
                session: 6,
                speed: Speed::Step(126),
                direction: Direction::Forward,
            },
            Message::SetSpeedDirection {
                session: 6,
                speed: Speed::EmergencyStop,
                direction: Direction::Reverse,
            },
            Message::FunctionOn {
                session: 7,
                function: 28,
            },
            Message::FunctionOff {
                session: 7,
                function: 0,
            },
            Message::SetFunctions {
                session: 8,
                range: FunctionRange::F0F4,
                value: 0x1F,
            },
            Message::SetFunctions {
                session: 8,
                range: FunctionRange::F21F28,
                value: 0xA5,
            },
            Message::GetEngineSession {
                address: short,
                mode: SessionRequestMode::Request,
            },
            Message::GetEngineSession {
                address: long,
                mode: SessionRequestMode::Share,
            },
            Message::CommandStationError {
                data1: 0xC0,
                data2: 0x64,
                code: 2,
            },
            Message::RequestDcc3(RequestDccPacket::<3>::new(2, [0xFF, 0x00, 0xFF])),
            Message::RequestDcc4(RequestDccPacket::<4>::new(3, [0x03, 0x3F, 0x8B, 0xB7])),
            Message::RequestDcc5(RequestDccPacket::<5>::new(1, [0xD0, 0xE1, 0x3F, 0x8B, 0x85])),
            Message::RequestDcc6(RequestDccPacket::<6>::new(
                4,
                [0xD0, 0xE1, 0xDF, 0x01, 0x00, 0x6F],
            )),
            Message::AccessoryOn {
                node: 256,
                event: 1,
            },
            Message::AccessoryOff {
                node: 0xFFFF,
                event: 0x8000,
            },
            Message::ShortEventOn { node: 12, device: 7 },
            Message::ShortEventOff { node: 0, device: 65 },
            Message::EngineReport(EngineReport {
                session: 9,
                address: long,
                speed: Speed::Step(40),
                direction: Direction::Reverse,
                f0_f4: 0x11,
                f5_f8: 0x0A,
                f9_f12: 0x05,
            }),
            Message::Status(CommandStationStatus {
                node: 0xFFFE,
                station: 0,
                flags: StatusFlags(StatusFlags::TRACK_ON | StatusFlags::BUS_ON),
                major: 4,
                minor: b'a',
                build: 3,
            }),
            Message::Unrecognized {
                opcode: 0x0B,
                data: RawData::new(),
            },
        ];
        for m in messages {
            let data = m.encode();
            assert_eq!(data.len(), 1 + data_len(data[0]), "{:?}", m);
            assert_eq!(decode(&data), m);
        }
    }
}
