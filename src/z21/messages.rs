//! Z21 LAN message set.
//!
//! Every frame starts with a 4-byte header: `dataLen` (u16 LE, whole frame
//! length) and `header` (u16 LE). LAN_X frames (`header == 0x40`) carry an
//! X-Bus message: `xheader`, data bytes, and an XOR checksum over both.
//!
//! | Frame | Len | Bytes after the LAN header |
//! |-------|-----|----------------------------|
//! | `X_SET_TRACK_POWER_ON` | 7 | `21 81 A0` |
//! | `X_SET_TRACK_POWER_OFF` | 7 | `21 80 A1` |
//! | `X_SET_STOP` | 6 | `80 80` |
//! | `X_GET_LOCO_INFO` | 9 | `E3 F0 aH aL ck` |
//! | `X_SET_LOCO_DRIVE` | 10 | `E4 1s aH aL sd ck` |
//! | `X_SET_LOCO_FUNCTION` | 10 | `E4 F8 aH aL tf ck` |
//! | `X_LOCO_INFO` | 14+ | `EF aH aL db2 sd db4 f5 f13 f21 ck` |
//!
//! Request and reply variants that share a header are distinct enum variants;
//! the decoder tells them apart by length and sub-command.
//!
//! # Example
//!
//! ```rust
//! use rs_commandstation::codec::WireMessage;
//! use rs_commandstation::z21::{Message, XMessage};
//!
//! let frame = Message::X(XMessage::SetTrackPowerOn).encode();
//! assert_eq!(frame.as_slice(), &[0x06, 0x00, 0x40, 0x00, 0x21, 0x81, 0xA0]);
//!
//! let decoded = Message::decode(&frame).unwrap().complete().unwrap();
//! assert_eq!(decoded, Message::X(XMessage::SetTrackPowerOn));
//! ```

use crate::checksum;
use crate::codec::{
    read_i16_le, read_u16_be, read_u16_le, read_u32_le, Decoded, Frame, FrameWriter, WireMessage,
    MAX_FRAME_LEN,
};
use crate::dcc::{decode_speed, encode_speed, FunctionState, LocoAddress, Speed, SpeedSteps};
use crate::error::FrameDecodeError;
use crate::session::{Measurements, PowerState, SystemFlags, TurnoutPosition};
use crate::traits::Direction;

/// Size of the LAN header.
pub const HEADER_LEN: usize = 4;

/// Largest LocoNet message tunnelled through the LAN interface.
pub const MAX_LOCONET_LEN: usize = 32;

/// Bytes of feedback per R-Bus group.
pub const RMBUS_GROUP_LEN: usize = 10;

/// LAN header codes.
pub mod header {
    /// Serial number request and reply.
    pub const GET_SERIAL_NUMBER: u16 = 0x10;
    /// Hardware info request and reply.
    pub const GET_HWINFO: u16 = 0x1A;
    /// Client logoff.
    pub const LOGOFF: u16 = 0x30;
    /// X-Bus tunnel.
    pub const X: u16 = 0x40;
    /// Set broadcast flags.
    pub const SET_BROADCASTFLAGS: u16 = 0x50;
    /// Get broadcast flags and reply.
    pub const GET_BROADCASTFLAGS: u16 = 0x51;
    /// Get loco mode and reply.
    pub const GET_LOCO_MODE: u16 = 0x60;
    /// Set loco mode.
    pub const SET_LOCO_MODE: u16 = 0x61;
    /// R-Bus feedback changed.
    pub const RMBUS_DATACHANGED: u16 = 0x80;
    /// Request R-Bus feedback.
    pub const RMBUS_GETDATA: u16 = 0x81;
    /// System state broadcast and reply.
    pub const SYSTEMSTATE_DATACHANGED: u16 = 0x84;
    /// Request system state.
    pub const SYSTEMSTATE_GETDATA: u16 = 0x85;
    /// LocoNet message received by the Z21.
    pub const LOCONET_Z21_RX: u16 = 0xA0;
    /// LocoNet message sent by the Z21.
    pub const LOCONET_Z21_TX: u16 = 0xA1;
    /// LocoNet message from a LAN client.
    pub const LOCONET_FROM_LAN: u16 = 0xA2;
}

// ============================================================================
// Value Types
// ============================================================================

/// Z21 hardware variants reported by `LAN_GET_HWINFO`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HardwareType {
    /// Black Z21, 2012 hardware.
    Z21Old,
    /// Black Z21, 2013 hardware.
    Z21New,
    /// SmartRail.
    SmartRail,
    /// White z21 starter set.
    Z21Small,
    /// z21 start.
    Z21Start,
    /// Any other code.
    Other(u32),
}

impl HardwareType {
    /// Decode the 32-bit hardware type code.
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x200 => HardwareType::Z21Old,
            0x201 => HardwareType::Z21New,
            0x202 => HardwareType::SmartRail,
            0x203 => HardwareType::Z21Small,
            0x204 => HardwareType::Z21Start,
            other => HardwareType::Other(other),
        }
    }

    /// Wire code.
    pub const fn code(&self) -> u32 {
        match self {
            HardwareType::Z21Old => 0x200,
            HardwareType::Z21New => 0x201,
            HardwareType::SmartRail => 0x202,
            HardwareType::Z21Small => 0x203,
            HardwareType::Z21Start => 0x204,
            HardwareType::Other(code) => *code,
        }
    }

    /// Marketing name.
    pub const fn name(&self) -> &'static str {
        match self {
            HardwareType::Z21Old => "Black Z21 (2012)",
            HardwareType::Z21New => "Black Z21 (2013)",
            HardwareType::SmartRail => "SmartRail",
            HardwareType::Z21Small => "White z21",
            HardwareType::Z21Start => "z21 start",
            HardwareType::Other(_) => "unknown",
        }
    }
}

/// Decode one BCD byte. Invalid nibbles are taken at face value.
pub const fn from_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

/// Encode 0..=99 as BCD.
pub const fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Firmware version, e.g. 1.43.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl FirmwareVersion {
    /// Version from decimal parts.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Decode the HWINFO field: BCD minor in bits 0..8, BCD major in 8..16.
    pub const fn from_hwinfo(raw: u32) -> Self {
        Self {
            major: from_bcd(((raw >> 8) & 0xFF) as u8),
            minor: from_bcd((raw & 0xFF) as u8),
        }
    }

    /// Encode for HWINFO.
    pub const fn to_hwinfo(&self) -> u32 {
        ((to_bcd(self.major) as u32) << 8) | to_bcd(self.minor) as u32
    }
}

/// Broadcast subscription flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BroadcastFlags(pub u32);

impl BroadcastFlags {
    /// Power, loco and turnout broadcasts.
    pub const POWER_LOCO_TURNOUT: u32 = 0x0000_0001;
    /// R-Bus feedback broadcasts.
    pub const RMBUS: u32 = 0x0000_0002;
    /// System state broadcasts.
    pub const SYSTEM_STATE: u32 = 0x0000_0100;
    /// Loco info for every loco, not just subscribed ones.
    pub const ALL_LOCO_INFO: u32 = 0x0001_0000;
    /// LocoNet messages except loco and turnout traffic.
    pub const LOCONET: u32 = 0x0100_0000;

    /// `true` if every bit of `other` is set.
    pub const fn contains(&self, other: BroadcastFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union.
    pub const fn with(self, bits: u32) -> Self {
        Self(self.0 | bits)
    }
}

/// Decoder protocol of a loco address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LocoMode {
    /// DCC.
    #[default]
    Dcc,
    /// Motorola.
    Motorola,
}

impl LocoMode {
    const fn from_byte(b: u8) -> Self {
        if b == 1 {
            LocoMode::Motorola
        } else {
            LocoMode::Dcc
        }
    }

    const fn to_byte(self) -> u8 {
        match self {
            LocoMode::Dcc => 0,
            LocoMode::Motorola => 1,
        }
    }
}

/// `centralState` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CentralState(pub u8);

impl CentralState {
    /// Emergency stop active.
    pub const EMERGENCY_STOP: u8 = 0x01;
    /// Track voltage off.
    pub const TRACK_VOLTAGE_OFF: u8 = 0x02;
    /// Short circuit.
    pub const SHORT_CIRCUIT: u8 = 0x04;
    /// Programming mode active.
    pub const PROGRAMMING_MODE: u8 = 0x20;

    #[inline]
    const fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Apply to a flag set. Power is on only with voltage present and no short.
    pub fn apply_to(&self, flags: &mut SystemFlags) {
        flags.emergency_stop = self.has(Self::EMERGENCY_STOP);
        flags.short_circuit = self.has(Self::SHORT_CIRCUIT);
        flags.programming_mode = self.has(Self::PROGRAMMING_MODE);
        flags.track_power =
            PowerState::from(!self.has(Self::TRACK_VOLTAGE_OFF) && !self.has(Self::SHORT_CIRCUIT));
    }
}

/// `centralStateEx` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CentralStateEx(pub u8);

impl CentralStateEx {
    /// Temperature too high.
    pub const HIGH_TEMPERATURE: u8 = 0x01;
    /// Input voltage too low.
    pub const POWER_LOST: u8 = 0x02;
    /// Short at the external booster output.
    pub const SHORT_CIRCUIT_EXTERNAL: u8 = 0x04;
    /// Short at the main or programming track.
    pub const SHORT_CIRCUIT_INTERNAL: u8 = 0x08;

    /// Apply to a flag set.
    pub fn apply_to(&self, flags: &mut SystemFlags) {
        flags.high_temperature = self.0 & Self::HIGH_TEMPERATURE != 0;
        flags.power_lost = self.0 & Self::POWER_LOST != 0;
        flags.short_circuit_external = self.0 & Self::SHORT_CIRCUIT_EXTERNAL != 0;
        flags.short_circuit_internal = self.0 & Self::SHORT_CIRCUIT_INTERNAL != 0;
    }
}

/// Payload of `LAN_SYSTEMSTATE_DATACHANGED`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SystemStateData {
    /// Main track current in mA.
    pub main_current: i16,
    /// Programming track current in mA.
    pub prog_current: i16,
    /// Smoothed main track current in mA.
    pub filtered_main_current: i16,
    /// Internal temperature in °C.
    pub temperature: i16,
    /// Supply voltage in mV.
    pub supply_voltage: u16,
    /// Internal voltage in mV.
    pub vcc_voltage: u16,
    /// Status bits.
    pub central_state: CentralState,
    /// Extended status bits.
    pub central_state_ex: CentralStateEx,
    /// Reserved byte.
    pub reserved: u8,
    /// Capability bits (newer firmware, 0 otherwise).
    pub capabilities: u8,
}

impl SystemStateData {
    /// Status flags.
    pub fn flags(&self) -> SystemFlags {
        let mut flags = SystemFlags::default();
        self.central_state.apply_to(&mut flags);
        self.central_state_ex.apply_to(&mut flags);
        flags
    }

    /// Measurements.
    pub fn measurements(&self) -> Measurements {
        Measurements {
            main_current_ma: self.main_current,
            prog_current_ma: self.prog_current,
            filtered_main_current_ma: self.filtered_main_current,
            temperature_c: self.temperature,
            supply_voltage_mv: self.supply_voltage,
            vcc_voltage_mv: self.vcc_voltage,
        }
    }
}

/// Function switch type in `X_SET_LOCO_FUNCTION`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionAction {
    /// Switch off.
    Off,
    /// Switch on.
    On,
    /// Toggle.
    Toggle,
}

impl FunctionAction {
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(FunctionAction::Off),
            1 => Some(FunctionAction::On),
            2 => Some(FunctionAction::Toggle),
            _ => None,
        }
    }

    const fn bits(self) -> u8 {
        match self {
            FunctionAction::Off => 0,
            FunctionAction::On => 1,
            FunctionAction::Toggle => 2,
        }
    }
}

impl From<bool> for FunctionAction {
    fn from(on: bool) -> Self {
        if on {
            FunctionAction::On
        } else {
            FunctionAction::Off
        }
    }
}

/// Payload of `LAN_X_LOCO_INFO`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocoInfo {
    /// Loco address.
    pub address: LocoAddress,
    /// Controlled by another client.
    pub busy: bool,
    /// Speed step mode.
    pub steps: SpeedSteps,
    /// Speed.
    pub speed: Speed,
    /// Direction.
    pub direction: Direction,
    /// Double traction active.
    pub double_traction: bool,
    /// Smart search active.
    pub smart_search: bool,
    /// F0..F28.
    pub functions: FunctionState,
}

impl LocoInfo {
    const BUSY: u8 = 0x08;
    const STEPS_MASK: u8 = 0x07;
    const DOUBLE_TRACTION: u8 = 0x40;
    const SMART_SEARCH: u8 = 0x20;

    /// Stopped loco in 126-step mode with all functions off.
    pub const fn new(address: LocoAddress) -> Self {
        Self {
            address,
            busy: false,
            steps: SpeedSteps::S126,
            speed: Speed::Stop,
            direction: Direction::Forward,
            double_traction: false,
            smart_search: false,
            functions: FunctionState::new(),
        }
    }

    const fn steps_code(steps: SpeedSteps) -> u8 {
        match steps {
            SpeedSteps::S14 => 0,
            SpeedSteps::S28 => 2,
            SpeedSteps::S126 => 4,
        }
    }

    const fn steps_from_code(code: u8) -> Option<SpeedSteps> {
        match code {
            0 => Some(SpeedSteps::S14),
            2 => Some(SpeedSteps::S28),
            4 => Some(SpeedSteps::S126),
            _ => None,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Variable-length raw payload.
pub type RawPayload = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Direction of a tunnelled LocoNet message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocoNetTunnel {
    /// Received by the Z21 from LocoNet.
    Rx,
    /// Sent by the Z21 onto LocoNet.
    Tx,
    /// Sent by a LAN client onto LocoNet.
    FromLan,
}

impl LocoNetTunnel {
    const fn header(self) -> u16 {
        match self {
            LocoNetTunnel::Rx => header::LOCONET_Z21_RX,
            LocoNetTunnel::Tx => header::LOCONET_Z21_TX,
            LocoNetTunnel::FromLan => header::LOCONET_FROM_LAN,
        }
    }
}

/// A Z21 LAN message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// `LAN_GET_SERIAL_NUMBER` request.
    GetSerialNumber,
    /// `LAN_GET_SERIAL_NUMBER` reply.
    SerialNumber(u32),
    /// `LAN_GET_HWINFO` request.
    GetHardwareInfo,
    /// `LAN_GET_HWINFO` reply.
    HardwareInfo {
        /// Hardware variant.
        hardware_type: HardwareType,
        /// Firmware version.
        firmware: FirmwareVersion,
    },
    /// `LAN_LOGOFF`.
    Logoff,
    /// `LAN_SET_BROADCASTFLAGS`.
    SetBroadcastFlags(BroadcastFlags),
    /// `LAN_GET_BROADCASTFLAGS` request.
    GetBroadcastFlags,
    /// `LAN_GET_BROADCASTFLAGS` reply.
    BroadcastFlags(BroadcastFlags),
    /// `LAN_GET_LOCO_MODE` request.
    GetLocoMode(u16),
    /// `LAN_GET_LOCO_MODE` reply.
    LocoMode {
        /// Loco address.
        address: u16,
        /// Mode.
        mode: LocoMode,
    },
    /// `LAN_SET_LOCO_MODE`.
    SetLocoMode {
        /// Loco address.
        address: u16,
        /// Mode.
        mode: LocoMode,
    },
    /// `LAN_RMBUS_GETDATA`.
    RmBusGetData {
        /// Group 0 (modules 1..=10) or 1 (11..=20).
        group: u8,
    },
    /// `LAN_RMBUS_DATACHANGED`.
    RmBusDataChanged {
        /// Group index.
        group: u8,
        /// One byte per feedback module.
        status: [u8; RMBUS_GROUP_LEN],
    },
    /// `LAN_SYSTEMSTATE_GETDATA`.
    SystemStateGetData,
    /// `LAN_SYSTEMSTATE_DATACHANGED`.
    SystemStateDataChanged(SystemStateData),
    /// Tunnelled LocoNet message, passed through raw.
    LocoNet {
        /// Tunnel direction.
        tunnel: LocoNetTunnel,
        /// LocoNet bytes.
        payload: heapless::Vec<u8, MAX_LOCONET_LEN>,
    },
    /// X-Bus message.
    X(XMessage),
    /// Unknown header.
    Unrecognized {
        /// Header code.
        header: u16,
        /// Bytes after the LAN header.
        payload: RawPayload,
    },
}

/// An X-Bus message tunnelled in `LAN_X`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XMessage {
    /// `LAN_X_GET_VERSION`.
    GetVersion,
    /// `LAN_X_GET_STATUS`.
    GetStatus,
    /// `LAN_X_SET_TRACK_POWER_OFF`.
    SetTrackPowerOff,
    /// `LAN_X_SET_TRACK_POWER_ON`.
    SetTrackPowerOn,
    /// `LAN_X_SET_STOP`.
    SetStop,
    /// `LAN_X_GET_LOCO_INFO`, also subscribes to the loco.
    GetLocoInfo(LocoAddress),
    /// `LAN_X_SET_LOCO_DRIVE`.
    ///
    /// `speed` is expected in the form [`Speed::clamp_to`] gives: the wire has
    /// no separate step 0, so `Step(0)` decodes back as `Stop`. Build it with
    /// [`XMessage::loco_drive`] to get that form.
    SetLocoDrive {
        /// Loco address.
        address: LocoAddress,
        /// Step mode.
        steps: SpeedSteps,
        /// Speed.
        speed: Speed,
        /// Direction.
        direction: Direction,
    },
    /// `LAN_X_SET_LOCO_FUNCTION`.
    SetLocoFunction {
        /// Loco address.
        address: LocoAddress,
        /// Function number, 0..=63 on the wire.
        function: u8,
        /// Switch type.
        action: FunctionAction,
    },
    /// `LAN_X_GET_TURNOUT_INFO`.
    GetTurnoutInfo(u16),
    /// `LAN_X_SET_TURNOUT`.
    SetTurnout {
        /// Accessory address.
        address: u16,
        /// Output: `false` for port 0, `true` for port 1.
        port: bool,
        /// Energize the output.
        activate: bool,
        /// Queue instead of executing immediately.
        queue: bool,
    },
    /// `LAN_X_GET_FIRMWARE_VERSION`.
    GetFirmwareVersion,
    /// `LAN_X_BC_TRACK_POWER_OFF`.
    BcTrackPowerOff,
    /// `LAN_X_BC_TRACK_POWER_ON`.
    BcTrackPowerOn,
    /// `LAN_X_BC_PROGRAMMING_MODE`.
    BcProgrammingMode,
    /// `LAN_X_BC_TRACK_SHORT_CIRCUIT`.
    BcTrackShortCircuit,
    /// `LAN_X_UNKNOWN_COMMAND`.
    UnknownCommand,
    /// `LAN_X_BC_STOPPED`.
    BcStopped,
    /// `LAN_X_STATUS_CHANGED`.
    StatusChanged(CentralState),
    /// `LAN_X_GET_VERSION` reply.
    Version {
        /// X-Bus protocol version.
        xbus_version: u8,
        /// Command station ID.
        station_id: u8,
    },
    /// `LAN_X_GET_FIRMWARE_VERSION` reply.
    FirmwareVersion(FirmwareVersion),
    /// `LAN_X_LOCO_INFO`.
    LocoInfo(LocoInfo),
    /// `LAN_X_TURNOUT_INFO`.
    TurnoutInfo {
        /// Accessory address.
        address: u16,
        /// Reported position.
        position: TurnoutPosition,
    },
    /// Unknown xheader or sub-command.
    Unrecognized {
        /// xheader.
        xheader: u8,
        /// Data bytes, checksum excluded.
        data: RawPayload,
    },
}

impl Message {
    /// Header code of this message.
    pub fn header(&self) -> u16 {
        match self {
            Message::GetSerialNumber | Message::SerialNumber(_) => header::GET_SERIAL_NUMBER,
            Message::GetHardwareInfo | Message::HardwareInfo { .. } => header::GET_HWINFO,
            Message::Logoff => header::LOGOFF,
            Message::SetBroadcastFlags(_) => header::SET_BROADCASTFLAGS,
            Message::GetBroadcastFlags | Message::BroadcastFlags(_) => header::GET_BROADCASTFLAGS,
            Message::GetLocoMode(_) | Message::LocoMode { .. } => header::GET_LOCO_MODE,
            Message::SetLocoMode { .. } => header::SET_LOCO_MODE,
            Message::RmBusGetData { .. } => header::RMBUS_GETDATA,
            Message::RmBusDataChanged { .. } => header::RMBUS_DATACHANGED,
            Message::SystemStateGetData => header::SYSTEMSTATE_GETDATA,
            Message::SystemStateDataChanged(_) => header::SYSTEMSTATE_DATACHANGED,
            Message::LocoNet { tunnel, .. } => tunnel.header(),
            Message::X(_) => header::X,
            Message::Unrecognized { header, .. } => *header,
        }
    }

    /// `true` for messages a command station sends to clients.
    pub fn is_from_station(&self) -> bool {
        match self {
            Message::SerialNumber(_)
            | Message::HardwareInfo { .. }
            | Message::BroadcastFlags(_)
            | Message::LocoMode { .. }
            | Message::RmBusDataChanged { .. }
            | Message::SystemStateDataChanged(_) => true,
            Message::X(x) => x.is_from_station(),
            _ => false,
        }
    }
}

impl XMessage {
    /// Drive request with `speed` clamped to the step mode.
    pub const fn loco_drive(
        address: LocoAddress,
        steps: SpeedSteps,
        speed: Speed,
        direction: Direction,
    ) -> Self {
        XMessage::SetLocoDrive {
            address,
            steps,
            speed: speed.clamp_to(steps),
            direction,
        }
    }

    /// `true` for replies and broadcasts.
    pub fn is_from_station(&self) -> bool {
        matches!(
            self,
            XMessage::BcTrackPowerOff
                | XMessage::BcTrackPowerOn
                | XMessage::BcProgrammingMode
                | XMessage::BcTrackShortCircuit
                | XMessage::UnknownCommand
                | XMessage::BcStopped
                | XMessage::StatusChanged(_)
                | XMessage::Version { .. }
                | XMessage::FirmwareVersion(_)
                | XMessage::LocoInfo(_)
                | XMessage::TurnoutInfo { .. }
        )
    }

    fn xheader_and_data(&self, data: &mut heapless::Vec<u8, MAX_FRAME_LEN>) -> u8 {
        let mut put = |bytes: &[u8]| {
            let _ = data.extend_from_slice(bytes);
        };
        match self {
            XMessage::GetVersion => {
                put(&[0x21]);
                0x21
            }
            XMessage::GetStatus => {
                put(&[0x24]);
                0x21
            }
            XMessage::SetTrackPowerOff => {
                put(&[0x80]);
                0x21
            }
            XMessage::SetTrackPowerOn => {
                put(&[0x81]);
                0x21
            }
            XMessage::SetStop => 0x80,
            XMessage::GetLocoInfo(address) => {
                let [hi, lo] = address.to_bytes();
                put(&[0xF0, hi, lo]);
                0xE3
            }
            XMessage::SetLocoDrive {
                address,
                steps,
                speed,
                direction,
            } => {
                let db0 = match steps {
                    SpeedSteps::S14 => 0x10,
                    SpeedSteps::S28 => 0x12,
                    SpeedSteps::S126 => 0x13,
                };
                let [hi, lo] = address.to_bytes();
                put(&[db0, hi, lo, encode_speed(*steps, *speed, *direction)]);
                0xE4
            }
            XMessage::SetLocoFunction {
                address,
                function,
                action,
            } => {
                let [hi, lo] = address.to_bytes();
                put(&[0xF8, hi, lo, (action.bits() << 6) | (function & 0x3F)]);
                0xE4
            }
            XMessage::GetTurnoutInfo(address) => {
                put(&address.to_be_bytes());
                0x43
            }
            XMessage::SetTurnout {
                address,
                port,
                activate,
                queue,
            } => {
                put(&address.to_be_bytes());
                put(&[0x80 | ((*queue as u8) << 5) | ((*activate as u8) << 3) | *port as u8]);
                0x53
            }
            XMessage::GetFirmwareVersion => {
                put(&[0x0A]);
                0xF1
            }
            XMessage::BcTrackPowerOff => {
                put(&[0x00]);
                0x61
            }
            XMessage::BcTrackPowerOn => {
                put(&[0x01]);
                0x61
            }
            XMessage::BcProgrammingMode => {
                put(&[0x02]);
                0x61
            }
            XMessage::BcTrackShortCircuit => {
                put(&[0x08]);
                0x61
            }
            XMessage::UnknownCommand => {
                put(&[0x82]);
                0x61
            }
            XMessage::BcStopped => {
                put(&[0x00]);
                0x81
            }
            XMessage::StatusChanged(state) => {
                put(&[0x22, state.0]);
                0x62
            }
            XMessage::Version {
                xbus_version,
                station_id,
            } => {
                put(&[0x21, *xbus_version, *station_id]);
                0x63
            }
            XMessage::FirmwareVersion(version) => {
                put(&[0x0A, to_bcd(version.major), to_bcd(version.minor)]);
                0xF3
            }
            XMessage::LocoInfo(info) => {
                let [hi, lo] = info.address.to_bytes();
                let db2 = ((info.busy as u8) * LocoInfo::BUSY) | LocoInfo::steps_code(info.steps);
                let db4 = ((info.double_traction as u8) * LocoInfo::DOUBLE_TRACTION)
                    | ((info.smart_search as u8) * LocoInfo::SMART_SEARCH)
                    | info.functions.group_f0_f4();
                put(&[
                    hi,
                    lo,
                    db2,
                    encode_speed(info.steps, info.speed, info.direction),
                    db4,
                    info.functions.group_f5_f12(),
                    info.functions.group_f13_f20(),
                    info.functions.group_f21_f28(),
                ]);
                0xEF
            }
            XMessage::TurnoutInfo { address, position } => {
                put(&address.to_be_bytes());
                put(&[match position {
                    TurnoutPosition::Unknown => 0,
                    TurnoutPosition::Port0 => 1,
                    TurnoutPosition::Port1 => 2,
                    TurnoutPosition::Invalid => 3,
                }]);
                0x43
            }
            XMessage::Unrecognized { xheader, data: raw } => {
                put(raw);
                *xheader
            }
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn lan_frame(header: u16, payload: &[u8]) -> Frame {
    let mut w = FrameWriter::new();
    w.u16_le(0).u16_le(header).bytes(payload);
    let len = w.len() as u16;
    w.patch(0, (len & 0xFF) as u8);
    w.patch(1, (len >> 8) as u8);
    w.finish()
}

impl WireMessage for Message {
    fn encode(&self) -> Frame {
        let mut p: heapless::Vec<u8, MAX_FRAME_LEN> = heapless::Vec::new();
        match self {
            Message::GetSerialNumber
            | Message::GetHardwareInfo
            | Message::Logoff
            | Message::GetBroadcastFlags
            | Message::SystemStateGetData => {}
            Message::SerialNumber(serial) => {
                let mut w = FrameWriter::new();
                w.u32_le(*serial);
                let _ = p.extend_from_slice(w.as_slice());
            }
            Message::HardwareInfo {
                hardware_type,
                firmware,
            } => {
                let mut w = FrameWriter::new();
                w.u32_le(hardware_type.code()).u32_le(firmware.to_hwinfo());
                let _ = p.extend_from_slice(w.as_slice());
            }
            Message::SetBroadcastFlags(flags) | Message::BroadcastFlags(flags) => {
                let mut w = FrameWriter::new();
                w.u32_le(flags.0);
                let _ = p.extend_from_slice(w.as_slice());
            }
            Message::GetLocoMode(address) => {
                let _ = p.extend_from_slice(&address.to_be_bytes());
            }
            Message::LocoMode { address, mode } | Message::SetLocoMode { address, mode } => {
                let _ = p.extend_from_slice(&address.to_be_bytes());
                let _ = p.push(mode.to_byte());
            }
            Message::RmBusGetData { group } => {
                let _ = p.push(*group);
            }
            Message::RmBusDataChanged { group, status } => {
                let _ = p.push(*group);
                let _ = p.extend_from_slice(status);
            }
            Message::SystemStateDataChanged(s) => {
                let mut w = FrameWriter::new();
                w.u16_le(s.main_current as u16)
                    .u16_le(s.prog_current as u16)
                    .u16_le(s.filtered_main_current as u16)
                    .u16_le(s.temperature as u16)
                    .u16_le(s.supply_voltage)
                    .u16_le(s.vcc_voltage)
                    .u8(s.central_state.0)
                    .u8(s.central_state_ex.0)
                    .u8(s.reserved)
                    .u8(s.capabilities);
                let _ = p.extend_from_slice(w.as_slice());
            }
            Message::LocoNet { payload, .. } => {
                let _ = p.extend_from_slice(payload);
            }
            Message::X(x) => {
                let mut data = heapless::Vec::new();
                let xheader = x.xheader_and_data(&mut data);
                let _ = p.push(xheader);
                let _ = p.extend_from_slice(&data);
                let ck = checksum::xor(&p);
                let _ = p.push(ck);
            }
            Message::Unrecognized { payload, .. } => {
                let _ = p.extend_from_slice(&payload[..payload.len().min(MAX_FRAME_LEN - HEADER_LEN)]);
            }
        }
        lan_frame(self.header(), &p)
    }

    fn decode(buf: &[u8]) -> Result<Decoded<Self>, FrameDecodeError> {
        if buf.len() < HEADER_LEN {
            return Ok(Decoded::Incomplete {
                needed: HEADER_LEN - buf.len(),
            });
        }
        let len = read_u16_le(buf, 0) as usize;
        if len < HEADER_LEN {
            return Err(FrameDecodeError::Length {
                declared: len,
                minimum: HEADER_LEN,
            });
        }
        if len > MAX_FRAME_LEN {
            return Err(FrameDecodeError::Oversize {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if buf.len() < len {
            return Ok(Decoded::Incomplete {
                needed: len - buf.len(),
            });
        }

        let frame = &buf[..len];
        let header = read_u16_le(frame, 2);
        let message = decode_frame(header, frame)?;
        Ok(Decoded::Complete {
            message,
            consumed: len,
        })
    }
}

// ============================================================================
// Decoding
// ============================================================================

const fn bad_length() -> FrameDecodeError {
    FrameDecodeError::Malformed("unexpected length for header")
}

fn decode_frame(code: u16, f: &[u8]) -> Result<Message, FrameDecodeError> {
    let len = f.len();
    let msg = match (code, len) {
        (header::GET_SERIAL_NUMBER, 4) => Message::GetSerialNumber,
        (header::GET_SERIAL_NUMBER, 8) => Message::SerialNumber(read_u32_le(f, 4)),
        (header::GET_HWINFO, 4) => Message::GetHardwareInfo,
        (header::GET_HWINFO, 12) => Message::HardwareInfo {
            hardware_type: HardwareType::from_code(read_u32_le(f, 4)),
            firmware: FirmwareVersion::from_hwinfo(read_u32_le(f, 8)),
        },
        (header::LOGOFF, 4) => Message::Logoff,
        (header::SET_BROADCASTFLAGS, 8) => {
            Message::SetBroadcastFlags(BroadcastFlags(read_u32_le(f, 4)))
        }
        (header::GET_BROADCASTFLAGS, 4) => Message::GetBroadcastFlags,
        (header::GET_BROADCASTFLAGS, 8) => {
            Message::BroadcastFlags(BroadcastFlags(read_u32_le(f, 4)))
        }
        (header::GET_LOCO_MODE, 6) => Message::GetLocoMode(read_u16_be(f, 4)),
        (header::GET_LOCO_MODE, 7) => Message::LocoMode {
            address: read_u16_be(f, 4),
            mode: LocoMode::from_byte(f[6]),
        },
        (header::SET_LOCO_MODE, 7) => Message::SetLocoMode {
            address: read_u16_be(f, 4),
            mode: LocoMode::from_byte(f[6]),
        },
        (header::RMBUS_GETDATA, 5) => Message::RmBusGetData { group: f[4] },
        (header::RMBUS_DATACHANGED, 15) => {
            let mut status = [0u8; RMBUS_GROUP_LEN];
            status.copy_from_slice(&f[5..15]);
            Message::RmBusDataChanged {
                group: f[4],
                status,
            }
        }
        (header::SYSTEMSTATE_GETDATA, 4) => Message::SystemStateGetData,
        (header::SYSTEMSTATE_DATACHANGED, 20) => {
            Message::SystemStateDataChanged(SystemStateData {
                main_current: read_i16_le(f, 4),
                prog_current: read_i16_le(f, 6),
                filtered_main_current: read_i16_le(f, 8),
                temperature: read_i16_le(f, 10),
                supply_voltage: read_u16_le(f, 12),
                vcc_voltage: read_u16_le(f, 14),
                central_state: CentralState(f[16]),
                central_state_ex: CentralStateEx(f[17]),
                reserved: f[18],
                capabilities: f[19],
            })
        }
        (header::LOCONET_Z21_RX | header::LOCONET_Z21_TX | header::LOCONET_FROM_LAN, _) => {
            let tunnel = match code {
                header::LOCONET_Z21_RX => LocoNetTunnel::Rx,
                header::LOCONET_Z21_TX => LocoNetTunnel::Tx,
                _ => LocoNetTunnel::FromLan,
            };
            let mut payload = heapless::Vec::new();
            payload
                .extend_from_slice(&f[HEADER_LEN..])
                .map_err(|_| FrameDecodeError::Oversize {
                    len,
                    max: HEADER_LEN + MAX_LOCONET_LEN,
                })?;
            Message::LocoNet { tunnel, payload }
        }
        (header::X, _) => Message::X(decode_x(f)?),
        (
            header::GET_SERIAL_NUMBER
            | header::GET_HWINFO
            | header::LOGOFF
            | header::SET_BROADCASTFLAGS
            | header::GET_BROADCASTFLAGS
            | header::GET_LOCO_MODE
            | header::SET_LOCO_MODE
            | header::RMBUS_GETDATA
            | header::RMBUS_DATACHANGED
            | header::SYSTEMSTATE_GETDATA
            | header::SYSTEMSTATE_DATACHANGED,
            _,
        ) => return Err(bad_length()),
        (other, _) => {
            let mut payload = RawPayload::new();
            let _ = payload.extend_from_slice(&f[HEADER_LEN..]);
            Message::Unrecognized {
                header: other,
                payload,
            }
        }
    };
    Ok(msg)
}

fn decode_x(f: &[u8]) -> Result<XMessage, FrameDecodeError> {
    // xheader + checksum at minimum
    const MIN_X_LEN: usize = HEADER_LEN + 2;
    if f.len() < MIN_X_LEN {
        return Err(FrameDecodeError::Length {
            declared: f.len(),
            minimum: MIN_X_LEN,
        });
    }
    let x = &f[HEADER_LEN..];
    if let Some((expected, actual)) = checksum::expected_and_actual(x) {
        if expected != actual {
            return Err(FrameDecodeError::Checksum { expected, actual });
        }
    }

    let xheader = x[0];
    // Data bytes between xheader and checksum
    let d = &x[1..x.len() - 1];
    let loco = |hi: u8, lo: u8| {
        LocoAddress::from_bytes(hi, lo).ok_or(FrameDecodeError::Malformed("loco address"))
    };

    let msg = match (xheader, d) {
        (0x21, [0x21]) => XMessage::GetVersion,
        (0x21, [0x24]) => XMessage::GetStatus,
        (0x21, [0x80]) => XMessage::SetTrackPowerOff,
        (0x21, [0x81]) => XMessage::SetTrackPowerOn,
        (0x80, []) => XMessage::SetStop,
        (0xE3, [0xF0, hi, lo]) => XMessage::GetLocoInfo(loco(*hi, *lo)?),
        (0xE4, [db0 @ (0x10 | 0x12 | 0x13), hi, lo, sd]) => {
            let steps = match *db0 {
                0x10 => SpeedSteps::S14,
                0x12 => SpeedSteps::S28,
                _ => SpeedSteps::S126,
            };
            let (speed, direction) = decode_speed(steps, *sd);
            XMessage::SetLocoDrive {
                address: loco(*hi, *lo)?,
                steps,
                speed,
                direction,
            }
        }
        (0xE4, [0xF8, hi, lo, tf]) => XMessage::SetLocoFunction {
            address: loco(*hi, *lo)?,
            function: tf & 0x3F,
            action: FunctionAction::from_bits(tf >> 6)
                .ok_or(FrameDecodeError::Malformed("function switch type"))?,
        },
        (0x43, [msb, lsb]) => XMessage::GetTurnoutInfo(u16::from_be_bytes([*msb, *lsb])),
        (0x43, [msb, lsb, zz]) => XMessage::TurnoutInfo {
            address: u16::from_be_bytes([*msb, *lsb]),
            position: match zz & 0x03 {
                0 => TurnoutPosition::Unknown,
                1 => TurnoutPosition::Port0,
                2 => TurnoutPosition::Port1,
                _ => TurnoutPosition::Invalid,
            },
        },
        (0x53, [msb, lsb, cmd]) if cmd & 0x80 != 0 => XMessage::SetTurnout {
            address: u16::from_be_bytes([*msb, *lsb]),
            port: cmd & 0x01 != 0,
            activate: cmd & 0x08 != 0,
            queue: cmd & 0x20 != 0,
        },
        (0xF1, [0x0A]) => XMessage::GetFirmwareVersion,
        (0x61, [0x00]) => XMessage::BcTrackPowerOff,
        (0x61, [0x01]) => XMessage::BcTrackPowerOn,
        (0x61, [0x02]) => XMessage::BcProgrammingMode,
        (0x61, [0x08]) => XMessage::BcTrackShortCircuit,
        (0x61, [0x82]) => XMessage::UnknownCommand,
        (0x81, [0x00]) => XMessage::BcStopped,
        (0x62, [0x22, status]) => XMessage::StatusChanged(CentralState(*status)),
        (0x63, [0x21, version, id]) => XMessage::Version {
            xbus_version: *version,
            station_id: *id,
        },
        (0xF3, [0x0A, major, minor]) => {
            XMessage::FirmwareVersion(FirmwareVersion::new(from_bcd(*major), from_bcd(*minor)))
        }
        // Newer firmware appends bytes after F21..F28
        (0xEF, [hi, lo, db2, sd, db4, f5_12, f13_20, f21_28, ..]) => {
            let steps = LocoInfo::steps_from_code(db2 & LocoInfo::STEPS_MASK)
                .ok_or(FrameDecodeError::Malformed("speed step mode"))?;
            let (speed, direction) = decode_speed(steps, *sd);
            let mut functions = FunctionState::new();
            functions.set_f0_f4(*db4 & 0x1F);
            functions.set_range(5, 8, *f5_12);
            functions.set_range(13, 8, *f13_20);
            functions.set_range(21, 8, *f21_28);
            XMessage::LocoInfo(LocoInfo {
                address: loco(*hi, *lo)?,
                busy: db2 & LocoInfo::BUSY != 0,
                steps,
                speed,
                direction,
                double_traction: db4 & LocoInfo::DOUBLE_TRACTION != 0,
                smart_search: db4 & LocoInfo::SMART_SEARCH != 0,
                functions,
            })
        }
        _ => {
            let mut data = RawPayload::new();
            let _ = data.extend_from_slice(d);
            XMessage::Unrecognized { xheader, data }
        }
    };
    Ok(msg)
}

/// Checksum of an encoded LAN_X frame, `true` for any other frame.
pub fn frame_checksum_ok(frame: &[u8]) -> bool {
    if frame.len() < HEADER_LEN || read_u16_le(frame, 2) != header::X {
        return true;
    }
    checksum::verify(&frame[HEADER_LEN..])
}
