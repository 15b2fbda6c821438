//! Roco/Fleischmann Z21 LAN protocol.
//!
//! - [`messages`]: the wire format, one enum variant per frame layout
//! - [`session`]: the client state machine for one Z21 link
//!
//! The Z21 speaks UDP on port 21105. Each datagram holds one or more frames;
//! frames never span datagrams.

pub mod messages;
pub mod session;

pub use messages::{
    BroadcastFlags, CentralState, CentralStateEx, FirmwareVersion, FunctionAction, HardwareType,
    LocoInfo, LocoMode, LocoNetTunnel, Message, SystemStateData, XMessage,
};
pub use session::Z21Session;

/// Default UDP port of a Z21.
pub const DEFAULT_PORT: u16 = 21105;
