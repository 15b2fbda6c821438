//! MERG CBUS over a GridConnect CAN-USB adapter.
//!
//! - [`opcode`]: opcode table, data lengths and CAN priorities
//! - [`messages`]: typed messages
//! - [`gridconnect`]: the ASCII framing spoken by the adapter
//! - [`session`]: the client state machine for one CBUS link

pub mod gridconnect;
pub mod messages;
pub mod opcode;
pub mod session;

pub use gridconnect::{CanFrame, GridConnectDecoder};
pub use messages::{
    CommandStationStatus, EngineReport, FunctionRange, Message, RequestDccPacket, SpeedMode,
    StatusFlags,
};
pub use opcode::{MajorPriority, MinorPriority, OpCode};
pub use session::CbusSession;

/// Default CAN id of this node.
pub const DEFAULT_CAN_ID: u8 = 0x7D;
