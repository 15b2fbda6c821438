//! # rs-commandstation
//!
//! Protocol drivers for model railway command stations: the Roco/Fleischmann
//! Z21 LAN protocol over UDP and MERG CBUS over a GridConnect CAN-USB adapter.
//!
//! ## Features
//!
//! - **Sans-IO sessions**: every protocol is a synchronous state machine that
//!   takes received bytes and a timestamp and hands back frames to send
//! - **Byte-exact codecs**: Z21 frames with XOR checksums, CBUS opcodes in
//!   GridConnect ASCII framing, NMRA DCC packets for CBUS `RDCCn`
//! - **Bounded state**: loco, turnout and input caches with fixed ceilings
//! - **Layout power**: track power and emergency stop aggregated over links
//! - **Desktop runtime** (`runtime`): tokio runner per link, UDP and serial
//!   transports, pcap capture of all traffic
//! - **HTTP API** (`web`): JSON command and state endpoints
//!
//! ## Architecture
//!
//! The core builds without `std`:
//!
//! - `checksum`, `codec` - Frame checksums and the shared decode model
//! - `dcc` - Loco addresses, speed steps, functions and DCC packets
//! - `z21`, `cbus` - Wire formats and one session type per protocol
//! - `session` - The `CommandStationSession` trait and shared state types
//! - `power` - Layout-wide power aggregation
//! - `hal` - Mock transport and clock for testing without hardware
//! - `services` - tokio runtime and HTTP API (feature-gated)
//!
//! ## Example
//!
//! ```rust
//! use rs_commandstation::{
//!     config::Z21Config,
//!     codec::WireMessage,
//!     session::{CommandStationSession, LinkStatus, StationCommand},
//!     z21::{FirmwareVersion, HardwareType, Message, Z21Session},
//! };
//!
//! let mut z21 = Z21Session::new(Z21Config::default());
//! z21.connect(0);
//!
//! // Handshake requests go out first
//! assert_eq!(z21.pop_outbound().unwrap().as_slice(), &[0x04, 0x00, 0x10, 0x00]);
//! while z21.pop_outbound().is_some() {}
//!
//! // Feed the replies
//! z21.receive(&Message::SerialNumber(123_456).encode(), 10);
//! let hwinfo = Message::HardwareInfo {
//!     hardware_type: HardwareType::Z21New,
//!     firmware: FirmwareVersion::new(1, 43),
//! };
//! z21.receive(&hwinfo.encode(), 20);
//! assert_eq!(z21.status(), &LinkStatus::Connected);
//!
//! // Commands turn into frames
//! while z21.pop_outbound().is_some() {}
//! z21.apply(StationCommand::SetTrackPower(true), 30).unwrap();
//! assert_eq!(
//!     z21.pop_outbound().unwrap().as_slice(),
//!     &[0x06, 0x00, 0x40, 0x00, 0x21, 0x81, 0xA0]
//! );
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

/// XOR checksums for Z21, XpressNet and DCC.
pub mod checksum;
/// Shared frame codec model: bounded frames and the decode outcome.
pub mod codec;
/// DCC addresses, speed encoding, function state and packet builders.
pub mod dcc;
/// Error types for decoding, transports and commands.
pub mod error;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Common session interface and the state types every protocol reports.
pub mod session;
/// Core traits for transports and time.
pub mod traits;

/// Z21 LAN protocol.
pub mod z21;
/// CBUS over GridConnect.
pub mod cbus;

/// Layout-wide power state over all links.
pub mod power;
/// pcap capture of link traffic.
pub mod capture;

/// Shared configuration for links, limits and services.
pub mod config;

/// Request types for the HTTP API (serde-based).
#[cfg(feature = "serde")]
pub mod messages;

/// tokio runtime and HTTP API (feature-gated).
#[cfg(feature = "runtime")]
pub mod services;

// Re-exports for convenience
pub use cbus::CbusSession;
pub use dcc::{FunctionState, LocoAddress, Speed, SpeedSteps};
pub use error::{
    CommandError, FrameDecodeError, ProtocolTimeout, TransportError, UnsupportedMessage,
};
pub use power::{PowerAggregator, PowerSummary};
pub use session::{
    CommandStationSession, LinkState, LinkStatus, LocoState, PowerState, SessionEvent,
    StationCommand, SystemFlags, SystemState,
};
pub use traits::{Clock, Direction, LinkTransport};
pub use z21::Z21Session;

// Config re-exports
pub use config::{
    CaptureConfig, CbusConfig, Config, DeviceConfig, LinkConfig, ReconnectPolicy, SessionLimits,
    WebConfig, Z21Config,
};

// Message re-exports (for the HTTP API)
#[cfg(feature = "serde")]
pub use messages::{FunctionRequest, LocoRequest, PowerRequest};

// Parsing function re-exports (serde-json-core based)
#[cfg(feature = "serde-json-core")]
pub use messages::{parse_function_request, parse_loco_request, parse_power_request};
