//! Trait definitions for the boundaries of the protocol layer.
//!
//! # Submodules
//!
//! - `hardware`: Direction and clock
//! - `transport`: Byte-pipe links (UDP, serial) consumed by the sessions
//!
//! The sessions in [`crate::z21`] and [`crate::cbus`] are sans-IO. They take
//! received bytes and a timestamp and hand back frames to send. The traits
//! here describe the other side of that boundary:
//!
//! - [`LinkTransport`]: sync, non-blocking transport for polling loops
//! - [`AsyncLinkTransport`]: async transport for the tokio runtime (`std` only)
//! - [`Clock`]: time source

pub mod hardware;
pub mod transport;

pub use hardware::*;
pub use transport::*;
