//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`] that do not need real hardware.
//!
//! # Available Implementations
//!
//! - `mock`: In-memory transport and controllable clock for tests and demos
//!
//! The UDP and serial transports live in [`crate::services`] because they need
//! the tokio runtime.

pub mod mock;

pub use mock::*;
