//! Request types for the HTTP command API.
//!
//! These types are `no_std` compatible and can be deserialized using either
//! `serde_json` (desktop) or `serde-json-core` (embedded). Each request
//! converts into a [`StationCommand`] after validation.
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "serde-json-core")]
//! # {
//! use rs_commandstation::messages::parse_loco_request;
//! use rs_commandstation::session::StationCommand;
//!
//! let req = parse_loco_request(br#"{"address": 3, "speed": 40, "direction": "reverse"}"#).unwrap();
//! assert!(matches!(req.to_command(), Ok(StationCommand::SetLocoSpeedDirection { .. })));
//! # }
//! ```

use serde::{Deserialize, Serialize};

use crate::dcc::{LocoAddress, Speed, SpeedSteps, FUNCTION_MAX};
use crate::error::CommandError;
use crate::session::StationCommand;
use crate::Direction;

/// Longest link name accepted in a request.
pub const MAX_LINK_NAME: usize = 32;

/// Link name as carried in requests.
pub type LinkName = heapless::String<MAX_LINK_NAME>;

// ============================================================================
// Request Types
// ============================================================================

/// Switch track power.
///
/// ```json
/// {"on": true}
/// {"on": false, "link": "z21"}
/// ```
///
/// Without `link` the command goes to every link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerRequest {
    /// Target state
    pub on: bool,
    /// Restrict to one link
    #[serde(default)]
    pub link: Option<LinkName>,
}

impl PowerRequest {
    /// Power request for all links.
    pub fn new(on: bool) -> Self {
        Self { on, link: None }
    }

    /// Command to send.
    pub fn to_command(&self) -> StationCommand {
        StationCommand::SetTrackPower(self.on)
    }
}

/// Drive a loco.
///
/// `speed` is a step number for the decoder's mode: 0 stops, values above
/// the mode's top step are clamped. `emergency` stops at once and ignores
/// `speed`. `steps` is 14, 28 or 126 (128 accepted), default 126.
///
/// ```json
/// {"address": 3, "speed": 40, "direction": "forward"}
/// {"address": 1234, "speed": 10, "direction": "reverse", "steps": 28}
/// {"address": 3, "speed": 0, "direction": "forward", "emergency": true}
/// ```
///
/// Without `link` the command goes to the first configured link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocoRequest {
    /// DCC address
    pub address: u16,
    /// Use the long address form even for numbers below 128
    #[serde(default)]
    pub long: bool,
    /// Speed step
    pub speed: u8,
    /// Direction of travel
    pub direction: Direction,
    /// Speed step mode
    #[serde(default)]
    pub steps: Option<u8>,
    /// Emergency stop this loco
    #[serde(default)]
    pub emergency: bool,
    /// Target link
    #[serde(default)]
    pub link: Option<LinkName>,
}

impl LocoRequest {
    /// Normal drive request in 126-step mode.
    pub fn new(address: u16, speed: u8, direction: Direction) -> Self {
        Self {
            address,
            long: false,
            speed,
            direction,
            steps: None,
            emergency: false,
            link: None,
        }
    }

    /// Validated loco address.
    pub fn loco_address(&self) -> Result<LocoAddress, CommandError> {
        parse_address(self.address, self.long)
    }

    /// Validated step mode.
    pub fn speed_steps(&self) -> Result<SpeedSteps, CommandError> {
        match self.steps {
            None => Ok(SpeedSteps::S126),
            Some(count) => {
                SpeedSteps::from_count(count).ok_or(CommandError::Unsupported("speed step mode"))
            }
        }
    }

    /// Command to send.
    pub fn to_command(&self) -> Result<StationCommand, CommandError> {
        let steps = self.speed_steps()?;
        let speed = if self.emergency {
            Speed::EmergencyStop
        } else {
            Speed::Step(self.speed).clamp_to(steps)
        };
        Ok(StationCommand::SetLocoSpeedDirection {
            address: self.loco_address()?,
            steps,
            speed,
            direction: self.direction,
        })
    }
}

/// Switch one loco function.
///
/// ```json
/// {"address": 3, "function": 0, "on": true}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRequest {
    /// DCC address
    pub address: u16,
    /// Use the long address form even for numbers below 128
    #[serde(default)]
    pub long: bool,
    /// Function number 0..=28
    pub function: u8,
    /// Target state
    pub on: bool,
    /// Target link
    #[serde(default)]
    pub link: Option<LinkName>,
}

impl FunctionRequest {
    /// Function request for the first link.
    pub fn new(address: u16, function: u8, on: bool) -> Self {
        Self {
            address,
            long: false,
            function,
            on,
            link: None,
        }
    }

    /// Command to send.
    pub fn to_command(&self) -> Result<StationCommand, CommandError> {
        if self.function > FUNCTION_MAX {
            return Err(CommandError::InvalidFunction(self.function));
        }
        Ok(StationCommand::SetLocoFunction {
            address: parse_address(self.address, self.long)?,
            function: self.function,
            on: self.on,
        })
    }
}

fn parse_address(number: u16, long: bool) -> Result<LocoAddress, CommandError> {
    let address = if long {
        LocoAddress::long(number)
    } else {
        LocoAddress::new(number)
    };
    address.ok_or(CommandError::InvalidAddress(number))
}

// ============================================================================
// Parsing Functions (using serde-json-core for no_std compatibility)
// ============================================================================

/// Parse a power request from JSON bytes.
///
/// # Example
///
/// ```
/// use rs_commandstation::messages::parse_power_request;
///
/// let req = parse_power_request(br#"{"on": true}"#).unwrap();
/// assert!(req.on);
/// assert!(req.link.is_none());
/// ```
#[cfg(feature = "serde-json-core")]
pub fn parse_power_request(json: &[u8]) -> Option<PowerRequest> {
    serde_json_core::from_slice(json).ok().map(|(req, _)| req)
}

/// Parse a loco drive request from JSON bytes.
#[cfg(feature = "serde-json-core")]
pub fn parse_loco_request(json: &[u8]) -> Option<LocoRequest> {
    serde_json_core::from_slice(json).ok().map(|(req, _)| req)
}

/// Parse a loco function request from JSON bytes.
///
/// # Example
///
/// ```
/// use rs_commandstation::messages::parse_function_request;
///
/// let req = parse_function_request(br#"{"address": 3, "function": 4, "on": false}"#).unwrap();
/// assert_eq!(req.function, 4);
/// assert!(!req.on);
/// ```
#[cfg(feature = "serde-json-core")]
pub fn parse_function_request(json: &[u8]) -> Option<FunctionRequest> {
    serde_json_core::from_slice(json).ok().map(|(req, _)| req)
}
