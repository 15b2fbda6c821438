//! API response types for the HTTP command/state API.

use serde::{Deserialize, Serialize};

use crate::power::PowerSummary;
use crate::session::{
    LinkFault, LinkStatus, LocoEntry, PowerState, SessionStats, StationInfo, SystemState,
};
use crate::Direction;

use super::shared::{LinkSnapshot, StationSnapshot};

// Re-export request types from messages module
pub use crate::messages::{FunctionRequest, LocoRequest, PowerRequest};

// ============================================================================
// Response Types
// ============================================================================

/// API response wrapper for consistent JSON structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (present when success=true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present when success=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Aggregated layout power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerResponse {
    /// On only if every usable link reports on
    pub track_power: PowerState,
    /// Any link in emergency stop
    pub emergency_stop: bool,
    /// Any link reporting a short
    pub short_circuit: bool,
    /// Links with a completed handshake
    pub connected_links: u8,
}

impl From<&PowerSummary> for PowerResponse {
    fn from(power: &PowerSummary) -> Self {
        Self {
            track_power: power.track_power,
            emergency_stop: power.emergency_stop,
            short_circuit: power.short_circuit,
            connected_links: power.connected_links,
        }
    }
}

/// State of one link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkResponse {
    /// Configured name
    pub name: String,
    /// `z21` or `cbus`
    pub protocol: String,
    /// `disconnected`, `connecting`, `connected` or `error`
    pub status: String,
    /// Error detail when `status` is `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Command station flags and measurements
    pub system: SystemState,
    /// Serial number, hardware and firmware
    pub info: StationInfo,
    /// Number of tracked locos
    pub locos: usize,
    /// Diagnostic counters
    pub stats: SessionStats,
}

impl From<&LinkSnapshot> for LinkResponse {
    fn from(link: &LinkSnapshot) -> Self {
        let fault = match &link.status {
            LinkStatus::Error(LinkFault::Timeout(t)) => Some(t.to_string()),
            LinkStatus::Error(LinkFault::LinkLost(e)) => Some(e.to_string()),
            _ => None,
        };
        Self {
            name: link.name.clone(),
            protocol: link.protocol.to_string(),
            status: link.status.as_str().to_string(),
            fault,
            system: link.system,
            info: link.info,
            locos: link.locos.len(),
            stats: link.stats,
        }
    }
}

/// Full station state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationResponse {
    /// Aggregated power
    pub power: PowerResponse,
    /// Per-link state in configuration order
    pub links: Vec<LinkResponse>,
}

impl From<&StationSnapshot> for StationResponse {
    fn from(snapshot: &StationSnapshot) -> Self {
        Self {
            power: PowerResponse::from(&snapshot.power),
            links: snapshot.links.iter().map(LinkResponse::from).collect(),
        }
    }
}

/// Cached state of one tracked loco
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocoResponse {
    /// Link reporting this loco
    pub link: String,
    /// DCC address number
    pub address: u16,
    /// Long address form
    pub long: bool,
    /// Speed step, 0 when stopped
    pub speed: u8,
    /// Emergency stopped
    pub emergency_stop: bool,
    /// Direction of travel
    pub direction: Direction,
    /// Speed step mode (14, 28 or 126)
    pub steps: u8,
    /// F0..F28, bit n is Fn
    pub functions: u32,
    /// Controlled by another client
    pub busy: bool,
}

impl LocoResponse {
    /// Build from a cache entry of `link`.
    pub fn from_entry(link: &str, entry: &LocoEntry) -> Self {
        let state = &entry.state;
        Self {
            link: link.to_string(),
            address: entry.address.number(),
            long: entry.address.is_long(),
            speed: state.speed.step(),
            emergency_stop: state.speed == crate::dcc::Speed::EmergencyStop,
            direction: state.direction,
            steps: state.steps.max_step(),
            functions: state.functions.bits(),
            busy: state.busy,
        }
    }

    /// Every tracked loco of every link.
    pub fn collect(snapshot: &StationSnapshot) -> Vec<Self> {
        snapshot
            .links
            .iter()
            .flat_map(|link| {
                link.locos
                    .iter()
                    .map(move |entry| Self::from_entry(&link.name, entry))
            })
            .collect()
    }
}

/// Command result response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the command was accepted
    pub accepted: bool,
    /// Result details
    pub result: String,
    /// Links that queued the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

impl CommandResponse {
    /// Create a response for an accepted command
    pub fn accepted(result: impl Into<String>) -> Self {
        Self {
            accepted: true,
            result: result.into(),
            links: Vec::new(),
        }
    }

    /// Create a response for a rejected command
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            result: reason.into(),
            links: Vec::new(),
        }
    }

    /// Attach the links that took the command.
    pub fn on_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcc::{LocoAddress, Speed, SpeedSteps};
    use crate::error::{ProtocolTimeout, TransportError};
    use crate::session::{LocoCache, LocoState};

    fn snapshot_with_loco() -> StationSnapshot {
        let mut cache = LocoCache::new(4);
        let address = LocoAddress::long(1234).unwrap();
        cache.track(address, SpeedSteps::S28, 0);
        cache.update(address, 1, |s| {
            s.speed = Speed::Step(12);
            s.direction = Direction::Reverse;
            s.functions.set(0, true);
        });

        StationSnapshot {
            power: PowerSummary::default(),
            links: vec![LinkSnapshot {
                name: "z21".into(),
                protocol: "z21",
                status: LinkStatus::Connected,
                system: SystemState::default(),
                info: StationInfo::default(),
                locos: cache.iter().copied().collect(),
                stats: SessionStats::default(),
            }],
        }
    }

    // ========================================================================
    // ApiResponse Tests
    // ========================================================================

    #[test]
    fn test_api_response_ok() {
        let response = ApiResponse::ok("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
        assert_eq!(response.error, None);
    }

    #[test]
    fn test_api_response_ok_with_struct() {
        let response = ApiResponse::ok(CommandResponse::accepted("set_track_power"));
        assert!(response.success);
        let data = response.data.unwrap();
        assert!(data.accepted);
        assert_eq!(data.result, "set_track_power");
        assert!(data.links.is_empty());
    }

    #[test]
    fn test_api_response_err_with_string() {
        let response: ApiResponse<String> = ApiResponse::err("something went wrong");
        assert!(!response.success);
        assert_eq!(response.data, None);
        assert_eq!(response.error, Some("something went wrong".to_string()));
    }

    #[test]
    fn test_api_response_serde_err() {
        let response: ApiResponse<i32> = ApiResponse::err("failed");
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("data"));
        let deserialized: ApiResponse<i32> = serde_json::from_str(&json).unwrap();
        assert!(!deserialized.success);
        assert_eq!(deserialized.error, Some("failed".to_string()));
    }

    // ========================================================================
    // Conversion Tests
    // ========================================================================

    #[test]
    fn test_link_response_from_snapshot() {
        let snapshot = snapshot_with_loco();
        let link = LinkResponse::from(&snapshot.links[0]);
        assert_eq!(link.name, "z21");
        assert_eq!(link.status, "connected");
        assert_eq!(link.fault, None);
        assert_eq!(link.locos, 1);
    }

    #[test]
    fn test_link_response_reports_fault() {
        let mut snapshot = snapshot_with_loco();
        snapshot.links[0].status = LinkStatus::Error(LinkFault::Timeout(ProtocolTimeout {
            what: "LAN_SYSTEMSTATE_GETDATA",
            after_ms: 2000,
        }));
        let link = LinkResponse::from(&snapshot.links[0]);
        assert_eq!(link.status, "error");
        assert!(link.fault.unwrap().contains("2000"));

        snapshot.links[0].status = LinkStatus::Error(LinkFault::LinkLost(TransportError::Closed));
        let link = LinkResponse::from(&snapshot.links[0]);
        assert_eq!(link.fault.as_deref(), Some("link closed"));
    }

    #[test]
    fn test_loco_response_collects_all_links() {
        let snapshot = snapshot_with_loco();
        let locos = LocoResponse::collect(&snapshot);
        assert_eq!(locos.len(), 1);
        let loco = &locos[0];
        assert_eq!(loco.link, "z21");
        assert_eq!(loco.address, 1234);
        assert!(loco.long);
        assert_eq!(loco.speed, 12);
        assert_eq!(loco.steps, 28);
        assert_eq!(loco.direction, Direction::Reverse);
        assert_eq!(loco.functions, 1);
        assert!(!loco.emergency_stop);
    }

    #[test]
    fn test_loco_response_emergency_stop() {
        let entry_state = LocoState {
            speed: Speed::EmergencyStop,
            ..LocoState::default()
        };
        let mut cache = LocoCache::new(1);
        let address = LocoAddress::short(3).unwrap();
        cache.track(address, SpeedSteps::S126, 0);
        cache.update(address, 0, |s| *s = entry_state);
        let entry = cache.iter().next().unwrap();

        let loco = LocoResponse::from_entry("cbus", entry);
        assert!(loco.emergency_stop);
        assert_eq!(loco.speed, 0);
        assert!(!loco.long);
    }

    #[test]
    fn test_power_response_serializes_lowercase() {
        let power = PowerSummary {
            track_power: PowerState::On,
            emergency_stop: false,
            short_circuit: false,
            connected_links: 2,
        };
        let json = serde_json::to_string(&PowerResponse::from(&power)).unwrap();
        assert!(json.contains(r#""track_power":"on""#));
        assert!(json.contains(r#""connected_links":2"#));
    }
}
