//! Configuration for links, limits and the optional runtime surfaces.
//!
//! Uses `heapless::String` for `no_std` compatibility while remaining
//! ergonomic to use on desktop with `std`.
//!
//! # Example
//!
//! ```rust
//! use rs_commandstation::config::{Config, LinkConfig, WebConfig, Z21Config};
//!
//! // Use defaults
//! let config = Config::default();
//! assert!(config.links.is_empty());
//!
//! // Or customize
//! let config = Config::default()
//!     .with_link(LinkConfig::Z21(Z21Config::default().with_host("192.168.0.111")))
//!     .with_web(WebConfig::default().with_port(3000));
//! assert_eq!(config.links.len(), 1);
//! ```

use heapless::String as HString;

/// Maximum length for short config strings (hostnames, link names)
pub const MAX_SHORT_STRING: usize = 64;

/// Maximum length for longer config strings (device paths, file paths)
pub const MAX_LONG_STRING: usize = 128;

/// Maximum number of configured links
pub const MAX_LINKS: usize = 8;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for longer config strings
pub type LongString = HString<MAX_LONG_STRING>;

// ============================================================================
// Helper for creating heapless strings
// ============================================================================

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let _ = hs.push_str(truncate_at_char(s, MAX_SHORT_STRING));
    hs
}

/// Create a LongString from a &str, truncating if too long
pub fn long_string(s: &str) -> LongString {
    let mut hs = LongString::new();
    let _ = hs.push_str(truncate_at_char(s, MAX_LONG_STRING));
    hs
}

fn truncate_at_char(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Hardware links, one session each
    pub links: heapless::Vec<LinkConfig, MAX_LINKS>,
    /// Resource bounds applied to every session
    pub limits: SessionLimits,
    /// Reconnect backoff used by the runtime
    pub reconnect: ReconnectPolicy,
    /// Packet capture
    pub capture: CaptureConfig,
    /// HTTP API
    pub web: WebConfig,
    /// Device identification
    pub device: DeviceConfig,
}

impl Config {
    /// Add a link. Links beyond [`MAX_LINKS`] are ignored.
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        let _ = self.links.push(link);
        self
    }

    /// Set session limits
    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set capture configuration
    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Set web configuration
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }

    /// Set device configuration
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }
}

/// One hardware link.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LinkConfig {
    /// Z21 over UDP
    Z21(Z21Config),
    /// CBUS through a GridConnect CAN-USB adapter
    Cbus(CbusConfig),
}

impl LinkConfig {
    /// Link name for logs and the API
    pub fn name(&self) -> &str {
        match self {
            LinkConfig::Z21(c) => c.name.as_str(),
            LinkConfig::Cbus(c) => c.name.as_str(),
        }
    }

    /// Protocol name
    pub const fn protocol(&self) -> &'static str {
        match self {
            LinkConfig::Z21(_) => "z21",
            LinkConfig::Cbus(_) => "cbus",
        }
    }
}

// ============================================================================
// Z21 Config
// ============================================================================

/// Z21 LAN link configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Z21Config {
    /// Link name
    pub name: ShortString,
    /// Command station hostname or IP
    pub host: ShortString,
    /// UDP port
    pub port: u16,
    /// Interval between system state polls
    pub keepalive_ms: u32,
    /// Deadline for the serial number and hardware info replies
    pub handshake_timeout_ms: u32,
    /// Deadline for poll replies
    pub reply_timeout_ms: u32,
    /// Interval between broadcast flag requests while unconfirmed
    pub broadcast_flags_retry_ms: u32,
    /// Give up confirming broadcast flags after this many attempts
    pub max_broadcast_flags_retries: u8,
    /// Subscribe to R-Bus feedback
    pub rmbus: bool,
    /// Log received frames at trace level
    pub debug_rx: bool,
    /// Log sent frames at trace level
    pub debug_tx: bool,
}

impl Default for Z21Config {
    fn default() -> Self {
        Self {
            name: short_string("z21"),
            host: short_string("192.168.0.111"),
            port: 21105,
            keepalive_ms: 15_000,
            handshake_timeout_ms: 3000,
            reply_timeout_ms: 2000,
            broadcast_flags_retry_ms: 2000,
            max_broadcast_flags_retries: 5,
            rmbus: false,
            debug_rx: false,
            debug_tx: false,
        }
    }
}

impl Z21Config {
    /// Set the link name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }

    /// Set the command station host
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = short_string(host);
        self
    }

    /// Set the UDP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the keepalive interval
    pub fn with_keepalive_ms(mut self, ms: u32) -> Self {
        self.keepalive_ms = ms;
        self
    }

    /// Set the handshake deadline
    pub fn with_handshake_timeout_ms(mut self, ms: u32) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    /// Set the poll reply deadline
    pub fn with_reply_timeout_ms(mut self, ms: u32) -> Self {
        self.reply_timeout_ms = ms;
        self
    }

    /// Set the broadcast flag retry interval and attempt limit
    pub fn with_broadcast_flags_retry(mut self, ms: u32, max_retries: u8) -> Self {
        self.broadcast_flags_retry_ms = ms;
        self.max_broadcast_flags_retries = max_retries;
        self
    }

    /// Enable R-Bus feedback
    pub fn with_rmbus(mut self, enabled: bool) -> Self {
        self.rmbus = enabled;
        self
    }

    /// Enable frame logging
    pub fn with_debug(mut self, rx: bool, tx: bool) -> Self {
        self.debug_rx = rx;
        self.debug_tx = tx;
        self
    }
}

// ============================================================================
// CBUS Config
// ============================================================================

/// CBUS link configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CbusConfig {
    /// Link name
    pub name: ShortString,
    /// Serial device of the CAN-USB adapter
    pub device: LongString,
    /// Serial baud rate
    pub baud: u32,
    /// Our CAN ID, 1..=127
    pub can_id: u8,
    /// Deadline for the command station status reply
    pub handshake_timeout_ms: u32,
    /// Repeat count sent with DCC packets
    pub dcc_repeat: u8,
    /// Log received frames at trace level
    pub debug_rx: bool,
    /// Log sent frames at trace level
    pub debug_tx: bool,
}

impl Default for CbusConfig {
    fn default() -> Self {
        Self {
            name: short_string("cbus"),
            device: long_string("/dev/ttyACM0"),
            baud: 115_200,
            can_id: 0x7D,
            handshake_timeout_ms: 3000,
            dcc_repeat: 2,
            debug_rx: false,
            debug_tx: false,
        }
    }
}

impl CbusConfig {
    /// Set the link name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }

    /// Set the serial device
    pub fn with_device(mut self, device: &str) -> Self {
        self.device = long_string(device);
        self
    }

    /// Set the baud rate
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Set our CAN ID (masked to 7 bits)
    pub fn with_can_id(mut self, can_id: u8) -> Self {
        self.can_id = can_id & 0x7F;
        self
    }

    /// Set the handshake deadline
    pub fn with_handshake_timeout_ms(mut self, ms: u32) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    /// Set the DCC packet repeat count
    pub fn with_dcc_repeat(mut self, repeat: u8) -> Self {
        self.dcc_repeat = repeat;
        self
    }

    /// Enable frame logging
    pub fn with_debug(mut self, rx: bool, tx: bool) -> Self {
        self.debug_rx = rx;
        self.debug_tx = tx;
        self
    }
}

// ============================================================================
// Session Limits
// ============================================================================

/// Resource bounds for one session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionLimits {
    /// Tracked locos before LRU eviction
    pub max_tracked_locos: usize,
    /// Outstanding reply waits
    pub max_pending_replies: usize,
    /// Queued outbound frames
    pub max_outbound: usize,
    /// Queued events
    pub max_events: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_tracked_locos: 32,
            max_pending_replies: 4,
            max_outbound: 32,
            max_events: 32,
        }
    }
}

impl SessionLimits {
    /// Set the tracked loco limit
    pub fn with_max_tracked_locos(mut self, n: usize) -> Self {
        self.max_tracked_locos = n;
        self
    }

    /// Set the outbound queue limit
    pub fn with_max_outbound(mut self, n: usize) -> Self {
        self.max_outbound = n;
        self
    }
}

// ============================================================================
// Reconnect Policy
// ============================================================================

/// Exponential backoff between reconnect attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReconnectPolicy {
    /// First delay
    pub initial_ms: u32,
    /// Delay ceiling
    pub max_ms: u32,
    /// Growth factor per attempt
    pub multiplier: u32,
    /// Give up after this many attempts (0 = never)
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (0-based), `None` once exhausted.
    ///
    /// ```rust
    /// use rs_commandstation::config::ReconnectPolicy;
    ///
    /// let policy = ReconnectPolicy::default();
    /// assert_eq!(policy.delay_ms(0), Some(500));
    /// assert_eq!(policy.delay_ms(1), Some(1000));
    /// assert_eq!(policy.delay_ms(20), Some(30_000));
    /// ```
    pub fn delay_ms(&self, attempt: u32) -> Option<u32> {
        if self.max_attempts != 0 && attempt >= self.max_attempts {
            return None;
        }
        let mut delay = self.initial_ms.max(1);
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.multiplier.max(1));
            if delay >= self.max_ms {
                return Some(self.max_ms);
            }
        }
        Some(delay.min(self.max_ms))
    }

    /// Set the attempt limit
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

// ============================================================================
// Capture Config
// ============================================================================

/// Packet capture configuration
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CaptureConfig {
    /// Whether capture is enabled
    pub enabled: bool,
    /// Directory for capture files, one file per link
    pub directory: LongString,
}

impl CaptureConfig {
    /// Enable capture into `directory`
    pub fn to_directory(directory: &str) -> Self {
        Self {
            enabled: true,
            directory: long_string(directory),
        }
    }
}

// ============================================================================
// Web Config
// ============================================================================

/// Web server configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WebConfig {
    /// Port to listen on
    pub port: u16,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
    /// Whether web server is enabled
    pub enabled: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_permissive: true,
            enabled: true,
        }
    }
}

impl WebConfig {
    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set CORS mode
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Enable or disable web server
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ============================================================================
// Device Config
// ============================================================================

/// Device identification configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    /// Human-readable installation name
    pub name: ShortString,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: short_string("rs-commandstation"),
        }
    }
}

impl DeviceConfig {
    /// Set the device name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
