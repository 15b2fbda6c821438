//! Protocol-independent session state shared by every command station driver.
//!
//! A session owns everything known about one hardware link: link state,
//! system state flags, and a bounded cache of tracked locos, turnouts and
//! inputs. It is sans-IO. The owner feeds it received bytes and timestamps
//! and drains two queues:
//!
//! - outbound frames, in the order they must be written to the link
//! - [`SessionEvent`]s for the rest of the system
//!
//! ```text
//!              connect()            handshake complete
//! Disconnected ---------> Connecting -------------------> Idle <--> Active
//!      ^                      |  handshake timeout          |  (poll reply
//!      |                      v                             |   outstanding)
//!      +--------------- Failed <----------------------------+
//!        disconnect()           link_lost()
//! ```
//!
//! # Example
//!
//! ```rust
//! use rs_commandstation::config::Z21Config;
//! use rs_commandstation::session::{CommandStationSession, LinkStatus};
//! use rs_commandstation::z21::Z21Session;
//!
//! let mut session = Z21Session::new(Z21Config::default());
//! session.connect(0);
//! assert_eq!(*session.status(), LinkStatus::Connecting);
//!
//! // Handshake requests are queued for the transport
//! let mut sent = 0;
//! while let Some(_frame) = session.pop_outbound() {
//!     sent += 1;
//! }
//! assert!(sent >= 2);
//! ```

use heapless::Deque;
use log::warn;

use crate::codec::Frame;
use crate::config::SessionLimits;
use crate::dcc::{FunctionState, LocoAddress, Speed, SpeedSteps};
use crate::error::{CommandError, ProtocolTimeout, TransportError};
use crate::traits::Direction;

/// Capacity of the outbound frame queue.
pub const OUTBOUND_CAPACITY: usize = 32;

/// Capacity of the event queue.
pub const EVENT_CAPACITY: usize = 32;

/// Hard ceiling for tracked locos; the configured limit may be lower.
pub const MAX_TRACKED_LOCOS: usize = 64;

/// Hard ceiling for tracked turnouts and inputs.
pub const MAX_TRACKED_POINTS: usize = 64;

/// Hard ceiling for outstanding reply waits.
pub const MAX_PENDING_REPLIES: usize = 8;

// ============================================================================
// Link State and Status
// ============================================================================

/// Internal protocol state of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No link.
    #[default]
    Disconnected,
    /// Transport open, handshake in progress.
    Connecting,
    /// Connected, no reply outstanding.
    Idle,
    /// Connected, waiting for a poll reply.
    Active,
    /// Handshake failed or transport lost.
    Failed,
}

impl LinkState {
    /// `true` when commands are accepted.
    pub const fn is_usable(&self) -> bool {
        matches!(self, LinkState::Idle | LinkState::Active)
    }
}

/// Why a link is in error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkFault {
    /// Expected reply missing. A missed handshake reply fails the link, a
    /// missed keepalive reply only degrades it.
    Timeout(ProtocolTimeout),
    /// Transport reported an error; the session is over.
    LinkLost(TransportError),
}

/// Externally visible link status.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum LinkStatus {
    /// Not connected.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete, link usable.
    Connected,
    /// Link failed or degraded.
    Error(LinkFault),
}

impl LinkStatus {
    /// Short lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Error(_) => "error",
        }
    }

    /// `true` if the transport is gone and the owner should reconnect.
    pub const fn is_link_lost(&self) -> bool {
        matches!(self, LinkStatus::Error(LinkFault::LinkLost(_)))
    }
}

// ============================================================================
// System State
// ============================================================================

/// Tri-state track power.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PowerState {
    /// Not reported yet.
    #[default]
    Unknown,
    /// Track voltage on.
    On,
    /// Track voltage off.
    Off,
}

impl From<bool> for PowerState {
    fn from(on: bool) -> Self {
        if on {
            PowerState::On
        } else {
            PowerState::Off
        }
    }
}

/// Status flags reported by a command station.
///
/// Change notifications are de-duplicated on this struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemFlags {
    /// Track power.
    pub track_power: PowerState,
    /// Emergency stop active.
    pub emergency_stop: bool,
    /// Short circuit on the track outputs.
    pub short_circuit: bool,
    /// Programming mode active.
    pub programming_mode: bool,
    /// Temperature too high.
    pub high_temperature: bool,
    /// Input voltage too low.
    pub power_lost: bool,
    /// Short circuit at an external booster.
    pub short_circuit_external: bool,
    /// Short circuit at the internal outputs.
    pub short_circuit_internal: bool,
}

/// Electrical measurements, where the protocol reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurements {
    /// Main track current in mA.
    pub main_current_ma: i16,
    /// Programming track current in mA.
    pub prog_current_ma: i16,
    /// Smoothed main track current in mA.
    pub filtered_main_current_ma: i16,
    /// Internal temperature in °C.
    pub temperature_c: i16,
    /// Supply voltage in mV.
    pub supply_voltage_mv: u16,
    /// Internal voltage (track voltage) in mV.
    pub vcc_voltage_mv: u16,
}

/// Last known command station state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemState {
    /// Status flags.
    pub flags: SystemFlags,
    /// Latest measurements, if any.
    pub measurements: Option<Measurements>,
}

/// Identification learned during the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StationInfo {
    /// Serial or node number.
    pub serial_number: Option<u32>,
    /// Raw hardware type code.
    pub hardware_type: Option<u32>,
    /// Firmware version as (major, minor).
    pub firmware: Option<(u8, u8)>,
}

// ============================================================================
// Loco, Turnout and Input State
// ============================================================================

/// Cached state of one tracked loco.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocoState {
    /// Speed step mode.
    pub steps: SpeedSteps,
    /// Current speed.
    pub speed: Speed,
    /// Current direction.
    pub direction: Direction,
    /// Function states F0..F28.
    pub functions: FunctionState,
    /// Controlled by another client.
    pub busy: bool,
}

impl LocoState {
    /// Fresh state for a loco in the given mode.
    pub fn with_steps(steps: SpeedSteps) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }
}

/// Turnout position as reported by the command station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TurnoutPosition {
    /// Never switched since power-up.
    #[default]
    Unknown,
    /// Output 1 (straight on most decoders).
    Port0,
    /// Output 2 (diverging on most decoders).
    Port1,
    /// Both outputs reported, invalid.
    Invalid,
}

/// Address of a feedback input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InputAddress {
    /// Z21 R-Bus feedback input, 1..=160.
    RmBus(u16),
    /// CBUS accessory event.
    Cbus {
        /// Node number, 0 for short events.
        node: u16,
        /// Event or device number.
        event: u16,
    },
}

// ============================================================================
// Commands and Events
// ============================================================================

/// Command from the rest of the system to one link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StationCommand {
    /// Switch track power.
    SetTrackPower(bool),
    /// Stop all locos.
    EmergencyStop,
    /// Drive a loco.
    SetLocoSpeedDirection {
        /// Loco address.
        address: LocoAddress,
        /// Step mode of the decoder.
        steps: SpeedSteps,
        /// Target speed.
        speed: Speed,
        /// Direction.
        direction: Direction,
    },
    /// Switch one loco function.
    SetLocoFunction {
        /// Loco address.
        address: LocoAddress,
        /// Function number 0..=28.
        function: u8,
        /// Target state.
        on: bool,
    },
    /// Switch a turnout output.
    SetTurnout {
        /// Accessory address (0-based on the wire).
        address: u16,
        /// Output to drive.
        position: TurnoutPosition,
        /// Energize (`true`) or release the output.
        activate: bool,
    },
}

impl StationCommand {
    /// Drive command in 126-step mode.
    pub const fn drive(address: LocoAddress, speed: Speed, direction: Direction) -> Self {
        StationCommand::SetLocoSpeedDirection {
            address,
            steps: SpeedSteps::S126,
            speed,
            direction,
        }
    }

    /// Name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            StationCommand::SetTrackPower(_) => "set_track_power",
            StationCommand::EmergencyStop => "emergency_stop",
            StationCommand::SetLocoSpeedDirection { .. } => "set_loco_speed_direction",
            StationCommand::SetLocoFunction { .. } => "set_loco_function",
            StationCommand::SetTurnout { .. } => "set_turnout",
        }
    }
}

/// Notification from a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Link status changed.
    LinkStatusChanged(LinkStatus),
    /// System flags changed.
    SystemStateChanged(SystemState),
    /// Cached loco state changed.
    LocoStateChanged {
        /// Loco address.
        address: LocoAddress,
        /// New state.
        state: LocoState,
    },
    /// Tracked turnout reported a new position.
    TurnoutChanged {
        /// Accessory address.
        address: u16,
        /// New position.
        position: TurnoutPosition,
    },
    /// Tracked input changed.
    InputChanged {
        /// Input address.
        address: InputAddress,
        /// New value.
        value: bool,
    },
    /// Handshake information received or changed.
    StationInfoChanged(StationInfo),
}

/// Counters for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionStats {
    /// Frames decoded.
    pub frames_rx: u32,
    /// Frames handed to the transport.
    pub frames_tx: u32,
    /// Frames dropped as malformed (checksum failures included).
    pub decode_errors: u32,
    /// Frames dropped for a bad checksum.
    pub checksum_errors: u32,
    /// Bytes discarded while resynchronising.
    pub dropped_bytes: u32,
    /// Frames of unknown kind.
    pub unrecognized: u32,
    /// Replies that never arrived.
    pub timeouts: u32,
}

// ============================================================================
// Session Trait
// ============================================================================

/// Common interface of the per-link protocol state machines.
///
/// All methods are synchronous and never block. `now_ms` is a monotonic
/// timestamp from the owner's clock.
pub trait CommandStationSession {
    /// Transport is open; start the handshake.
    fn connect(&mut self, now_ms: u64);

    /// Orderly shutdown. May queue a final logoff frame.
    fn disconnect(&mut self, now_ms: u64);

    /// Transport failed. Clears all state and reports `LinkLost`.
    fn link_lost(&mut self, error: TransportError);

    /// Process received bytes.
    fn receive(&mut self, bytes: &[u8], now_ms: u64);

    /// Translate a command into frames.
    fn apply(&mut self, command: StationCommand, now_ms: u64) -> Result<(), CommandError>;

    /// Run timers: keepalive polls and reply deadlines.
    fn poll(&mut self, now_ms: u64);

    /// Earliest time `poll` has work to do.
    fn next_deadline(&self) -> Option<u64>;

    /// Next frame to write to the transport.
    fn pop_outbound(&mut self) -> Option<Frame>;

    /// Next event for the owner.
    fn pop_event(&mut self) -> Option<SessionEvent>;

    /// Start tracking a loco; broadcasts for it update the cache from now on.
    fn track_loco(&mut self, address: LocoAddress, steps: SpeedSteps, now_ms: u64)
        -> Result<(), CommandError>;

    /// Start tracking a turnout.
    fn track_turnout(&mut self, _address: u16, _now_ms: u64) -> Result<(), CommandError> {
        Err(CommandError::Unsupported("turnout feedback"))
    }

    /// Start tracking a feedback input.
    fn track_input(&mut self, address: InputAddress) -> Result<(), CommandError>;

    /// Internal state.
    fn state(&self) -> LinkState;

    /// External status.
    fn status(&self) -> &LinkStatus;

    /// Last known system state.
    fn system_state(&self) -> &SystemState;

    /// Handshake information.
    fn station_info(&self) -> &StationInfo;

    /// Cached loco state.
    fn loco(&self, address: LocoAddress) -> Option<&LocoState>;

    /// All tracked locos.
    fn locos(&self) -> &LocoCache;

    /// Diagnostic counters.
    fn stats(&self) -> &SessionStats;
}

// ============================================================================
// Bounded Caches
// ============================================================================

/// One tracked loco.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocoEntry {
    /// Address.
    pub address: LocoAddress,
    /// Cached state.
    pub state: LocoState,
    last_used: u64,
}

/// Bounded loco cache with least-recently-used eviction.
#[derive(Debug, Clone)]
pub struct LocoCache {
    entries: heapless::Vec<LocoEntry, MAX_TRACKED_LOCOS>,
    limit: usize,
}

impl LocoCache {
    /// Empty cache holding at most `limit` locos (capped at [`MAX_TRACKED_LOCOS`]).
    pub fn new(limit: usize) -> Self {
        Self {
            entries: heapless::Vec::new(),
            limit: limit.clamp(1, MAX_TRACKED_LOCOS),
        }
    }

    /// Number of tracked locos.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if `address` is tracked.
    pub fn contains(&self, address: LocoAddress) -> bool {
        self.entries.iter().any(|e| e.address == address)
    }

    /// Cached state.
    pub fn get(&self, address: LocoAddress) -> Option<&LocoState> {
        self.entries
            .iter()
            .find(|e| e.address == address)
            .map(|e| &e.state)
    }

    /// Iterate over tracked locos.
    pub fn iter(&self) -> impl Iterator<Item = &LocoEntry> {
        self.entries.iter()
    }

    /// Track `address`, evicting the least recently used entry when full.
    ///
    /// Returns the evicted address, if any.
    pub fn track(
        &mut self,
        address: LocoAddress,
        steps: SpeedSteps,
        now_ms: u64,
    ) -> Option<LocoAddress> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.address == address) {
            entry.last_used = now_ms;
            entry.state.steps = steps;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.limit {
            if let Some(index) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(i, _)| i)
            {
                evicted = Some(self.entries.swap_remove(index).address);
            }
        }

        let _ = self.entries.push(LocoEntry {
            address,
            state: LocoState::with_steps(steps),
            last_used: now_ms,
        });
        evicted
    }

    /// Apply `update` to a tracked loco.
    ///
    /// Returns the new state if it changed. Untracked addresses are ignored.
    pub fn update<F>(&mut self, address: LocoAddress, now_ms: u64, update: F) -> Option<LocoState>
    where
        F: FnOnce(&mut LocoState),
    {
        let entry = self.entries.iter_mut().find(|e| e.address == address)?;
        let before = entry.state;
        update(&mut entry.state);
        entry.last_used = now_ms;
        (entry.state != before).then_some(entry.state)
    }

    /// Stop tracking `address`.
    pub fn remove(&mut self, address: LocoAddress) -> bool {
        match self.entries.iter().position(|e| e.address == address) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Bounded map for tracked turnouts or inputs.
#[derive(Debug, Clone)]
pub struct PointCache<K, V> {
    entries: heapless::Vec<(K, V), MAX_TRACKED_POINTS>,
}

impl<K: PartialEq + Copy, V: PartialEq + Copy> PointCache<K, V> {
    /// Empty cache.
    pub fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Track `key` with an initial value. Returns `false` when full.
    pub fn track(&mut self, key: K, initial: V) -> bool {
        if self.contains(key) {
            return true;
        }
        self.entries.push((key, initial)).is_ok()
    }

    /// `true` if `key` is tracked.
    pub fn contains(&self, key: K) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Current value.
    pub fn get(&self, key: K) -> Option<V> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Store a new value for a tracked key. Returns `true` if it changed.
    pub fn set(&mut self, key: K, value: V) -> bool {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) if *v != value => {
                *v = value;
                true
            }
            _ => false,
        }
    }

    /// Iterate over tracked entries.
    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.entries.iter()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: PartialEq + Copy, V: PartialEq + Copy> Default for PointCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Reply Waits
// ============================================================================

/// An outstanding request with a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyWait<K> {
    /// Reply kind awaited.
    pub kind: K,
    /// Request name for logs and timeout errors.
    pub what: &'static str,
    /// Time the request was issued.
    pub issued_ms: u64,
    /// Absolute deadline.
    pub deadline_ms: u64,
}

impl<K> ReplyWait<K> {
    /// Timeout error for this wait.
    pub fn timeout(&self) -> ProtocolTimeout {
        ProtocolTimeout {
            what: self.what,
            after_ms: self.deadline_ms.saturating_sub(self.issued_ms),
        }
    }
}

/// Bounded set of outstanding reply waits.
#[derive(Debug, Clone)]
pub struct ReplyWaits<K> {
    waits: heapless::Vec<ReplyWait<K>, MAX_PENDING_REPLIES>,
    limit: usize,
}

impl<K: Copy + PartialEq> ReplyWaits<K> {
    /// Empty set holding at most `limit` waits.
    pub fn new(limit: usize) -> Self {
        Self {
            waits: heapless::Vec::new(),
            limit: limit.clamp(1, MAX_PENDING_REPLIES),
        }
    }

    /// Register a wait.
    ///
    /// A wait of the same kind keeps its original deadline. Returns `false`
    /// when the set is full.
    pub fn expect(&mut self, kind: K, what: &'static str, now_ms: u64, timeout_ms: u64) -> bool {
        if self.is_pending(kind) {
            return true;
        }
        if self.waits.len() >= self.limit {
            return false;
        }
        self.waits
            .push(ReplyWait {
                kind,
                what,
                issued_ms: now_ms,
                deadline_ms: now_ms.saturating_add(timeout_ms),
            })
            .is_ok()
    }

    /// Mark a reply as received. Returns `true` if it was awaited.
    pub fn resolve(&mut self, kind: K) -> bool {
        match self.waits.iter().position(|w| w.kind == kind) {
            Some(index) => {
                self.waits.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// `true` if a wait of this kind is outstanding.
    pub fn is_pending(&self, kind: K) -> bool {
        self.waits.iter().any(|w| w.kind == kind)
    }

    /// Remove and return one wait whose deadline has passed.
    pub fn take_expired(&mut self, now_ms: u64) -> Option<ReplyWait<K>> {
        let index = self.waits.iter().position(|w| now_ms >= w.deadline_ms)?;
        Some(self.waits.swap_remove(index))
    }

    /// Earliest deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.waits.iter().map(|w| w.deadline_ms).min()
    }

    /// Number of outstanding waits.
    pub fn len(&self) -> usize {
        self.waits.len()
    }

    /// `true` if nothing is awaited.
    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    /// Abandon every wait.
    pub fn clear(&mut self) {
        self.waits.clear();
    }
}

// ============================================================================
// Session Core
// ============================================================================

/// State and queues common to every driver.
///
/// Drivers embed this and add their protocol-specific handling.
#[derive(Debug)]
pub struct SessionCore<K> {
    /// Link name for logs.
    pub name: &'static str,
    state: LinkState,
    status: LinkStatus,
    /// System state cache.
    pub system: SystemState,
    /// Handshake info.
    pub info: StationInfo,
    /// Tracked locos.
    pub locos: LocoCache,
    /// Tracked turnouts.
    pub turnouts: PointCache<u16, TurnoutPosition>,
    /// Tracked inputs.
    pub inputs: PointCache<InputAddress, Option<bool>>,
    /// Outstanding replies.
    pub waits: ReplyWaits<K>,
    /// Counters.
    pub stats: SessionStats,
    outbound: Deque<Frame, OUTBOUND_CAPACITY>,
    events: Deque<SessionEvent, EVENT_CAPACITY>,
    outbound_limit: usize,
    event_limit: usize,
}

impl<K: Copy + PartialEq> SessionCore<K> {
    /// New core in `Disconnected`.
    pub fn new(name: &'static str, limits: &SessionLimits) -> Self {
        Self {
            name,
            state: LinkState::Disconnected,
            status: LinkStatus::Disconnected,
            system: SystemState::default(),
            info: StationInfo::default(),
            locos: LocoCache::new(limits.max_tracked_locos),
            turnouts: PointCache::new(),
            inputs: PointCache::new(),
            waits: ReplyWaits::new(limits.max_pending_replies),
            stats: SessionStats::default(),
            outbound: Deque::new(),
            events: Deque::new(),
            outbound_limit: limits.max_outbound.clamp(1, OUTBOUND_CAPACITY),
            event_limit: limits.max_events.clamp(1, EVENT_CAPACITY),
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Current status.
    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    /// Change state, logging transitions.
    pub fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            log::debug!("{}: {:?} -> {:?}", self.name, self.state, state);
            self.state = state;
        }
    }

    /// Change status; emits an event when it differs.
    pub fn set_status(&mut self, status: LinkStatus) {
        if self.status != status {
            log::info!("{}: link {}", self.name, status.as_str());
            self.status = status.clone();
            self.emit(SessionEvent::LinkStatusChanged(status));
        }
    }

    /// Fail unless commands are accepted.
    pub fn ensure_usable(&self) -> Result<(), CommandError> {
        if self.state.is_usable() {
            Ok(())
        } else {
            Err(CommandError::LinkNotReady(self.status.clone()))
        }
    }

    /// Queue a frame for a command. Fails when the queue is full.
    pub fn queue(&mut self, frame: Frame) -> Result<(), CommandError> {
        if self.outbound.len() >= self.outbound_limit {
            return Err(CommandError::QueueFull);
        }
        self.outbound
            .push_back(frame)
            .map_err(|_| CommandError::QueueFull)
    }

    /// Queue an internally generated frame; dropped with a warning when full.
    pub fn queue_internal(&mut self, frame: Frame, what: &str) {
        if self.queue(frame).is_err() {
            warn!("{}: outbound queue full, {} not sent", self.name, what);
        }
    }

    /// Free slots in the outbound queue.
    pub fn outbound_room(&self) -> usize {
        self.outbound_limit.saturating_sub(self.outbound.len())
    }

    /// Pop the next frame for the transport.
    pub fn pop_outbound(&mut self) -> Option<Frame> {
        let frame = self.outbound.pop_front()?;
        self.stats.frames_tx = self.stats.frames_tx.wrapping_add(1);
        Some(frame)
    }

    /// Discard queued frames.
    pub fn clear_outbound(&mut self) {
        self.outbound.clear();
    }

    /// Push an event, dropping the oldest when full.
    pub fn emit(&mut self, event: SessionEvent) {
        if self.events.len() >= self.event_limit {
            if let Some(dropped) = self.events.pop_front() {
                warn!("{}: event queue full, dropping {:?}", self.name, dropped);
            }
        }
        let _ = self.events.push_back(event);
    }

    /// Pop the next event.
    pub fn pop_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Store new flags and emit `SystemStateChanged` if they differ.
    ///
    /// Measurements are cached without an event.
    pub fn update_system(&mut self, flags: SystemFlags, measurements: Option<Measurements>) {
        if measurements.is_some() {
            self.system.measurements = measurements;
        }
        if self.system.flags != flags {
            self.system.flags = flags;
            self.emit(SessionEvent::SystemStateChanged(self.system));
        }
    }

    /// Modify flags in place with the same de-duplication.
    pub fn modify_flags<F: FnOnce(&mut SystemFlags)>(&mut self, f: F) {
        let mut flags = self.system.flags;
        f(&mut flags);
        self.update_system(flags, None);
    }

    /// Apply a change to a tracked loco and emit if it changed.
    pub fn update_loco<F>(&mut self, address: LocoAddress, now_ms: u64, f: F)
    where
        F: FnOnce(&mut LocoState),
    {
        if let Some(state) = self.locos.update(address, now_ms, f) {
            self.emit(SessionEvent::LocoStateChanged { address, state });
        }
    }

    /// Track a loco, logging any eviction.
    pub fn track_loco(&mut self, address: LocoAddress, steps: SpeedSteps, now_ms: u64) {
        if let Some(evicted) = self.locos.track(address, steps, now_ms) {
            log::debug!("{}: loco cache full, evicted {}", self.name, evicted);
        }
    }

    /// Update a tracked turnout.
    pub fn update_turnout(&mut self, address: u16, position: TurnoutPosition) {
        if self.turnouts.set(address, position) {
            self.emit(SessionEvent::TurnoutChanged { address, position });
        }
    }

    /// Update a tracked input.
    pub fn update_input(&mut self, address: InputAddress, value: bool) {
        if self.inputs.set(address, Some(value)) {
            self.emit(SessionEvent::InputChanged { address, value });
        }
    }

    /// Store station info and emit if it changed.
    pub fn update_info<F: FnOnce(&mut StationInfo)>(&mut self, f: F) {
        let before = self.info;
        f(&mut self.info);
        if self.info != before {
            self.emit(SessionEvent::StationInfoChanged(self.info));
        }
    }

    /// Record a decode failure.
    pub fn record_decode_error(&mut self, error: &crate::error::FrameDecodeError) {
        self.stats.decode_errors = self.stats.decode_errors.wrapping_add(1);
        if error.is_checksum() {
            self.stats.checksum_errors = self.stats.checksum_errors.wrapping_add(1);
        }
        warn!("{}: dropped frame: {}", self.name, error);
    }

    /// Reset everything learned on the link.
    ///
    /// Tracked addresses survive so a reconnect resumes tracking; their cached
    /// values are reset.
    pub fn reset_link_state(&mut self) {
        self.waits.clear();
        self.system = SystemState::default();
        self.info = StationInfo::default();
        let tracked: heapless::Vec<(LocoAddress, SpeedSteps), MAX_TRACKED_LOCOS> = self
            .locos
            .iter()
            .map(|e| (e.address, e.state.steps))
            .collect();
        self.locos.clear();
        for (address, steps) in tracked {
            self.locos.track(address, steps, 0);
        }
        let turnouts: heapless::Vec<u16, MAX_TRACKED_POINTS> =
            self.turnouts.iter().map(|(k, _)| *k).collect();
        self.turnouts.clear();
        for address in turnouts {
            self.turnouts.track(address, TurnoutPosition::Unknown);
        }
        let inputs: heapless::Vec<InputAddress, MAX_TRACKED_POINTS> =
            self.inputs.iter().map(|(k, _)| *k).collect();
        self.inputs.clear();
        for address in inputs {
            self.inputs.track(address, None);
        }
    }
}
