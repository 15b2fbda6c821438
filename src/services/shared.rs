//! Shared station state for the link runners and the HTTP API.
//!
//! `SharedPowerState` is the single synchronization point between links.
//! Every runner publishes its session's state into it after each step; the
//! HTTP API and any other observer read snapshots out of it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_commandstation::services::SharedPowerState;
//!
//! let state = Arc::new(SharedPowerState::new());
//! let id = state.register_link("z21", "z21").unwrap();
//!
//! // Runner, after processing a frame
//! if let Some(summary) = state.publish(id, &session) {
//!     log::info!("layout power now {:?}", summary.track_power);
//! }
//!
//! // Web handler
//! let snapshot = state.snapshot();
//! ```

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;

use crate::power::{LinkId, PowerAggregator, PowerSummary};
use crate::session::{
    CommandStationSession, LinkStatus, LocoEntry, SessionStats, StationInfo, SystemState,
};

// ============================================================================
// Snapshots
// ============================================================================

/// State of one link as last published by its runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// Link name.
    pub name: String,
    /// Protocol name (`z21`, `cbus`).
    pub protocol: &'static str,
    /// Link status.
    pub status: LinkStatus,
    /// System state of the command station.
    pub system: SystemState,
    /// Handshake information.
    pub info: StationInfo,
    /// Tracked locos.
    pub locos: Vec<LocoEntry>,
    /// Diagnostic counters.
    pub stats: SessionStats,
}

impl LinkSnapshot {
    fn new(name: &str, protocol: &'static str) -> Self {
        Self {
            name: name.to_string(),
            protocol,
            status: LinkStatus::Disconnected,
            system: SystemState::default(),
            info: StationInfo::default(),
            locos: Vec::new(),
            stats: SessionStats::default(),
        }
    }
}

/// Everything the API shows, taken under one lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationSnapshot {
    /// Aggregated power.
    pub power: PowerSummary,
    /// Per-link state in registration order.
    pub links: Vec<LinkSnapshot>,
}

// ============================================================================
// State Provider Trait
// ============================================================================

/// Read access to the station state.
///
/// Lets the HTTP layer work against anything that can produce snapshots.
pub trait StateProvider: Send + Sync {
    /// Full snapshot.
    fn snapshot(&self) -> StationSnapshot;

    /// Aggregated power only.
    fn power(&self) -> PowerSummary;

    /// Milliseconds since the state was created.
    fn now_ms(&self) -> u64;
}

// ============================================================================
// Change Detection
// ============================================================================

/// Last power summary handed out by [`SharedPowerState::check_changes`].
#[derive(Clone, Debug, Default)]
pub struct ChangeDetection {
    /// Last reported summary
    pub last_power: PowerSummary,
}

// ============================================================================
// Shared Power State
// ============================================================================

struct Inner {
    power: PowerAggregator,
    links: Vec<LinkSnapshot>,
}

/// Station state shared by all link runners and services.
///
/// # Thread Safety
///
/// - One `Mutex` guards the aggregator and the link snapshots, so a power
///   summary is always computed from a consistent set of link reports.
/// - Change detection has a separate lock to minimize contention.
/// - Power changes are also pushed to a `watch` channel for async observers.
pub struct SharedPowerState {
    inner: Mutex<Inner>,

    /// Time base for all runners sharing this state
    start_time: Instant,

    change_detection: Mutex<ChangeDetection>,

    power_tx: watch::Sender<PowerSummary>,
}

impl Default for SharedPowerState {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SharedPowerState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedPowerState")
            .field("power", &self.power())
            .field("uptime_ms", &self.now_ms())
            .finish()
    }
}

impl SharedPowerState {
    /// Empty state, no links registered.
    pub fn new() -> Self {
        let (power_tx, _) = watch::channel(PowerSummary::default());
        Self {
            inner: Mutex::new(Inner {
                power: PowerAggregator::new(),
                links: Vec::new(),
            }),
            start_time: Instant::now(),
            change_detection: Mutex::new(ChangeDetection::default()),
            power_tx,
        }
    }

    /// Milliseconds since creation. The runners' session clock.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Get the start time instant.
    #[inline]
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a link. `None` when the link table is full.
    ///
    /// Registering a name again resets its snapshot and returns the same id.
    pub fn register_link(&self, name: &str, protocol: &'static str) -> Option<LinkId> {
        let mut inner = self.lock();
        let id = inner.power.register(name)?;
        let snapshot = LinkSnapshot::new(name, protocol);
        match inner.links.get_mut(id) {
            Some(slot) => *slot = snapshot,
            None => inner.links.push(snapshot),
        }
        Some(id)
    }

    /// Store the current state of `session` for `link`.
    ///
    /// Returns the new power summary when it changed.
    pub fn publish<S: CommandStationSession + ?Sized>(
        &self,
        link: LinkId,
        session: &S,
    ) -> Option<PowerSummary> {
        let changed = {
            let mut inner = self.lock();
            let snapshot = inner.links.get_mut(link)?;
            snapshot.status = session.status().clone();
            snapshot.system = *session.system_state();
            snapshot.info = *session.station_info();
            snapshot.locos.clear();
            snapshot.locos.extend(session.locos().iter().copied());
            snapshot.stats = *session.stats();

            let status = snapshot.status.clone();
            let flags = snapshot.system.flags;
            inner.power.update(link, &status, flags)
        };
        if let Some(summary) = changed {
            self.power_tx.send_replace(summary);
        }
        changed
    }

    /// Access the state with the lock held.
    ///
    /// The closure pattern prevents accidentally holding the lock across
    /// await points.
    pub fn with_state<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&PowerAggregator, &[LinkSnapshot]) -> R,
    {
        let inner = self.lock();
        f(&inner.power, &inner.links)
    }

    /// Full snapshot.
    pub fn snapshot(&self) -> StationSnapshot {
        self.with_state(|power, links| StationSnapshot {
            power: power.summary(),
            links: links.to_vec(),
        })
    }

    /// Snapshot of one link.
    pub fn link(&self, link: LinkId) -> Option<LinkSnapshot> {
        self.with_state(|_, links| links.get(link).cloned())
    }

    /// Aggregated power.
    pub fn power(&self) -> PowerSummary {
        self.with_state(|power, _| power.summary())
    }

    /// Receiver that sees every power change.
    pub fn subscribe_power(&self) -> watch::Receiver<PowerSummary> {
        self.power_tx.subscribe()
    }

    /// Power summary if it changed since the last call.
    pub fn check_changes(&self) -> Option<PowerSummary> {
        let power = self.power();
        let mut detection = self
            .change_detection
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if power != detection.last_power {
            detection.last_power = power;
            Some(power)
        } else {
            None
        }
    }

    /// Reset change detection to the current summary.
    pub fn sync_change_detection(&self) {
        let power = self.power();
        let mut detection = self
            .change_detection
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        detection.last_power = power;
    }
}

impl StateProvider for SharedPowerState {
    fn snapshot(&self) -> StationSnapshot {
        SharedPowerState::snapshot(self)
    }

    fn power(&self) -> PowerSummary {
        SharedPowerState::power(self)
    }

    fn now_ms(&self) -> u64 {
        SharedPowerState::now_ms(self)
    }
}

impl StateProvider for Arc<SharedPowerState> {
    fn snapshot(&self) -> StationSnapshot {
        self.as_ref().snapshot()
    }

    fn power(&self) -> PowerSummary {
        self.as_ref().power()
    }

    fn now_ms(&self) -> u64 {
        self.as_ref().now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireMessage;
    use crate::config::Z21Config;
    use crate::session::PowerState;
    use crate::z21::{FirmwareVersion, HardwareType, Message, XMessage, Z21Session};

    fn connected_z21() -> Z21Session {
        let mut s = Z21Session::new(Z21Config::default());
        s.connect(0);
        s.receive(&Message::SerialNumber(9).encode(), 1);
        s.receive(
            &Message::HardwareInfo {
                hardware_type: HardwareType::Z21New,
                firmware: FirmwareVersion::new(1, 43),
            }
            .encode(),
            2,
        );
        s
    }

    // ========================================================================
    // Basic Operations
    // ========================================================================

    #[test]
    fn test_register_and_snapshot() {
        let state = SharedPowerState::new();
        let id = state.register_link("main", "z21").unwrap();
        assert_eq!(id, 0);
        let snap = state.snapshot();
        assert_eq!(snap.links.len(), 1);
        assert_eq!(snap.links[0].name, "main");
        assert_eq!(snap.links[0].status, LinkStatus::Disconnected);
        assert_eq!(snap.power.track_power, PowerState::Unknown);
    }

    #[test]
    fn test_publish_copies_session_state() {
        let state = SharedPowerState::new();
        let id = state.register_link("main", "z21").unwrap();
        let session = connected_z21();

        state.publish(id, &session);
        let link = state.link(id).unwrap();
        assert_eq!(link.status, LinkStatus::Connected);
        assert_eq!(link.info.serial_number, Some(9));
        assert_eq!(state.power().connected_links, 1);
    }

    #[test]
    fn test_publish_reports_power_change_once() {
        let state = SharedPowerState::new();
        let id = state.register_link("main", "z21").unwrap();
        let mut session = connected_z21();
        state.publish(id, &session);

        session.receive(&Message::X(XMessage::BcTrackPowerOn).encode(), 3);
        let summary = state.publish(id, &session).unwrap();
        assert_eq!(summary.track_power, PowerState::On);
        assert!(state.publish(id, &session).is_none());
    }

    #[test]
    fn test_publish_unknown_link() {
        let state = SharedPowerState::new();
        assert!(state.publish(3, &connected_z21()).is_none());
    }

    // ========================================================================
    // Change Detection
    // ========================================================================

    #[test]
    fn test_check_changes() {
        let state = SharedPowerState::new();
        let id = state.register_link("main", "z21").unwrap();
        assert!(state.check_changes().is_none());

        let mut session = connected_z21();
        session.receive(&Message::X(XMessage::BcTrackPowerOff).encode(), 3);
        state.publish(id, &session);

        let changed = state.check_changes().unwrap();
        assert_eq!(changed.track_power, PowerState::Off);
        assert!(state.check_changes().is_none());
    }

    #[test]
    fn test_sync_change_detection() {
        let state = SharedPowerState::new();
        let id = state.register_link("main", "z21").unwrap();
        state.publish(id, &connected_z21());
        state.sync_change_detection();
        assert!(state.check_changes().is_none());
    }

    #[test]
    fn test_reregister_resets_link() {
        let state = SharedPowerState::new();
        let id = state.register_link("main", "z21").unwrap();
        state.publish(id, &connected_z21());
        assert_eq!(state.power().connected_links, 1);

        assert_eq!(state.register_link("main", "z21"), Some(id));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.links.len(), 1);
        assert_eq!(snapshot.links[0].status, LinkStatus::Disconnected);
        assert_eq!(snapshot.power.connected_links, 0);
    }

    #[test]
    fn test_watch_receiver_sees_change() {
        let state = SharedPowerState::new();
        let id = state.register_link("main", "z21").unwrap();
        let rx = state.subscribe_power();
        state.publish(id, &connected_z21());
        assert_eq!(rx.borrow().connected_links, 1);
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[test]
    fn test_concurrent_publish_and_read() {
        use std::thread;

        let state = Arc::new(SharedPowerState::new());
        let ids: Vec<_> = (0..4)
            .map(|i| state.register_link(&format!("link{i}"), "z21").unwrap())
            .collect();

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let session = connected_z21();
                    for _ in 0..50 {
                        state.publish(id, &session);
                        let _ = state.snapshot();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.power().connected_links, 4);
    }

    #[test]
    fn test_state_provider_for_arc() {
        let state = Arc::new(SharedPowerState::new());
        state.register_link("main", "cbus").unwrap();
        let provider: &dyn StateProvider = &state;
        assert_eq!(provider.snapshot().links[0].protocol, "cbus");
    }
}
