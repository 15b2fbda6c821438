//! Layout-wide power state aggregated over all links.
//!
//! Each link reports its own [`SystemFlags`]. The rest of the system only
//! cares about one answer: is the track powered, and is anything in
//! emergency stop. [`PowerAggregator`] folds the per-link reports into a
//! [`PowerSummary`] and tells the caller when that summary changed.
//!
//! Rules, over links that are currently connected:
//!
//! | Summary field | Value |
//! |---------------|-------|
//! | `track_power` | `On` if every link reports on, `Off` if any reports off, else `Unknown` |
//! | `emergency_stop` | any link in emergency stop |
//! | `short_circuit` | any link reports a short |
//!
//! The aggregator itself is plain data. Concurrent access goes through
//! `services::SharedPowerState`, which wraps it in a single mutex.

use crate::config::{short_string, ShortString, MAX_LINKS};
use crate::session::{LinkStatus, PowerState, SystemFlags};

/// Index of a registered link.
pub type LinkId = usize;

/// Last report from one link.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LinkPower {
    /// Link name.
    pub name: ShortString,
    /// Link is connected and its flags count.
    pub usable: bool,
    /// Last reported flags.
    pub flags: SystemFlags,
}

/// Aggregated power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PowerSummary {
    /// Track power over all connected links.
    pub track_power: PowerState,
    /// Any connected link in emergency stop.
    pub emergency_stop: bool,
    /// Any connected link reporting a short circuit.
    pub short_circuit: bool,
    /// Number of connected links.
    pub connected_links: u8,
}

/// Folds per-link system flags into one [`PowerSummary`].
///
/// # Example
///
/// ```rust
/// use rs_commandstation::power::PowerAggregator;
/// use rs_commandstation::session::{LinkStatus, PowerState, SystemFlags};
///
/// let mut power = PowerAggregator::new();
/// let z21 = power.register("z21").unwrap();
/// let cbus = power.register("cbus").unwrap();
///
/// let on = SystemFlags { track_power: PowerState::On, ..Default::default() };
/// power.update(z21, &LinkStatus::Connected, on);
/// power.update(cbus, &LinkStatus::Connected, on);
/// assert_eq!(power.summary().track_power, PowerState::On);
///
/// // Repeating a report changes nothing
/// assert!(power.update(cbus, &LinkStatus::Connected, on).is_none());
///
/// let stopped = SystemFlags { emergency_stop: true, ..on };
/// let changed = power.update(cbus, &LinkStatus::Connected, stopped).unwrap();
/// assert!(changed.emergency_stop);
/// ```
#[derive(Clone, Debug, Default)]
pub struct PowerAggregator {
    links: heapless::Vec<LinkPower, MAX_LINKS>,
    summary: PowerSummary,
}

impl PowerAggregator {
    /// No links registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link. `None` when [`MAX_LINKS`] are registered.
    ///
    /// A name that is already registered keeps its id and starts over as not
    /// usable, so a restarted link reuses its slot.
    pub fn register(&mut self, name: &str) -> Option<LinkId> {
        let name = short_string(name);
        if let Some(id) = self.links.iter().position(|l| l.name == name) {
            self.links[id].usable = false;
            self.links[id].flags = SystemFlags::default();
            self.summary = self.fold();
            return Some(id);
        }
        let id = self.links.len();
        self.links
            .push(LinkPower {
                name,
                usable: false,
                flags: SystemFlags::default(),
            })
            .ok()?;
        Some(id)
    }

    /// Record a report from `link`.
    ///
    /// Returns the new summary when it changed, `None` otherwise. Unknown
    /// link ids are ignored.
    pub fn update(
        &mut self,
        link: LinkId,
        status: &LinkStatus,
        flags: SystemFlags,
    ) -> Option<PowerSummary> {
        let entry = self.links.get_mut(link)?;
        entry.usable = matches!(status, LinkStatus::Connected);
        entry.flags = flags;

        let summary = self.fold();
        if summary == self.summary {
            return None;
        }
        self.summary = summary;
        Some(summary)
    }

    /// Current summary.
    pub fn summary(&self) -> PowerSummary {
        self.summary
    }

    /// Per-link reports in registration order.
    pub fn links(&self) -> &[LinkPower] {
        &self.links
    }

    /// Report of one link.
    pub fn link(&self, link: LinkId) -> Option<&LinkPower> {
        self.links.get(link)
    }

    fn fold(&self) -> PowerSummary {
        let mut summary = PowerSummary::default();
        let mut all_on = true;
        let mut any_off = false;

        for link in self.links.iter().filter(|l| l.usable) {
            summary.connected_links += 1;
            summary.emergency_stop |= link.flags.emergency_stop;
            summary.short_circuit |= link.flags.short_circuit;
            match link.flags.track_power {
                PowerState::On => {}
                PowerState::Off => {
                    any_off = true;
                    all_on = false;
                }
                PowerState::Unknown => all_on = false,
            }
        }

        summary.track_power = if summary.connected_links == 0 {
            PowerState::Unknown
        } else if any_off {
            PowerState::Off
        } else if all_on {
            PowerState::On
        } else {
            PowerState::Unknown
        };
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::session::LinkFault;

    fn flags(power: PowerState) -> SystemFlags {
        SystemFlags {
            track_power: power,
            ..Default::default()
        }
    }

    fn two_links() -> (PowerAggregator, LinkId, LinkId) {
        let mut p = PowerAggregator::new();
        let a = p.register("a").unwrap();
        let b = p.register("b").unwrap();
        (p, a, b)
    }

    // =========================================================================
    // Aggregation Tests
    // =========================================================================

    #[test]
    fn test_no_connected_links_is_unknown() {
        let (p, _, _) = two_links();
        assert_eq!(p.summary().track_power, PowerState::Unknown);
        assert_eq!(p.summary().connected_links, 0);
    }

    #[test]
    fn test_any_off_wins() {
        let (mut p, a, b) = two_links();
        p.update(a, &LinkStatus::Connected, flags(PowerState::On));
        p.update(b, &LinkStatus::Connected, flags(PowerState::Off));
        assert_eq!(p.summary().track_power, PowerState::Off);
    }

    #[test]
    fn test_register_same_name_reuses_slot() {
        let (mut p, a, _) = two_links();
        p.update(a, &LinkStatus::Connected, flags(PowerState::On));
        assert_eq!(p.register("a"), Some(a));
        assert_eq!(p.summary().connected_links, 0);
        assert_eq!(p.register("c"), Some(2));
    }

    #[test]
    fn test_partial_reports_are_unknown() {
        let (mut p, a, b) = two_links();
        p.update(a, &LinkStatus::Connected, flags(PowerState::On));
        p.update(b, &LinkStatus::Connected, flags(PowerState::Unknown));
        assert_eq!(p.summary().track_power, PowerState::Unknown);
    }

    #[test]
    fn test_disconnected_link_does_not_count() {
        let (mut p, a, b) = two_links();
        p.update(a, &LinkStatus::Connected, flags(PowerState::On));
        p.update(b, &LinkStatus::Connecting, flags(PowerState::Off));
        assert_eq!(p.summary().track_power, PowerState::On);
        assert_eq!(p.summary().connected_links, 1);
    }

    #[test]
    fn test_estop_from_any_link() {
        let (mut p, a, b) = two_links();
        p.update(a, &LinkStatus::Connected, flags(PowerState::On));
        let stopped = SystemFlags {
            emergency_stop: true,
            ..flags(PowerState::On)
        };
        let summary = p.update(b, &LinkStatus::Connected, stopped).unwrap();
        assert!(summary.emergency_stop);
        assert_eq!(summary.track_power, PowerState::On);
    }

    // =========================================================================
    // Change Detection Tests
    // =========================================================================

    #[test]
    fn test_identical_report_is_not_a_change() {
        let (mut p, a, _) = two_links();
        assert!(p.update(a, &LinkStatus::Connected, flags(PowerState::On)).is_some());
        assert!(p.update(a, &LinkStatus::Connected, flags(PowerState::On)).is_none());
    }

    #[test]
    fn test_link_loss_changes_summary() {
        let (mut p, a, _) = two_links();
        p.update(a, &LinkStatus::Connected, flags(PowerState::On));
        let lost = LinkStatus::Error(LinkFault::LinkLost(TransportError::Closed));
        let summary = p.update(a, &lost, flags(PowerState::On)).unwrap();
        assert_eq!(summary.track_power, PowerState::Unknown);
        assert!(!p.link(a).unwrap().usable);
    }

    #[test]
    fn test_unknown_link_ignored() {
        let (mut p, _, _) = two_links();
        assert!(p.update(7, &LinkStatus::Connected, flags(PowerState::On)).is_none());
    }

    #[test]
    fn test_register_is_bounded() {
        let mut p = PowerAggregator::new();
        for _ in 0..MAX_LINKS {
            assert!(p.register("x").is_some());
        }
        assert!(p.register("overflow").is_none());
    }
}
