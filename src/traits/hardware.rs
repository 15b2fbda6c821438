//! Value traits shared by every driver: travel direction and time source.
//!
//! # Key Items
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`Direction`] | Loco travel direction as carried in speed bytes |
//! | [`Clock`] | Millisecond time source for the sans-IO sessions |
//!
//! Sessions never read the system time themselves. Callers pass `now_ms` in,
//! either from a [`Clock`] implementation or from the runtime's own timer.

/// Direction of loco travel.
///
/// DCC has no "stopped" direction: a stopped loco still has a direction that
/// is applied when it moves off again.
///
/// # Default
///
/// Defaults to [`Forward`](Self::Forward).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Forward (direction bit set).
    #[default]
    Forward,
    /// Reverse (direction bit clear).
    Reverse,
}

impl Direction {
    /// Returns the direction as a lowercase string.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_commandstation::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Reverse.as_str(), "reverse");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    /// The other direction.
    #[inline]
    pub const fn reversed(&self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// Parse direction from text input.
    ///
    /// Accepts `"forward"`/`"fwd"`/`"1"` and `"reverse"`/`"rev"`/`"-1"`.
    /// Input is trimmed and case-insensitive.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_commandstation::Direction;
    ///
    /// assert_eq!(Direction::from_text("  FWD "), Some(Direction::Forward));
    /// assert_eq!(Direction::from_text("-1"), Some(Direction::Reverse));
    /// assert_eq!(Direction::from_text("stopped"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("forward") || s.eq_ignore_ascii_case("fwd") || s == "1" {
            Some(Direction::Forward)
        } else if s.eq_ignore_ascii_case("reverse") || s.eq_ignore_ascii_case("rev") || s == "-1"
        {
            Some(Direction::Reverse)
        } else {
            None
        }
    }
}

/// Clock trait for getting current time in `no_std` environments.
///
/// Used by sessions and the runner to schedule keepalives and reply
/// deadlines.
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}

/// Monotonic clock backed by `std::time::Instant`.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
