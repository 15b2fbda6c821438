//! Transport abstraction for hardware links.
//!
//! A transport is a dumb byte pipe. It knows nothing about frames: the Z21
//! session receives whole UDP datagrams, the CBUS session receives an ASCII
//! byte stream from a CAN-USB adapter and does its own framing.
//!
//! # Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`LinkTransport`] | Sync, non-blocking (polling loops, embedded) |
//! | [`AsyncLinkTransport`] | Async (tokio runtime, desktop) |
//!
//! Platform differences (UDP sockets, termios vs. Windows serial) live in the
//! implementations, never in protocol code.

use crate::error::TransportError;

/// Largest single read a transport hands to a session.
pub const MAX_RECV_LEN: usize = 1500;

// ============================================================================
// Sync Transport (polling)
// ============================================================================

/// Link transport trait for polling designs.
///
/// # Implementation Notes
///
/// - `send` writes one buffer atomically (one datagram, or one `write_all`)
/// - `try_recv` never blocks and returns `Ok(None)` when nothing is pending
/// - After an error the link is considered lost; the session is torn down
///
/// # Example
///
/// ```rust,ignore
/// use rs_commandstation::traits::LinkTransport;
///
/// fn pump<T: LinkTransport>(link: &mut T, session: &mut impl CommandStationSession, now: u64) {
///     let mut buf = [0u8; 256];
///     while let Ok(Some(n)) = link.try_recv(&mut buf) {
///         session.receive(&buf[..n], now);
///     }
///     while let Some(frame) = session.pop_outbound() {
///         link.send(&frame).ok();
///     }
/// }
/// ```
pub trait LinkTransport {
    /// Send one buffer.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Copy pending received bytes into `buf` without blocking.
    fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError>;

    /// Check if the link is open.
    fn is_open(&self) -> bool;

    /// Close the link. Idempotent.
    fn close(&mut self);
}

/// Async link transport for the tokio runtime.
///
/// The returned futures are `Send` so a link task can be spawned on a
/// multi-threaded runtime. `recv` must be cancel-safe: the runner selects on
/// it together with commands and timers.
#[cfg(feature = "std")]
pub trait AsyncLinkTransport: Send {
    /// Send one buffer.
    fn send(
        &mut self,
        bytes: &[u8],
    ) -> impl core::future::Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next received bytes and copy them into `buf`.
    ///
    /// Returns the number of bytes written. `Ok(0)` is never returned for an
    /// open link; end of stream is `Err(TransportError::Closed)`.
    fn recv(
        &mut self,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<usize, TransportError>> + Send;

    /// Short description for logs (`udp://host:port`, `serial:///dev/ttyACM0`).
    fn describe(&self) -> alloc::string::String;
}
