//! Mock implementations for testing without hardware.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockTransport`] | [`LinkTransport`], [`AsyncLinkTransport`] | Queued rx buffers, recorded tx buffers |
//!
//! # Example
//!
//! ```rust
//! use rs_commandstation::config::Z21Config;
//! use rs_commandstation::hal::MockTransport;
//! use rs_commandstation::session::CommandStationSession;
//! use rs_commandstation::traits::LinkTransport;
//! use rs_commandstation::z21::Z21Session;
//!
//! let mut link = MockTransport::new();
//! let mut z21 = Z21Session::new(Z21Config::default());
//! z21.connect(0);
//! while let Some(frame) = z21.pop_outbound() {
//!     link.send(&frame).unwrap();
//! }
//!
//! // LAN_GET_SERIAL_NUMBER went out first
//! assert_eq!(link.sent()[0], vec![0x04, 0x00, 0x10, 0x00]);
//! ```
//!
//! [`Clock`]: crate::traits::Clock
//! [`LinkTransport`]: crate::traits::LinkTransport
//! [`AsyncLinkTransport`]: crate::traits::AsyncLinkTransport

use crate::traits::Clock;

#[cfg(feature = "std")]
pub use transport::MockTransport;

// ============================================================================
// Clock Mock
// ============================================================================

/// Mock clock for testing time-dependent behavior.
///
/// # Example
///
/// ```rust
/// use rs_commandstation::hal::MockClock;
/// use rs_commandstation::traits::Clock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.set(1000);
/// assert_eq!(clock.now_ms(), 1000);
///
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Debug)]
pub struct MockClock {
    current_ms: u64,
}

impl MockClock {
    /// Creates a new mock clock starting at 0ms.
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Sets the current time in milliseconds.
    pub fn set(&mut self, ms: u64) {
        self.current_ms = ms;
    }

    /// Advances the clock by the given duration.
    pub fn advance(&mut self, ms: u64) {
        self.current_ms += ms;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms
    }
}

// ============================================================================
// Transport Mock
// ============================================================================

#[cfg(feature = "std")]
mod transport {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::error::TransportError;
    use crate::traits::LinkTransport;

    #[derive(Debug)]
    struct MockLink {
        rx: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        open: bool,
        remote_closed: bool,
        send_error: Option<TransportError>,
    }

    /// In-memory link.
    ///
    /// Clones share the same buffers, so a test keeps one clone to feed
    /// received bytes and inspect sent frames while the session or runner
    /// owns the other.
    #[derive(Debug, Clone)]
    pub struct MockTransport {
        link: Arc<Mutex<MockLink>>,
        #[cfg(feature = "runtime")]
        notify: Arc<tokio::sync::Notify>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        /// Open link with nothing queued.
        pub fn new() -> Self {
            Self {
                link: Arc::new(Mutex::new(MockLink {
                    rx: VecDeque::new(),
                    sent: Vec::new(),
                    open: true,
                    remote_closed: false,
                    send_error: None,
                })),
                #[cfg(feature = "runtime")]
                notify: Arc::new(tokio::sync::Notify::new()),
            }
        }

        fn with_link<R>(&self, f: impl FnOnce(&mut MockLink) -> R) -> R {
            let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut link)
        }

        fn wake(&self) {
            #[cfg(feature = "runtime")]
            self.notify.notify_one();
        }

        /// Queue one received buffer.
        pub fn push_rx(&self, bytes: &[u8]) {
            self.with_link(|l| l.rx.push_back(bytes.to_vec()));
            self.wake();
        }

        /// Buffers sent so far.
        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.with_link(|l| l.sent.clone())
        }

        /// Sent buffers, clearing the record.
        pub fn take_sent(&self) -> Vec<Vec<u8>> {
            self.with_link(|l| core::mem::take(&mut l.sent))
        }

        /// `true` if any sent buffer equals `bytes`.
        pub fn has_sent(&self, bytes: &[u8]) -> bool {
            self.with_link(|l| l.sent.iter().any(|s| s.as_slice() == bytes))
        }

        /// Make the next `send` fail with `error`.
        pub fn fail_next_send(&self, error: TransportError) {
            self.with_link(|l| l.send_error = Some(error));
        }

        /// Simulate the peer going away. Receive fails once the queue drains.
        pub fn close_remote(&self) {
            self.with_link(|l| l.remote_closed = true);
            self.wake();
        }

        fn send_inner(&self, bytes: &[u8]) -> Result<(), TransportError> {
            self.with_link(|l| {
                if !l.open {
                    return Err(TransportError::Closed);
                }
                if let Some(err) = l.send_error.take() {
                    return Err(err);
                }
                l.sent.push(bytes.to_vec());
                Ok(())
            })
        }

        fn recv_inner(&self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
            self.with_link(|l| {
                if !l.open {
                    return Err(TransportError::Closed);
                }
                match l.rx.pop_front() {
                    Some(bytes) => {
                        let n = bytes.len().min(buf.len());
                        buf[..n].copy_from_slice(&bytes[..n]);
                        Ok(Some(n))
                    }
                    None if l.remote_closed => Err(TransportError::Closed),
                    None => Ok(None),
                }
            })
        }
    }

    impl LinkTransport for MockTransport {
        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.send_inner(bytes)
        }

        fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
            self.recv_inner(buf)
        }

        fn is_open(&self) -> bool {
            self.with_link(|l| l.open)
        }

        fn close(&mut self) {
            self.with_link(|l| l.open = false);
            self.wake();
        }
    }

    #[cfg(feature = "runtime")]
    impl crate::traits::AsyncLinkTransport for MockTransport {
        async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.send_inner(bytes)
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            loop {
                let received = self.recv_inner(buf)?;
                if let Some(n) = received {
                    return Ok(n);
                }
                self.notify.notified().await;
            }
        }

        fn describe(&self) -> String {
            "mock://".into()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // MockClock Tests
    // =========================================================================

    #[test]
    fn mock_clock_starts_at_zero() {
        assert_eq!(MockClock::new().now_ms(), 0);
    }

    #[test]
    fn mock_clock_set_and_advance() {
        let mut clock = MockClock::new();
        clock.set(100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
    }

    // =========================================================================
    // MockTransport Tests
    // =========================================================================

    #[cfg(feature = "std")]
    mod transport_tests {
        use crate::error::TransportError;
        use crate::hal::MockTransport;
        use crate::traits::LinkTransport;

        #[test]
        fn mock_transport_records_sends() {
            let mut t = MockTransport::new();
            t.send(&[1, 2]).unwrap();
            t.send(&[3]).unwrap();
            assert_eq!(t.sent(), vec![vec![1, 2], vec![3]]);
            assert!(t.has_sent(&[3]));
            assert_eq!(t.take_sent().len(), 2);
            assert!(t.sent().is_empty());
        }

        #[test]
        fn mock_transport_queued_rx() {
            let mut t = MockTransport::new();
            let feeder = t.clone();
            let mut buf = [0u8; 8];
            assert_eq!(t.try_recv(&mut buf).unwrap(), None);

            feeder.push_rx(&[0xAA, 0xBB]);
            assert_eq!(t.try_recv(&mut buf).unwrap(), Some(2));
            assert_eq!(&buf[..2], &[0xAA, 0xBB]);
        }

        #[test]
        fn mock_transport_failures() {
            let mut t = MockTransport::new();
            t.fail_next_send(TransportError::Io("unplugged".into()));
            assert!(t.send(&[1]).is_err());
            assert!(t.send(&[1]).is_ok());

            t.close_remote();
            let mut buf = [0u8; 4];
            assert_eq!(t.try_recv(&mut buf), Err(TransportError::Closed));

            t.close();
            assert!(!t.is_open());
            assert_eq!(t.send(&[1]), Err(TransportError::Closed));
        }

        #[cfg(feature = "runtime")]
        #[tokio::test]
        async fn mock_transport_async_recv_wakes() {
            use crate::traits::AsyncLinkTransport;

            let mut t = MockTransport::new();
            let feeder = t.clone();
            let task = tokio::spawn(async move {
                let mut buf = [0u8; 8];
                let n = AsyncLinkTransport::recv(&mut t, &mut buf).await.unwrap();
                buf[..n].to_vec()
            });
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            feeder.push_rx(&[7, 8, 9]);
            assert_eq!(task.await.unwrap(), vec![7, 8, 9]);
        }
    }
}
