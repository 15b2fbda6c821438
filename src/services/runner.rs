//! One tokio task per hardware link.
//!
//! A [`LinkRunner`] owns a sans-IO session and its transport and drives both
//! from a single `select!` loop:
//!
//! | Source | Action |
//! |--------|--------|
//! | transport `recv` | `session.receive` |
//! | command channel | `session.apply` / `track_*`, result sent back to the caller |
//! | timer at `session.next_deadline()` | `session.poll` |
//! | shutdown | `session.disconnect`, flush the logoff, exit |
//!
//! After every step the runner writes queued frames in order, forwards
//! session events to a broadcast channel and publishes the session state into
//! [`SharedPowerState`]. Frames for a link therefore leave in the order the
//! commands were submitted, from one task, with no interleaved writes.
//!
//! The runner does not reconnect. When the transport fails it returns the
//! final [`LinkStatus`] (with `LinkLost`) and the owner decides what to do,
//! for example with [`ReconnectPolicy`](crate::config::ReconnectPolicy).
//!
//! # Example
//!
//! ```ignore
//! let shared = Arc::new(SharedPowerState::new());
//! let transport = UdpTransport::connect("192.168.0.111", 21105).await?;
//! let (runner, handle) = LinkRunner::new("z21", "z21", Z21Session::new(cfg), transport, shared)?;
//! let task = tokio::spawn(runner.run());
//!
//! handle.command(StationCommand::SetTrackPower(true)).await?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::capture::{CaptureDirection, CaptureSink, LINKTYPE_CBUS, LINKTYPE_Z21};
use crate::cbus::CbusSession;
use crate::config::{CaptureConfig, LinkConfig, SessionLimits};
use crate::dcc::{LocoAddress, SpeedSteps};
use crate::error::{CommandError, TransportError};
use crate::power::LinkId;
use crate::session::{
    CommandStationSession, InputAddress, LinkState, LinkStatus, SessionEvent, StationCommand,
};
use crate::traits::{AsyncLinkTransport, MAX_RECV_LEN};
use crate::z21::Z21Session;

use super::shared::SharedPowerState;
use super::transport::{SerialTransport, UdpTransport};

/// Queued requests per link before `command` waits.
pub const REQUEST_QUEUE_LEN: usize = 32;

/// Events buffered per subscriber before the oldest are dropped.
pub const EVENT_QUEUE_LEN: usize = 64;

/// Timer period while the session has no deadline.
const IDLE_TICK_MS: u64 = 1000;

// ============================================================================
// Requests and Handle
// ============================================================================

type Reply = oneshot::Sender<Result<(), CommandError>>;

enum LinkRequest {
    Command(StationCommand, Reply),
    TrackLoco(LocoAddress, SpeedSteps, Reply),
    TrackTurnout(u16, Reply),
    TrackInput(InputAddress, Reply),
}

/// Cloneable handle to a running link.
///
/// Dropping every handle shuts the link down the same way [`close`](Self::close)
/// does.
#[derive(Clone, Debug)]
pub struct LinkHandle {
    id: LinkId,
    name: Arc<str>,
    requests: mpsc::Sender<LinkRequest>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl core::fmt::Debug for LinkRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkRequest::Command(cmd, _) => write!(f, "Command({})", cmd.name()),
            LinkRequest::TrackLoco(addr, _, _) => write!(f, "TrackLoco({})", addr.number()),
            LinkRequest::TrackTurnout(addr, _) => write!(f, "TrackTurnout({addr})"),
            LinkRequest::TrackInput(addr, _) => write!(f, "TrackInput({addr:?})"),
        }
    }
}

impl LinkHandle {
    /// Index in [`SharedPowerState`].
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request(
        &self,
        make: impl FnOnce(Reply) -> LinkRequest,
    ) -> Result<(), CommandError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| CommandError::LinkStopped)?;
        rx.await.map_err(|_| CommandError::LinkStopped)?
    }

    /// Translate and queue a command on this link.
    ///
    /// Resolves once the frames are queued for sending, not when the command
    /// station acknowledges them.
    pub async fn command(&self, command: StationCommand) -> Result<(), CommandError> {
        self.request(|reply| LinkRequest::Command(command, reply))
            .await
    }

    /// Start tracking a loco.
    pub async fn track_loco(
        &self,
        address: LocoAddress,
        steps: SpeedSteps,
    ) -> Result<(), CommandError> {
        self.request(|reply| LinkRequest::TrackLoco(address, steps, reply))
            .await
    }

    /// Start tracking a turnout.
    pub async fn track_turnout(&self, address: u16) -> Result<(), CommandError> {
        self.request(|reply| LinkRequest::TrackTurnout(address, reply))
            .await
    }

    /// Start tracking a feedback input.
    pub async fn track_input(&self, address: InputAddress) -> Result<(), CommandError> {
        self.request(|reply| LinkRequest::TrackInput(address, reply))
            .await
    }

    /// Receiver for session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Ask the runner to log off and stop.
    ///
    /// Safe to call from any task at any time, also while a receive is in
    /// flight. Idempotent.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// `true` once the runner has exited.
    pub fn is_stopped(&self) -> bool {
        self.requests.is_closed()
    }
}

// ============================================================================
// Runner
// ============================================================================

enum Wake {
    Shutdown,
    Received(Result<usize, TransportError>),
    Request(Option<LinkRequest>),
    Timer,
}

/// Drives one session over one transport.
pub struct LinkRunner<S, T> {
    id: LinkId,
    name: Arc<str>,
    session: S,
    transport: T,
    shared: Arc<SharedPowerState>,
    requests: mpsc::Receiver<LinkRequest>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: watch::Receiver<bool>,
    capture: Option<CaptureSink>,
}

impl<S, T> LinkRunner<S, T>
where
    S: CommandStationSession + Send + 'static,
    T: AsyncLinkTransport + 'static,
{
    /// Register the link in `shared` and build the runner and its handle.
    ///
    /// Fails with `CacheFull` when the link table is full.
    pub fn new(
        name: &str,
        protocol: &'static str,
        session: S,
        transport: T,
        shared: Arc<SharedPowerState>,
    ) -> Result<(Self, LinkHandle), CommandError> {
        let id = shared
            .register_link(name, protocol)
            .ok_or(CommandError::CacheFull)?;
        let name: Arc<str> = Arc::from(name);
        let (req_tx, req_rx) = mpsc::channel(REQUEST_QUEUE_LEN);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE_LEN);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = LinkHandle {
            id,
            name: Arc::clone(&name),
            requests: req_tx,
            events: event_tx.clone(),
            shutdown: Arc::new(shutdown_tx),
        };
        let runner = Self {
            id,
            name,
            session,
            transport,
            shared,
            requests: req_rx,
            events: event_tx,
            shutdown: shutdown_rx,
            capture: None,
        };
        Ok((runner, handle))
    }

    /// Mirror all traffic to `sink`.
    pub fn with_capture(mut self, sink: CaptureSink) -> Self {
        self.capture = Some(sink);
        self
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> JoinHandle<LinkStatus> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown, handshake failure or transport loss.
    ///
    /// Returns the final link status.
    pub async fn run(mut self) -> LinkStatus {
        info!("[{}] starting on {}", self.name, self.transport.describe());
        let mut buf = [0u8; MAX_RECV_LEN];

        self.session.connect(self.shared.now_ms());
        if let Err(e) = self.flush().await {
            self.lose(e);
            return self.finish();
        }

        loop {
            let now = self.shared.now_ms();
            let wait_ms = self
                .session
                .next_deadline()
                .map(|d| d.saturating_sub(now))
                .unwrap_or(IDLE_TICK_MS);
            let timer = tokio::time::sleep(Duration::from_millis(wait_ms));

            let wake = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    match changed {
                        Ok(()) if !*self.shutdown.borrow() => continue,
                        _ => Wake::Shutdown,
                    }
                }
                received = self.transport.recv(&mut buf) => Wake::Received(received),
                request = self.requests.recv() => Wake::Request(request),
                _ = timer => Wake::Timer,
            };

            let now = self.shared.now_ms();
            match wake {
                Wake::Shutdown | Wake::Request(None) => {
                    info!("[{}] shutting down", self.name);
                    self.session.disconnect(now);
                    if let Err(e) = self.flush().await {
                        warn!("[{}] logoff not sent: {}", self.name, e);
                    }
                    break;
                }
                Wake::Received(Ok(n)) => {
                    if let Some(capture) = self.capture.as_mut() {
                        capture.record(CaptureDirection::Rx, &buf[..n]);
                    }
                    self.session.receive(&buf[..n], now);
                }
                Wake::Received(Err(e)) => {
                    self.lose(e);
                    break;
                }
                Wake::Request(Some(request)) => self.handle(request, now),
                Wake::Timer => self.session.poll(now),
            }

            if let Err(e) = self.flush().await {
                self.lose(e);
                break;
            }
            if self.session.state() == LinkState::Failed {
                warn!("[{}] link failed: {:?}", self.name, self.session.status());
                break;
            }
        }

        self.finish()
    }

    fn handle(&mut self, request: LinkRequest, now: u64) {
        let (result, reply) = match request {
            LinkRequest::Command(command, reply) => (self.session.apply(command, now), reply),
            LinkRequest::TrackLoco(address, steps, reply) => {
                (self.session.track_loco(address, steps, now), reply)
            }
            LinkRequest::TrackTurnout(address, reply) => {
                (self.session.track_turnout(address, now), reply)
            }
            LinkRequest::TrackInput(address, reply) => (self.session.track_input(address), reply),
        };
        if let Err(e) = &result {
            warn!("[{}] request rejected: {}", self.name, e);
        }
        // Caller may have given up waiting
        let _ = reply.send(result);
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        while let Some(frame) = self.session.pop_outbound() {
            if let Some(capture) = self.capture.as_mut() {
                capture.record(CaptureDirection::Tx, &frame);
            }
            self.transport.send(&frame).await?;
        }
        self.forward_events();
        Ok(())
    }

    fn forward_events(&mut self) {
        while let Some(event) = self.session.pop_event() {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        if let Some(summary) = self.shared.publish(self.id, &self.session) {
            info!(
                "layout power {:?}, estop {}, {} link(s) connected",
                summary.track_power, summary.emergency_stop, summary.connected_links
            );
        }
    }

    fn lose(&mut self, error: TransportError) {
        error!("[{}] transport lost: {}", self.name, error);
        self.session.link_lost(error);
        self.forward_events();
    }

    fn finish(mut self) -> LinkStatus {
        self.forward_events();
        if let Some(capture) = self.capture.as_mut() {
            capture.flush();
        }
        let status = self.session.status().clone();
        info!("[{}] stopped ({})", self.name, status.as_str());
        status
    }
}

// ============================================================================
// Link Factory
// ============================================================================

/// Open the transport for `config`, build the session and spawn its runner.
pub async fn spawn_link(
    config: &LinkConfig,
    limits: &SessionLimits,
    capture: &CaptureConfig,
    shared: Arc<SharedPowerState>,
) -> Result<(LinkHandle, JoinHandle<LinkStatus>), TransportError> {
    let name = config.name();
    let sink = |linktype| {
        if !capture.enabled {
            return None;
        }
        CaptureSink::create(Path::new(capture.directory.as_str()), name, linktype)
            .map_err(|e| warn!("[{}] capture disabled: {}", name, e))
            .ok()
    };

    match config {
        LinkConfig::Z21(cfg) => {
            let transport = UdpTransport::connect(cfg.host.as_str(), cfg.port).await?;
            let session = Z21Session::with_limits(cfg.clone(), limits);
            let (mut runner, handle) = LinkRunner::new(name, "z21", session, transport, shared)
                .map_err(|e| TransportError::Open(e.to_string()))?;
            if let Some(sink) = sink(LINKTYPE_Z21) {
                runner = runner.with_capture(sink);
            }
            Ok((handle, runner.spawn()))
        }
        LinkConfig::Cbus(cfg) => {
            let transport = SerialTransport::open(cfg.device.as_str(), cfg.baud)?;
            let session = CbusSession::with_limits(cfg.clone(), limits);
            let (mut runner, handle) = LinkRunner::new(name, "cbus", session, transport, shared)
                .map_err(|e| TransportError::Open(e.to_string()))?;
            if let Some(sink) = sink(LINKTYPE_CBUS) {
                runner = runner.with_capture(sink);
            }
            Ok((handle, runner.spawn()))
        }
    }
}
