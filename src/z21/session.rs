//! Client session for one Z21 link.
//!
//! # Lifecycle
//!
//! | Step | Frames sent | Waits for |
//! |------|-------------|-----------|
//! | `connect` | serial number, hardware info | both replies within `handshake_timeout_ms` |
//! | handshake done | broadcast flags (set + get), system state, subscriptions | system state within `reply_timeout_ms` |
//! | every `broadcast_flags_retry_ms` | broadcast flags again, until confirmed or retries run out | |
//! | every `keepalive_ms` | system state | reply within `reply_timeout_ms` |
//! | `disconnect` | logoff | |
//!
//! A missed handshake reply fails the link. A missed keepalive reply only
//! marks the link as degraded; the next valid frame restores it.

use log::{debug, info, trace, warn};

use crate::codec::{Decoded, Frame, WireMessage};
use crate::config::{SessionLimits, Z21Config};
use crate::dcc::{LocoAddress, SpeedSteps, FUNCTION_MAX};
use crate::error::{CommandError, TransportError};
use crate::session::{
    CommandStationSession, InputAddress, LinkFault, LinkState, LinkStatus, LocoCache, LocoState,
    PowerState, SessionCore, SessionEvent, SessionStats, StationCommand, StationInfo, SystemState,
    TurnoutPosition,
};

use super::messages::{
    frame_checksum_ok, BroadcastFlags, FunctionAction, LocoInfo, Message, XMessage,
    HEADER_LEN, RMBUS_GROUP_LEN,
};

/// Inputs per R-Bus group (10 modules of 8 inputs).
pub const RMBUS_INPUTS_PER_GROUP: u16 = (RMBUS_GROUP_LEN as u16) * 8;

/// Highest R-Bus input number.
pub const RMBUS_INPUT_MAX: u16 = 2 * RMBUS_INPUTS_PER_GROUP;

/// Replies the session waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reply {
    SerialNumber,
    HardwareInfo,
    SystemState,
}

#[derive(Clone, Copy, Debug)]
struct FlagsRetry {
    next_ms: u64,
    attempts: u8,
}

/// Sans-IO Z21 client.
///
/// # Example
///
/// ```rust
/// use rs_commandstation::codec::WireMessage;
/// use rs_commandstation::config::Z21Config;
/// use rs_commandstation::session::{CommandStationSession, LinkStatus, StationCommand};
/// use rs_commandstation::z21::{FirmwareVersion, HardwareType, Message, Z21Session};
///
/// let mut z21 = Z21Session::new(Z21Config::default());
/// z21.connect(0);
/// while z21.pop_outbound().is_some() {}
///
/// z21.receive(&Message::SerialNumber(12345).encode(), 10);
/// z21.receive(
///     &Message::HardwareInfo {
///         hardware_type: HardwareType::Z21New,
///         firmware: FirmwareVersion::new(1, 43),
///     }
///     .encode(),
///     20,
/// );
/// assert_eq!(*z21.status(), LinkStatus::Connected);
///
/// z21.apply(StationCommand::SetTrackPower(true), 30).unwrap();
/// ```
#[derive(Debug)]
pub struct Z21Session {
    config: Z21Config,
    core: SessionCore<Reply>,
    required_flags: BroadcastFlags,
    confirmed_flags: Option<BroadcastFlags>,
    flags_retry: Option<FlagsRetry>,
    next_keepalive_ms: Option<u64>,
    rmbus: [Option<[u8; RMBUS_GROUP_LEN]>; 2],
}

impl Z21Session {
    /// New session with default limits.
    pub fn new(config: Z21Config) -> Self {
        Self::with_limits(config, &SessionLimits::default())
    }

    /// New session with explicit limits.
    pub fn with_limits(config: Z21Config, limits: &SessionLimits) -> Self {
        let mut required = BroadcastFlags(BroadcastFlags::POWER_LOCO_TURNOUT);
        if config.rmbus {
            required = required.with(BroadcastFlags::RMBUS);
        }
        Self {
            config,
            core: SessionCore::new("z21", limits),
            required_flags: required,
            confirmed_flags: None,
            flags_retry: None,
            next_keepalive_ms: None,
            rmbus: [None; 2],
        }
    }

    /// Link configuration.
    pub fn config(&self) -> &Z21Config {
        &self.config
    }

    /// Broadcast flags as last reported by the Z21.
    pub fn broadcast_flags(&self) -> Option<BroadcastFlags> {
        self.confirmed_flags
    }

    /// Encode `message`, refusing X-Bus frames whose checksum does not verify.
    fn checked_frame(&self, message: &Message) -> Option<Frame> {
        let frame = message.encode();
        if !frame_checksum_ok(&frame) {
            log::error!("{}: refusing to send frame with bad checksum", self.core.name);
            return None;
        }
        self.trace_tx(message);
        Some(frame)
    }

    fn send_internal(&mut self, message: Message, what: &str) {
        if let Some(frame) = self.checked_frame(&message) {
            self.core.queue_internal(frame, what);
        }
    }

    fn send_command(&mut self, message: Message) -> Result<(), CommandError> {
        let frame = self
            .checked_frame(&message)
            .ok_or(CommandError::Unsupported("frame failed checksum verification"))?;
        self.core.queue(frame)
    }

    fn trace_tx(&self, message: &Message) {
        if self.config.debug_tx {
            trace!("{}: tx {:?}", self.core.name, message);
        }
    }

    fn refresh_state(&mut self) {
        if self.core.state().is_usable() {
            let next = if self.core.waits.is_empty() {
                LinkState::Idle
            } else {
                LinkState::Active
            };
            self.core.set_state(next);
        }
    }

    fn expect(&mut self, kind: Reply, what: &'static str, now_ms: u64, timeout_ms: u32) {
        if !self.core.waits.expect(kind, what, now_ms, timeout_ms as u64) {
            warn!("{}: too many pending replies, not waiting for {}", self.core.name, what);
        }
    }

    fn request_system_state(&mut self, now_ms: u64) {
        self.send_internal(Message::SystemStateGetData, "system state poll");
        self.expect(Reply::SystemState, "system state", now_ms, self.config.reply_timeout_ms);
    }

    fn send_broadcast_flags(&mut self) {
        self.send_internal(Message::SetBroadcastFlags(self.required_flags), "broadcast flags");
        self.send_internal(Message::GetBroadcastFlags, "broadcast flags query");
    }

    fn handshake_complete(&mut self, now_ms: u64) {
        if self.core.state() != LinkState::Connecting
            || self.core.waits.is_pending(Reply::SerialNumber)
            || self.core.waits.is_pending(Reply::HardwareInfo)
        {
            return;
        }

        info!(
            "{}: connected to serial {:?}, hardware {:#x?}",
            self.core.name, self.core.info.serial_number, self.core.info.hardware_type
        );
        self.core.set_state(LinkState::Idle);
        self.core.set_status(LinkStatus::Connected);

        self.send_broadcast_flags();
        self.flags_retry = Some(FlagsRetry {
            next_ms: now_ms + self.config.broadcast_flags_retry_ms as u64,
            attempts: 0,
        });
        self.request_system_state(now_ms);
        self.next_keepalive_ms = Some(now_ms + self.config.keepalive_ms as u64);
        self.resubscribe();
        self.refresh_state();
    }

    fn resubscribe(&mut self) {
        let locos: heapless::Vec<LocoAddress, { crate::session::MAX_TRACKED_LOCOS }> =
            self.core.locos.iter().map(|e| e.address).collect();
        for address in locos {
            self.send_internal(Message::X(XMessage::GetLocoInfo(address)), "loco subscription");
        }
        let turnouts: heapless::Vec<u16, { crate::session::MAX_TRACKED_POINTS }> =
            self.core.turnouts.iter().map(|(a, _)| *a).collect();
        for address in turnouts {
            self.send_internal(Message::X(XMessage::GetTurnoutInfo(address)), "turnout query");
        }
        if self.config.rmbus && self.core.inputs.iter().next().is_some() {
            for group in 0..2 {
                self.send_internal(Message::RmBusGetData { group }, "r-bus query");
            }
        }
    }

    fn handle(&mut self, message: Message, now_ms: u64) {
        match message {
            Message::SerialNumber(serial) => {
                self.core.waits.resolve(Reply::SerialNumber);
                self.core.update_info(|i| i.serial_number = Some(serial));
                self.handshake_complete(now_ms);
            }
            Message::HardwareInfo {
                hardware_type,
                firmware,
            } => {
                self.core.waits.resolve(Reply::HardwareInfo);
                self.core.update_info(|i| {
                    i.hardware_type = Some(hardware_type.code());
                    i.firmware = Some((firmware.major, firmware.minor));
                });
                debug!("{}: hardware {}", self.core.name, hardware_type.name());
                self.handshake_complete(now_ms);
            }
            Message::BroadcastFlags(flags) => {
                self.confirmed_flags = Some(flags);
                if flags.contains(self.required_flags) {
                    self.flags_retry = None;
                } else {
                    warn!(
                        "{}: broadcast flags {:#010x} do not include {:#010x}",
                        self.core.name, flags.0, self.required_flags.0
                    );
                }
            }
            Message::SystemStateDataChanged(data) => {
                self.core.waits.resolve(Reply::SystemState);
                self.core.update_system(data.flags(), Some(data.measurements()));
            }
            Message::RmBusDataChanged { group, status } => self.handle_rmbus(group, status),
            Message::X(x) => self.handle_x(x, now_ms),
            Message::LocoNet { tunnel, payload } => {
                debug!(
                    "{}: ignoring LocoNet {:?} message ({} bytes)",
                    self.core.name,
                    tunnel,
                    payload.len()
                );
            }
            Message::LocoMode { address, mode } => {
                debug!("{}: loco {} uses {:?}", self.core.name, address, mode);
            }
            other => {
                self.core.stats.unrecognized = self.core.stats.unrecognized.wrapping_add(1);
                debug!("{}: unsupported message {:#06x}", self.core.name, other.header());
            }
        }
    }

    fn handle_x(&mut self, message: XMessage, now_ms: u64) {
        match message {
            XMessage::BcTrackPowerOff => self.core.modify_flags(|f| {
                f.track_power = PowerState::Off;
            }),
            XMessage::BcTrackPowerOn => self.core.modify_flags(|f| {
                f.track_power = PowerState::On;
                f.emergency_stop = false;
                f.short_circuit = false;
            }),
            XMessage::BcTrackShortCircuit => self.core.modify_flags(|f| {
                f.track_power = PowerState::Off;
                f.short_circuit = true;
            }),
            XMessage::BcProgrammingMode => self.core.modify_flags(|f| {
                f.programming_mode = true;
            }),
            XMessage::BcStopped => self.core.modify_flags(|f| {
                f.emergency_stop = true;
            }),
            XMessage::StatusChanged(state) => {
                self.core.modify_flags(|f| state.apply_to(f));
            }
            XMessage::LocoInfo(info) => self.handle_loco_info(info, now_ms),
            XMessage::TurnoutInfo { address, position } => {
                self.core.update_turnout(address, position);
            }
            XMessage::Version {
                xbus_version,
                station_id,
            } => {
                debug!(
                    "{}: X-Bus version {:#04x}, station id {:#04x}",
                    self.core.name, xbus_version, station_id
                );
            }
            XMessage::FirmwareVersion(version) => {
                self.core
                    .update_info(|i| i.firmware = Some((version.major, version.minor)));
            }
            XMessage::UnknownCommand => {
                warn!("{}: command station rejected a command", self.core.name);
            }
            other => {
                self.core.stats.unrecognized = self.core.stats.unrecognized.wrapping_add(1);
                debug!("{}: unsupported X-Bus message {:?}", self.core.name, other);
            }
        }
    }

    fn handle_loco_info(&mut self, info: LocoInfo, now_ms: u64) {
        self.core.update_loco(info.address, now_ms, |s| {
            s.steps = info.steps;
            s.speed = info.speed;
            s.direction = info.direction;
            s.functions = info.functions;
            s.busy = info.busy;
        });
    }

    fn handle_rmbus(&mut self, group: u8, status: [u8; RMBUS_GROUP_LEN]) {
        let Some(slot) = self.rmbus.get_mut(group as usize) else {
            debug!("{}: r-bus group {} out of range", self.core.name, group);
            return;
        };
        *slot = Some(status);

        let first = group as u16 * RMBUS_INPUTS_PER_GROUP + 1;
        let tracked: heapless::Vec<u16, { crate::session::MAX_TRACKED_POINTS }> = self
            .core
            .inputs
            .iter()
            .filter_map(|(a, _)| match a {
                InputAddress::RmBus(n) if (first..first + RMBUS_INPUTS_PER_GROUP).contains(n) => {
                    Some(*n)
                }
                _ => None,
            })
            .collect();
        for n in tracked {
            let index = (n - first) as usize;
            let value = status[index / 8] & (1 << (index % 8)) != 0;
            self.core.update_input(InputAddress::RmBus(n), value);
        }
    }

    fn fail(&mut self, fault: LinkFault) {
        self.core.waits.clear();
        self.flags_retry = None;
        self.next_keepalive_ms = None;
        self.core.set_state(LinkState::Failed);
        self.core.set_status(LinkStatus::Error(fault));
    }
}

impl CommandStationSession for Z21Session {
    fn connect(&mut self, now_ms: u64) {
        self.core.clear_outbound();
        self.core.reset_link_state();
        self.confirmed_flags = None;
        self.flags_retry = None;
        self.next_keepalive_ms = None;
        self.rmbus = [None; 2];

        self.core.set_state(LinkState::Connecting);
        self.core.set_status(LinkStatus::Connecting);

        let timeout = self.config.handshake_timeout_ms;
        self.send_internal(Message::GetSerialNumber, "serial number query");
        self.expect(Reply::SerialNumber, "serial number", now_ms, timeout);
        self.send_internal(Message::GetHardwareInfo, "hardware info query");
        self.expect(Reply::HardwareInfo, "hardware info", now_ms, timeout);
    }

    fn disconnect(&mut self, _now_ms: u64) {
        if self.core.state() == LinkState::Disconnected {
            return;
        }
        let was_open = self.core.state() != LinkState::Failed;
        self.core.clear_outbound();
        self.core.waits.clear();
        self.flags_retry = None;
        self.next_keepalive_ms = None;
        if was_open {
            self.send_internal(Message::Logoff, "logoff");
        }
        self.core.set_state(LinkState::Disconnected);
        self.core.set_status(LinkStatus::Disconnected);
    }

    fn link_lost(&mut self, error: TransportError) {
        log::error!("{}: link lost: {}", self.core.name, error);
        self.core.clear_outbound();
        self.fail(LinkFault::LinkLost(error));
        self.core.reset_link_state();
    }

    fn receive(&mut self, bytes: &[u8], now_ms: u64) {
        if self.config.debug_rx {
            trace!("{}: rx {:02x?}", self.core.name, bytes);
        }
        if matches!(self.core.state(), LinkState::Disconnected | LinkState::Failed) {
            debug!("{}: dropping {} bytes, link not open", self.core.name, bytes.len());
            return;
        }

        let mut rest = bytes;
        while !rest.is_empty() {
            match Message::decode(rest) {
                Ok(Decoded::Complete { message, consumed }) => {
                    self.core.stats.frames_rx = self.core.stats.frames_rx.wrapping_add(1);
                    if self.config.debug_rx {
                        trace!("{}: rx {:?}", self.core.name, message);
                    }
                    if matches!(self.core.status(), LinkStatus::Error(LinkFault::Timeout(_)))
                        && self.core.state().is_usable()
                    {
                        self.core.set_status(LinkStatus::Connected);
                    }
                    self.handle(message, now_ms);
                    rest = &rest[consumed..];
                }
                Ok(Decoded::Incomplete { needed }) => {
                    // Frames never span datagrams
                    warn!(
                        "{}: dropping truncated frame, {} bytes missing",
                        self.core.name, needed
                    );
                    self.core.stats.dropped_bytes =
                        self.core.stats.dropped_bytes.wrapping_add(rest.len() as u32);
                    break;
                }
                Err(err) => {
                    self.core.record_decode_error(&err);
                    let declared = if rest.len() >= HEADER_LEN {
                        u16::from_le_bytes([rest[0], rest[1]]) as usize
                    } else {
                        0
                    };
                    if declared >= HEADER_LEN && declared <= rest.len() {
                        rest = &rest[declared..];
                    } else {
                        self.core.stats.dropped_bytes =
                            self.core.stats.dropped_bytes.wrapping_add(rest.len() as u32);
                        break;
                    }
                }
            }
        }
        self.refresh_state();
    }

    fn apply(&mut self, command: StationCommand, now_ms: u64) -> Result<(), CommandError> {
        self.core.ensure_usable()?;
        match command {
            StationCommand::SetTrackPower(true) => {
                self.send_command(Message::X(XMessage::SetTrackPowerOn))
            }
            StationCommand::SetTrackPower(false) => {
                self.send_command(Message::X(XMessage::SetTrackPowerOff))
            }
            StationCommand::EmergencyStop => self.send_command(Message::X(XMessage::SetStop)),
            StationCommand::SetLocoSpeedDirection {
                address,
                steps,
                speed,
                direction,
            } => {
                let speed = speed.clamp_to(steps);
                self.send_command(Message::X(XMessage::loco_drive(
                    address, steps, speed, direction,
                )))?;
                self.core.track_loco(address, steps, now_ms);
                self.core.locos.update(address, now_ms, |s| {
                    s.steps = steps;
                    s.speed = speed;
                    s.direction = direction;
                });
                Ok(())
            }
            StationCommand::SetLocoFunction {
                address,
                function,
                on,
            } => {
                if function > FUNCTION_MAX {
                    return Err(CommandError::InvalidFunction(function));
                }
                self.send_command(Message::X(XMessage::SetLocoFunction {
                    address,
                    function,
                    action: FunctionAction::from(on),
                }))?;
                let steps = self
                    .core
                    .locos
                    .get(address)
                    .map(|s| s.steps)
                    .unwrap_or_default();
                self.core.track_loco(address, steps, now_ms);
                self.core
                    .locos
                    .update(address, now_ms, |s| s.functions.set(function, on));
                Ok(())
            }
            StationCommand::SetTurnout {
                address,
                position,
                activate,
            } => {
                let port = match position {
                    TurnoutPosition::Port0 => false,
                    TurnoutPosition::Port1 => true,
                    _ => return Err(CommandError::Unsupported("turnout position")),
                };
                self.send_command(Message::X(XMessage::SetTurnout {
                    address,
                    port,
                    activate,
                    queue: false,
                }))
            }
        }
    }

    fn poll(&mut self, now_ms: u64) {
        while let Some(wait) = self.core.waits.take_expired(now_ms) {
            let timeout = wait.timeout();
            self.core.stats.timeouts = self.core.stats.timeouts.wrapping_add(1);
            warn!("{}: {}", self.core.name, timeout);
            if self.core.state() == LinkState::Connecting {
                self.fail(LinkFault::Timeout(timeout));
                return;
            }
            self.core.set_status(LinkStatus::Error(LinkFault::Timeout(timeout)));
        }

        if !self.core.state().is_usable() {
            return;
        }

        if let Some(retry) = self.flags_retry {
            if now_ms >= retry.next_ms {
                if retry.attempts < self.config.max_broadcast_flags_retries {
                    self.send_broadcast_flags();
                    self.flags_retry = Some(FlagsRetry {
                        next_ms: now_ms + self.config.broadcast_flags_retry_ms as u64,
                        attempts: retry.attempts + 1,
                    });
                } else {
                    warn!(
                        "{}: broadcast flags not confirmed after {} attempts",
                        self.core.name, retry.attempts
                    );
                    self.flags_retry = None;
                }
            }
        }

        if let Some(due) = self.next_keepalive_ms {
            if now_ms >= due {
                self.request_system_state(now_ms);
                self.next_keepalive_ms = Some(now_ms + self.config.keepalive_ms as u64);
            }
        }
        self.refresh_state();
    }

    fn next_deadline(&self) -> Option<u64> {
        let waits = self.core.waits.next_deadline();
        if !self.core.state().is_usable() {
            return waits;
        }
        [waits, self.next_keepalive_ms, self.flags_retry.map(|r| r.next_ms)]
            .into_iter()
            .flatten()
            .min()
    }

    fn pop_outbound(&mut self) -> Option<Frame> {
        self.core.pop_outbound()
    }

    fn pop_event(&mut self) -> Option<SessionEvent> {
        self.core.pop_event()
    }

    fn track_loco(
        &mut self,
        address: LocoAddress,
        steps: SpeedSteps,
        now_ms: u64,
    ) -> Result<(), CommandError> {
        self.core.track_loco(address, steps, now_ms);
        if self.core.state().is_usable() {
            self.send_command(Message::X(XMessage::GetLocoInfo(address)))?;
        }
        Ok(())
    }

    fn track_turnout(&mut self, address: u16, _now_ms: u64) -> Result<(), CommandError> {
        if !self.core.turnouts.track(address, TurnoutPosition::Unknown) {
            return Err(CommandError::CacheFull);
        }
        if self.core.state().is_usable() {
            self.send_command(Message::X(XMessage::GetTurnoutInfo(address)))?;
        }
        Ok(())
    }

    fn track_input(&mut self, address: InputAddress) -> Result<(), CommandError> {
        let InputAddress::RmBus(n) = address else {
            return Err(CommandError::Unsupported("CBUS events on a Z21 link"));
        };
        if !(1..=RMBUS_INPUT_MAX).contains(&n) {
            return Err(CommandError::InvalidAddress(n));
        }
        if !self.core.inputs.track(address, None) {
            return Err(CommandError::CacheFull);
        }
        let group = ((n - 1) / RMBUS_INPUTS_PER_GROUP) as u8;
        if let Some(status) = self.rmbus[group as usize] {
            self.handle_rmbus(group, status);
        } else if self.core.state().is_usable() && self.config.rmbus {
            self.send_command(Message::RmBusGetData { group })?;
        }
        Ok(())
    }

    fn state(&self) -> LinkState {
        self.core.state()
    }

    fn status(&self) -> &LinkStatus {
        self.core.status()
    }

    fn system_state(&self) -> &SystemState {
        &self.core.system
    }

    fn station_info(&self) -> &StationInfo {
        &self.core.info
    }

    fn loco(&self, address: LocoAddress) -> Option<&LocoState> {
        self.core.locos.get(address)
    }

    fn locos(&self) -> &LocoCache {
        &self.core.locos
    }

    fn stats(&self) -> &SessionStats {
        &self.core.stats
    }
}
