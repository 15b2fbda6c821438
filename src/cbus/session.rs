//! Client session for one CBUS link through a GridConnect CAN adapter.
//!
//! The session asks the command station for its status (`RSTAT`) and queries
//! node numbers (`QNN`) on connect, and is usable once `STAT` arrives. Track
//! power and emergency stop use the dedicated request opcodes. Loco commands
//! are sent as raw DCC packets (`RDCCn`) so no engine session has to be
//! allocated; engine reports from other cabs on the bus still update the loco
//! cache for tracked addresses.

use heapless::LinearMap;
use log::{debug, info, trace, warn};

use crate::codec::{Decoded, Frame, WireMessage};
use crate::config::{CbusConfig, SessionLimits};
use crate::dcc::{DccPacket, FunctionState, LocoAddress, SpeedSteps, FUNCTION_MAX};
use crate::error::{CommandError, FrameDecodeError, TransportError};
use crate::session::{
    CommandStationSession, InputAddress, LinkFault, LinkState, LinkStatus, LocoCache, LocoState,
    PowerState, SessionCore, SessionEvent, SessionStats, StationCommand, StationInfo, SystemState,
};

use super::gridconnect::{self, GridConnectDecoder};
use super::messages::{Message, StatusFlags};

/// Engine sessions remembered from bus traffic.
const MAX_ENGINE_SESSIONS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reply {
    Status,
}

/// Sans-IO CBUS client.
///
/// # Example
///
/// ```rust
/// use rs_commandstation::cbus::CbusSession;
/// use rs_commandstation::config::CbusConfig;
/// use rs_commandstation::session::{CommandStationSession, LinkState};
///
/// let mut cbus = CbusSession::new(CbusConfig::default());
/// cbus.connect(0);
/// assert_eq!(cbus.pop_outbound().unwrap().as_slice(), b":SAFA0N0C;");
/// assert_eq!(cbus.pop_outbound().unwrap().as_slice(), b":SBFA0N0D;");
///
/// // STAT split across two serial reads
/// cbus.receive(b":SB020NE30001", 5);
/// assert_eq!(cbus.state(), LinkState::Connecting);
/// cbus.receive(b"0004040103;", 6);
/// assert_eq!(cbus.state(), LinkState::Idle);
/// ```
#[derive(Debug)]
pub struct CbusSession {
    config: CbusConfig,
    core: SessionCore<Reply>,
    decoder: GridConnectDecoder,
    engine_sessions: LinearMap<u8, LocoAddress, MAX_ENGINE_SESSIONS>,
}

impl CbusSession {
    /// New session with default limits.
    pub fn new(config: CbusConfig) -> Self {
        Self::with_limits(config, &SessionLimits::default())
    }

    /// New session with explicit limits.
    pub fn with_limits(config: CbusConfig, limits: &SessionLimits) -> Self {
        Self {
            config,
            core: SessionCore::new("cbus", limits),
            decoder: GridConnectDecoder::new(),
            engine_sessions: LinearMap::new(),
        }
    }

    /// Link configuration.
    pub fn config(&self) -> &CbusConfig {
        &self.config
    }

    fn frame(&self, message: &Message) -> Frame {
        if self.config.debug_tx {
            trace!("{}: tx {:?}", self.core.name, message);
        }
        gridconnect::encode(self.config.can_id, &message.encode())
    }

    fn send_internal(&mut self, message: Message, what: &str) {
        let frame = self.frame(&message);
        self.core.queue_internal(frame, what);
    }

    fn send_command(&mut self, message: Message) -> Result<(), CommandError> {
        let frame = self.frame(&message);
        self.core.queue(frame)
    }

    fn send_dcc(&mut self, packet: &DccPacket) -> Result<(), CommandError> {
        let message = Message::request_dcc(packet, self.config.dcc_repeat)
            .ok_or(CommandError::Unsupported("DCC packet length"))?;
        self.send_command(message)
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

    fn handle(&mut self, message: Message, now_ms: u64) {
        match message {
            Message::Status(status) => {
                self.core.waits.resolve(Reply::Status);
                let flags = status.flags;
                self.core.update_info(|i| {
                    i.serial_number = Some(status.node as u32);
                    i.hardware_type = Some(status.station as u32);
                    i.firmware = Some((status.major, status.minor));
                });
                self.core.modify_flags(|f| {
                    f.track_power = PowerState::from(flags.has(StatusFlags::TRACK_ON));
                    f.emergency_stop = flags.has(StatusFlags::EMERGENCY_STOP);
                    f.short_circuit = flags.has(StatusFlags::TRACK_ERROR);
                    f.programming_mode = flags.has(StatusFlags::SERVICE_MODE);
                });
                if self.core.state() == LinkState::Connecting {
                    info!(
                        "{}: command station node {} firmware {}{}",
                        self.core.name, status.node, status.major, status.minor as char
                    );
                    self.core.set_state(LinkState::Idle);
                    self.core.set_status(LinkStatus::Connected);
                }
            }
            Message::TrackOff => self.core.modify_flags(|f| {
                f.track_power = PowerState::Off;
            }),
            Message::TrackOn => self.core.modify_flags(|f| {
                f.track_power = PowerState::On;
                f.emergency_stop = false;
            }),
            Message::EmergencyStopped => self.core.modify_flags(|f| {
                f.emergency_stop = true;
            }),
            Message::EngineReport(report) => {
                self.remember_session(report.session, report.address);
                self.core.update_loco(report.address, now_ms, |s| {
                    s.speed = report.speed;
                    s.direction = report.direction;
                    s.functions.set_f0_f4(report.f0_f4);
                    s.functions.set_range(5, 4, report.f5_f8);
                    s.functions.set_range(9, 4, report.f9_f12);
                });
            }
            Message::SetSpeedDirection {
                session,
                speed,
                direction,
            } => {
                if let Some(address) = self.engine_sessions.get(&session).copied() {
                    self.core.update_loco(address, now_ms, |s| {
                        s.speed = speed;
                        s.direction = direction;
                    });
                }
            }
            Message::SetFunctions {
                session,
                range,
                value,
            } => {
                if let Some(address) = self.engine_sessions.get(&session).copied() {
                    self.core.update_loco(address, now_ms, |s| match range.span() {
                        Some((first, width)) => s.functions.set_range(first, width, value),
                        None => s.functions.set_f0_f4(value),
                    });
                }
            }
            Message::FunctionOn { session, function } => {
                self.session_function(session, function, true, now_ms);
            }
            Message::FunctionOff { session, function } => {
                self.session_function(session, function, false, now_ms);
            }
            Message::ReleaseEngine { session } => {
                self.engine_sessions.remove(&session);
            }
            Message::AccessoryOn { node, event } => {
                self.core.update_input(InputAddress::Cbus { node, event }, true);
            }
            Message::AccessoryOff { node, event } => {
                self.core.update_input(InputAddress::Cbus { node, event }, false);
            }
            Message::ShortEventOn { device, .. } => {
                self.core
                    .update_input(InputAddress::Cbus { node: 0, event: device }, true);
            }
            Message::ShortEventOff { device, .. } => {
                self.core
                    .update_input(InputAddress::Cbus { node: 0, event: device }, false);
            }
            Message::CommandStationError { data1, data2, code } => {
                warn!(
                    "{}: command station error {} ({:#04x} {:#04x})",
                    self.core.name, code, data1, data2
                );
            }
            other => {
                self.core.stats.unrecognized = self.core.stats.unrecognized.wrapping_add(1);
                debug!("{}: unsupported message {:#04x}", self.core.name, other.opcode());
            }
        }
    }

    fn session_function(&mut self, session: u8, function: u8, on: bool, now_ms: u64) {
        if let Some(address) = self.engine_sessions.get(&session).copied() {
            self.core
                .update_loco(address, now_ms, |s| s.functions.set(function, on));
        }
    }

    /// Map an engine session to `address` if the loco is tracked.
    ///
    /// Sessions of untracked locos are forgotten. When the table is full a
    /// session of a loco that is no longer tracked goes first, otherwise
    /// the oldest entry.
    fn remember_session(&mut self, session: u8, address: LocoAddress) {
        if !self.core.locos.contains(address) {
            self.engine_sessions.remove(&session);
            return;
        }

        // A loco holds one session at a time
        let stale = self
            .engine_sessions
            .iter()
            .find(|(s, a)| **a == address && **s != session)
            .map(|(s, _)| *s);
        if let Some(stale) = stale {
            self.engine_sessions.remove(&stale);
        }

        if !self.engine_sessions.contains_key(&session)
            && self.engine_sessions.len() >= self.engine_sessions.capacity()
        {
            let victim = self
                .engine_sessions
                .iter()
                .find(|(_, a)| !self.core.locos.contains(**a))
                .or_else(|| self.engine_sessions.iter().next())
                .map(|(s, _)| *s);
            if let Some(victim) = victim {
                debug!("{}: engine session table full, dropping {}", self.core.name, victim);
                self.engine_sessions.remove(&victim);
            }
        }
        let _ = self.engine_sessions.insert(session, address);
    }

    fn receive_frame(&mut self, data: &[u8], now_ms: u64) {
        match Message::decode(data) {
            Ok(Decoded::Complete { message, .. }) => {
                self.core.stats.frames_rx = self.core.stats.frames_rx.wrapping_add(1);
                if self.config.debug_rx {
                    trace!("{}: rx {:?}", self.core.name, message);
                }
                self.handle(message, now_ms);
            }
            Ok(Decoded::Incomplete { .. }) => {
                self.core.record_decode_error(&FrameDecodeError::Length {
                    declared: data.len(),
                    minimum: data.first().map_or(1, |op| 1 + (op >> 5) as usize),
                });
            }
            Err(err) => self.core.record_decode_error(&err),
        }
    }
}

impl CommandStationSession for CbusSession {
    fn connect(&mut self, now_ms: u64) {
        self.core.clear_outbound();
        self.core.reset_link_state();
        self.decoder.reset();
        self.engine_sessions.clear();

        self.core.set_state(LinkState::Connecting);
        self.core.set_status(LinkStatus::Connecting);

        self.send_internal(Message::RequestStatus, "status request");
        self.send_internal(Message::QueryNodeNumber, "node query");
        if !self.core.waits.expect(
            Reply::Status,
            "command station status",
            now_ms,
            self.config.handshake_timeout_ms as u64,
        ) {
            warn!("{}: cannot wait for status reply", self.core.name);
        }
    }

    fn disconnect(&mut self, _now_ms: u64) {
        if self.core.state() == LinkState::Disconnected {
            return;
        }
        self.core.clear_outbound();
        self.core.waits.clear();
        self.core.set_state(LinkState::Disconnected);
        self.core.set_status(LinkStatus::Disconnected);
    }

    fn link_lost(&mut self, error: TransportError) {
        log::error!("{}: link lost: {}", self.core.name, error);
        self.core.clear_outbound();
        self.core.waits.clear();
        self.core.set_state(LinkState::Failed);
        self.core.set_status(LinkStatus::Error(LinkFault::LinkLost(error)));
        self.core.reset_link_state();
    }

    fn receive(&mut self, bytes: &[u8], now_ms: u64) {
        if self.config.debug_rx {
            trace!("{}: rx {:?}", self.core.name, bytes);
        }
        if matches!(self.core.state(), LinkState::Disconnected | LinkState::Failed) {
            debug!("{}: dropping {} bytes, link not open", self.core.name, bytes.len());
            return;
        }

        // Serial reads can be larger than the decoder buffer
        for chunk in bytes.chunks(gridconnect::MAX_RECORD_LEN) {
            self.decoder.push(chunk);
            while let Some(frame) = self.decoder.next_frame() {
                self.receive_frame(&frame.data, now_ms);
            }
        }
        let dropped = self.decoder.take_dropped();
        if dropped > 0 {
            warn!("{}: dropped {} bytes of malformed input", self.core.name, dropped);
            self.core.stats.dropped_bytes =
                self.core.stats.dropped_bytes.wrapping_add(dropped as u32);
        }
        self.refresh_state();
    }

    fn apply(&mut self, command: StationCommand, now_ms: u64) -> Result<(), CommandError> {
        self.core.ensure_usable()?;
        match command {
            StationCommand::SetTrackPower(true) => self.send_command(Message::RequestTrackOn),
            StationCommand::SetTrackPower(false) => self.send_command(Message::RequestTrackOff),
            StationCommand::EmergencyStop => self.send_command(Message::RequestEmergencyStop),
            StationCommand::SetLocoSpeedDirection {
                address,
                steps,
                speed,
                direction,
            } => {
                let speed = speed.clamp_to(steps);
                self.send_dcc(&DccPacket::speed(address, steps, speed, direction))?;
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
                let (steps, mut functions) = self
                    .core
                    .locos
                    .get(address)
                    .map(|s| (s.steps, s.functions))
                    .unwrap_or((SpeedSteps::default(), FunctionState::new()));
                functions.set(function, on);
                let packet = DccPacket::function_group(address, function, &functions)
                    .ok_or(CommandError::InvalidFunction(function))?;
                self.send_dcc(&packet)?;
                self.core.track_loco(address, steps, now_ms);
                self.core
                    .locos
                    .update(address, now_ms, |s| s.functions.set(function, on));
                Ok(())
            }
            StationCommand::SetTurnout { .. } => Err(CommandError::Unsupported("turnouts on CBUS")),
        }
    }

    fn poll(&mut self, now_ms: u64) {
        while let Some(wait) = self.core.waits.take_expired(now_ms) {
            let timeout = wait.timeout();
            self.core.stats.timeouts = self.core.stats.timeouts.wrapping_add(1);
            warn!("{}: {}", self.core.name, timeout);
            if self.core.state() == LinkState::Connecting {
                self.core.waits.clear();
                self.core.set_state(LinkState::Failed);
                self.core
                    .set_status(LinkStatus::Error(LinkFault::Timeout(timeout)));
                return;
            }
            self.core
                .set_status(LinkStatus::Error(LinkFault::Timeout(timeout)));
        }
        self.refresh_state();
    }

    fn next_deadline(&self) -> Option<u64> {
        self.core.waits.next_deadline()
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
        Ok(())
    }

    fn track_input(&mut self, address: InputAddress) -> Result<(), CommandError> {
        if !matches!(address, InputAddress::Cbus { .. }) {
            return Err(CommandError::Unsupported("R-Bus inputs on a CBUS link"));
        }
        if self.core.inputs.track(address, None) {
            Ok(())
        } else {
            Err(CommandError::CacheFull)
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbus::messages::{CommandStationStatus, EngineReport};
    use crate::dcc::Speed;
    use crate::traits::Direction;

    const STATION: u8 = 0x01;

    fn bus(message: Message) -> Frame {
        gridconnect::encode(STATION, &message.encode())
    }

    fn status(flags: u8) -> Frame {
        bus(Message::Status(CommandStationStatus {
            node: 0xFFFE,
            station: 0,
            flags: StatusFlags(flags),
            major: 4,
            minor: b'a',
            build: 3,
        }))
    }

    fn drain(s: &mut CbusSession) -> heapless::Vec<Frame, 16> {
        let mut out = heapless::Vec::new();
        while let Some(f) = s.pop_outbound() {
            let _ = out.push(f);
        }
        out
    }

    fn connected() -> CbusSession {
        let mut s = CbusSession::new(CbusConfig::default());
        s.connect(0);
        s.receive(&status(StatusFlags::TRACK_ON), 1);
        drain(&mut s);
        while s.pop_event().is_some() {}
        s
    }

    // =========================================================================
    // Handshake Tests
    // =========================================================================

    #[test]
    fn connect_sends_rstat_and_qnn() {
        let mut s = CbusSession::new(CbusConfig::default());
        s.connect(0);
        let frames = drain(&mut s);
        assert_eq!(frames[0].as_slice(), b":SAFA0N0C;");
        assert_eq!(frames[1].as_slice(), b":SBFA0N0D;");
        assert_eq!(s.state(), LinkState::Connecting);
    }

    #[test]
    fn stat_completes_handshake() {
        let s = connected();
        assert_eq!(s.state(), LinkState::Idle);
        assert_eq!(*s.status(), LinkStatus::Connected);
        assert_eq!(s.system_state().flags.track_power, PowerState::On);
        assert_eq!(s.station_info().serial_number, Some(0xFFFE));
    }

    #[test]
    fn missing_stat_fails_link() {
        let mut s = CbusSession::new(CbusConfig::default());
        s.connect(0);
        s.poll(3000);
        assert_eq!(s.state(), LinkState::Failed);
        assert!(matches!(s.status(), LinkStatus::Error(LinkFault::Timeout(_))));
    }

    // =========================================================================
    // Broadcast Tests
    // =========================================================================

    #[test]
    fn track_broadcasts_update_power() {
        let mut s = connected();
        s.receive(&bus(Message::TrackOff), 10);
        assert_eq!(s.system_state().flags.track_power, PowerState::Off);
        s.receive(&bus(Message::EmergencyStopped), 11);
        assert!(s.system_state().flags.emergency_stop);
        s.receive(&bus(Message::TrackOn), 12);
        assert_eq!(s.system_state().flags.track_power, PowerState::On);
        assert!(!s.system_state().flags.emergency_stop);
    }

    #[test]
    fn engine_report_updates_tracked_loco() {
        let mut s = connected();
        let addr = LocoAddress::short(3).unwrap();
        s.track_loco(addr, SpeedSteps::S126, 5).unwrap();
        s.receive(
            &bus(Message::EngineReport(EngineReport {
                session: 4,
                address: addr,
                speed: Speed::Step(20),
                direction: Direction::Reverse,
                f0_f4: 0x10,
                f5_f8: 0,
                f9_f12: 0,
            })),
            10,
        );
        let state = s.loco(addr).unwrap();
        assert_eq!(state.speed, Speed::Step(20));
        assert!(state.functions.get(0));

        s.receive(
            &bus(Message::SetSpeedDirection {
                session: 4,
                speed: Speed::Step(30),
                direction: Direction::Forward,
            }),
            11,
        );
        assert_eq!(s.loco(addr).unwrap().speed, Speed::Step(30));

        s.receive(&bus(Message::ReleaseEngine { session: 4 }), 12);
        s.receive(
            &bus(Message::SetSpeedDirection {
                session: 4,
                speed: Speed::Step(40),
                direction: Direction::Forward,
            }),
            13,
        );
        assert_eq!(s.loco(addr).unwrap().speed, Speed::Step(30));
    }

    fn report(session: u8, address: LocoAddress) -> Frame {
        bus(Message::EngineReport(EngineReport {
            session,
            address,
            speed: Speed::Stop,
            direction: Direction::Forward,
            f0_f4: 0,
            f5_f8: 0,
            f9_f12: 0,
        }))
    }

    #[test]
    fn untracked_cabs_do_not_crowd_out_tracked_loco() {
        let mut s = connected();
        let addr = LocoAddress::short(3).unwrap();
        s.track_loco(addr, SpeedSteps::S126, 5).unwrap();

        for i in 0..=MAX_ENGINE_SESSIONS as u16 {
            let other = LocoAddress::long(1001 + i).unwrap();
            s.receive(&report(1 + i as u8, other), 10 + i as u64);
        }
        assert!(s.engine_sessions.is_empty());

        s.receive(&report(40, addr), 100);
        s.receive(
            &bus(Message::SetSpeedDirection {
                session: 40,
                speed: Speed::Step(50),
                direction: Direction::Forward,
            }),
            101,
        );
        assert_eq!(s.loco(addr).unwrap().speed, Speed::Step(50));
    }

    #[test]
    fn full_session_table_evicts_instead_of_refusing() {
        let mut s = connected();
        for i in 0..MAX_ENGINE_SESSIONS as u16 {
            let addr = LocoAddress::long(2000 + i).unwrap();
            s.track_loco(addr, SpeedSteps::S126, i as u64).unwrap();
            s.receive(&report(i as u8, addr), 100 + i as u64);
        }
        assert_eq!(s.engine_sessions.len(), MAX_ENGINE_SESSIONS);

        let late = LocoAddress::short(7).unwrap();
        s.track_loco(late, SpeedSteps::S126, 200).unwrap();
        s.receive(&report(99, late), 201);
        s.receive(
            &bus(Message::SetSpeedDirection {
                session: 99,
                speed: Speed::Step(12),
                direction: Direction::Reverse,
            }),
            202,
        );
        assert_eq!(s.loco(late).unwrap().speed, Speed::Step(12));
        assert_eq!(s.engine_sessions.len(), MAX_ENGINE_SESSIONS);
    }

    #[test]
    fn new_session_replaces_old_one_for_same_loco() {
        let mut s = connected();
        let addr = LocoAddress::short(3).unwrap();
        s.track_loco(addr, SpeedSteps::S126, 5).unwrap();
        s.receive(&report(4, addr), 10);
        s.receive(&report(9, addr), 11);
        assert_eq!(s.engine_sessions.len(), 1);
        assert_eq!(s.engine_sessions.get(&9), Some(&addr));
    }

    #[test]
    fn accessory_events_update_inputs() {
        let mut s = connected();
        let input = InputAddress::Cbus { node: 10, event: 7 };
        s.track_input(input).unwrap();
        s.receive(&bus(Message::AccessoryOn { node: 10, event: 7 }), 10);
        assert_eq!(
            s.pop_event(),
            Some(SessionEvent::InputChanged {
                address: input,
                value: true
            })
        );
        s.receive(&bus(Message::AccessoryOn { node: 11, event: 7 }), 11);
        assert!(s.pop_event().is_none());
    }

    // =========================================================================
    // Command Tests
    // =========================================================================

    #[test]
    fn power_and_estop_requests() {
        let mut s = connected();
        s.apply(StationCommand::SetTrackPower(true), 10).unwrap();
        s.apply(StationCommand::SetTrackPower(false), 11).unwrap();
        s.apply(StationCommand::EmergencyStop, 12).unwrap();
        let frames = drain(&mut s);
        assert_eq!(frames[0].as_slice(), b":S9FA0N09;");
        assert_eq!(frames[1].as_slice(), b":S9FA0N08;");
        assert_eq!(frames[2].as_slice(), b":S8FA0N0A;");
    }

    #[test]
    fn drive_goes_out_as_rdcc() {
        let mut s = connected();
        let addr = LocoAddress::short(3).unwrap();
        s.apply(StationCommand::drive(addr, Speed::Step(10), Direction::Forward), 10)
            .unwrap();
        let frames = drain(&mut s);
        assert_eq!(frames[0].as_slice(), b":SAFA0NA002033F8BB7;");
        assert_eq!(s.loco(addr).unwrap().speed, Speed::Step(10));
    }

    #[test]
    fn function_keeps_group_state() {
        let mut s = connected();
        let addr = LocoAddress::short(3).unwrap();
        let f = |function, on| StationCommand::SetLocoFunction {
            address: addr,
            function,
            on,
        };
        s.apply(f(1, true), 10).unwrap();
        s.apply(f(2, true), 11).unwrap();
        let frames = drain(&mut s);
        // Second packet carries F1 and F2: 0x80 | 0b0011
        assert_eq!(frames[1].as_slice(), b":SAFA0N8002038380;");
    }

    #[test]
    fn turnouts_are_unsupported() {
        let mut s = connected();
        let r = s.apply(
            StationCommand::SetTurnout {
                address: 1,
                position: crate::session::TurnoutPosition::Port0,
                activate: true,
            },
            1,
        );
        assert!(matches!(r, Err(CommandError::Unsupported(_))));
    }
}
