//! Integration tests for the Z21 session.
//!
//! The session runs in a polling loop over `MockTransport` with a `MockClock`,
//! the way a single-threaded embedded host would drive it. A small simulated
//! Z21 answers the requests it sees on the wire.

use rs_commandstation::codec::{Decoded, WireMessage};
use rs_commandstation::config::Z21Config;
use rs_commandstation::error::{CommandError, TransportError};
use rs_commandstation::hal::{MockClock, MockTransport};
use rs_commandstation::session::{
    CommandStationSession, LinkFault, LinkState, LinkStatus, PowerState, SessionEvent,
    StationCommand,
};
use rs_commandstation::traits::{Clock, LinkTransport, MAX_RECV_LEN};
use rs_commandstation::z21::{
    BroadcastFlags, CentralState, FirmwareVersion, HardwareType, LocoInfo, Message,
    SystemStateData, XMessage, Z21Session,
};
use rs_commandstation::{Direction, LocoAddress, Speed, SpeedSteps};

const GET_SERIAL: [u8; 4] = [0x04, 0x00, 0x10, 0x00];
const GET_HWINFO: [u8; 4] = [0x04, 0x00, 0x1A, 0x00];
const LOGOFF: [u8; 4] = [0x04, 0x00, 0x30, 0x00];
const SYSTEMSTATE_GETDATA: [u8; 4] = [0x04, 0x00, 0x85, 0x00];

// ============================================================================
// Test Harness
// ============================================================================

/// Simulated Z21 on the far side of the transport.
struct Station {
    answer: bool,
    flags: BroadcastFlags,
    central_state: u8,
}

struct Harness {
    session: Z21Session,
    link: MockTransport,
    peer: MockTransport,
    clock: MockClock,
    station: Station,
    events: Vec<SessionEvent>,
}

impl Harness {
    fn new(config: Z21Config) -> Self {
        let link = MockTransport::new();
        let peer = link.clone();
        Self {
            session: Z21Session::new(config),
            link,
            peer,
            clock: MockClock::new(),
            station: Station {
                answer: true,
                flags: BroadcastFlags(0),
                central_state: 0,
            },
            events: Vec::new(),
        }
    }

    fn connected() -> Self {
        let mut h = Self::new(Z21Config::default());
        h.session.connect(h.clock.now_ms());
        h.pump();
        assert_eq!(*h.session.status(), LinkStatus::Connected);
        h.events.clear();
        h.peer.take_sent();
        h
    }

    /// One loop iteration: receive, poll timers, flush, let the station reply.
    fn step(&mut self) {
        let now = self.clock.now_ms();
        let mut buf = [0u8; MAX_RECV_LEN];
        loop {
            match self.link.try_recv(&mut buf) {
                Ok(Some(n)) => self.session.receive(&buf[..n], now),
                Ok(None) => break,
                Err(e) => {
                    self.session.link_lost(e);
                    break;
                }
            }
        }
        self.session.poll(now);
        while let Some(frame) = self.session.pop_outbound() {
            if let Err(e) = self.link.send(&frame) {
                self.session.link_lost(e);
                break;
            }
            self.respond(&frame);
        }
        while let Some(event) = self.session.pop_event() {
            self.events.push(event);
        }
    }

    /// Step until nothing more is exchanged.
    fn pump(&mut self) {
        for _ in 0..8 {
            self.step();
        }
    }

    fn advance(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.pump();
    }

    fn respond(&mut self, frame: &[u8]) {
        if !self.station.answer {
            return;
        }
        let Ok(Decoded::Complete { message, .. }) = Message::decode(frame) else {
            panic!("session sent an undecodable frame: {frame:02x?}");
        };
        let reply = match message {
            Message::GetSerialNumber => Message::SerialNumber(0x0001_E240),
            Message::GetHardwareInfo => Message::HardwareInfo {
                hardware_type: HardwareType::Z21New,
                firmware: FirmwareVersion::new(1, 43),
            },
            Message::SetBroadcastFlags(flags) => {
                self.station.flags = flags;
                return;
            }
            Message::GetBroadcastFlags => Message::BroadcastFlags(self.station.flags),
            Message::SystemStateGetData => Message::SystemStateDataChanged(SystemStateData {
                main_current: 120,
                supply_voltage: 18_000,
                central_state: CentralState(self.station.central_state),
                ..SystemStateData::default()
            }),
            Message::X(XMessage::SetTrackPowerOn) => {
                self.station.central_state = 0;
                Message::X(XMessage::BcTrackPowerOn)
            }
            Message::X(XMessage::SetTrackPowerOff) => {
                self.station.central_state = CentralState::TRACK_VOLTAGE_OFF;
                Message::X(XMessage::BcTrackPowerOff)
            }
            Message::X(XMessage::SetStop) => {
                self.station.central_state = CentralState::EMERGENCY_STOP;
                Message::X(XMessage::BcStopped)
            }
            Message::X(XMessage::GetLocoInfo(address)) => Message::X(XMessage::LocoInfo(LocoInfo::new(address))),
            _ => return,
        };
        self.peer.push_rx(&reply.encode());
    }

    fn sent_count(&self, frame: &[u8]) -> usize {
        self.peer
            .sent()
            .iter()
            .filter(|s| s.as_slice() == frame)
            .count()
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_handshake_over_transport() {
    let mut h = Harness::new(Z21Config::default());
    h.session.connect(0);
    h.step();

    let sent = h.peer.sent();
    assert_eq!(sent[0], GET_SERIAL);
    assert_eq!(sent[1], GET_HWINFO);

    h.pump();
    assert_eq!(*h.session.status(), LinkStatus::Connected);
    assert!(h.session.state().is_usable());
    assert_eq!(h.session.station_info().serial_number, Some(123_456));
    assert_eq!(h.session.station_info().firmware, Some((1, 43)));
    assert!(h
        .events
        .contains(&SessionEvent::LinkStatusChanged(LinkStatus::Connected)));

    // Subscribed, confirmed and polled once
    assert!(h.session.broadcast_flags().is_some());
    assert_eq!(h.sent_count(&SYSTEMSTATE_GETDATA), 1);
    assert_eq!(h.session.system_state().flags.track_power, PowerState::On);
    assert_eq!(
        h.session.system_state().measurements.map(|m| m.main_current_ma),
        Some(120)
    );
}

#[test]
fn test_silent_station_fails_handshake() {
    let mut h = Harness::new(Z21Config::default().with_handshake_timeout_ms(1000));
    h.station.answer = false;
    h.session.connect(0);
    h.pump();
    assert_eq!(h.session.state(), LinkState::Connecting);

    h.advance(1000);
    assert_eq!(h.session.state(), LinkState::Failed);
    assert!(matches!(
        h.session.status(),
        LinkStatus::Error(LinkFault::Timeout(_))
    ));
    assert!(matches!(
        h.session.apply(StationCommand::SetTrackPower(true), h.clock.now_ms()),
        Err(CommandError::LinkNotReady(_))
    ));
}

// ============================================================================
// Keepalive
// ============================================================================

#[test]
fn test_keepalive_runs_on_schedule() {
    let mut h = Harness::connected();

    // Three keepalive periods, each answered
    for _ in 0..3 {
        h.advance(15_000);
    }
    assert_eq!(h.sent_count(&SYSTEMSTATE_GETDATA), 3);
    assert_eq!(*h.session.status(), LinkStatus::Connected);
    assert_eq!(h.session.stats().timeouts, 0);
}

#[test]
fn test_unanswered_keepalive_degrades_then_recovers() {
    let mut h = Harness::connected();
    h.station.answer = false;

    h.advance(15_000);
    h.advance(2_000);
    assert!(matches!(
        h.session.status(),
        LinkStatus::Error(LinkFault::Timeout(_))
    ));
    // Degraded links still take commands
    assert!(h.session.state().is_usable());
    h.session
        .apply(StationCommand::SetTrackPower(false), h.clock.now_ms())
        .unwrap();

    h.station.answer = true;
    h.peer.push_rx(&Message::X(XMessage::BcTrackPowerOff).encode());
    h.pump();
    assert_eq!(*h.session.status(), LinkStatus::Connected);
    assert_eq!(h.session.system_state().flags.track_power, PowerState::Off);
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_power_commands_round_trip_through_station() {
    let mut h = Harness::connected();

    h.session.apply(StationCommand::EmergencyStop, 0).unwrap();
    h.pump();
    assert!(h.peer.has_sent(&[0x06, 0x00, 0x40, 0x00, 0x80, 0x80]));
    assert!(h.session.system_state().flags.emergency_stop);

    h.session.apply(StationCommand::SetTrackPower(true), 0).unwrap();
    h.pump();
    assert!(h.peer.has_sent(&[0x06, 0x00, 0x40, 0x00, 0x21, 0x81, 0xA0]));
    let flags = h.session.system_state().flags;
    assert_eq!(flags.track_power, PowerState::On);
    assert!(!flags.emergency_stop);

    let changes = h
        .events
        .iter()
        .filter(|e| matches!(e, SessionEvent::SystemStateChanged(_)))
        .count();
    assert_eq!(changes, 2);
}

#[test]
fn test_tracked_loco_follows_station_reports() {
    let mut h = Harness::connected();
    let addr = LocoAddress::long(1234).unwrap();

    h.session.track_loco(addr, SpeedSteps::S126, 0).unwrap();
    h.pump();
    assert_eq!(h.session.loco(addr).unwrap().speed, Speed::Stop);

    h.session
        .apply(StationCommand::drive(addr, Speed::Step(60), Direction::Reverse), 0)
        .unwrap();
    h.pump();
    assert_eq!(h.session.loco(addr).unwrap().speed, Speed::Step(60));

    // Another throttle takes over
    let info = LocoInfo {
        busy: true,
        speed: Speed::Step(10),
        direction: Direction::Forward,
        ..LocoInfo::new(addr)
    };
    h.peer.push_rx(&Message::X(XMessage::LocoInfo(info)).encode());
    h.pump();

    let state = h.session.loco(addr).unwrap();
    assert!(state.busy);
    assert_eq!(state.speed, Speed::Step(10));
    assert_eq!(state.direction, Direction::Forward);
    assert!(h.events.iter().any(|e| matches!(
        e,
        SessionEvent::LocoStateChanged { address, state } if *address == addr && state.busy
    )));
}

#[test]
fn test_one_datagram_many_frames() {
    let mut h = Harness::connected();
    let mut datagram = Vec::new();
    datagram.extend_from_slice(&Message::X(XMessage::BcTrackPowerOff).encode());
    datagram.extend_from_slice(&Message::X(XMessage::BcStopped).encode());
    datagram.extend_from_slice(&Message::X(XMessage::BcTrackPowerOn).encode());
    let before = h.session.stats().frames_rx;

    h.peer.push_rx(&datagram);
    h.step();

    assert_eq!(h.session.stats().frames_rx, before + 3);
    let flags = h.session.system_state().flags;
    assert_eq!(flags.track_power, PowerState::On);
    assert!(!flags.emergency_stop);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_disconnect_logs_off_last() {
    let mut h = Harness::connected();
    h.session.disconnect(h.clock.now_ms());
    h.step();

    assert_eq!(h.peer.sent().last().map(Vec::as_slice), Some(&LOGOFF[..]));
    assert_eq!(h.session.state(), LinkState::Disconnected);
    assert_eq!(h.session.next_deadline(), None);
}

#[test]
fn test_transport_loss_ends_session() {
    let mut h = Harness::connected();
    h.peer.close_remote();
    h.step();

    assert!(h.session.status().is_link_lost());
    assert_eq!(
        h.session.status(),
        &LinkStatus::Error(LinkFault::LinkLost(TransportError::Closed))
    );
    assert_eq!(
        h.session.system_state().flags.track_power,
        PowerState::Unknown
    );

    // Late bytes are ignored
    let before = h.session.stats().frames_rx;
    h.session
        .receive(&Message::X(XMessage::BcTrackPowerOn).encode(), 0);
    assert_eq!(h.session.stats().frames_rx, before);
}
