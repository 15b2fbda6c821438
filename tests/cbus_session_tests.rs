//! Integration tests for the CBUS session.
//!
//! The session is driven over `MockTransport` the way the serial runner
//! drives it: received bytes arrive in arbitrary chunks and a simulated
//! command station answers requests on the other side of the adapter.

use rs_commandstation::cbus::gridconnect::{self, GridConnectDecoder};
use rs_commandstation::cbus::{CbusSession, CommandStationStatus, EngineReport, Message, StatusFlags};
use rs_commandstation::codec::{Decoded, Frame, WireMessage};
use rs_commandstation::config::CbusConfig;
use rs_commandstation::error::{CommandError, TransportError};
use rs_commandstation::hal::{MockClock, MockTransport};
use rs_commandstation::session::{
    CommandStationSession, InputAddress, LinkFault, LinkState, LinkStatus, PowerState,
    SessionEvent, StationCommand,
};
use rs_commandstation::traits::{Clock, LinkTransport, MAX_RECV_LEN};
use rs_commandstation::{Direction, LocoAddress, Speed, SpeedSteps};

/// CAN id of the simulated command station.
const STATION: u8 = 0x01;

fn bus(message: Message) -> Frame {
    gridconnect::encode(STATION, &message.encode())
}

// ============================================================================
// Test Harness
// ============================================================================

struct Harness {
    session: CbusSession,
    link: MockTransport,
    peer: MockTransport,
    clock: MockClock,
    /// Records seen on the wire by the command station.
    wire: GridConnectDecoder,
    answer: bool,
    flags: u8,
    dcc: Vec<Vec<u8>>,
    events: Vec<SessionEvent>,
}

impl Harness {
    fn new(config: CbusConfig) -> Self {
        let link = MockTransport::new();
        let peer = link.clone();
        Self {
            session: CbusSession::new(config),
            link,
            peer,
            clock: MockClock::new(),
            wire: GridConnectDecoder::new(),
            answer: true,
            flags: StatusFlags::BUS_ON,
            dcc: Vec::new(),
            events: Vec::new(),
        }
    }

    fn connected() -> Self {
        let mut h = Self::new(CbusConfig::default());
        h.session.connect(h.clock.now_ms());
        h.pump();
        assert_eq!(*h.session.status(), LinkStatus::Connected);
        h.events.clear();
        h.peer.take_sent();
        h
    }

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

    fn pump(&mut self) {
        for _ in 0..6 {
            self.step();
        }
    }

    fn respond(&mut self, record: &[u8]) {
        self.wire.push(record);
        let Some(can) = self.wire.next_frame() else {
            panic!("session sent a malformed record: {:?}", String::from_utf8_lossy(record));
        };
        let Ok(Decoded::Complete { message, .. }) = Message::decode(&can.data) else {
            panic!("session sent an undecodable message: {:02x?}", can.data);
        };
        let reply = match message {
            Message::RequestStatus => Message::Status(CommandStationStatus {
                node: 0xFFFE,
                station: 0,
                flags: StatusFlags(self.flags),
                major: 4,
                minor: b'a',
                build: 3,
            }),
            Message::RequestTrackOn => {
                self.flags = (self.flags | StatusFlags::TRACK_ON) & !StatusFlags::EMERGENCY_STOP;
                Message::TrackOn
            }
            Message::RequestTrackOff => {
                self.flags &= !StatusFlags::TRACK_ON;
                Message::TrackOff
            }
            Message::RequestEmergencyStop => {
                self.flags |= StatusFlags::EMERGENCY_STOP;
                Message::EmergencyStopped
            }
            Message::RequestDcc3(p) => {
                self.dcc.push(p.packet.to_vec());
                return;
            }
            Message::RequestDcc4(p) => {
                self.dcc.push(p.packet.to_vec());
                return;
            }
            Message::RequestDcc5(p) => {
                self.dcc.push(p.packet.to_vec());
                return;
            }
            Message::RequestDcc6(p) => {
                self.dcc.push(p.packet.to_vec());
                return;
            }
            _ => return,
        };
        if self.answer {
            self.peer.push_rx(&bus(reply));
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_handshake_over_adapter() {
    let mut h = Harness::new(CbusConfig::default());
    h.flags |= StatusFlags::TRACK_ON;
    h.session.connect(0);
    h.step();

    let sent = h.peer.sent();
    assert_eq!(sent[0], b":SAFA0N0C;");
    assert_eq!(sent[1], b":SBFA0N0D;");

    h.pump();
    assert_eq!(h.session.state(), LinkState::Idle);
    assert_eq!(*h.session.status(), LinkStatus::Connected);
    assert_eq!(h.session.station_info().serial_number, Some(0xFFFE));
    assert_eq!(h.session.station_info().firmware, Some((4, b'a')));
    assert_eq!(h.session.system_state().flags.track_power, PowerState::On);
    assert!(h
        .events
        .contains(&SessionEvent::LinkStatusChanged(LinkStatus::Connected)));
}

#[test]
fn test_stat_split_across_reads() {
    let mut h = Harness::new(CbusConfig::default());
    h.answer = false;
    h.session.connect(0);
    h.step();

    h.peer.push_rx(b":SB020NE30001");
    h.step();
    assert_eq!(h.session.state(), LinkState::Connecting);

    h.peer.push_rx(b"0004040103;");
    h.step();
    assert_eq!(h.session.state(), LinkState::Idle);
    assert_eq!(h.session.station_info().serial_number, Some(1));
    assert_eq!(h.session.station_info().firmware, Some((4, 1)));
    assert_eq!(h.session.system_state().flags.track_power, PowerState::On);
}

#[test]
fn test_missing_stat_fails_link() {
    let mut h = Harness::new(CbusConfig::default().with_handshake_timeout_ms(500));
    h.answer = false;
    h.session.connect(0);
    h.pump();
    assert_eq!(h.session.state(), LinkState::Connecting);

    h.clock.advance(499);
    h.pump();
    assert_eq!(h.session.state(), LinkState::Connecting);

    h.clock.advance(1);
    h.pump();
    assert_eq!(h.session.state(), LinkState::Failed);
    assert!(matches!(
        h.session.status(),
        LinkStatus::Error(LinkFault::Timeout(_))
    ));
    assert_eq!(h.session.stats().timeouts, 1);
    assert!(matches!(
        h.session.apply(StationCommand::EmergencyStop, h.clock.now_ms()),
        Err(CommandError::LinkNotReady(_))
    ));
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_power_requests_round_trip() {
    let mut h = Harness::connected();

    h.session.apply(StationCommand::SetTrackPower(true), 0).unwrap();
    h.pump();
    assert!(h.peer.has_sent(b":S9FA0N09;"));
    assert_eq!(h.session.system_state().flags.track_power, PowerState::On);

    h.session.apply(StationCommand::EmergencyStop, 0).unwrap();
    h.pump();
    assert!(h.peer.has_sent(b":S8FA0N0A;"));
    assert!(h.session.system_state().flags.emergency_stop);

    h.session.apply(StationCommand::SetTrackPower(false), 0).unwrap();
    h.pump();
    assert!(h.peer.has_sent(b":S9FA0N08;"));
    assert_eq!(h.session.system_state().flags.track_power, PowerState::Off);

    let changes = h
        .events
        .iter()
        .filter(|e| matches!(e, SessionEvent::SystemStateChanged(_)))
        .count();
    assert_eq!(changes, 3);
}

#[test]
fn test_drive_and_functions_as_dcc_packets() {
    let mut h = Harness::connected();
    let addr = LocoAddress::short(3).unwrap();

    h.session
        .apply(StationCommand::drive(addr, Speed::Step(10), Direction::Forward), 0)
        .unwrap();
    h.session
        .apply(
            StationCommand::SetLocoFunction {
                address: addr,
                function: 0,
                on: true,
            },
            0,
        )
        .unwrap();
    h.pump();

    assert!(h.peer.has_sent(b":SAFA0NA002033F8BB7;"));
    assert_eq!(h.dcc[0], vec![0x03, 0x3F, 0x8B, 0xB7]);
    // F0 sits in bit 4 of the first function group
    assert_eq!(h.dcc[1], vec![0x03, 0x90, 0x93]);

    let state = h.session.loco(addr).unwrap();
    assert_eq!(state.speed, Speed::Step(10));
    assert!(state.functions.get(0));
}

#[test]
fn test_long_address_uses_larger_packet() {
    let mut h = Harness::connected();
    let addr = LocoAddress::long(1234).unwrap();

    h.session
        .apply(StationCommand::drive(addr, Speed::Step(1), Direction::Reverse), 0)
        .unwrap();
    h.pump();

    assert_eq!(h.dcc.len(), 1);
    assert_eq!(h.dcc[0].len(), 5);
    assert_eq!(h.dcc[0][0], 0xC0 | (1234 >> 8) as u8);
    assert_eq!(h.dcc[0][1], (1234 & 0xFF) as u8);
}

#[test]
fn test_turnout_command_rejected() {
    let mut h = Harness::connected();
    let result = h.session.apply(
        StationCommand::SetTurnout {
            address: 5,
            position: rs_commandstation::session::TurnoutPosition::Port1,
            activate: true,
        },
        0,
    );
    assert!(matches!(result, Err(CommandError::Unsupported(_))));
    h.pump();
    assert!(h.peer.sent().is_empty());
}

// ============================================================================
// Bus Traffic
// ============================================================================

#[test]
fn test_other_cab_engine_reports_update_tracked_loco() {
    let mut h = Harness::connected();
    let addr = LocoAddress::short(7).unwrap();
    h.session.track_loco(addr, SpeedSteps::S126, 0).unwrap();

    h.peer.push_rx(&bus(Message::EngineReport(EngineReport {
        session: 9,
        address: addr,
        speed: Speed::Step(40),
        direction: Direction::Reverse,
        f0_f4: 0x11,
        f5_f8: 0x01,
        f9_f12: 0,
    })));
    h.pump();

    let state = h.session.loco(addr).unwrap();
    assert_eq!(state.speed, Speed::Step(40));
    assert_eq!(state.direction, Direction::Reverse);
    assert!(state.functions.get(0));
    assert!(state.functions.get(1));
    assert!(state.functions.get(5));
    assert!(h.events.iter().any(|e| matches!(
        e,
        SessionEvent::LocoStateChanged { address, .. } if *address == addr
    )));

    // Follow-up speed changes reference the engine session
    h.peer.push_rx(&bus(Message::SetSpeedDirection {
        session: 9,
        speed: Speed::Stop,
        direction: Direction::Forward,
    }));
    h.pump();
    assert_eq!(h.session.loco(addr).unwrap().speed, Speed::Stop);
}

#[test]
fn test_input_events_only_for_tracked_inputs() {
    let mut h = Harness::connected();
    let input = InputAddress::Cbus { node: 300, event: 12 };
    h.session.track_input(input).unwrap();
    assert!(matches!(
        h.session.track_input(InputAddress::RmBus(1)),
        Err(CommandError::Unsupported(_))
    ));

    h.peer.push_rx(&bus(Message::AccessoryOn { node: 300, event: 12 }));
    h.peer.push_rx(&bus(Message::AccessoryOn { node: 300, event: 13 }));
    h.peer.push_rx(&bus(Message::AccessoryOff { node: 300, event: 12 }));
    h.pump();

    let inputs: Vec<_> = h
        .events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::InputChanged { address, value } => Some((*address, *value)),
            _ => None,
        })
        .collect();
    assert_eq!(inputs, vec![(input, true), (input, false)]);
}

#[test]
fn test_garbage_before_record_is_dropped() {
    let mut h = Harness::connected();
    let mut bytes = b"\x00\xFFnoise".to_vec();
    bytes.extend_from_slice(&bus(Message::TrackOff));

    h.peer.push_rx(&bytes);
    h.step();

    assert_eq!(h.session.stats().dropped_bytes, 7);
    assert_eq!(h.session.system_state().flags.track_power, PowerState::Off);
    assert_eq!(h.session.state(), LinkState::Idle);
}

#[test]
fn test_records_across_many_small_reads() {
    let mut h = Harness::connected();
    let mut stream = Vec::new();
    stream.extend_from_slice(&bus(Message::TrackOff));
    stream.extend_from_slice(&bus(Message::TrackOn));
    stream.extend_from_slice(&bus(Message::EmergencyStopped));
    let before = h.session.stats().frames_rx;

    for chunk in stream.chunks(3) {
        h.peer.push_rx(chunk);
    }
    h.step();

    assert_eq!(h.session.stats().frames_rx, before + 3);
    let flags = h.session.system_state().flags;
    assert_eq!(flags.track_power, PowerState::On);
    assert!(flags.emergency_stop);
    assert_eq!(h.session.stats().dropped_bytes, 0);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_adapter_unplugged() {
    let mut h = Harness::connected();
    h.peer.close_remote();
    h.step();

    assert_eq!(h.session.state(), LinkState::Failed);
    assert_eq!(
        h.session.status(),
        &LinkStatus::Error(LinkFault::LinkLost(TransportError::Closed))
    );
    assert!(matches!(
        h.session.apply(StationCommand::SetTrackPower(true), 0),
        Err(CommandError::LinkNotReady(_))
    ));
}

#[test]
fn test_reconnect_after_loss() {
    let mut h = Harness::connected();
    h.session.link_lost(TransportError::Closed);
    assert_eq!(h.session.state(), LinkState::Failed);

    h.session.connect(h.clock.now_ms());
    h.pump();
    assert_eq!(*h.session.status(), LinkStatus::Connected);
    assert!(h.session.state().is_usable());
}
