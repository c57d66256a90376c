//! End-to-end attach and handover scenarios
//!
//! Each test builds the standard topology (one anchor, three stations, two
//! terminals), drives it through the public `Simulation` API and checks the
//! resulting message trace, state machines and location map.

use std::collections::BTreeSet;

use epcsim_common::{
    AddressBook, EpcConfig, Error, HandoverParticipator, RandomAccessConfig, Result, SimulationConfig,
    StationId,
};
use epcsim_epc::{
    EpcApp, EpcHandler, EpcMessage, EpcMessageContainer, ForwardingTable, MessageKind, RouteOp,
    UeLocation,
};
use epcsim_ran::{ConnectionState, MacState, RadioKind, RanSignal, UeRrcState};
use epcsim_sim::TraceEvent;
use integration_tests::{
    anchor_address, connected_network, init_test_logging, network_with, station_address,
    ue_address, TestResult, ANCHOR, E1, E2, U1,
};

fn with_max_retransmissions(max: u32) -> SimulationConfig {
    SimulationConfig {
        random_access: RandomAccessConfig {
            max_retransmissions: max,
            ..RandomAccessConfig::default()
        },
        ..SimulationConfig::default()
    }
}

/// Fresh attach where the first two grants are lost.
#[test]
fn test_attach_after_two_lost_grants() -> TestResult {
    init_test_logging();
    let mut sim = network_with(with_max_retransmissions(3))?;
    sim.drop_next_radio(U1, RadioKind::RaGrant, 2);

    sim.attach(U1, E1)?;
    sim.run_until_idle()?;

    let ue = sim.ue(U1).ok_or_else(|| anyhow::anyhow!("no terminal U1"))?;
    assert_eq!(ue.state(), UeRrcState::Connected);
    assert_eq!(ue.serving(), Some(E1));
    assert_eq!(ue.mac().state(), MacState::Connected);
    // Third preamble got through; the counter is back at 1 after the grant
    assert_eq!(ue.mac_stats().preambles_sent, 3);
    assert_eq!(ue.mac_stats().backoffs, 2);
    assert_eq!(ue.mac_stats().grants_received, 1);
    assert_eq!(ue.mac().preamble_transmission_counter(), 1);
    assert_eq!(sim.radio_sent(RadioKind::Preamble), 3);
    assert_eq!(sim.radio_sent(RadioKind::RaGrant), 1);

    assert_eq!(sim.epc_sequence(), vec![(MessageKind::AttachUe, E1, ANCHOR)]);

    let location = sim.location().ok_or_else(|| anyhow::anyhow!("no anchor"))?;
    assert_eq!(location.ues_at(E1), Some(&BTreeSet::from([U1])));
    assert!(location.is_consistent());

    assert_eq!(
        sim.signals(U1),
        vec![
            RanSignal::EstablishmentResult {
                station: E1,
                success: true
            },
            RanSignal::Connected { peer: E1 },
        ]
    );
    assert_eq!(sim.signals(E1), vec![RanSignal::Connected { peer: U1 }]);

    let enb = sim.enb(E1).ok_or_else(|| anyhow::anyhow!("no station E1"))?;
    assert_eq!(enb.connections().state_of(U1), Some(ConnectionState::Connected));
    assert_eq!(enb.mac_stats().preambles_received, 3);
    assert_eq!(enb.mac_stats().grants_sent, 3);
    Ok(())
}

/// Data routes after a fresh attach, on every party.
#[test]
fn test_attach_installs_routes() -> TestResult {
    init_test_logging();
    let sim = connected_network(SimulationConfig::default())?;

    let route = |node: StationId, addr| {
        sim.node(node)
            .and_then(|n| n.routes().lookup(addr))
            .map(|r| r.next_hop)
    };
    assert_eq!(route(ANCHOR, ue_address(U1)), Some(station_address(E1)));
    assert_eq!(route(E1, ue_address(U1)), Some(ue_address(U1)));
    assert_eq!(route(U1, anchor_address()), Some(station_address(E1)));
    Ok(())
}

/// X2 handover of a connected terminal from E1 to E2.
#[test]
fn test_handover_message_order() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    assert_eq!(
        sim.epc_sequence(),
        vec![
            (MessageKind::AttachUe, E1, ANCHOR),
            (MessageKind::HandoverRequest, E1, E2),
            (MessageKind::HandoverRequestAck, E2, E1),
            (MessageKind::SnStatusTransfer, E1, E2),
            (MessageKind::PathSwitchRequest, E2, ANCHOR),
            (MessageKind::EndMarker, ANCHOR, E1),
            (MessageKind::PathSwitchRequestAck, ANCHOR, E2),
            (MessageKind::EndMarker, E1, E2),
            (MessageKind::UeContextRelease, E2, E1),
        ]
    );

    // The terminal's random access against the target sits between the SN
    // status transfer and the path switch request
    let position = |wanted: &TraceEvent| sim.trace().iter().position(|e| &e.event == wanted);
    let sn_status = position(&TraceEvent::EpcSent {
        src: E1,
        dst: E2,
        kind: MessageKind::SnStatusTransfer,
    });
    let preamble = position(&TraceEvent::RadioSent {
        from: U1,
        to: E2,
        kind: RadioKind::Preamble,
    });
    let path_switch = position(&TraceEvent::EpcSent {
        src: E2,
        dst: ANCHOR,
        kind: MessageKind::PathSwitchRequest,
    });
    assert!(sn_status.is_some() && preamble.is_some() && path_switch.is_some());
    assert!(sn_status < preamble && preamble < path_switch);

    let location = sim.location().ok_or_else(|| anyhow::anyhow!("no anchor"))?;
    assert_eq!(location.ues_at(E2), Some(&BTreeSet::from([U1])));
    assert!(!location.contains(E1, U1));
    assert!(location.is_consistent());

    let participator = HandoverParticipator::new(U1, E1, E2);
    assert!(sim
        .signals(E2)
        .contains(&RanSignal::HandoverCompleted { participator }));

    let ue = sim.ue(U1).ok_or_else(|| anyhow::anyhow!("no terminal U1"))?;
    assert_eq!(ue.state(), UeRrcState::Connected);
    assert_eq!(ue.serving(), Some(E2));
    assert_eq!(ue.stats().handovers_completed, 1);

    let source = sim.enb(E1).ok_or_else(|| anyhow::anyhow!("no station E1"))?;
    assert!(!source.connections().contains(U1));
    assert!(source.timers().is_empty());
    let target = sim.enb(E2).ok_or_else(|| anyhow::anyhow!("no station E2"))?;
    assert_eq!(target.connections().state_of(U1), Some(ConnectionState::Connected));
    assert_eq!(target.stats().handovers_completed, 1);
    assert!(target.timers().is_empty());

    let anchor_route = sim
        .node(ANCHOR)
        .and_then(|n| n.routes().lookup(ue_address(U1)))
        .map(|r| r.next_hop);
    assert_eq!(anchor_route, Some(station_address(E2)));
    Ok(())
}

/// Random access that may not retransmit gives up after the first preamble.
#[test]
fn test_random_access_exhausted_without_retransmission() -> TestResult {
    init_test_logging();
    for max in [0, 1] {
        let mut sim = network_with(with_max_retransmissions(max))?;
        sim.drop_next_radio(U1, RadioKind::RaGrant, 1);

        sim.attach(U1, E1)?;
        sim.run_until_idle()?;

        assert_eq!(sim.radio_sent(RadioKind::Preamble), 1, "max {max}");
        assert_eq!(
            sim.signals(U1),
            vec![RanSignal::EstablishmentResult {
                station: E1,
                success: false
            }],
            "max {max}"
        );

        let ue = sim.ue(U1).ok_or_else(|| anyhow::anyhow!("no terminal U1"))?;
        assert_eq!(ue.state(), UeRrcState::Idle);
        assert_eq!(ue.mac().state(), MacState::Idle);
        assert_eq!(ue.mac_stats().ra_failures, 1);
        assert_eq!(ue.mac_stats().backoffs, 0);
        assert_eq!(ue.connections().count(), 0);

        assert!(sim.epc_sequence().is_empty());
        assert_eq!(sim.location().map(|l| l.ue_count()), Some(0));
    }
    Ok(())
}

/// The station's confirmation is lost; the terminal reselects the same
/// station and the stale context there is replaced.
#[test]
fn test_reattach_after_lost_confirmation() -> TestResult {
    init_test_logging();
    let mut sim = network_with(SimulationConfig::default())?;
    sim.drop_next_radio(U1, RadioKind::ConnectionEstablished, 1);

    sim.attach(U1, E1)?;
    sim.run_until_idle()?;
    assert_eq!(sim.ue(U1).map(|ue| ue.state()), Some(UeRrcState::Idle));
    assert!(sim
        .signals(U1)
        .contains(&RanSignal::CellSelectionRestart { station: E1 }));
    assert_eq!(
        sim.enb(E1).and_then(|enb| enb.connections().state_of(U1)),
        Some(ConnectionState::Connected)
    );

    sim.attach(U1, E1)?;
    sim.run_until_idle()?;

    assert_eq!(
        sim.epc_sequence(),
        vec![
            (MessageKind::AttachUe, E1, ANCHOR),
            (MessageKind::DetachUe, E1, ANCHOR),
            (MessageKind::AttachUe, E1, ANCHOR),
        ]
    );
    let ue = sim.ue(U1).ok_or_else(|| anyhow::anyhow!("no terminal U1"))?;
    assert_eq!(ue.state(), UeRrcState::Connected);
    assert_eq!(ue.serving(), Some(E1));
    let enb = sim.enb(E1).ok_or_else(|| anyhow::anyhow!("no station E1"))?;
    assert_eq!(enb.connections().state_of(U1), Some(ConnectionState::Connected));
    assert_eq!(enb.stats().connections_established, 2);
    let location = sim.location().ok_or_else(|| anyhow::anyhow!("no anchor"))?;
    assert_eq!(location.ues_at(E1), Some(&BTreeSet::from([U1])));
    let anchor_route = sim
        .node(ANCHOR)
        .and_then(|n| n.routes().lookup(ue_address(U1)))
        .map(|r| r.next_hop);
    assert_eq!(anchor_route, Some(station_address(E1)));
    Ok(())
}

/// A terminal that gave up can attach again.
#[test]
fn test_attach_again_after_failure() -> TestResult {
    init_test_logging();
    let mut sim = network_with(with_max_retransmissions(0))?;
    sim.drop_next_radio(U1, RadioKind::RaGrant, 1);
    sim.attach(U1, E1)?;
    sim.run_until_idle()?;
    assert_eq!(sim.ue(U1).map(|ue| ue.state()), Some(UeRrcState::Idle));

    sim.attach(U1, E1)?;
    sim.run_until_idle()?;
    assert_eq!(sim.ue(U1).map(|ue| ue.state()), Some(UeRrcState::Connected));
    assert_eq!(sim.location().and_then(|l| l.serving_station(U1)), Some(E1));
    Ok(())
}

struct NoSignals;

impl EpcHandler for NoSignals {
    fn on_handover_signal(&mut self, src: StationId, message: EpcMessage) -> Result<()> {
        Err(Error::violation(src, format!("anchor handed {}", message.kind())))
    }
}

/// Detach for a terminal the anchor does not hold under that station.
#[test]
fn test_stale_detach_changes_nothing() -> TestResult {
    init_test_logging();
    let config = EpcConfig {
        anchor: ANCHOR,
        ..EpcConfig::default()
    };
    let mut book = AddressBook::new(config.subnet);
    book.register(ANCHOR.node_id, anchor_address());
    book.register(E1.node_id, station_address(E1));
    book.register(E2.node_id, station_address(E2));
    book.register(U1.node_id, ue_address(U1));

    let mut anchor = EpcApp::new(ANCHOR, &config, book);
    let mut table = ForwardingTable::new();
    anchor.init(&mut table)?;

    let mut deliver = |src: StationId, message: EpcMessage| -> Result<()> {
        let container = EpcMessageContainer::new(src, ANCHOR, &message)?;
        anchor.dispatch(container, &mut table, &mut NoSignals)?;
        Ok(())
    };

    // Never attached anywhere
    deliver(E1, EpcMessage::DetachUe(UeLocation { ue: U1, station: E1 }))?;
    // Attached at E2, detach claimed by E1
    deliver(E2, EpcMessage::AttachUe(UeLocation { ue: U1, station: E2 }))?;
    deliver(E1, EpcMessage::DetachUe(UeLocation { ue: U1, station: E1 }))?;

    let location = anchor.location().ok_or_else(|| anyhow::anyhow!("no location"))?;
    assert_eq!(location.serving_station(U1), Some(E2));
    assert!(!table
        .journal()
        .iter()
        .any(|op| matches!(op, RouteOp::Delete { .. })));
    assert_eq!(table.journal().len(), 1);
    Ok(())
}

/// Radio-link loss of a connected terminal.
#[test]
fn test_detach_after_attach() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;

    sim.detach(U1)?;
    sim.run_until_idle()?;

    assert_eq!(
        sim.epc_sequence().last(),
        Some(&(MessageKind::DetachUe, E1, ANCHOR))
    );
    assert_eq!(sim.location().map(|l| l.ue_count()), Some(0));
    assert!(sim
        .node(ANCHOR)
        .is_some_and(|n| n.routes().lookup(ue_address(U1)).is_none()));
    // Only the default route towards the anchor is left at the station
    let station_route = sim
        .node(E1)
        .and_then(|n| n.routes().lookup(ue_address(U1)))
        .map(|r| r.next_hop);
    assert_eq!(station_route, Some(anchor_address()));
    assert!(sim.node(U1).is_some_and(|n| n.routes().is_empty()));

    let enb = sim.enb(E1).ok_or_else(|| anyhow::anyhow!("no station E1"))?;
    assert!(!enb.connections().contains(U1));
    let ue = sim.ue(U1).ok_or_else(|| anyhow::anyhow!("no terminal U1"))?;
    assert_eq!(ue.state(), UeRrcState::Idle);
    assert_eq!(ue.serving(), None);

    // Nothing left to detach
    assert!(sim.detach(U1).is_err());
    Ok(())
}
