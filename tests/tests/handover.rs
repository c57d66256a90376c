//! Handover failure paths, timers and data forwarding

use bytes::Bytes;
use epcsim_common::{
    Error, HandoverConfig, HandoverParticipator, PreparationFailurePolicy, SimulationConfig,
    StationId,
};
use epcsim_epc::{MessageKind, MAX_FORWARDED_SDU_LENGTH};
use epcsim_ran::{ConnectionState, RadioKind, RanSignal, TimerKind, UeRrcState};
use integration_tests::{
    connected_network, init_test_logging, ue_address, TestResult, ANCHOR, E1, E2, E3, U1, U2,
};

fn handover_config(handover: HandoverConfig) -> SimulationConfig {
    SimulationConfig {
        handover,
        ..SimulationConfig::default()
    }
}

fn rejecting(policy: PreparationFailurePolicy) -> SimulationConfig {
    handover_config(HandoverConfig {
        admit_handover: false,
        preparation_failure_policy: policy,
        ..HandoverConfig::default()
    })
}

const P: HandoverParticipator = HandoverParticipator::new(U1, E1, E2);

#[test]
fn test_rejected_handover_reverts_to_connected() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(rejecting(PreparationFailurePolicy::RevertToConnected))?;

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    assert_eq!(
        sim.epc_sequence(),
        vec![
            (MessageKind::AttachUe, E1, ANCHOR),
            (MessageKind::HandoverRequest, E1, E2),
            (MessageKind::HoPreparationFailure, E2, E1),
        ]
    );
    assert_eq!(
        sim.signals(E1).last(),
        Some(&RanSignal::HandoverFailed { participator: P })
    );

    let source = sim.enb(E1).ok_or_else(|| anyhow::anyhow!("no station E1"))?;
    let info = source
        .connections()
        .try_find(U1)
        .ok_or_else(|| anyhow::anyhow!("U1 context lost at E1"))?;
    assert_eq!(info.state, ConnectionState::Connected);
    assert_eq!(info.participator, None);
    assert!(info.schedulable);
    assert_eq!(source.stats().handovers_failed, 1);
    assert!(source.timers().is_empty());

    assert!(!sim.enb(E2).is_some_and(|enb| enb.connections().contains(U1)));
    assert_eq!(sim.location().and_then(|l| l.serving_station(U1)), Some(E1));
    assert_eq!(sim.ue(U1).and_then(|ue| ue.serving()), Some(E1));

    // The terminal can be handed over again once preparation is closed
    sim.trigger_handover(U1, E3)?;
    sim.run_until_idle()?;
    assert_eq!(
        sim.epc_sequence().last(),
        Some(&(MessageKind::HoPreparationFailure, E3, E1))
    );
    Ok(())
}

#[test]
fn test_rejected_handover_releases_context() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(rejecting(PreparationFailurePolicy::ReleaseContext))?;

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    assert_eq!(
        sim.epc_sequence()[1..],
        [
            (MessageKind::HandoverRequest, E1, E2),
            (MessageKind::HoPreparationFailure, E2, E1),
            (MessageKind::DetachUe, E1, ANCHOR),
        ]
    );
    assert!(sim
        .signals(E1)
        .contains(&RanSignal::HandoverFailed { participator: P }));
    assert!(!sim.enb(E1).is_some_and(|enb| enb.connections().contains(U1)));
    assert_eq!(sim.location().map(|l| l.ue_count()), Some(0));
    assert!(sim
        .node(ANCHOR)
        .is_some_and(|n| n.routes().lookup(ue_address(U1)).is_none()));
    Ok(())
}

/// The source hears nothing back from the target within TRelocPrep.
#[test]
fn test_lost_request_ack_times_out_both_sides() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;
    sim.drop_next_epc(MessageKind::HandoverRequestAck, 1);

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    assert!(sim
        .signals(E1)
        .contains(&RanSignal::HandoverFailed { participator: P }));
    assert_eq!(
        sim.enb(E1).and_then(|enb| enb.connections().state_of(U1)),
        Some(ConnectionState::Connected)
    );

    // The admitted target gives up waiting for the terminal and detaches
    // it; the anchor still has it under E1 and ignores the detach
    assert!(sim
        .signals(E2)
        .contains(&RanSignal::HandoverFailed { participator: P }));
    assert!(!sim.enb(E2).is_some_and(|enb| enb.connections().contains(U1)));
    assert_eq!(
        sim.epc_sequence().last(),
        Some(&(MessageKind::DetachUe, E2, ANCHOR))
    );
    assert_eq!(sim.location().and_then(|l| l.serving_station(U1)), Some(E1));
    assert_eq!(sim.ue(U1).map(|ue| ue.state()), Some(UeRrcState::Connected));
    Ok(())
}

/// The handover command never reaches the terminal.
#[test]
fn test_terminal_never_arrives_at_target() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;
    sim.drop_next_radio(U1, RadioKind::Reconfiguration, 1);

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    assert!(sim
        .signals(E2)
        .contains(&RanSignal::HandoverFailed { participator: P }));
    assert_eq!(sim.enb(E2).map(|enb| enb.stats().handovers_failed), Some(1));
    // TRelocOverall drops the source context as well
    assert!(!sim.enb(E1).is_some_and(|enb| enb.connections().contains(U1)));
    assert_eq!(sim.location().and_then(|l| l.serving_station(U1)), Some(E1));
    assert!(sim.location().is_some_and(|l| l.is_consistent()));
    Ok(())
}

#[test]
fn test_missing_end_marker_stalls_target() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;
    sim.drop_next_epc(MessageKind::EndMarker, 1);

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    assert_eq!(
        sim.signals(E2).last(),
        Some(&RanSignal::HandoverStalled {
            participator: P,
            timer: TimerKind::WaitEndMarker,
        })
    );
    let target = sim.enb(E2).ok_or_else(|| anyhow::anyhow!("no station E2"))?;
    assert_eq!(target.stats().handovers_completed, 0);
    assert_eq!(target.stats().handovers_failed, 1);
    // The data path moved regardless; the terminal stays with the target
    assert_eq!(target.connections().state_of(U1), Some(ConnectionState::Connected));
    assert_eq!(sim.location().and_then(|l| l.serving_station(U1)), Some(E2));
    assert!(!sim.enb(E1).is_some_and(|enb| enb.connections().contains(U1)));
    assert_eq!(sim.ue(U1).and_then(|ue| ue.serving()), Some(E2));
    Ok(())
}

#[test]
fn test_missing_path_switch_ack_stalls_target() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;
    sim.drop_next_epc(MessageKind::PathSwitchRequestAck, 1);

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    assert!(sim.signals(E2).contains(&RanSignal::HandoverStalled {
        participator: P,
        timer: TimerKind::WaitPathSwitchReqAck,
    }));
    // No UeContextRelease was sent, so the source times out on TRelocOverall
    assert!(!sim
        .epc_sequence()
        .iter()
        .any(|(kind, _, _)| *kind == MessageKind::UeContextRelease));
    assert!(!sim.enb(E1).is_some_and(|enb| enb.connections().contains(U1)));
    Ok(())
}

#[test]
fn test_buffered_data_is_forwarded() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;
    sim.buffer_downlink(U1, 5, Bytes::from_static(b"first"))?;
    sim.buffer_downlink(U1, 5, Bytes::from_static(b"second"))?;
    sim.buffer_downlink(U1, 6, Bytes::from_static(b"other bearer"))?;

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    let kinds: Vec<MessageKind> = sim.epc_sequence().into_iter().map(|(k, _, _)| k).collect();
    let sn_status = kinds
        .iter()
        .position(|k| *k == MessageKind::SnStatusTransfer)
        .ok_or_else(|| anyhow::anyhow!("no SnStatusTransfer"))?;
    assert_eq!(
        kinds[sn_status + 1..sn_status + 4],
        [MessageKind::DataForwarding; 3]
    );

    let target = sim.enb(E2).ok_or_else(|| anyhow::anyhow!("no station E2"))?;
    let info = target
        .connections()
        .try_find(U1)
        .ok_or_else(|| anyhow::anyhow!("U1 unknown at E2"))?;
    let forwarded: Vec<(u8, &[u8])> = info
        .buffered
        .iter()
        .map(|sdu| (sdu.bearer_id, sdu.data.as_ref()))
        .collect();
    assert_eq!(
        forwarded,
        vec![
            (5, &b"first"[..]),
            (5, &b"second"[..]),
            (6, &b"other bearer"[..]),
        ]
    );
    assert_eq!(info.sn_status.get(&5).map(|i| i.next_pdcp_tx_sn), Some(2));
    assert_eq!(info.sn_status.get(&6).map(|i| i.next_pdcp_tx_sn), Some(1));
    Ok(())
}

#[test]
fn test_oversized_sdu_is_refused_before_handover() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;
    let refused = sim.buffer_downlink(U1, 5, Bytes::from(vec![0xab; 70_000]));
    assert!(matches!(refused, Err(Error::Codec(_))));
    sim.buffer_downlink(U1, 5, Bytes::from(vec![0xcd; MAX_FORWARDED_SDU_LENGTH]))?;

    sim.trigger_handover(U1, E2)?;
    sim.run_until_idle()?;

    let forwards = sim
        .epc_sequence()
        .into_iter()
        .filter(|(k, _, _)| *k == MessageKind::DataForwarding)
        .count();
    assert_eq!(forwards, 1);

    let target = sim.enb(E2).ok_or_else(|| anyhow::anyhow!("no station E2"))?;
    let info = target
        .connections()
        .try_find(U1)
        .ok_or_else(|| anyhow::anyhow!("U1 unknown at E2"))?;
    assert_eq!(info.state, ConnectionState::Connected);
    assert_eq!(info.buffered.len(), 1);
    assert_eq!(info.buffered[0].data.len(), MAX_FORWARDED_SDU_LENGTH);
    Ok(())
}

#[test]
fn test_unreachable_target_is_fatal() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;
    let stranger = StationId::new(42, 0);

    let err = match sim.trigger_handover(U1, stranger) {
        Err(err) => err,
        Ok(()) => anyhow::bail!("handover to an unknown station started"),
    };
    assert!(matches!(
        err,
        Error::AddressResolution { home, target } if home == E1 && target == stranger
    ));
    assert!(err.is_fatal());
    assert_eq!(sim.epc_sequence().len(), 1);
    Ok(())
}

#[test]
fn test_handover_requires_connected_terminal() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;

    let err = sim
        .trigger_handover(U2, E2)
        .err()
        .ok_or_else(|| anyhow::anyhow!("idle terminal handed over"))?;
    assert!(!err.is_fatal());

    // A second handover while the first is being prepared is refused
    sim.trigger_handover(U1, E2)?;
    assert!(sim.trigger_handover(U1, E3).is_err());
    sim.run_until_idle()?;
    assert_eq!(sim.location().and_then(|l| l.serving_station(U1)), Some(E2));
    Ok(())
}

#[test]
fn test_chained_handovers() -> TestResult {
    init_test_logging();
    let mut sim = connected_network(SimulationConfig::default())?;

    for target in [E2, E3, E1] {
        sim.trigger_handover(U1, target)?;
        sim.run_until_idle()?;
        assert_eq!(sim.ue(U1).and_then(|ue| ue.serving()), Some(target));
        assert_eq!(
            sim.location().and_then(|l| l.serving_station(U1)),
            Some(target)
        );
    }

    let ue = sim.ue(U1).ok_or_else(|| anyhow::anyhow!("no terminal U1"))?;
    assert_eq!(ue.stats().handovers_completed, 3);
    for station in [E1, E2, E3] {
        let enb = sim.enb(station).ok_or_else(|| anyhow::anyhow!("no station"))?;
        assert!(enb.timers().is_empty(), "{station} has timers left");
    }
    assert_eq!(sim.enb(E1).map(|enb| enb.connections().count()), Some(1));
    assert_eq!(sim.enb(E2).map(|enb| enb.connections().count()), Some(0));
    Ok(())
}
