//! Property-based tests for the location map and random access
//!
//! Covers the at-most-one-station invariant of the anchor's location map,
//! attach idempotence, the random-access power ramp and backoff bounds, and
//! termination of random access when every grant is lost.

use epcsim_common::{
    HandoverParticipator, RandomAccessConfig, Result, SimulationConfig, StationId,
};
use epcsim_epc::{LocationInfo, UeRouteInstaller};
use epcsim_ran::{MacState, RadioKind, RandomAccess, TimeoutStep, UeRrcState};
use integration_tests::{network_with, seeded_rng, ANCHOR, E1, U1};
use proptest::prelude::*;

#[derive(Debug, Default)]
struct Routes {
    installed: Vec<(StationId, StationId)>,
    ops: usize,
}

impl UeRouteInstaller for Routes {
    fn install(&mut self, ue: StationId, station: StationId) -> Result<()> {
        self.installed.retain(|(u, _)| *u != ue);
        self.installed.push((ue, station));
        self.ops += 1;
        Ok(())
    }

    fn remove(&mut self, ue: StationId, _station: StationId) -> Result<()> {
        self.installed.retain(|(u, _)| *u != ue);
        self.ops += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum LocationOp {
    Attach(StationId, StationId),
    Detach(StationId, StationId),
    Switch(HandoverParticipator),
}

fn arb_ue() -> impl Strategy<Value = StationId> {
    (10u32..14).prop_map(|n| StationId::new(n, 0))
}

fn arb_station() -> impl Strategy<Value = StationId> {
    (2u32..5).prop_map(|n| StationId::new(n, 0))
}

fn arb_op() -> impl Strategy<Value = LocationOp> {
    prop_oneof![
        (arb_ue(), arb_station()).prop_map(|(ue, s)| LocationOp::Attach(ue, s)),
        (arb_ue(), arb_station()).prop_map(|(ue, s)| LocationOp::Detach(ue, s)),
        (arb_ue(), arb_station(), arb_station())
            .prop_map(|(ue, s, t)| LocationOp::Switch(HandoverParticipator::new(ue, s, t))),
    ]
}

fn apply(location: &mut LocationInfo, routes: &mut Routes, op: &LocationOp) {
    // Path switches for terminals not at the source are rejected; the map
    // must be unchanged in that case
    let _ = match op {
        LocationOp::Attach(ue, s) => location.attach_ue(*ue, *s, routes),
        LocationOp::Detach(ue, s) => location.detach_ue(*ue, *s, routes),
        LocationOp::Switch(p) => location.switch_path(ANCHOR, p, routes).map(|_| ()),
    };
}

fn ra_config(max_retransmissions: u32, backoff_window_ms: u64) -> RandomAccessConfig {
    RandomAccessConfig {
        max_retransmissions,
        backoff_window_ms,
        ..RandomAccessConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A terminal is under at most one station, and the route table agrees
    #[test]
    fn prop_location_invariant_holds(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut location = LocationInfo::new();
        let mut routes = Routes::default();
        for op in &ops {
            let before = location.clone();
            apply(&mut location, &mut routes, op);
            prop_assert!(location.is_consistent());
            if let LocationOp::Switch(p) = op {
                if !before.contains(p.source, p.ue) {
                    prop_assert_eq!(&location, &before);
                }
            }
        }

        let mut located: Vec<(StationId, StationId)> = location
            .iter()
            .flat_map(|(station, ues)| ues.iter().map(move |ue| (*ue, *station)))
            .collect();
        located.sort();
        let mut installed = routes.installed.clone();
        installed.sort();
        prop_assert_eq!(located, installed);
    }

    /// Attaching twice to the same station equals attaching once
    #[test]
    fn prop_attach_is_idempotent(
        setup in proptest::collection::vec(arb_op(), 0..20),
        ue in arb_ue(),
        station in arb_station(),
    ) {
        let mut location = LocationInfo::new();
        let mut routes = Routes::default();
        for op in &setup {
            apply(&mut location, &mut routes, op);
        }

        location.attach_ue(ue, station, &mut routes).unwrap();
        let once = location.clone();
        let ops = routes.ops;
        location.attach_ue(ue, station, &mut routes).unwrap();

        prop_assert_eq!(&location, &once);
        prop_assert_eq!(routes.ops, ops);
        prop_assert_eq!(location.serving_station(ue), Some(station));
    }

    /// Backoff is drawn from [0, window)
    #[test]
    fn prop_backoff_within_window(seed in any::<u64>(), window_ms in 0u64..200) {
        let ra = RandomAccess::new(ra_config(4, window_ms));
        let mut rng = seeded_rng(seed);
        for _ in 0..16 {
            let backoff = ra.sample_backoff(&mut rng);
            if window_ms == 0 {
                prop_assert_eq!(backoff, std::time::Duration::ZERO);
            } else {
                prop_assert!(backoff < ra.config().backoff_window());
            }
        }
    }

    /// Every retransmission adds exactly one ramping step
    #[test]
    fn prop_power_ramps_linearly(
        initial in -120.0f64..-60.0,
        step in 0.0f64..6.0,
        delta in -3.0f64..8.0,
        attempt in 1u32..64,
    ) {
        let ra = RandomAccess::new(RandomAccessConfig {
            initial_target_power: initial,
            ramping_step: step,
            delta_preamble: delta,
            ..RandomAccessConfig::default()
        });
        prop_assert!((ra.transmit_power(1) - (initial + delta)).abs() < 1e-9);
        let ramp = ra.transmit_power(attempt + 1) - ra.transmit_power(attempt);
        prop_assert!((ramp - step).abs() < 1e-9);
    }

    /// With every grant lost, random access sends max(1, limit) preambles
    /// and then fails back to idle
    #[test]
    fn prop_random_access_terminates(seed in any::<u64>(), max in 0u32..10) {
        let mut ra = RandomAccess::new(ra_config(max, 10));
        let mut rng = seeded_rng(seed);
        let mut preamble = ra.start(E1, false, &mut rng).unwrap();
        let mut powers = vec![preamble.power_dbm];

        let failed = loop {
            prop_assert!(powers.len() <= 10, "random access never gave up");
            match ra.on_grant_wait_timeout(&mut rng).unwrap() {
                TimeoutStep::Backoff(_) => {
                    prop_assert_eq!(ra.state(), MacState::RaBackoffWaiting);
                    preamble = ra.on_backoff_timeout(&mut rng).unwrap();
                    powers.push(preamble.power_dbm);
                }
                TimeoutStep::Failed(station) => break station,
            }
        };

        prop_assert_eq!(failed, E1);
        prop_assert_eq!(ra.state(), MacState::Idle);
        prop_assert_eq!(ra.preamble_transmission_counter(), 1);
        prop_assert_eq!(powers.len() as u32, max.max(1));
        prop_assert_eq!(ra.stats().preambles_sent, u64::from(max.max(1)));
        prop_assert!(powers.windows(2).all(|w| w[1] > w[0]));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whole-network attach with lost grants: connected exactly when fewer
    /// grants are lost than preambles are allowed
    #[test]
    fn prop_attach_outcome_follows_lost_grants(
        seed in any::<u64>(),
        max in 1u32..6,
        lost in 0u32..7,
    ) {
        let config = SimulationConfig {
            seed,
            random_access: ra_config(max, 10),
            ..SimulationConfig::default()
        };
        let mut sim = network_with(config).unwrap();
        sim.drop_next_radio(U1, RadioKind::RaGrant, lost);
        sim.attach(U1, E1).unwrap();
        sim.run_until_idle().unwrap();

        let ue = sim.ue(U1).unwrap();
        let location = sim.location().unwrap();
        prop_assert!(location.is_consistent());
        if lost < max {
            prop_assert_eq!(ue.state(), UeRrcState::Connected);
            prop_assert_eq!(location.serving_station(U1), Some(E1));
            prop_assert_eq!(sim.radio_sent(RadioKind::Preamble), lost as usize + 1);
        } else {
            prop_assert_eq!(ue.state(), UeRrcState::Idle);
            prop_assert_eq!(location.serving_station(U1), None);
            prop_assert_eq!(sim.radio_sent(RadioKind::Preamble), max as usize);
        }
    }
}
