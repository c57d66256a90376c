//! Topology fixtures
//!
//! One anchor, three base stations on the default signaling subnet
//! (192.168.0.0/24) and two terminals with addresses outside it.

use std::net::Ipv4Addr;

use epcsim_common::{SimulationConfig, StationId};
use epcsim_sim::Simulation;

use crate::test_utils::{init_test_logging_at, TestResult};

/// Mobility anchor
pub const ANCHOR: StationId = StationId::new(1, 0);
/// First base station
pub const E1: StationId = StationId::new(2, 0);
/// Second base station
pub const E2: StationId = StationId::new(3, 0);
/// Third base station
pub const E3: StationId = StationId::new(4, 0);
/// First terminal
pub const U1: StationId = StationId::new(10, 0);
/// Second terminal
pub const U2: StationId = StationId::new(11, 0);

/// Signaling address of the anchor
pub fn anchor_address() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 0, 1)
}

/// Signaling address of a base station
pub fn station_address(station: StationId) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 0, station.node_id as u8)
}

/// Data address of a terminal
pub fn ue_address(ue: StationId) -> Ipv4Addr {
    Ipv4Addr::new(10, 45, 0, ue.node_id as u8)
}

/// Builds and initializes the standard topology with `config`.
pub fn network_with(config: SimulationConfig) -> TestResult<Simulation> {
    init_test_logging_at(config.log_level);
    let mut sim = Simulation::new(config)?;
    sim.add_anchor(anchor_address())?;
    for station in [E1, E2, E3] {
        sim.add_enb(station, station_address(station))?;
    }
    for ue in [U1, U2] {
        sim.add_ue(ue, ue_address(ue))?;
    }
    sim.init()?;
    Ok(sim)
}

/// Standard topology with default configuration.
pub fn network() -> TestResult<Simulation> {
    network_with(SimulationConfig::default())
}

/// Standard topology with `U1` already connected to `E1`.
pub fn connected_network(config: SimulationConfig) -> TestResult<Simulation> {
    let mut sim = network_with(config)?;
    sim.attach(U1, E1)?;
    sim.run_until_idle()?;
    anyhow::ensure!(
        sim.ue(U1).and_then(|ue| ue.serving()) == Some(E1),
        "U1 did not connect to E1"
    );
    Ok(sim)
}
