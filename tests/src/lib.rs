//! Integration test framework for epcsim
//!
//! Test utilities and topology fixtures shared by the scenario and property
//! tests under `tests/`.
//!
//! # Test Categories
//!
//! 1. **Scenarios** - Fresh attach with lost grants, X2 handover, random
//!    access exhaustion, stale detach
//! 2. **Handover** - Message order, preparation failure policies, stalls
//! 3. **Properties** - Location invariant and random-access bounds
//! 4. **Transport** - Envelopes over real UDP sockets

pub mod test_fixtures;
pub mod test_utils;

pub use test_fixtures::{
    anchor_address, connected_network, network, network_with, station_address, ue_address,
    ANCHOR, E1, E2, E3, U1, U2,
};
pub use test_utils::{init_test_logging, init_test_logging_at, seeded_rng, TestResult};
