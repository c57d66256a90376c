//! Single-threaded simulation of terminals, stations and the mobility anchor
//!
//! Nodes never share state. Radio notifications, EPC envelopes and timer
//! expiries are events on one simulated clock, and each is handled to
//! completion by the node it is addressed to.
//!
//! # Example
//!
//! ```
//! use std::net::Ipv4Addr;
//!
//! use epcsim_common::{SimulationConfig, StationId};
//! use epcsim_sim::Simulation;
//!
//! let enb = StationId::new(2, 0);
//! let ue = StationId::new(10, 0);
//!
//! let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
//! sim.add_anchor(Ipv4Addr::new(192, 168, 0, 1)).unwrap();
//! sim.add_enb(enb, Ipv4Addr::new(192, 168, 0, 2)).unwrap();
//! sim.add_ue(ue, Ipv4Addr::new(10, 45, 0, 10)).unwrap();
//! sim.init().unwrap();
//!
//! sim.attach(ue, enb).unwrap();
//! sim.run_until_idle().unwrap();
//! assert_eq!(sim.location().unwrap().serving_station(ue), Some(enb));
//! ```

pub mod event;
pub mod network;
pub mod node;

pub use event::{Event, TraceEntry, TraceEvent};
pub use network::Simulation;
pub use node::{Node, NodeOutput, Role};
