//! Common types and utilities for epcsim
//!
//! Station identities, the crate-wide error type, logging setup,
//! configuration, signaling-subnet addressing and the discrete-event
//! scheduler shared by the EPC, RAN and simulation crates.

pub mod addressing;
pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod types;

pub use addressing::{AddressBook, SignalingSubnet, HOST_MASK};
pub use config::{
    EpcConfig, HandoverConfig, PreparationFailurePolicy, RadioConfig, RandomAccessConfig,
    RrcTimerConfig, SimulationConfig, PREAMBLE_INDEX_MAX,
};
pub use error::{Error, Result};
pub use logging::{env_filter, init_logging, log_epc_message, Direction, LogLevel};
pub use scheduler::{Scheduler, SimTime};
pub use types::{HandoverParticipator, StationId, StationType};
