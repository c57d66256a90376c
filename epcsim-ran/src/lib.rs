//! Radio access side of epcsim
//!
//! Random access (terminal MAC), RRC establishment and the handover state
//! machines of source and target stations. Every handler is synchronous and
//! returns the [`RanAction`]s the owning node must carry out; timers are
//! remembered in a [`TimerTable`] and scheduled by the caller.
//!
//! # Modules
//!
//! - `action` - Side effects requested by the state machines
//! - `mac` - Terminal random-access procedure
//! - `radio` - Radio notifications between terminals and stations
//! - `rrc` - Connection records, station RRC and terminal RRC
//! - `stats` - RRC and MAC counters
//! - `timer` - Per-node timer table

pub mod action;
pub mod mac;
pub mod radio;
pub mod rrc;
pub mod stats;
pub mod timer;

pub use action::{RanAction, RanSignal};
pub use mac::{MacState, PreambleTransmission, RandomAccess, TimeoutStep};
pub use radio::{RadioKind, RadioMessage};
pub use rrc::{
    BufferedSdu, ConnectionInfo, ConnectionInfoManager, ConnectionState, EnbRrc, UeRrc,
    UeRrcState,
};
pub use stats::{MacStats, RrcStats};
pub use timer::{TimerKey, TimerKind, TimerTable, TimerToken};
