//! RRC for terminals and stations
//!
//! # Station connection states
//!
//! ```text
//!   preamble            ConnectionSetupComplete
//!   ────────▶ Waiting ─────────────────────────▶ Connected
//!                                                 │     ▲
//!                            HandoverRequestAck   │     │ ReconfigurationComplete
//!                            (source)             ▼     │ (target)
//!                                               Handover
//!                                                 │
//!                            UeContextRelease     ▼
//!                            (source)          released
//! ```
//!
//! The target station enters `Handover` on an admitted HandoverRequest and
//! leaves it when the terminal completes the handover random access.

pub mod connection;
pub mod station;
pub mod terminal;

pub use connection::{BufferedSdu, ConnectionInfo, ConnectionInfoManager, ConnectionState};
pub use station::EnbRrc;
pub use terminal::{UeRrc, UeRrcState};
