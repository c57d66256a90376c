//! Run logging
//!
//! Everything logs through `tracing`. A run installs one subscriber whose
//! verbosity comes from [`SimulationConfig::log_level`](crate::SimulationConfig);
//! a `RUST_LOG` directive, when set, wins over the configured level.

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Verbosity of a simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Timer arms and cancels, route changes, envelope hex dumps
    Trace,
    /// Every signaling message sent or received
    Debug,
    /// State transitions and handover milestones
    #[default]
    Info,
    /// Stalls, timeouts and dropped messages
    Warn,
    /// Only run-aborting conditions
    Error,
    /// Silent
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

/// Filter for a run at `level`, with `RUST_LOG` directives layered on top.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy()
}

/// Installs the global subscriber at `level`.
///
/// Only the first call in a process takes effect.
///
/// # Example
///
/// ```
/// use epcsim_common::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .try_init();
}

/// Which way an envelope crossed the local station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from a peer
    Rx,
    /// Sent to a peer
    Tx,
}

/// Logs one EPC envelope; the encoded bytes go out at trace level.
pub fn log_epc_message(direction: Direction, kind: &str, data: &[u8]) {
    tracing::debug!(?direction, len = data.len(), "EPC {}", kind);
    tracing::trace!(?direction, envelope = %hex::encode(data), "EPC {} bytes", kind);
}
