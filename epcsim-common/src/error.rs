//! Error types for epcsim

use thiserror::Error;

use crate::types::StationId;

/// Error types for the epcsim library.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected protocol content.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A message reached a station that does not hold the expected role,
    /// or a lookup that the location invariant guarantees came up empty.
    ///
    /// Indicates a logic or topology bug; the run is aborted.
    #[error("Protocol violation at {station}: {reason}")]
    ProtocolViolation {
        /// Station that detected the violation
        station: StationId,
        /// What was violated
        reason: String,
    },

    /// The target station has no address on the signaling subnet.
    #[error("Address resolution error: {target} unreachable from {home}")]
    AddressResolution {
        /// Station performing the lookup
        home: StationId,
        /// Station that could not be resolved
        target: StationId,
    },

    /// Envelope encoding/decoding errors.
    #[error("Codec error: {0}")]
    Codec(String),

    /// State machine errors.
    #[error("State machine error: {0}")]
    StateMachine(String),

    /// Network I/O errors.
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// YAML parsing errors.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl Error {
    /// Builds a [`Error::ProtocolViolation`].
    pub fn violation(station: StationId, reason: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            station,
            reason: reason.into(),
        }
    }

    /// Returns true for errors that must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation { .. } | Error::AddressResolution { .. }
        )
    }
}

/// Result alias using the crate-wide [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
