//! Radio-layer notifications exchanged between a terminal and a station
//!
//! These stand in for what the PHY/MAC scheduler would deliver: preambles
//! and grants of the random-access handshake, and the RRC completion
//! notifications that follow it.

use std::fmt;

use epcsim_epc::RrcReconfiguration;

/// Kind of a [`RadioMessage`], used for tracing and drop rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RadioKind {
    /// RA preamble
    Preamble,
    /// RA grant
    RaGrant,
    /// RRC connection setup complete
    ConnectionSetupComplete,
    /// RRC connected
    ConnectionEstablished,
    /// Handover command
    Reconfiguration,
    /// RRC connection reconfiguration complete
    ReconfigurationComplete,
    /// RRC connected after reconfiguration
    ReconfigurationConfirmed,
}

impl fmt::Display for RadioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioKind::Preamble => "Preamble",
            RadioKind::RaGrant => "RaGrant",
            RadioKind::ConnectionSetupComplete => "ConnectionSetupComplete",
            RadioKind::ConnectionEstablished => "ConnectionEstablished",
            RadioKind::Reconfiguration => "RrcConnectionReconfiguration",
            RadioKind::ReconfigurationComplete => "ReconfigurationComplete",
            RadioKind::ReconfigurationConfirmed => "ReconfigurationConfirmed",
        };
        f.write_str(name)
    }
}

/// One radio notification.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioMessage {
    /// Terminal → station
    Preamble {
        /// Preamble index in `[0, PREAMBLE_INDEX_MAX)`
        index: u8,
        /// Transmit power (dBm)
        power_dbm: f64,
        /// Set when the random access is part of a handover
        handover: bool,
    },
    /// Station → terminal
    RaGrant,
    /// Terminal → station, after a fresh random access
    ConnectionSetupComplete,
    /// Station → terminal, the connection is established
    ConnectionEstablished,
    /// Source station → terminal, the handover command
    Reconfiguration(RrcReconfiguration),
    /// Terminal → target station, after a handover random access
    ReconfigurationComplete,
    /// Target station → terminal, the handover is accepted
    ReconfigurationConfirmed,
}

impl RadioMessage {
    /// Returns the message kind.
    pub fn kind(&self) -> RadioKind {
        match self {
            RadioMessage::Preamble { .. } => RadioKind::Preamble,
            RadioMessage::RaGrant => RadioKind::RaGrant,
            RadioMessage::ConnectionSetupComplete => RadioKind::ConnectionSetupComplete,
            RadioMessage::ConnectionEstablished => RadioKind::ConnectionEstablished,
            RadioMessage::Reconfiguration(_) => RadioKind::Reconfiguration,
            RadioMessage::ReconfigurationComplete => RadioKind::ReconfigurationComplete,
            RadioMessage::ReconfigurationConfirmed => RadioKind::ReconfigurationConfirmed,
        }
    }
}

impl fmt::Display for RadioMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioMessage::Preamble {
                index,
                power_dbm,
                handover,
            } => write!(
                f,
                "Preamble[{index}] {power_dbm:.1}dBm{}",
                if *handover { " (HO)" } else { "" }
            ),
            other => write!(f, "{}", other.kind()),
        }
    }
}
