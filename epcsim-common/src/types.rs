//! Station identities and handover participators.
//!
//! A [`StationId`] names both terminals (UEs) and base stations (eNBs); the
//! representation is symmetric even though the roles differ. It is ordered
//! lexicographically on `(node_id, interface_index)` so it can key ordered
//! maps and sets.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a terminal or base station: a node plus one of its interfaces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationId {
    /// Node identifier
    pub node_id: u32,
    /// Interface index on that node
    pub interface_index: u32,
}

impl StationId {
    /// The invalid sentinel.
    pub const INVALID: StationId = StationId {
        node_id: u32::MAX,
        interface_index: u32::MAX,
    };

    /// Creates a new station identifier.
    pub const fn new(node_id: u32, interface_index: u32) -> Self {
        Self {
            node_id,
            interface_index,
        }
    }

    /// Returns true unless this is the [`StationId::INVALID`] sentinel.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Default for StationId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "StationId({}:{})", self.node_id, self.interface_index)
        } else {
            write!(f, "StationId(INVALID)")
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}", self.node_id, self.interface_index)
        } else {
            write!(f, "invalid")
        }
    }
}

/// The three parties of one handover.
///
/// Passed unchanged through every handover-related message. A participator
/// is invalid if any of its fields is [`StationId::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HandoverParticipator {
    /// The terminal being handed over
    pub ue: StationId,
    /// Station currently serving the terminal
    pub source: StationId,
    /// Station the terminal moves to
    pub target: StationId,
}

impl HandoverParticipator {
    /// Creates a new participator.
    pub const fn new(ue: StationId, source: StationId, target: StationId) -> Self {
        Self { ue, source, target }
    }

    /// Returns true if all three parties are valid identifiers.
    pub fn is_valid(&self) -> bool {
        self.ue.is_valid() && self.source.is_valid() && self.target.is_valid()
    }
}

impl fmt::Display for HandoverParticipator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ue={} src={} tgt={}", self.ue, self.source, self.target)
    }
}

/// Role a node plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationType {
    /// User terminal
    Ue,
    /// Base station
    Enb,
    /// Mobility anchor (MME/SGW)
    Anchor,
}

impl fmt::Display for StationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationType::Ue => write!(f, "UE"),
            StationType::Enb => write!(f, "eNB"),
            StationType::Anchor => write!(f, "EPC"),
        }
    }
}
