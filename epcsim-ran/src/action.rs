//! Outputs of the RAN state machines
//!
//! Handlers never touch the clock, the radio or the EPC transport
//! themselves; they return [`RanAction`]s that the owning node carries out
//! in order.

use std::fmt;
use std::time::Duration;

use epcsim_common::{HandoverParticipator, StationId};
use epcsim_epc::EpcMessage;

use crate::radio::RadioMessage;
use crate::timer::{TimerKey, TimerKind, TimerToken};

/// Upward notifications to whatever drives the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RanSignal {
    /// Random access against `station` finished (terminal)
    EstablishmentResult {
        /// Station the procedure ran against
        station: StationId,
        /// Whether a grant was obtained
        success: bool,
    },
    /// The terminal lost its cell and must reselect (terminal)
    CellSelectionRestart {
        /// Station of the failed attempt
        station: StationId,
    },
    /// RRC connection established (terminal or station)
    Connected {
        /// The peer
        peer: StationId,
    },
    /// Handover finished at the target
    HandoverCompleted {
        /// Handover parties
        participator: HandoverParticipator,
    },
    /// Handover abandoned
    HandoverFailed {
        /// Handover parties
        participator: HandoverParticipator,
    },
    /// The target never heard back from the anchor in time
    HandoverStalled {
        /// Handover parties
        participator: HandoverParticipator,
        /// Timer that expired
        timer: TimerKind,
    },
}

impl fmt::Display for RanSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RanSignal::EstablishmentResult { station, success } => {
                write!(f, "establishment at {station}: {}", if *success { "success" } else { "failure" })
            }
            RanSignal::CellSelectionRestart { station } => {
                write!(f, "cell selection restart after {station}")
            }
            RanSignal::Connected { peer } => write!(f, "connected to {peer}"),
            RanSignal::HandoverCompleted { participator } => {
                write!(f, "handover completed ({participator})")
            }
            RanSignal::HandoverFailed { participator } => {
                write!(f, "handover failed ({participator})")
            }
            RanSignal::HandoverStalled {
                participator,
                timer,
            } => write!(f, "handover stalled on {timer} ({participator})"),
        }
    }
}

/// One side effect requested by a RAN handler.
#[derive(Debug, Clone, PartialEq)]
pub enum RanAction {
    /// Deliver a radio notification
    Radio {
        /// Receiving terminal or station
        to: StationId,
        /// The notification
        message: RadioMessage,
    },
    /// Send an EPC message; the destination follows from its kind
    Epc(EpcMessage),
    /// Schedule the expiry of an armed timer
    ArmTimer {
        /// Timer armed
        key: TimerKey,
        /// Arming handle carried by the expiry
        token: TimerToken,
        /// Delay until expiry
        delay: Duration,
    },
    /// Install the data route for a peer. A station routes the terminal's
    /// address to it; a terminal routes everything via the station.
    AddRoute {
        /// The peer
        towards: StationId,
    },
    /// Remove the data route installed by [`RanAction::AddRoute`]
    DeleteRoute {
        /// The peer
        towards: StationId,
    },
    /// Report upwards
    Notify(RanSignal),
}
