//! Scheduled events and the message trace of a run

use std::fmt;

use epcsim_common::{SimTime, StationId};
use epcsim_epc::{MessageKind, OutgoingDatagram};
use epcsim_ran::{RadioKind, RadioMessage, RanSignal, TimerKey, TimerToken};

/// Something the scheduler delivers to one node.
#[derive(Debug, Clone)]
pub enum Event {
    /// Radio notification arriving at `to`
    Radio {
        /// Sender
        from: StationId,
        /// Receiver
        to: StationId,
        /// The notification
        message: RadioMessage,
    },
    /// Encoded EPC envelope arriving at `datagram.dst`
    Epc(OutgoingDatagram),
    /// Expiry of a timer armed by `node`
    Timer {
        /// Owner of the timer
        node: StationId,
        /// Timer armed
        key: TimerKey,
        /// Arming handle
        token: TimerToken,
    },
}

impl Event {
    /// Node the event is delivered to.
    pub fn target(&self) -> StationId {
        match self {
            Event::Radio { to, .. } => *to,
            Event::Epc(datagram) => datagram.dst,
            Event::Timer { node, .. } => *node,
        }
    }
}

/// What happened, as recorded in the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// EPC envelope handed to the transport
    EpcSent {
        /// Sender
        src: StationId,
        /// Receiver
        dst: StationId,
        /// Message kind
        kind: MessageKind,
    },
    /// EPC envelope discarded by a drop rule
    EpcDropped {
        /// Sender
        src: StationId,
        /// Receiver
        dst: StationId,
        /// Message kind
        kind: MessageKind,
    },
    /// Radio notification put on the air
    RadioSent {
        /// Sender
        from: StationId,
        /// Receiver
        to: StationId,
        /// Notification kind
        kind: RadioKind,
    },
    /// Radio notification lost by a drop rule
    RadioDropped {
        /// Sender
        from: StationId,
        /// Receiver
        to: StationId,
        /// Notification kind
        kind: RadioKind,
    },
    /// Upward signal raised by a node
    Signal {
        /// Node raising it
        node: StationId,
        /// The signal
        signal: RanSignal,
    },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::EpcSent { src, dst, kind } => write!(f, "EPC {kind} {src} -> {dst}"),
            TraceEvent::EpcDropped { src, dst, kind } => {
                write!(f, "EPC {kind} {src} -> {dst} (dropped)")
            }
            TraceEvent::RadioSent { from, to, kind } => write!(f, "radio {kind} {from} -> {to}"),
            TraceEvent::RadioDropped { from, to, kind } => {
                write!(f, "radio {kind} {from} -> {to} (dropped)")
            }
            TraceEvent::Signal { node, signal } => write!(f, "{node}: {signal}"),
        }
    }
}

/// One timestamped trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Simulated time of the record
    pub at: SimTime,
    /// What happened
    pub event: TraceEvent,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at, self.event)
    }
}
