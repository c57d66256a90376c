//! Per-node EPC message counters.

use std::fmt;

use crate::protocol::{MessageKind, KIND_COUNT};

/// Sent/received counts for each EPC message kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpcStats {
    sent: [u64; KIND_COUNT],
    received: [u64; KIND_COUNT],
}

impl EpcStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one sent message.
    pub fn record_sent(&mut self, kind: MessageKind) {
        self.sent[kind.index()] += 1;
    }

    /// Counts one received message.
    pub fn record_received(&mut self, kind: MessageKind) {
        self.received[kind.index()] += 1;
    }

    /// Messages of `kind` sent so far.
    pub fn sent(&self, kind: MessageKind) -> u64 {
        self.sent[kind.index()]
    }

    /// Messages of `kind` received so far.
    pub fn received(&self, kind: MessageKind) -> u64 {
        self.received[kind.index()]
    }

    /// Total messages sent.
    pub fn total_sent(&self) -> u64 {
        self.sent.iter().sum()
    }

    /// Total messages received.
    pub fn total_received(&self) -> u64 {
        self.received.iter().sum()
    }
}

impl fmt::Display for EpcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in MessageKind::ALL {
            let (tx, rx) = (self.sent(kind), self.received(kind));
            if tx == 0 && rx == 0 {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{kind} tx={tx} rx={rx}")?;
            first = false;
        }
        if first {
            write!(f, "no EPC traffic")?;
        }
        Ok(())
    }
}
