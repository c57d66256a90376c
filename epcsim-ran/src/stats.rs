//! RRC and MAC counters.

use std::fmt;

/// RRC-level counters of a terminal or station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RrcStats {
    /// Connections that reached the connected state
    pub connections_established: u64,
    /// Handovers started (source) or admitted (target)
    pub handovers_started: u64,
    /// Handovers completed
    pub handovers_completed: u64,
    /// Handovers abandoned or stalled
    pub handovers_failed: u64,
    /// Cell selection restarts (terminal)
    pub cell_selection_restarts: u64,
}

impl fmt::Display for RrcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connections={} ho_started={} ho_completed={} ho_failed={} reselections={}",
            self.connections_established,
            self.handovers_started,
            self.handovers_completed,
            self.handovers_failed,
            self.cell_selection_restarts
        )
    }
}

/// Random-access counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacStats {
    /// Preambles transmitted (terminal)
    pub preambles_sent: u64,
    /// Grants received (terminal)
    pub grants_received: u64,
    /// Backoffs entered (terminal)
    pub backoffs: u64,
    /// Random accesses that ran out of attempts (terminal)
    pub ra_failures: u64,
    /// Preambles received (station)
    pub preambles_received: u64,
    /// Grants sent (station)
    pub grants_sent: u64,
}

impl fmt::Display for MacStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "preambles tx={} rx={} grants tx={} rx={} backoffs={} ra_failures={}",
            self.preambles_sent,
            self.preambles_received,
            self.grants_sent,
            self.grants_received,
            self.backoffs,
            self.ra_failures
        )
    }
}
