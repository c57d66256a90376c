//! Per-node timer table
//!
//! The event loop owns the clock; this table only remembers which timers a
//! state machine considers armed. Arming hands out a fresh [`TimerToken`]
//! that travels with the scheduled expiry event. On expiry the state machine
//! asks [`TimerTable::take_expired`] whether the token is still current, so
//! an expiry for a timer that was cancelled or re-armed in the meantime is
//! dropped without any handling.

use std::collections::BTreeMap;
use std::fmt;

use epcsim_common::StationId;

/// Timer identifiers used by the terminal and station state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Terminal: RA response window after a preamble
    RaGrantWait,
    /// Terminal: backoff before the next preamble
    RaBackoff,
    /// Terminal: wait for RRC-Connected after a fresh random access
    WaitRrcConnected,
    /// Terminal: wait for RRC-Connected-Reconfiguration after a handover random access
    WaitRrcConnectedReconf,
    /// Source: wait for HandoverRequestAck
    RelocPrep,
    /// Source: wait for UeContextRelease
    RelocOverall,
    /// Target: wait for SnStatusTransfer
    WaitSnStatusTransfer,
    /// Target: wait for the terminal to arrive by handover
    WaitAttachUeByHo,
    /// Target: wait for EndMarker
    WaitEndMarker,
    /// Target: wait for PathSwitchRequestAck
    WaitPathSwitchReqAck,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::RaGrantWait => "RaGrantWait",
            TimerKind::RaBackoff => "RaBackoff",
            TimerKind::WaitRrcConnected => "WaitRrcConnected",
            TimerKind::WaitRrcConnectedReconf => "WaitRrcConnectedReconf",
            TimerKind::RelocPrep => "TRelocPrep",
            TimerKind::RelocOverall => "TRelocOverall",
            TimerKind::WaitSnStatusTransfer => "TWaitSnStatusTransfer",
            TimerKind::WaitAttachUeByHo => "TWaitAttachUeByHo",
            TimerKind::WaitEndMarker => "TX2WaitEndMarker",
            TimerKind::WaitPathSwitchReqAck => "TS1WaitPathSwitchReqAck",
        };
        f.write_str(name)
    }
}

/// A timer of one kind, owned on behalf of one peer.
///
/// At a station the peer is the terminal; at a terminal it is the station
/// the procedure runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    /// Peer station
    pub peer: StationId,
    /// Timer kind
    pub kind: TimerKind,
}

impl TimerKey {
    /// Creates a timer key.
    pub const fn new(peer: StationId, kind: TimerKind) -> Self {
        Self { peer, kind }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.peer)
    }
}

/// Handle identifying one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

impl TimerToken {
    /// Raw token value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Armed timers of one node.
#[derive(Debug, Default)]
pub struct TimerTable {
    running: BTreeMap<TimerKey, TimerToken>,
    next_token: u64,
}

impl TimerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key`, superseding any earlier arming of the same key.
    pub fn arm(&mut self, key: TimerKey) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.running.insert(key, token);
        token
    }

    /// Cancels `key`. Returns true if it was running.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.running.remove(&key).is_some()
    }

    /// Cancels every timer owned on behalf of `peer`.
    pub fn cancel_peer(&mut self, peer: StationId) -> usize {
        let before = self.running.len();
        self.running.retain(|key, _| key.peer != peer);
        before - self.running.len()
    }

    /// Returns true if `key` is armed.
    pub fn is_running(&self, key: TimerKey) -> bool {
        self.running.contains_key(&key)
    }

    /// Consumes an expiry. Returns true if `token` is the current arming of
    /// `key`; stale expiries return false and leave the table untouched.
    pub fn take_expired(&mut self, key: TimerKey, token: TimerToken) -> bool {
        if self.running.get(&key) == Some(&token) {
            self.running.remove(&key);
            true
        } else {
            false
        }
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.running.len()
    }

    /// Returns true if no timer is armed.
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

impl fmt::Display for TimerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.running.is_empty() {
            return write!(f, ".");
        }
        let keys: Vec<String> = self.running.keys().map(ToString::to_string).collect();
        write!(f, "{}", keys.join(" "))
    }
}
