//! Per-peer RRC connection records
//!
//! A station keeps one [`ConnectionInfo`] per terminal it knows; a terminal
//! keeps one per station it is attaching or attached to. At most one record
//! per peer exists at a time.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use epcsim_common::{HandoverParticipator, StationId};
use epcsim_epc::SnStatusItem;

/// RRC connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Random access done, establishment pending
    #[default]
    Waiting,
    /// Established
    Connected,
    /// Being handed over
    Handover,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Waiting => write!(f, "Waiting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Handover => write!(f, "Handover"),
        }
    }
}

/// Downlink SDU held for a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedSdu {
    /// Radio bearer
    pub bearer_id: u8,
    /// Payload
    pub data: Bytes,
}

/// RRC connection record for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// The peer
    pub peer: StationId,
    /// Connection state
    pub state: ConnectionState,
    /// Handover being prepared, executed or completed for this peer
    pub participator: Option<HandoverParticipator>,
    /// PDCP sequence-number state per bearer
    pub sn_status: BTreeMap<u8, SnStatusItem>,
    /// Downlink data not yet delivered
    pub buffered: Vec<BufferedSdu>,
    /// Whether the scheduler may serve this peer
    pub schedulable: bool,
}

impl ConnectionInfo {
    /// Creates a record in `state`.
    pub fn new(peer: StationId, state: ConnectionState) -> Self {
        Self {
            peer,
            state,
            participator: None,
            sn_status: BTreeMap::new(),
            buffered: Vec::new(),
            schedulable: state == ConnectionState::Connected,
        }
    }

    /// Returns true if connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Queues a downlink SDU and advances the bearer's transmit sequence number.
    pub fn buffer_downlink(&mut self, bearer_id: u8, data: Bytes) {
        let item = self.sn_status.entry(bearer_id).or_insert(SnStatusItem {
            bearer_id,
            ..SnStatusItem::default()
        });
        item.next_pdcp_tx_sn = item.next_pdcp_tx_sn.wrapping_add(1);
        self.buffered.push(BufferedSdu { bearer_id, data });
    }

    /// SN status items in bearer order.
    pub fn sn_status_items(&self) -> Vec<SnStatusItem> {
        self.sn_status.values().copied().collect()
    }

    /// Replaces the SN state with items received from a source station.
    pub fn apply_sn_status(&mut self, items: &[SnStatusItem]) {
        self.sn_status = items.iter().map(|item| (item.bearer_id, *item)).collect();
    }
}

/// Connection records indexed by peer.
#[derive(Debug, Default)]
pub struct ConnectionInfoManager {
    infos: BTreeMap<StationId, ConnectionInfo>,
}

impl ConnectionInfoManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh record for `peer`, returning it.
    ///
    /// Returns `None` and leaves the existing record alone if one exists.
    pub fn create(&mut self, peer: StationId, state: ConnectionState) -> Option<&mut ConnectionInfo> {
        if self.infos.contains_key(&peer) {
            return None;
        }
        Some(
            self.infos
                .entry(peer)
                .or_insert_with(|| ConnectionInfo::new(peer, state)),
        )
    }

    /// Finds the record of `peer`.
    pub fn try_find(&self, peer: StationId) -> Option<&ConnectionInfo> {
        self.infos.get(&peer)
    }

    /// Finds the record of `peer` for update.
    pub fn try_find_mut(&mut self, peer: StationId) -> Option<&mut ConnectionInfo> {
        self.infos.get_mut(&peer)
    }

    /// State of the record of `peer`.
    pub fn state_of(&self, peer: StationId) -> Option<ConnectionState> {
        self.infos.get(&peer).map(|info| info.state)
    }

    /// Removes the record of `peer`.
    pub fn delete(&mut self, peer: StationId) -> Option<ConnectionInfo> {
        self.infos.remove(&peer)
    }

    /// Returns true if `peer` has a record.
    pub fn contains(&self, peer: StationId) -> bool {
        self.infos.contains_key(&peer)
    }

    /// Number of records.
    pub fn count(&self) -> usize {
        self.infos.len()
    }

    /// Iterates over all records.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionInfo> {
        self.infos.values()
    }
}
