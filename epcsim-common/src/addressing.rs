//! Station addressing on the shared EPC signaling subnet.
//!
//! Every eNB and the mobility anchor own one address on the signaling
//! subnet. Terminals own an address too, but it lies outside the subnet and
//! is only used as the destination of data routes.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::StationId;

/// An IPv4 subnet given as network address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalingSubnet {
    /// Network address
    pub network: Ipv4Addr,
    /// Prefix length (0-32)
    pub prefix_len: u8,
}

impl SignalingSubnet {
    /// Creates a subnet, masking off host bits of `network`.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let masked = u32::from(network) & prefix_mask(prefix_len);
        Self {
            network: Ipv4Addr::from(masked),
            prefix_len,
        }
    }

    /// Subnet mask in dotted form.
    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(prefix_mask(self.prefix_len))
    }

    /// Returns true if `addr` lies within this subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = prefix_mask(self.prefix_len);
        u32::from(addr) & mask == u32::from(self.network) & mask
    }
}

impl Default for SignalingSubnet {
    fn default() -> Self {
        Self::new(Ipv4Addr::new(192, 168, 0, 0), 24)
    }
}

impl fmt::Display for SignalingSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        n if n >= 32 => u32::MAX,
        n => u32::MAX << (32 - n),
    }
}

/// Host mask used for per-terminal routes.
pub const HOST_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// Address registry of all nodes, keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    subnet: SignalingSubnet,
    hosts: BTreeMap<u32, Ipv4Addr>,
}

impl AddressBook {
    /// Creates an empty address book for the given signaling subnet.
    pub fn new(subnet: SignalingSubnet) -> Self {
        Self {
            subnet,
            hosts: BTreeMap::new(),
        }
    }

    /// Returns the signaling subnet.
    pub fn subnet(&self) -> SignalingSubnet {
        self.subnet
    }

    /// Registers the address of a node, replacing any previous entry.
    pub fn register(&mut self, node_id: u32, addr: Ipv4Addr) {
        self.hosts.insert(node_id, addr);
    }

    /// Returns the address of a station's node, if known.
    pub fn address_of(&self, station: StationId) -> Option<Ipv4Addr> {
        self.hosts.get(&station.node_id).copied()
    }

    fn signaling_address(&self, station: StationId) -> Option<Ipv4Addr> {
        self.address_of(station)
            .filter(|addr| self.subnet.contains(*addr))
    }

    /// Resolves `target` to its address on the signaling subnet shared with `home`.
    ///
    /// Fails with [`Error::AddressResolution`] if either station is not
    /// attached to the subnet.
    pub fn resolve_address(&self, home: StationId, target: StationId) -> Result<Ipv4Addr> {
        if self.signaling_address(home).is_none() {
            return Err(Error::AddressResolution { home, target });
        }
        self.signaling_address(target)
            .ok_or(Error::AddressResolution { home, target })
    }

    /// Returns true if both stations are reachable on the signaling subnet.
    pub fn same_subnet(&self, a: StationId, b: StationId) -> bool {
        self.signaling_address(a).is_some() && self.signaling_address(b).is_some()
    }

    /// Finds the station node that owns a signaling address.
    pub fn node_for_address(&self, addr: Ipv4Addr) -> Option<u32> {
        self.hosts
            .iter()
            .find(|(_, a)| **a == addr)
            .map(|(node, _)| *node)
    }
}
