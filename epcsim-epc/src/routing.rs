//! Forwarding-table collaborator.
//!
//! Route storage belongs to the node's networking stack; this crate only
//! issues add/delete calls. [`ForwardingTable`] is a plain in-memory table
//! that also journals every call, which is what the simulation and the tests
//! use.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use epcsim_common::Result;
use tracing::trace;

/// One forwarding entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Destination address
    pub dest: Ipv4Addr,
    /// Destination mask
    pub mask: Ipv4Addr,
    /// Next hop
    pub next_hop: Ipv4Addr,
    /// Outgoing interface
    pub interface: u32,
}

/// A mutation applied to a forwarding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    /// Route added
    Add(Route),
    /// Route deleted
    Delete {
        /// Destination address
        dest: Ipv4Addr,
        /// Destination mask
        mask: Ipv4Addr,
    },
}

/// Forwarding-table mutation API consumed by the EPC and RRC layers.
///
/// Both calls are synchronous; the bundled implementation never fails.
pub trait RouteTable {
    /// Adds (or replaces) the route for `dest/mask`.
    fn add_route(&mut self, dest: Ipv4Addr, mask: Ipv4Addr, next_hop: Ipv4Addr, interface: u32) -> Result<()>;

    /// Deletes the route for `dest/mask`, if present.
    fn delete_route(&mut self, dest: Ipv4Addr, mask: Ipv4Addr) -> Result<()>;
}

/// In-memory forwarding table with an operation journal.
#[derive(Debug, Default)]
pub struct ForwardingTable {
    routes: BTreeMap<(Ipv4Addr, Ipv4Addr), Route>,
    journal: Vec<RouteOp>,
}

impl ForwardingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the exact route for `dest/mask`.
    pub fn get(&self, dest: Ipv4Addr, mask: Ipv4Addr) -> Option<&Route> {
        self.routes.get(&(dest, mask))
    }

    /// Longest-prefix match for `addr`.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&Route> {
        self.routes
            .values()
            .filter(|r| u32::from(addr) & u32::from(r.mask) == u32::from(r.dest) & u32::from(r.mask))
            .max_by_key(|r| u32::from(r.mask).count_ones())
    }

    /// Number of installed routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are installed.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Every add/delete call made so far, in order.
    pub fn journal(&self) -> &[RouteOp] {
        &self.journal
    }

    /// Drops the journal, keeping the routes.
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }
}

impl RouteTable for ForwardingTable {
    fn add_route(&mut self, dest: Ipv4Addr, mask: Ipv4Addr, next_hop: Ipv4Addr, interface: u32) -> Result<()> {
        let route = Route {
            dest,
            mask,
            next_hop,
            interface,
        };
        trace!("add route {}/{} via {} if {}", dest, mask, next_hop, interface);
        self.routes.insert((dest, mask), route);
        self.journal.push(RouteOp::Add(route));
        Ok(())
    }

    fn delete_route(&mut self, dest: Ipv4Addr, mask: Ipv4Addr) -> Result<()> {
        trace!("delete route {}/{}", dest, mask);
        self.routes.remove(&(dest, mask));
        self.journal.push(RouteOp::Delete { dest, mask });
        Ok(())
    }
}
