//! Location & path-switch engine of the mobility anchor
//!
//! [`LocationInfo`] is the anchor's authoritative map from serving station
//! to the set of terminals it serves. Every mutation keeps the invariant
//! that a terminal appears under at most one station, and mirrors the
//! change into the anchor's forwarding table through a [`UeRouteInstaller`].
//!
//! A path switch deletes the old route before adding the new one, so for a
//! short moment the terminal has no route at all but never has two.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use epcsim_common::{AddressBook, Error, HandoverParticipator, Result, StationId, HOST_MASK};
use tracing::{debug, info, warn};

use crate::routing::RouteTable;

/// Per-terminal route mutations requested by the location engine.
pub trait UeRouteInstaller {
    /// Routes traffic for `ue` towards `station`.
    fn install(&mut self, ue: StationId, station: StationId) -> Result<()>;

    /// Removes the route for `ue` that pointed at `station`.
    fn remove(&mut self, ue: StationId, station: StationId) -> Result<()>;
}

/// Installs terminal host routes in the anchor's forwarding table.
///
/// The destination is the terminal's address, the next hop the serving
/// station's address on the signaling subnet.
pub struct AnchorRoutes<'a, R: RouteTable + ?Sized> {
    anchor: StationId,
    book: &'a AddressBook,
    table: &'a mut R,
}

impl<'a, R: RouteTable + ?Sized> AnchorRoutes<'a, R> {
    /// Creates an installer for the given anchor.
    pub fn new(anchor: StationId, book: &'a AddressBook, table: &'a mut R) -> Self {
        Self {
            anchor,
            book,
            table,
        }
    }

    fn ue_address(&self, ue: StationId) -> Result<Ipv4Addr> {
        self.book.address_of(ue).ok_or(Error::AddressResolution {
            home: self.anchor,
            target: ue,
        })
    }
}

impl<R: RouteTable + ?Sized> UeRouteInstaller for AnchorRoutes<'_, R> {
    fn install(&mut self, ue: StationId, station: StationId) -> Result<()> {
        let dest = self.ue_address(ue)?;
        let next_hop = self.book.resolve_address(self.anchor, station)?;
        self.table
            .add_route(dest, HOST_MASK, next_hop, self.anchor.interface_index)
    }

    fn remove(&mut self, ue: StationId, _station: StationId) -> Result<()> {
        let dest = self.ue_address(ue)?;
        self.table.delete_route(dest, HOST_MASK)
    }
}

/// Serving station → attached terminals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationInfo {
    entries: BTreeMap<StationId, BTreeSet<StationId>>,
}

impl LocationInfo {
    /// Creates an empty location map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Station currently serving `ue`, if any.
    pub fn serving_station(&self, ue: StationId) -> Option<StationId> {
        self.entries
            .iter()
            .find(|(_, ues)| ues.contains(&ue))
            .map(|(station, _)| *station)
    }

    /// Terminals attached to `station`. Stations never seen return `None`.
    pub fn ues_at(&self, station: StationId) -> Option<&BTreeSet<StationId>> {
        self.entries.get(&station)
    }

    /// Returns true if `ue` is attached to `station`.
    pub fn contains(&self, station: StationId, ue: StationId) -> bool {
        self.entries
            .get(&station)
            .is_some_and(|ues| ues.contains(&ue))
    }

    /// Iterates over all station entries, including empty ones.
    pub fn iter(&self) -> impl Iterator<Item = (&StationId, &BTreeSet<StationId>)> {
        self.entries.iter()
    }

    /// Total number of attached terminals.
    pub fn ue_count(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    /// Returns true if no terminal appears under more than one station.
    pub fn is_consistent(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.entries
            .values()
            .flatten()
            .all(|ue| seen.insert(*ue))
    }

    /// Attaches `ue` to `station`.
    ///
    /// No-op if already attached there. If attached elsewhere, that entry
    /// and its route are removed first.
    pub fn attach_ue(
        &mut self,
        ue: StationId,
        station: StationId,
        routes: &mut dyn UeRouteInstaller,
    ) -> Result<()> {
        if self.contains(station, ue) {
            debug!("AttachUE {} at {}: already attached", ue, station);
            return Ok(());
        }

        if let Some(previous) = self.serving_station(ue) {
            if let Some(ues) = self.entries.get_mut(&previous) {
                ues.remove(&ue);
            }
            routes.remove(ue, previous)?;
            debug!("AttachUE {}: removed stale entry at {}", ue, previous);
        }

        self.entries.entry(station).or_default().insert(ue);
        routes.install(ue, station)?;
        info!("UE {} attached at {}", ue, station);
        Ok(())
    }

    /// Detaches `ue` from `station`. A stale detach is a no-op.
    pub fn detach_ue(
        &mut self,
        ue: StationId,
        station: StationId,
        routes: &mut dyn UeRouteInstaller,
    ) -> Result<()> {
        let removed = self
            .entries
            .get_mut(&station)
            .is_some_and(|ues| ues.remove(&ue));

        if !removed {
            debug!("DetachUE {} at {}: not attached there", ue, station);
            return Ok(());
        }

        routes.remove(ue, station)?;
        info!("UE {} detached from {}", ue, station);
        Ok(())
    }

    /// Moves `participator.ue` from its source to its target station.
    ///
    /// The terminal must be attached to the source; anything else is a
    /// protocol violation raised as `anchor`. A non-fatal failure to install
    /// the new route yields `Ok(false)` with the entry already moved.
    pub fn switch_path(
        &mut self,
        anchor: StationId,
        participator: &HandoverParticipator,
        routes: &mut dyn UeRouteInstaller,
    ) -> Result<bool> {
        let HandoverParticipator { ue, source, target } = *participator;

        let ues = self.entries.get_mut(&source).ok_or_else(|| {
            Error::violation(anchor, format!("path switch: source {source} has no entry"))
        })?;
        if !ues.remove(&ue) {
            return Err(Error::violation(
                anchor,
                format!("path switch: UE {ue} is not attached to source {source}"),
            ));
        }
        routes.remove(ue, source)?;

        self.entries.entry(target).or_default().insert(ue);
        if let Err(err) = routes.install(ue, target) {
            if err.is_fatal() {
                return Err(err);
            }
            warn!("Path switch of UE {} to {}: route install failed: {}", ue, target, err);
            return Ok(false);
        }

        info!("Downlink path of UE {} switched {} -> {}", ue, source, target);
        Ok(true)
    }
}
