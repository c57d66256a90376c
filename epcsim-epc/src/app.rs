//! Per-node EPC application: envelope send helpers and receive dispatch
//!
//! Every eNB and the mobility anchor own one [`EpcApp`]. Sending wraps a
//! typed message in an envelope, resolves both ends on the signaling subnet
//! and hands back an [`OutgoingDatagram`] for the transport, delayed by the
//! fixed EPC delay. Receiving checks that the local station holds the role
//! the message kind expects, counts it, and either runs the anchor's
//! location engine or passes the message up to the station's RRC through
//! [`EpcHandler`].
//!
//! ```text
//!   eNB (source)            eNB (target)               anchor
//!       | HandoverRequest ------> |                         |
//!       | <------ HandoverRequestAck                        |
//!       | SnStatusTransfer -----> |                         |
//!       |                         | PathSwitchRequest ----> |
//!       | <---------------------------------- EndMarker     |
//!       | EndMarker ------------> |                         |
//!       |                         | <-- PathSwitchRequestAck|
//!       | <------ UeContextRelease|                         |
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use epcsim_common::{
    log_epc_message, AddressBook, Direction, EpcConfig, Error, HandoverParticipator, Result,
    StationId,
};
use tracing::{debug, info};

use crate::codec;
use crate::location::{AnchorRoutes, LocationInfo};
use crate::protocol::{
    EpcMessage, EpcMessageContainer, MessageKind, RrcReconfiguration, SnStatusItem, UeLocation,
};
use crate::routing::RouteTable;
use crate::stats::EpcStats;

/// An encoded envelope ready for the datagram transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingDatagram {
    /// Sending station
    pub src: StationId,
    /// Receiving station
    pub dst: StationId,
    /// Message kind, for tracing
    pub kind: MessageKind,
    /// Source address on the signaling subnet
    pub src_addr: Ipv4Addr,
    /// Destination address on the signaling subnet
    pub dst_addr: Ipv4Addr,
    /// Delivery delay
    pub delay: Duration,
    /// Encoded envelope
    pub data: Bytes,
}

/// Upward interface from the dispatcher into a station's RRC.
pub trait EpcHandler {
    /// Handles a handover-related message whose role check already passed.
    fn on_handover_signal(&mut self, src: StationId, message: EpcMessage) -> Result<()>;
}

/// Which participator slot must match the receiving station.
enum ExpectedRole {
    Anchor,
    Source,
    Target,
    SourceOrTarget,
}

fn expected_role(kind: MessageKind) -> ExpectedRole {
    match kind {
        MessageKind::AttachUe | MessageKind::DetachUe | MessageKind::PathSwitchRequest => {
            ExpectedRole::Anchor
        }
        MessageKind::HandoverRequest
        | MessageKind::SnStatusTransfer
        | MessageKind::DataForwarding
        | MessageKind::PathSwitchRequestAck => ExpectedRole::Target,
        MessageKind::HandoverRequestAck
        | MessageKind::UeContextRelease
        | MessageKind::HoPreparationFailure => ExpectedRole::Source,
        MessageKind::EndMarker => ExpectedRole::SourceOrTarget,
    }
}

/// EPC application of one node.
#[derive(Debug)]
pub struct EpcApp {
    station: StationId,
    anchor: StationId,
    book: AddressBook,
    delay: Duration,
    stats: EpcStats,
    location: Option<LocationInfo>,
}

impl EpcApp {
    /// Creates the EPC application of `station`.
    pub fn new(station: StationId, config: &EpcConfig, book: AddressBook) -> Self {
        Self {
            station,
            anchor: config.anchor,
            book,
            delay: config.message_delay(),
            stats: EpcStats::new(),
            location: None,
        }
    }

    /// Brings the application up.
    ///
    /// The anchor creates its empty location map; every other station
    /// installs a default route towards the anchor.
    pub fn init(&mut self, routes: &mut dyn RouteTable) -> Result<()> {
        if self.is_anchor() {
            self.location = Some(LocationInfo::new());
            info!("EPC anchor {} up on {}", self.station, self.book.subnet());
        } else {
            let anchor_addr = self.book.resolve_address(self.station, self.anchor)?;
            routes.add_route(
                Ipv4Addr::UNSPECIFIED,
                Ipv4Addr::UNSPECIFIED,
                anchor_addr,
                self.station.interface_index,
            )?;
            debug!("eNB {} default route via anchor {}", self.station, anchor_addr);
        }
        Ok(())
    }

    /// Local station.
    pub fn station(&self) -> StationId {
        self.station
    }

    /// Configured anchor.
    pub fn anchor(&self) -> StationId {
        self.anchor
    }

    /// Returns true if this node is the mobility anchor.
    pub fn is_anchor(&self) -> bool {
        self.station == self.anchor
    }

    /// Message counters.
    pub fn stats(&self) -> &EpcStats {
        &self.stats
    }

    /// The anchor's location map; `None` on other stations or before `init`.
    pub fn location(&self) -> Option<&LocationInfo> {
        self.location.as_ref()
    }

    /// Address registry used for resolution.
    pub fn address_book(&self) -> &AddressBook {
        &self.book
    }

    /// Returns true if `other` is reachable on the signaling subnet.
    pub fn same_subnet(&self, other: StationId) -> bool {
        self.book.same_subnet(self.station, other)
    }

    /// Wraps `message` for `dst`, resolves both addresses and counts it.
    pub fn send(&mut self, dst: StationId, message: &EpcMessage) -> Result<OutgoingDatagram> {
        let datagram = self.envelope(dst, message)?;
        self.commit(&datagram);
        Ok(datagram)
    }

    /// Encodes and addresses `message` without logging or counting it.
    fn envelope(&self, dst: StationId, message: &EpcMessage) -> Result<OutgoingDatagram> {
        let src_addr = self.book.resolve_address(self.station, self.station)?;
        let dst_addr = self.book.resolve_address(self.station, dst)?;

        let container = EpcMessageContainer::new(self.station, dst, message)?;
        Ok(OutgoingDatagram {
            src: self.station,
            dst,
            kind: container.kind,
            src_addr,
            dst_addr,
            delay: self.delay,
            data: codec::encode(&container),
        })
    }

    fn commit(&mut self, datagram: &OutgoingDatagram) {
        log_epc_message(Direction::Tx, &datagram.kind.to_string(), &datagram.data);
        self.stats.record_sent(datagram.kind);
    }

    /// AttachUE towards the anchor.
    pub fn send_attach_ue(&mut self, ue: StationId) -> Result<OutgoingDatagram> {
        let message = EpcMessage::AttachUe(UeLocation {
            ue,
            station: self.station,
        });
        self.send(self.anchor, &message)
    }

    /// DetachUE towards the anchor.
    pub fn send_detach_ue(&mut self, ue: StationId) -> Result<OutgoingDatagram> {
        let message = EpcMessage::DetachUe(UeLocation {
            ue,
            station: self.station,
        });
        self.send(self.anchor, &message)
    }

    /// HandoverRequest, source to target.
    pub fn send_handover_request(&mut self, participator: HandoverParticipator) -> Result<OutgoingDatagram> {
        self.send(participator.target, &EpcMessage::HandoverRequest { participator })
    }

    /// HandoverRequestAck, target to source.
    pub fn send_handover_request_ack(
        &mut self,
        participator: HandoverParticipator,
        reconfiguration: RrcReconfiguration,
    ) -> Result<OutgoingDatagram> {
        self.send(
            participator.source,
            &EpcMessage::HandoverRequestAck {
                participator,
                reconfiguration,
            },
        )
    }

    /// SnStatusTransfer, source to target.
    pub fn send_sn_status_transfer(
        &mut self,
        participator: HandoverParticipator,
        items: Vec<SnStatusItem>,
    ) -> Result<OutgoingDatagram> {
        self.send(
            participator.target,
            &EpcMessage::SnStatusTransfer {
                participator,
                items,
            },
        )
    }

    /// DataForwarding, source to target.
    pub fn send_data_forwarding(
        &mut self,
        participator: HandoverParticipator,
        bearer_id: u8,
        data: Bytes,
    ) -> Result<OutgoingDatagram> {
        self.send(
            participator.target,
            &EpcMessage::DataForwarding {
                participator,
                bearer_id,
                data,
            },
        )
    }

    /// PathSwitchRequest, target to anchor.
    pub fn send_path_switch_request(&mut self, participator: HandoverParticipator) -> Result<OutgoingDatagram> {
        self.send(self.anchor, &EpcMessage::PathSwitchRequest { participator })
    }

    /// PathSwitchRequestAck, anchor to target.
    pub fn send_path_switch_request_ack(
        &mut self,
        participator: HandoverParticipator,
        result: bool,
    ) -> Result<OutgoingDatagram> {
        self.send(
            participator.target,
            &EpcMessage::PathSwitchRequestAck {
                participator,
                result,
            },
        )
    }

    /// EndMarker to an explicit destination.
    pub fn send_end_marker(
        &mut self,
        dst: StationId,
        participator: HandoverParticipator,
    ) -> Result<OutgoingDatagram> {
        self.send(dst, &EpcMessage::EndMarker { participator })
    }

    /// UeContextRelease, target to source.
    pub fn send_ue_context_release(&mut self, participator: HandoverParticipator) -> Result<OutgoingDatagram> {
        self.send(participator.source, &EpcMessage::UeContextRelease { participator })
    }

    /// HoPreparationFailure, target to source.
    pub fn send_ho_preparation_failure(&mut self, participator: HandoverParticipator) -> Result<OutgoingDatagram> {
        self.send(participator.source, &EpcMessage::HoPreparationFailure { participator })
    }

    /// Decodes a received envelope.
    pub fn receive(&self, data: &[u8]) -> Result<EpcMessageContainer> {
        let container = codec::decode(data)?;
        log_epc_message(Direction::Rx, &container.kind.to_string(), data);
        Ok(container)
    }

    /// Dispatches a received envelope to exactly one handler.
    ///
    /// Returns the envelopes the anchor sends in reply; station-side
    /// handlers send through their own path and return nothing here.
    pub fn dispatch(
        &mut self,
        container: EpcMessageContainer,
        routes: &mut dyn RouteTable,
        handler: &mut dyn EpcHandler,
    ) -> Result<Vec<OutgoingDatagram>> {
        if container.dst != self.station {
            return Err(Error::violation(
                self.station,
                format!("{} addressed to {}", container.kind, container.dst),
            ));
        }

        let message = container.message()?;
        self.check_role(&message)?;
        self.stats.record_received(message.kind());

        match message {
            EpcMessage::AttachUe(loc) => {
                self.process_attach_ue(loc, routes)?;
                Ok(Vec::new())
            }
            EpcMessage::DetachUe(loc) => {
                self.process_detach_ue(loc, routes)?;
                Ok(Vec::new())
            }
            EpcMessage::PathSwitchRequest { participator } => {
                self.process_path_switch_request(participator, routes)
            }
            other => {
                handler.on_handover_signal(container.src, other)?;
                Ok(Vec::new())
            }
        }
    }

    fn check_role(&self, message: &EpcMessage) -> Result<()> {
        let kind = message.kind();
        let ok = match (expected_role(kind), message.participator()) {
            (ExpectedRole::Anchor, _) => self.location.is_some(),
            (_, Some(p)) if !p.is_valid() => false,
            (ExpectedRole::Source, Some(p)) => p.source == self.station,
            (ExpectedRole::Target, Some(p)) => p.target == self.station,
            (ExpectedRole::SourceOrTarget, Some(p)) => {
                p.source == self.station || p.target == self.station
            }
            (_, None) => false,
        };

        if ok {
            Ok(())
        } else {
            Err(Error::violation(
                self.station,
                format!("unexpected {kind} (participator {:?})", message.participator()),
            ))
        }
    }

    /// Splits the borrow into the anchor's location map and what its route
    /// installer needs.
    fn anchor_parts(&mut self) -> Result<(StationId, &AddressBook, &mut LocationInfo)> {
        let Self {
            station,
            book,
            location,
            ..
        } = self;
        let location = location
            .as_mut()
            .ok_or_else(|| Error::violation(*station, "location map exists only at the anchor"))?;
        Ok((*station, book, location))
    }

    fn process_attach_ue(&mut self, loc: UeLocation, routes: &mut dyn RouteTable) -> Result<()> {
        let (anchor, book, location) = self.anchor_parts()?;
        let mut installer = AnchorRoutes::new(anchor, book, routes);
        location.attach_ue(loc.ue, loc.station, &mut installer)
    }

    fn process_detach_ue(&mut self, loc: UeLocation, routes: &mut dyn RouteTable) -> Result<()> {
        let (anchor, book, location) = self.anchor_parts()?;
        let mut installer = AnchorRoutes::new(anchor, book, routes);
        location.detach_ue(loc.ue, loc.station, &mut installer)
    }

    fn process_path_switch_request(
        &mut self,
        participator: HandoverParticipator,
        routes: &mut dyn RouteTable,
    ) -> Result<Vec<OutgoingDatagram>> {
        let (result, end_marker) = self.switch_downlink_path(participator, routes)?;
        let ack = self.send_path_switch_request_ack(participator, result)?;
        Ok(vec![end_marker, ack])
    }

    /// Commits a handover at the anchor.
    ///
    /// Moves the terminal's entry and route from the source to the target
    /// and returns the switch result with the EndMarker for the source. The
    /// EndMarker is addressed up front but only counted once the switch
    /// went through.
    pub fn switch_downlink_path(
        &mut self,
        participator: HandoverParticipator,
        routes: &mut dyn RouteTable,
    ) -> Result<(bool, OutgoingDatagram)> {
        let end_marker = self.envelope(participator.source, &EpcMessage::EndMarker { participator })?;

        let result = {
            let (anchor, book, location) = self.anchor_parts()?;
            let mut installer = AnchorRoutes::new(anchor, book, routes);
            location.switch_path(anchor, &participator, &mut installer)?
        };
        self.commit(&end_marker);
        Ok((result, end_marker))
    }
}
