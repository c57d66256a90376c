//! One simulated node and its owned context
//!
//! A node bundles what a real host would own: its forwarding table, its EPC
//! application (stations and the anchor only) and its RRC. The node turns
//! the [`RanAction`]s of its state machines into route changes it applies
//! itself, and into [`NodeOutput`]s the simulation schedules.

use std::net::Ipv4Addr;
use std::time::Duration;

use epcsim_common::{
    AddressBook, EpcConfig, Error, HandoverConfig, RandomAccessConfig, Result, RrcTimerConfig,
    StationId, StationType, HOST_MASK,
};
use epcsim_epc::{
    EpcApp, EpcHandler, EpcMessage, ForwardingTable, LocationInfo, OutgoingDatagram, RouteTable,
};
use epcsim_ran::{EnbRrc, RadioMessage, RanAction, RanSignal, TimerKey, TimerToken, UeRrc};
use rand::Rng;
use tracing::{debug, trace, warn};

/// Side effect a node hands back to the simulation.
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// Radio notification to deliver
    Radio {
        /// Receiver
        to: StationId,
        /// The notification
        message: RadioMessage,
    },
    /// Encoded EPC envelope to deliver
    Datagram(OutgoingDatagram),
    /// Timer expiry to schedule
    Timer {
        /// Timer armed
        key: TimerKey,
        /// Arming handle
        token: TimerToken,
        /// Delay until expiry
        delay: Duration,
    },
    /// Upward signal for the trace
    Signal(RanSignal),
}

/// Role-specific part of a node.
#[derive(Debug)]
pub enum Role {
    /// Mobility anchor
    Anchor,
    /// Base station
    Enb(EnbRrc),
    /// Terminal
    Ue(UeRrc),
}

/// The anchor has no RRC; every handover signal reaching it is misrouted.
struct NoRrc(StationId);

impl EpcHandler for NoRrc {
    fn on_handover_signal(&mut self, src: StationId, message: EpcMessage) -> Result<()> {
        Err(Error::violation(
            self.0,
            format!("anchor received {} from {src}", message.kind()),
        ))
    }
}

/// A simulated terminal, station or anchor.
#[derive(Debug)]
pub struct Node {
    station: StationId,
    routes: ForwardingTable,
    epc: Option<EpcApp>,
    role: Role,
}

impl Node {
    /// Creates the mobility anchor.
    pub fn new_anchor(station: StationId) -> Self {
        Self::with_role(station, Role::Anchor)
    }

    /// Creates a base station.
    pub fn new_enb(station: StationId, config: HandoverConfig) -> Self {
        Self::with_role(station, Role::Enb(EnbRrc::new(station, config)))
    }

    /// Creates a terminal.
    pub fn new_ue(station: StationId, ra: RandomAccessConfig, timers: RrcTimerConfig) -> Self {
        Self::with_role(station, Role::Ue(UeRrc::new(station, ra, timers)))
    }

    fn with_role(station: StationId, role: Role) -> Self {
        Self {
            station,
            routes: ForwardingTable::new(),
            epc: None,
            role,
        }
    }

    /// Brings up the EPC application of a station or the anchor.
    ///
    /// `book` must already hold every node of the topology.
    pub fn init(&mut self, config: &EpcConfig, book: &AddressBook) -> Result<()> {
        if matches!(self.role, Role::Ue(_)) {
            return Ok(());
        }
        let mut epc = EpcApp::new(self.station, config, book.clone());
        epc.init(&mut self.routes)?;
        if matches!(self.role, Role::Anchor) != epc.is_anchor() {
            return Err(Error::Config(format!(
                "{} is configured as {} but the EPC anchor is {}",
                self.station,
                self.station_type(),
                epc.anchor()
            )));
        }
        self.epc = Some(epc);
        Ok(())
    }

    /// Node identity.
    pub fn station(&self) -> StationId {
        self.station
    }

    /// Role of the node.
    pub fn station_type(&self) -> StationType {
        match self.role {
            Role::Anchor => StationType::Anchor,
            Role::Enb(_) => StationType::Enb,
            Role::Ue(_) => StationType::Ue,
        }
    }

    /// Role-specific state.
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Station RRC, if this is a station.
    pub fn enb(&self) -> Option<&EnbRrc> {
        match &self.role {
            Role::Enb(rrc) => Some(rrc),
            _ => None,
        }
    }

    /// Station RRC for update.
    pub fn enb_mut(&mut self) -> Option<&mut EnbRrc> {
        match &mut self.role {
            Role::Enb(rrc) => Some(rrc),
            _ => None,
        }
    }

    /// Terminal RRC, if this is a terminal.
    pub fn ue(&self) -> Option<&UeRrc> {
        match &self.role {
            Role::Ue(rrc) => Some(rrc),
            _ => None,
        }
    }

    /// Terminal RRC for update.
    pub fn ue_mut(&mut self) -> Option<&mut UeRrc> {
        match &mut self.role {
            Role::Ue(rrc) => Some(rrc),
            _ => None,
        }
    }

    /// EPC application, once initialized.
    pub fn epc(&self) -> Option<&EpcApp> {
        self.epc.as_ref()
    }

    /// Forwarding table.
    pub fn routes(&self) -> &ForwardingTable {
        &self.routes
    }

    /// Location map, if this is the anchor.
    pub fn location(&self) -> Option<&LocationInfo> {
        self.epc.as_ref().and_then(EpcApp::location)
    }

    /// One-line counter summary.
    pub fn summary(&self) -> String {
        let epc = self
            .epc
            .as_ref()
            .map(|epc| format!(" | {}", epc.stats()))
            .unwrap_or_default();
        match &self.role {
            Role::Anchor => {
                let ues = self.location().map_or(0, LocationInfo::ue_count);
                format!("{} {}: {} UEs located{}", self.station_type(), self.station, ues, epc)
            }
            Role::Enb(rrc) => format!(
                "{} {}: {} | {}{}",
                self.station_type(),
                self.station,
                rrc.stats(),
                rrc.mac_stats(),
                epc
            ),
            Role::Ue(rrc) => format!(
                "{} {} ({}): {} | {}",
                self.station_type(),
                self.station,
                rrc.state(),
                rrc.stats(),
                rrc.mac_stats()
            ),
        }
    }

    /// Delivers a radio notification.
    pub fn on_radio<R: Rng>(
        &mut self,
        from: StationId,
        message: RadioMessage,
        rng: &mut R,
        book: &AddressBook,
    ) -> Result<Vec<NodeOutput>> {
        let actions = match &mut self.role {
            Role::Enb(rrc) => rrc.on_radio(from, message)?,
            Role::Ue(rrc) => rrc.on_radio(from, message, rng)?,
            Role::Anchor => {
                return Err(Error::violation(
                    self.station,
                    format!("anchor received radio {} from {from}", message.kind()),
                ))
            }
        };
        self.carry_out(actions, book)
    }

    /// Delivers an encoded EPC envelope.
    pub fn on_datagram(&mut self, data: &[u8], book: &AddressBook) -> Result<Vec<NodeOutput>> {
        let Node {
            station,
            routes,
            epc,
            role,
        } = self;
        let epc = epc.as_mut().ok_or_else(|| {
            Error::violation(*station, "EPC envelope delivered to a node without EPC")
        })?;
        let container = epc.receive(data)?;

        let (replies, actions) = match role {
            Role::Anchor => (epc.dispatch(container, routes, &mut NoRrc(*station))?, Vec::new()),
            Role::Enb(rrc) => {
                let replies = epc.dispatch(container, routes, rrc)?;
                (replies, rrc.take_actions())
            }
            Role::Ue(_) => {
                return Err(Error::violation(*station, "terminal received an EPC envelope"))
            }
        };

        let mut outputs: Vec<NodeOutput> = replies.into_iter().map(NodeOutput::Datagram).collect();
        outputs.extend(self.carry_out(actions, book)?);
        Ok(outputs)
    }

    /// Delivers a timer expiry.
    pub fn on_timer<R: Rng>(
        &mut self,
        key: TimerKey,
        token: TimerToken,
        rng: &mut R,
        book: &AddressBook,
    ) -> Result<Vec<NodeOutput>> {
        let actions = match &mut self.role {
            Role::Enb(rrc) => rrc.on_timer(key, token)?,
            Role::Ue(rrc) => rrc.on_timer(key, token, rng)?,
            Role::Anchor => {
                return Err(Error::StateMachine(format!(
                    "anchor {} owns no timer {key}",
                    self.station
                )))
            }
        };
        self.carry_out(actions, book)
    }

    /// Applies route actions locally and turns the rest into outputs.
    pub fn carry_out(&mut self, actions: Vec<RanAction>, book: &AddressBook) -> Result<Vec<NodeOutput>> {
        let mut outputs = Vec::with_capacity(actions.len());
        for action in actions {
            let applied = match action {
                RanAction::Radio { to, message } => {
                    outputs.push(NodeOutput::Radio { to, message });
                    Ok(())
                }
                RanAction::Epc(message) => self
                    .send_epc(message)
                    .map(|datagram| outputs.push(NodeOutput::Datagram(datagram))),
                RanAction::ArmTimer { key, token, delay } => {
                    outputs.push(NodeOutput::Timer { key, token, delay });
                    Ok(())
                }
                RanAction::AddRoute { towards } => self.add_route(towards, book),
                RanAction::DeleteRoute { towards } => self.delete_route(towards, book),
                RanAction::Notify(signal) => {
                    outputs.push(NodeOutput::Signal(signal));
                    Ok(())
                }
            };
            // A failed action must not take its siblings down with it
            match applied {
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("{} action failed: {}", self.station, err),
                Ok(()) => {}
            }
        }
        Ok(outputs)
    }

    fn send_epc(&mut self, message: EpcMessage) -> Result<OutgoingDatagram> {
        let station = self.station;
        let epc = self
            .epc
            .as_mut()
            .ok_or_else(|| Error::violation(station, "EPC send from a node without EPC"))?;
        match message {
            EpcMessage::AttachUe(loc) => epc.send_attach_ue(loc.ue),
            EpcMessage::DetachUe(loc) => epc.send_detach_ue(loc.ue),
            EpcMessage::HandoverRequest { participator } => epc.send_handover_request(participator),
            EpcMessage::HandoverRequestAck {
                participator,
                reconfiguration,
            } => epc.send_handover_request_ack(participator, reconfiguration),
            EpcMessage::SnStatusTransfer {
                participator,
                items,
            } => epc.send_sn_status_transfer(participator, items),
            EpcMessage::DataForwarding {
                participator,
                bearer_id,
                data,
            } => epc.send_data_forwarding(participator, bearer_id, data),
            EpcMessage::PathSwitchRequest { participator } => epc.send_path_switch_request(participator),
            EpcMessage::EndMarker { participator } => {
                epc.send_end_marker(participator.target, participator)
            }
            EpcMessage::UeContextRelease { participator } => epc.send_ue_context_release(participator),
            EpcMessage::HoPreparationFailure { participator } => {
                epc.send_ho_preparation_failure(participator)
            }
            EpcMessage::PathSwitchRequestAck { .. } => Err(Error::violation(
                station,
                "only the anchor acknowledges path switches",
            )),
        }
    }

    fn address(&self, peer: StationId, book: &AddressBook) -> Result<Ipv4Addr> {
        book.address_of(peer).ok_or(Error::AddressResolution {
            home: self.station,
            target: peer,
        })
    }

    fn add_route(&mut self, towards: StationId, book: &AddressBook) -> Result<()> {
        let addr = self.address(towards, book)?;
        let interface = self.station.interface_index;
        match self.role {
            // Host route to the terminal over the radio interface.
            Role::Enb(_) => self.routes.add_route(addr, HOST_MASK, addr, interface)?,
            // Everything via the serving station.
            Role::Ue(_) => {
                self.routes
                    .add_route(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, addr, interface)?
            }
            Role::Anchor => return Ok(()),
        }
        trace!("{} route towards {} installed", self.station, towards);
        Ok(())
    }

    fn delete_route(&mut self, towards: StationId, book: &AddressBook) -> Result<()> {
        match self.role {
            Role::Enb(_) => {
                let addr = self.address(towards, book)?;
                self.routes.delete_route(addr, HOST_MASK)?;
            }
            Role::Ue(_) => {
                self.routes
                    .delete_route(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED)?;
            }
            Role::Anchor => return Ok(()),
        }
        debug!("{} route towards {} removed", self.station, towards);
        Ok(())
    }
}
