//! Event-driven network of terminals, stations and the anchor
//!
//! The [`Simulation`] owns every [`Node`], the scheduler and the random
//! generator. Each popped event is handled to completion by exactly one
//! node; whatever the node sends is scheduled with the radio or EPC delay.
//!
//! A fatal error (protocol violation, unresolvable address) stops the run
//! and is returned to the caller. Other errors are logged and the run
//! continues with the next event.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use bytes::Bytes;
use epcsim_common::{
    AddressBook, Error, Result, Scheduler, SimTime, SimulationConfig, StationId, StationType,
};
use epcsim_epc::{LocationInfo, MessageKind, OutgoingDatagram};
use epcsim_ran::{EnbRrc, RadioKind, RadioMessage, RanAction, RanSignal, UeRrc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::event::{Event, TraceEntry, TraceEvent};
use crate::node::{Node, NodeOutput};

#[derive(Debug, Clone, Copy)]
struct RadioDrop {
    to: StationId,
    kind: RadioKind,
    remaining: u32,
}

#[derive(Debug, Clone, Copy)]
struct EpcDrop {
    kind: MessageKind,
    remaining: u32,
}

/// A complete simulation run.
pub struct Simulation {
    config: SimulationConfig,
    scheduler: Scheduler<Event>,
    book: AddressBook,
    rng: StdRng,
    nodes: BTreeMap<StationId, Node>,
    radio_drops: Vec<RadioDrop>,
    epc_drops: Vec<EpcDrop>,
    trace: Vec<TraceEntry>,
    initialized: bool,
}

impl Simulation {
    /// Creates an empty network after validating `config`.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            book: AddressBook::new(config.epc.subnet),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            scheduler: Scheduler::new(),
            nodes: BTreeMap::new(),
            radio_drops: Vec::new(),
            epc_drops: Vec::new(),
            trace: Vec::new(),
            initialized: false,
        })
    }

    fn add_node(&mut self, node: Node, addr: Ipv4Addr) -> Result<()> {
        let station = node.station();
        if self.initialized {
            return Err(Error::Config(format!(
                "cannot add {station} after the network is up"
            )));
        }
        if self.nodes.contains_key(&station)
            || self.nodes.keys().any(|s| s.node_id == station.node_id)
        {
            return Err(Error::Config(format!("node {} added twice", station.node_id)));
        }
        self.book.register(station.node_id, addr);
        debug!("Added {} {} at {}", node.station_type(), station, addr);
        self.nodes.insert(station, node);
        Ok(())
    }

    /// Adds the mobility anchor configured in `epc.anchor`.
    pub fn add_anchor(&mut self, addr: Ipv4Addr) -> Result<StationId> {
        let anchor = self.config.epc.anchor;
        self.add_node(Node::new_anchor(anchor), addr)?;
        Ok(anchor)
    }

    /// Adds a base station.
    pub fn add_enb(&mut self, station: StationId, addr: Ipv4Addr) -> Result<()> {
        let node = Node::new_enb(station, self.config.handover.clone());
        self.add_node(node, addr)
    }

    /// Adds a terminal. Its address is only used for data routes.
    pub fn add_ue(&mut self, station: StationId, addr: Ipv4Addr) -> Result<()> {
        let node = Node::new_ue(
            station,
            self.config.random_access.clone(),
            self.config.rrc_timers.clone(),
        );
        self.add_node(node, addr)
    }

    /// Brings up the EPC application of every station.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let anchor = self.config.epc.anchor;
        if self
            .nodes
            .get(&anchor)
            .map(Node::station_type)
            != Some(StationType::Anchor)
        {
            return Err(Error::Config(format!("anchor {anchor} was never added")));
        }
        for node in self.nodes.values_mut() {
            node.init(&self.config.epc, &self.book)?;
        }
        self.initialized = true;
        info!(
            "Network up: {} nodes on {}",
            self.nodes.len(),
            self.book.subnet()
        );
        Ok(())
    }

    fn ensure_up(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::StateMachine("network not initialized".into()))
        }
    }

    fn ue_node(&mut self, ue: StationId) -> Result<&mut UeRrc> {
        self.nodes
            .get_mut(&ue)
            .and_then(Node::ue_mut)
            .ok_or_else(|| Error::Config(format!("{ue} is not a terminal")))
    }

    fn enb_node(&mut self, station: StationId) -> Result<&mut EnbRrc> {
        self.nodes
            .get_mut(&station)
            .and_then(Node::enb_mut)
            .ok_or_else(|| Error::Config(format!("{station} is not a base station")))
    }

    fn serving_station(&self, ue: StationId) -> Result<StationId> {
        self.ue(ue)
            .and_then(UeRrc::serving)
            .ok_or_else(|| Error::StateMachine(format!("{ue} is not connected")))
    }

    /// Starts a fresh attach of `ue` to `station`.
    pub fn attach(&mut self, ue: StationId, station: StationId) -> Result<()> {
        self.ensure_up()?;
        self.enb_node(station)?;
        let Simulation { nodes, rng, .. } = self;
        let rrc = nodes
            .get_mut(&ue)
            .and_then(Node::ue_mut)
            .ok_or_else(|| Error::Config(format!("{ue} is not a terminal")))?;
        let actions = rrc.attach(station, rng)?;
        self.carry_out(ue, actions)
    }

    /// Hands `ue` over from its serving station to `target`.
    ///
    /// Fails with [`Error::AddressResolution`] if the target is not on the
    /// serving station's signaling subnet.
    pub fn trigger_handover(&mut self, ue: StationId, target: StationId) -> Result<()> {
        self.ensure_up()?;
        let source = self.serving_station(ue)?;
        let reachable = self
            .nodes
            .get(&source)
            .and_then(Node::epc)
            .is_some_and(|epc| epc.same_subnet(target));
        if !reachable {
            return Err(Error::AddressResolution {
                home: source,
                target,
            });
        }
        self.enb_node(target)?;
        let actions = self.enb_node(source)?.start_handover(ue, target)?;
        self.carry_out(source, actions)
    }

    /// Queues downlink data for `ue` at its serving station.
    pub fn buffer_downlink(&mut self, ue: StationId, bearer_id: u8, data: Bytes) -> Result<()> {
        let source = self.serving_station(ue)?;
        self.enb_node(source)?.buffer_downlink(ue, bearer_id, data)
    }

    /// Drops `ue` from its serving station as after a radio-link loss.
    pub fn detach(&mut self, ue: StationId) -> Result<()> {
        self.ensure_up()?;
        let station = self.serving_station(ue)?;
        let actions = self.enb_node(station)?.detach_ue(ue)?;
        self.carry_out(station, actions)?;
        let actions = self.ue_node(ue)?.release();
        self.carry_out(ue, actions)
    }

    /// Loses the next `count` radio notifications of `kind` sent to `to`.
    pub fn drop_next_radio(&mut self, to: StationId, kind: RadioKind, count: u32) {
        self.radio_drops.push(RadioDrop {
            to,
            kind,
            remaining: count,
        });
    }

    /// Loses the next `count` EPC envelopes of `kind`.
    pub fn drop_next_epc(&mut self, kind: MessageKind, count: u32) {
        self.epc_drops.push(EpcDrop {
            kind,
            remaining: count,
        });
    }

    fn take_radio_drop(&mut self, to: StationId, kind: RadioKind) -> bool {
        match self
            .radio_drops
            .iter_mut()
            .find(|d| d.to == to && d.kind == kind && d.remaining > 0)
        {
            Some(rule) => {
                rule.remaining -= 1;
                true
            }
            None => false,
        }
    }

    fn take_epc_drop(&mut self, kind: MessageKind) -> bool {
        match self
            .epc_drops
            .iter_mut()
            .find(|d| d.kind == kind && d.remaining > 0)
        {
            Some(rule) => {
                rule.remaining -= 1;
                true
            }
            None => false,
        }
    }

    fn record(&mut self, event: TraceEvent) {
        self.trace.push(TraceEntry {
            at: self.scheduler.now(),
            event,
        });
    }

    fn carry_out(&mut self, from: StationId, actions: Vec<RanAction>) -> Result<()> {
        let Simulation { nodes, book, .. } = self;
        let node = nodes
            .get_mut(&from)
            .ok_or_else(|| Error::Config(format!("unknown node {from}")))?;
        let outputs = node.carry_out(actions, book)?;
        self.emit(from, outputs);
        Ok(())
    }

    fn emit(&mut self, from: StationId, outputs: Vec<NodeOutput>) {
        for output in outputs {
            match output {
                NodeOutput::Radio { to, message } => self.send_radio(from, to, message),
                NodeOutput::Datagram(datagram) => self.send_datagram(datagram),
                NodeOutput::Timer { key, token, delay } => {
                    self.scheduler.schedule(
                        delay,
                        Event::Timer {
                            node: from,
                            key,
                            token,
                        },
                    );
                }
                NodeOutput::Signal(signal) => {
                    info!("{}: {}", from, signal);
                    self.record(TraceEvent::Signal { node: from, signal });
                }
            }
        }
    }

    fn send_radio(&mut self, from: StationId, to: StationId, message: RadioMessage) {
        let kind = message.kind();
        if self.take_radio_drop(to, kind) {
            debug!("Radio {} {} -> {} lost", kind, from, to);
            self.record(TraceEvent::RadioDropped { from, to, kind });
            return;
        }
        self.record(TraceEvent::RadioSent { from, to, kind });
        let delay = self.config.radio.notification_delay();
        self.scheduler
            .schedule(delay, Event::Radio { from, to, message });
    }

    fn send_datagram(&mut self, datagram: OutgoingDatagram) {
        let (src, dst, kind) = (datagram.src, datagram.dst, datagram.kind);
        if self.take_epc_drop(kind) {
            debug!("EPC {} {} -> {} lost", kind, src, dst);
            self.record(TraceEvent::EpcDropped { src, dst, kind });
            return;
        }
        self.record(TraceEvent::EpcSent { src, dst, kind });
        self.scheduler.schedule(datagram.delay, Event::Epc(datagram));
    }

    /// Handles the next event. Returns false once nothing is queued.
    pub fn step(&mut self) -> Result<bool> {
        let Some((at, event)) = self.scheduler.pop() else {
            return Ok(false);
        };
        let target = event.target();

        let Simulation {
            nodes, book, rng, ..
        } = self;
        let Some(node) = nodes.get_mut(&target) else {
            warn!("[{}] event for unknown node {} dropped", at, target);
            return Ok(true);
        };

        let result = match event {
            Event::Radio { from, message, .. } => node.on_radio(from, message, rng, book),
            Event::Epc(datagram) => node.on_datagram(&datagram.data, book),
            Event::Timer { key, token, .. } => node.on_timer(key, token, rng, book),
        };

        match result {
            Ok(outputs) => self.emit(target, outputs),
            Err(err) if err.is_fatal() => {
                error!("[{}] {} aborted the run: {}", at, target, err);
                return Err(err);
            }
            Err(err) => warn!("[{}] {}: {}", at, target, err),
        }
        Ok(true)
    }

    /// Runs every event due at or before `until`, then advances the clock to it.
    pub fn run_until(&mut self, until: SimTime) -> Result<()> {
        while self.scheduler.peek_time().is_some_and(|at| at <= until) {
            self.step()?;
        }
        self.scheduler.advance_to(until);
        Ok(())
    }

    /// Runs until no event is left.
    pub fn run_until_idle(&mut self) -> Result<()> {
        while self.step()? {}
        Ok(())
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    /// Configuration of the run.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Address registry.
    pub fn address_book(&self) -> &AddressBook {
        &self.book
    }

    /// Node by identity.
    pub fn node(&self, station: StationId) -> Option<&Node> {
        self.nodes.get(&station)
    }

    /// Iterates over all nodes in identity order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Station RRC of `station`.
    pub fn enb(&self, station: StationId) -> Option<&EnbRrc> {
        self.nodes.get(&station).and_then(Node::enb)
    }

    /// Terminal RRC of `ue`.
    pub fn ue(&self, ue: StationId) -> Option<&UeRrc> {
        self.nodes.get(&ue).and_then(Node::ue)
    }

    /// The anchor's location map.
    pub fn location(&self) -> Option<&LocationInfo> {
        self.nodes
            .get(&self.config.epc.anchor)
            .and_then(Node::location)
    }

    /// Everything recorded so far.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// EPC envelopes sent so far as `(kind, src, dst)`, in send order.
    pub fn epc_sequence(&self) -> Vec<(MessageKind, StationId, StationId)> {
        self.trace
            .iter()
            .filter_map(|entry| match entry.event {
                TraceEvent::EpcSent { src, dst, kind } => Some((kind, src, dst)),
                _ => None,
            })
            .collect()
    }

    /// Signals raised by `node`, in order.
    pub fn signals(&self, node: StationId) -> Vec<RanSignal> {
        self.trace
            .iter()
            .filter_map(|entry| match &entry.event {
                TraceEvent::Signal { node: n, signal } if *n == node => Some(signal.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of radio notifications of `kind` put on the air.
    pub fn radio_sent(&self, kind: RadioKind) -> usize {
        self.trace
            .iter()
            .filter(|entry| matches!(entry.event, TraceEvent::RadioSent { kind: k, .. } if k == kind))
            .count()
    }

    /// Logs the counters of every node.
    pub fn finalize(&self) {
        info!("Run finished at {} after {} trace records", self.now(), self.trace.len());
        for node in self.nodes.values() {
            info!("{}", node.summary());
        }
    }
}
