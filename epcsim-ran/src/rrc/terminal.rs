//! Terminal (UE) RRC
//!
//! Drives the MAC random access towards a station, then waits for the
//! station to confirm the connection. A handover command from the serving
//! station moves the data route to the target and repeats the random access
//! there with the handover flag set.

use std::fmt;
use std::time::Duration;

use epcsim_common::{Error, RandomAccessConfig, Result, RrcTimerConfig, StationId};
use epcsim_epc::RrcReconfiguration;
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::action::{RanAction, RanSignal};
use crate::mac::{MacState, PreambleTransmission, RandomAccess, TimeoutStep};
use crate::radio::RadioMessage;
use crate::rrc::connection::{ConnectionInfoManager, ConnectionState};
use crate::stats::{MacStats, RrcStats};
use crate::timer::{TimerKey, TimerKind, TimerTable, TimerToken};

/// RRC state of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UeRrcState {
    /// Not attached, no procedure running
    #[default]
    Idle,
    /// Fresh attach in progress
    Establishing,
    /// Served by a station
    Connected,
    /// Moving to a target station
    Handover,
}

impl fmt::Display for UeRrcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UeRrcState::Idle => write!(f, "Idle"),
            UeRrcState::Establishing => write!(f, "Establishing"),
            UeRrcState::Connected => write!(f, "Connected"),
            UeRrcState::Handover => write!(f, "Handover"),
        }
    }
}

/// RRC of one terminal.
#[derive(Debug)]
pub struct UeRrc {
    ue: StationId,
    state: UeRrcState,
    serving: Option<StationId>,
    timer_config: RrcTimerConfig,
    mac: RandomAccess,
    connections: ConnectionInfoManager,
    timers: TimerTable,
    stats: RrcStats,
    outbox: Vec<RanAction>,
}

impl UeRrc {
    /// Creates an idle terminal.
    pub fn new(ue: StationId, ra_config: RandomAccessConfig, timer_config: RrcTimerConfig) -> Self {
        Self {
            ue,
            state: UeRrcState::Idle,
            serving: None,
            timer_config,
            mac: RandomAccess::new(ra_config),
            connections: ConnectionInfoManager::new(),
            timers: TimerTable::new(),
            stats: RrcStats::default(),
            outbox: Vec::new(),
        }
    }

    /// Local terminal.
    pub fn ue(&self) -> StationId {
        self.ue
    }

    /// RRC state.
    pub fn state(&self) -> UeRrcState {
        self.state
    }

    /// Serving station, once connected.
    pub fn serving(&self) -> Option<StationId> {
        self.serving
    }

    /// Random-access procedure.
    pub fn mac(&self) -> &RandomAccess {
        &self.mac
    }

    /// Random-access counters.
    pub fn mac_stats(&self) -> &MacStats {
        self.mac.stats()
    }

    /// Connection records, one per station being attached or attached to.
    pub fn connections(&self) -> &ConnectionInfoManager {
        &self.connections
    }

    /// Armed timers.
    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    /// RRC counters.
    pub fn stats(&self) -> &RrcStats {
        &self.stats
    }

    fn emit(&mut self, action: RanAction) {
        self.outbox.push(action);
    }

    fn arm(&mut self, station: StationId, kind: TimerKind, delay: Duration) {
        let key = TimerKey::new(station, kind);
        let token = self.timers.arm(key);
        trace!("UE {} arm {} for {:?}", self.ue, key, delay);
        self.emit(RanAction::ArmTimer { key, token, delay });
    }

    fn cancel(&mut self, station: StationId, kind: TimerKind) -> bool {
        self.timers.cancel(TimerKey::new(station, kind))
    }

    fn transmit(&mut self, preamble: PreambleTransmission) {
        self.emit(RanAction::Radio {
            to: preamble.target,
            message: RadioMessage::Preamble {
                index: preamble.index,
                power_dbm: preamble.power_dbm,
                handover: preamble.handover,
            },
        });
        let delay = self.mac.config().grant_wait();
        self.arm(preamble.target, TimerKind::RaGrantWait, delay);
    }

    /// Starts a fresh attach towards `station`.
    pub fn attach<R: Rng>(&mut self, station: StationId, rng: &mut R) -> Result<Vec<RanAction>> {
        self.outbox.clear();
        if self.state != UeRrcState::Idle {
            return Err(Error::StateMachine(format!(
                "UE {} cannot attach to {station} in state {}",
                self.ue, self.state
            )));
        }

        let preamble = self.mac.start(station, false, rng)?;
        self.connections.create(station, ConnectionState::Waiting);
        self.state = UeRrcState::Establishing;
        info!("UE {} attaching to {}", self.ue, station);
        self.transmit(preamble);
        Ok(std::mem::take(&mut self.outbox))
    }

    /// Handles a radio notification from a station.
    pub fn on_radio<R: Rng>(
        &mut self,
        from: StationId,
        message: RadioMessage,
        rng: &mut R,
    ) -> Result<Vec<RanAction>> {
        self.outbox.clear();
        match message {
            RadioMessage::RaGrant => self.on_grant(from),
            RadioMessage::ConnectionEstablished => self.on_connection_established(from)?,
            RadioMessage::ReconfigurationConfirmed => self.on_reconfiguration_confirmed(from)?,
            RadioMessage::Reconfiguration(reconfiguration) => {
                self.on_reconfiguration(from, reconfiguration, rng)?
            }
            other => {
                return Err(Error::violation(
                    self.ue,
                    format!("{} received from {from}", other.kind()),
                ))
            }
        }
        Ok(std::mem::take(&mut self.outbox))
    }

    fn on_grant(&mut self, from: StationId) {
        if !self.mac.on_grant(from) {
            return;
        }
        self.cancel(from, TimerKind::RaGrantWait);
        self.cancel(from, TimerKind::RaBackoff);
        self.emit(RanAction::Notify(RanSignal::EstablishmentResult {
            station: from,
            success: true,
        }));

        if self.state == UeRrcState::Handover {
            self.emit(RanAction::Radio {
                to: from,
                message: RadioMessage::ReconfigurationComplete,
            });
            let delay = Duration::from_millis(self.timer_config.wait_rrc_connected_reconf_ms);
            self.arm(from, TimerKind::WaitRrcConnectedReconf, delay);
        } else {
            self.emit(RanAction::Radio {
                to: from,
                message: RadioMessage::ConnectionSetupComplete,
            });
            let delay = Duration::from_millis(self.timer_config.wait_rrc_connected_ms);
            self.arm(from, TimerKind::WaitRrcConnected, delay);
        }
    }

    fn on_connection_established(&mut self, from: StationId) -> Result<()> {
        if !self.cancel(from, TimerKind::WaitRrcConnected) {
            debug!("UE {} unexpected ConnectionEstablished from {}", self.ue, from);
            return Ok(());
        }
        match self.connections.try_find_mut(from) {
            Some(info) => info.state = ConnectionState::Connected,
            None => {
                return Err(Error::violation(
                    self.ue,
                    format!("connected to {from} without a connection record"),
                ))
            }
        }

        self.state = UeRrcState::Connected;
        self.serving = Some(from);
        self.stats.connections_established += 1;
        info!("UE {} connected to {}", self.ue, from);
        self.emit(RanAction::AddRoute { towards: from });
        self.emit(RanAction::Notify(RanSignal::Connected { peer: from }));
        Ok(())
    }

    fn on_reconfiguration_confirmed(&mut self, from: StationId) -> Result<()> {
        if !self.cancel(from, TimerKind::WaitRrcConnectedReconf) {
            debug!("UE {} unexpected ReconfigurationConfirmed from {}", self.ue, from);
            return Ok(());
        }
        match self.connections.try_find_mut(from) {
            Some(info) => {
                info.state = ConnectionState::Connected;
                info.participator = None;
            }
            None => {
                return Err(Error::violation(
                    self.ue,
                    format!("handover to {from} without a connection record"),
                ))
            }
        }

        self.state = UeRrcState::Connected;
        self.serving = Some(from);
        self.stats.connections_established += 1;
        self.stats.handovers_completed += 1;
        info!("UE {} handed over to {}", self.ue, from);
        self.emit(RanAction::Notify(RanSignal::Connected { peer: from }));
        Ok(())
    }

    fn on_reconfiguration<R: Rng>(
        &mut self,
        from: StationId,
        reconfiguration: RrcReconfiguration,
        rng: &mut R,
    ) -> Result<()> {
        let participator = reconfiguration.participator;
        let valid = self.state == UeRrcState::Connected
            && self.serving == Some(from)
            && participator.ue == self.ue
            && participator.source == from
            && participator.target.is_valid()
            && participator.target != from;
        if !valid {
            return Err(Error::violation(
                self.ue,
                format!(
                    "reconfiguration ({participator}) from {from} in state {}",
                    self.state
                ),
            ));
        }

        let target = participator.target;
        info!("UE {} handover command {}", self.ue, participator);
        self.emit(RanAction::DeleteRoute { towards: from });
        self.emit(RanAction::AddRoute { towards: target });
        self.connections.delete(from);
        self.timers.cancel_peer(from);
        if let Some(info) = self.connections.create(target, ConnectionState::Handover) {
            info.participator = Some(participator);
        }

        self.mac.reset();
        self.state = UeRrcState::Handover;
        self.serving = None;
        self.stats.handovers_started += 1;
        let preamble = self.mac.start(target, true, rng)?;
        self.transmit(preamble);
        Ok(())
    }

    /// Handles a timer expiry; stale expiries are ignored.
    pub fn on_timer<R: Rng>(
        &mut self,
        key: TimerKey,
        token: TimerToken,
        rng: &mut R,
    ) -> Result<Vec<RanAction>> {
        self.outbox.clear();
        if !self.timers.take_expired(key, token) {
            trace!("UE {} stale expiry {}", self.ue, key);
            return Ok(Vec::new());
        }
        debug!("UE {} timer {} expired", self.ue, key);

        match key.kind {
            TimerKind::RaGrantWait => match self.mac.on_grant_wait_timeout(rng)? {
                TimeoutStep::Backoff(delay) => self.arm(key.peer, TimerKind::RaBackoff, delay),
                TimeoutStep::Failed(station) => self.establishment_failed(station),
            },
            TimerKind::RaBackoff => {
                let preamble = self.mac.on_backoff_timeout(rng)?;
                self.transmit(preamble);
            }
            TimerKind::WaitRrcConnected | TimerKind::WaitRrcConnectedReconf => {
                warn!("UE {} no confirmation from {}", self.ue, key.peer);
                self.restart_cell_selection(key.peer);
            }
            other => {
                return Err(Error::StateMachine(format!(
                    "UE {} got station timer {other}",
                    self.ue
                )))
            }
        }
        Ok(std::mem::take(&mut self.outbox))
    }

    fn establishment_failed(&mut self, station: StationId) {
        self.emit(RanAction::Notify(RanSignal::EstablishmentResult {
            station,
            success: false,
        }));
        if self.state == UeRrcState::Handover {
            self.restart_cell_selection(station);
        } else {
            self.drop_attempt(station);
        }
    }

    fn restart_cell_selection(&mut self, station: StationId) {
        if self.state == UeRrcState::Handover {
            self.stats.handovers_failed += 1;
            self.emit(RanAction::DeleteRoute { towards: station });
        }
        self.drop_attempt(station);
        self.stats.cell_selection_restarts += 1;
        info!("UE {} restarting cell selection after {}", self.ue, station);
        self.emit(RanAction::Notify(RanSignal::CellSelectionRestart { station }));
    }

    fn drop_attempt(&mut self, station: StationId) {
        self.connections.delete(station);
        self.timers.cancel_peer(station);
        if self.mac.state() != MacState::Idle {
            self.mac.reset();
        }
        self.state = UeRrcState::Idle;
        self.serving = None;
    }

    /// Drops the connection to the serving station and returns to idle.
    pub fn release(&mut self) -> Vec<RanAction> {
        self.outbox.clear();
        if let Some(station) = self.serving {
            self.emit(RanAction::DeleteRoute { towards: station });
        }
        let peers: Vec<StationId> = self.connections.iter().map(|info| info.peer).collect();
        for peer in peers {
            self.drop_attempt(peer);
        }
        self.mac.reset();
        self.state = UeRrcState::Idle;
        self.serving = None;
        info!("UE {} released", self.ue);
        std::mem::take(&mut self.outbox)
    }
}
