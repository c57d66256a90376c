//! Station (eNB) RRC: establishment and both ends of the handover
//!
//! # Establishment
//!
//! A received preamble is granted immediately and creates a `Waiting`
//! record. The terminal's `ConnectionSetupComplete` promotes it to
//! `Connected`, installs the terminal's route and sends AttachUE to the
//! anchor.
//!
//! # Handover, source side
//!
//! `start_handover` sends HandoverRequest and arms TRelocPrep. The ack
//! relays the reconfiguration to the terminal, moves the record to
//! `Handover`, arms TRelocOverall and sends SN status plus any buffered
//! data to the target. UeContextRelease (or TRelocOverall) drops the record.
//!
//! # Handover, target side
//!
//! An admitted HandoverRequest creates a `Handover` record and is acked.
//! When the terminal reports reconfiguration complete the target asks the
//! anchor to switch the path and waits for both the path-switch ack and the
//! end marker; whichever arrives second completes the handover.

use std::time::Duration;

use bytes::Bytes;
use epcsim_common::{
    Error, HandoverConfig, HandoverParticipator, PreparationFailurePolicy, Result, StationId,
};
use epcsim_epc::{
    EpcCodecError, EpcHandler, EpcMessage, RrcReconfiguration, SnStatusItem, UeLocation,
    MAX_FORWARDED_SDU_LENGTH,
};
use tracing::{debug, info, trace, warn};

use crate::action::{RanAction, RanSignal};
use crate::radio::RadioMessage;
use crate::rrc::connection::{BufferedSdu, ConnectionInfoManager, ConnectionState};
use crate::stats::{MacStats, RrcStats};
use crate::timer::{TimerKey, TimerKind, TimerTable, TimerToken};

/// RRC of one station.
#[derive(Debug)]
pub struct EnbRrc {
    station: StationId,
    config: HandoverConfig,
    connections: ConnectionInfoManager,
    timers: TimerTable,
    stats: RrcStats,
    mac: MacStats,
    outbox: Vec<RanAction>,
}

impl EnbRrc {
    /// Creates the RRC of `station`.
    pub fn new(station: StationId, config: HandoverConfig) -> Self {
        Self {
            station,
            config,
            connections: ConnectionInfoManager::new(),
            timers: TimerTable::new(),
            stats: RrcStats::default(),
            mac: MacStats::default(),
            outbox: Vec::new(),
        }
    }

    /// Local station.
    pub fn station(&self) -> StationId {
        self.station
    }

    /// Connection records.
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

    /// Station-side random-access counters.
    pub fn mac_stats(&self) -> &MacStats {
        &self.mac
    }

    /// Drains actions produced through [`EpcHandler`].
    pub fn take_actions(&mut self) -> Vec<RanAction> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, action: RanAction) {
        self.outbox.push(action);
    }

    fn send(&mut self, message: EpcMessage) {
        self.emit(RanAction::Epc(message));
    }

    fn timer_delay(&self, kind: TimerKind) -> Result<Duration> {
        let ms = match kind {
            TimerKind::RelocPrep => self.config.reloc_prep_ms,
            TimerKind::RelocOverall => self.config.reloc_overall_ms,
            TimerKind::WaitSnStatusTransfer => self.config.wait_sn_status_transfer_ms,
            TimerKind::WaitAttachUeByHo => self.config.wait_attach_ue_by_ho_ms,
            TimerKind::WaitEndMarker => self.config.wait_end_marker_ms,
            TimerKind::WaitPathSwitchReqAck => self.config.wait_path_switch_req_ack_ms,
            other => {
                return Err(Error::StateMachine(format!(
                    "eNB {} has no timer {other}",
                    self.station
                )))
            }
        };
        Ok(Duration::from_millis(ms))
    }

    fn arm(&mut self, ue: StationId, kind: TimerKind) -> Result<()> {
        let delay = self.timer_delay(kind)?;
        let key = TimerKey::new(ue, kind);
        let token = self.timers.arm(key);
        trace!("eNB {} arm {} for {:?}", self.station, key, delay);
        self.emit(RanAction::ArmTimer { key, token, delay });
        Ok(())
    }

    fn cancel(&mut self, ue: StationId, kind: TimerKind) -> bool {
        let cancelled = self.timers.cancel(TimerKey::new(ue, kind));
        if cancelled {
            trace!("eNB {} cancel {} for {}", self.station, kind, ue);
        }
        cancelled
    }

    fn is_running(&self, ue: StationId, kind: TimerKind) -> bool {
        self.timers.is_running(TimerKey::new(ue, kind))
    }

    /// Handles a radio notification from a terminal.
    pub fn on_radio(&mut self, from: StationId, message: RadioMessage) -> Result<Vec<RanAction>> {
        self.outbox.clear();
        match message {
            RadioMessage::Preamble { handover, .. } => self.on_preamble(from, handover)?,
            RadioMessage::ConnectionSetupComplete => self.on_connection_setup_complete(from)?,
            RadioMessage::ReconfigurationComplete => self.on_reconfiguration_complete(from)?,
            other => {
                return Err(Error::violation(
                    self.station,
                    format!("{} received from {from}", other.kind()),
                ));
            }
        }
        Ok(self.take_actions())
    }

    fn on_preamble(&mut self, ue: StationId, handover: bool) -> Result<()> {
        let mut existing = self.connections.state_of(ue);
        if !handover && existing == Some(ConnectionState::Handover) {
            debug!(
                "eNB {} ignores non-handover preamble from {} during handover",
                self.station, ue
            );
            return Ok(());
        }
        if !handover && existing == Some(ConnectionState::Connected) {
            // The terminal gave up on this context and is establishing again
            info!("eNB {} UE {} re-establishing, dropping stale context", self.station, ue);
            self.detach(ue);
            existing = None;
        }

        self.mac.preambles_received += 1;
        self.emit(RanAction::Radio {
            to: ue,
            message: RadioMessage::RaGrant,
        });
        self.mac.grants_sent += 1;

        match existing {
            None => {
                self.connections.create(ue, ConnectionState::Waiting);
                info!("eNB {} granted {}, waiting for connection setup", self.station, ue);
            }
            Some(state @ (ConnectionState::Waiting | ConnectionState::Handover)) => {
                debug!("eNB {} granted {} again ({})", self.station, ue, state);
            }
            Some(ConnectionState::Connected) => {
                return Err(Error::violation(
                    self.station,
                    format!("preamble from connected UE {ue}"),
                ));
            }
        }
        Ok(())
    }

    fn on_connection_setup_complete(&mut self, ue: StationId) -> Result<()> {
        let station = self.station;
        match self.connections.try_find_mut(ue) {
            Some(info) if info.state == ConnectionState::Waiting => {
                info.state = ConnectionState::Connected;
                info.schedulable = true;
            }
            other => {
                let state = other.map(|info| info.state);
                return Err(Error::violation(
                    self.station,
                    format!("ConnectionSetupComplete from {ue} in state {state:?}"),
                ));
            }
        }

        self.stats.connections_established += 1;
        info!("eNB {} UE {} connected", station, ue);
        self.emit(RanAction::AddRoute { towards: ue });
        self.send(EpcMessage::AttachUe(UeLocation { ue, station }));
        self.emit(RanAction::Radio {
            to: ue,
            message: RadioMessage::ConnectionEstablished,
        });
        self.emit(RanAction::Notify(RanSignal::Connected { peer: ue }));
        Ok(())
    }

    fn on_reconfiguration_complete(&mut self, ue: StationId) -> Result<()> {
        let station = self.station;
        let participator = match self.connections.try_find_mut(ue) {
            Some(info) if info.state == ConnectionState::Handover => match info.participator {
                Some(p) if p.target == station => {
                    info.state = ConnectionState::Connected;
                    p
                }
                _ => {
                    return Err(Error::violation(
                        station,
                        format!("ReconfigurationComplete from {ue} without handover"),
                    ))
                }
            },
            other => {
                let state = other.map(|info| info.state);
                return Err(Error::violation(
                    self.station,
                    format!("ReconfigurationComplete from {ue} in state {state:?}"),
                ));
            }
        };

        self.stats.connections_established += 1;
        info!("eNB {} UE {} arrived by handover ({})", station, ue, participator);
        self.emit(RanAction::AddRoute { towards: ue });
        self.send(EpcMessage::PathSwitchRequest { participator });
        self.cancel(ue, TimerKind::WaitAttachUeByHo);
        self.arm(ue, TimerKind::WaitEndMarker)?;
        self.arm(ue, TimerKind::WaitPathSwitchReqAck)?;
        self.emit(RanAction::Radio {
            to: ue,
            message: RadioMessage::ReconfigurationConfirmed,
        });
        self.emit(RanAction::Notify(RanSignal::Connected { peer: ue }));
        Ok(())
    }

    /// Starts a handover of `ue` towards `target`.
    pub fn start_handover(&mut self, ue: StationId, target: StationId) -> Result<Vec<RanAction>> {
        self.outbox.clear();
        let station = self.station;
        if target == station || !target.is_valid() {
            return Err(Error::StateMachine(format!(
                "eNB {station} cannot hand {ue} over to {target}"
            )));
        }

        let participator = HandoverParticipator::new(ue, station, target);
        match self.connections.try_find_mut(ue) {
            Some(info) if info.is_connected() && info.participator.is_none() => {
                info.participator = Some(participator);
            }
            other => {
                let state = other.map(|info| info.state);
                return Err(Error::StateMachine(format!(
                    "eNB {station} cannot start handover of {ue} in state {state:?}"
                )));
            }
        }

        self.stats.handovers_started += 1;
        info!("eNB {} starting handover {}", station, participator);
        self.send(EpcMessage::HandoverRequest { participator });
        self.arm(ue, TimerKind::RelocPrep)?;
        Ok(self.take_actions())
    }

    /// Queues downlink data for a connected terminal.
    pub fn buffer_downlink(&mut self, ue: StationId, bearer_id: u8, data: Bytes) -> Result<()> {
        // Must fit one DataForwarding should the terminal hand over
        if data.len() > MAX_FORWARDED_SDU_LENGTH {
            return Err(EpcCodecError::PayloadTooLarge(data.len()).into());
        }
        let station = self.station;
        let info = self.connections.try_find_mut(ue).ok_or_else(|| {
            Error::StateMachine(format!("eNB {station} has no connection for {ue}"))
        })?;
        info.buffer_downlink(bearer_id, data);
        Ok(())
    }

    /// Drops a terminal whose radio link was lost.
    pub fn detach_ue(&mut self, ue: StationId) -> Result<Vec<RanAction>> {
        self.outbox.clear();
        self.detach(ue);
        Ok(self.take_actions())
    }

    fn detach(&mut self, ue: StationId) {
        if !self.connections.contains(ue) {
            debug!("eNB {} detach of unknown UE {}", self.station, ue);
            return;
        }
        let station = self.station;
        self.emit(RanAction::DeleteRoute { towards: ue });
        self.send(EpcMessage::DetachUe(UeLocation { ue, station }));
        self.drop_context(ue);
        info!("eNB {} detached UE {}", station, ue);
    }

    fn release_context(&mut self, ue: StationId) {
        self.emit(RanAction::DeleteRoute { towards: ue });
        self.drop_context(ue);
        info!("eNB {} released context of UE {}", self.station, ue);
    }

    fn drop_context(&mut self, ue: StationId) {
        self.connections.delete(ue);
        self.timers.cancel_peer(ue);
    }

    fn handle_epc(&mut self, src: StationId, message: EpcMessage) -> Result<()> {
        debug!("eNB {} <- {}: {}", self.station, src, message.kind());
        match message {
            EpcMessage::HandoverRequest { participator } => self.on_handover_request(participator),
            EpcMessage::HandoverRequestAck {
                participator,
                reconfiguration,
            } => self.on_handover_request_ack(participator, reconfiguration),
            EpcMessage::SnStatusTransfer {
                participator,
                items,
            } => {
                self.on_sn_status_transfer(participator, &items);
                Ok(())
            }
            EpcMessage::DataForwarding {
                participator,
                bearer_id,
                data,
            } => {
                self.on_data_forwarding(participator, bearer_id, data);
                Ok(())
            }
            EpcMessage::PathSwitchRequestAck {
                participator,
                result,
            } => self.on_path_switch_request_ack(participator, result),
            EpcMessage::EndMarker { participator } => {
                if participator.source == self.station {
                    self.send(EpcMessage::EndMarker { participator });
                } else {
                    self.on_end_marker_at_target(participator);
                }
                Ok(())
            }
            EpcMessage::UeContextRelease { participator } => self.on_ue_context_release(participator),
            EpcMessage::HoPreparationFailure { participator } => {
                if self.cancel(participator.ue, TimerKind::RelocPrep) {
                    self.preparation_failed(participator);
                } else {
                    debug!("eNB {} late HoPreparationFailure ({})", self.station, participator);
                }
                Ok(())
            }
            other @ (EpcMessage::AttachUe(_)
            | EpcMessage::DetachUe(_)
            | EpcMessage::PathSwitchRequest { .. }) => {
                Err(Error::violation(
                    self.station,
                    format!("{} is for the anchor", other.kind()),
                ))
            }
        }
    }

    fn on_handover_request(&mut self, participator: HandoverParticipator) -> Result<()> {
        let ue = participator.ue;
        if !self.config.admit_handover || self.connections.contains(ue) {
            info!("eNB {} rejects handover {}", self.station, participator);
            self.send(EpcMessage::HoPreparationFailure { participator });
            return Ok(());
        }

        self.send(EpcMessage::HandoverRequestAck {
            participator,
            reconfiguration: RrcReconfiguration { participator },
        });
        if let Some(info) = self.connections.create(ue, ConnectionState::Handover) {
            info.participator = Some(participator);
        }
        self.stats.handovers_started += 1;
        info!("eNB {} admitted handover {}", self.station, participator);
        self.arm(ue, TimerKind::WaitSnStatusTransfer)?;
        self.arm(ue, TimerKind::WaitAttachUeByHo)?;
        Ok(())
    }

    fn on_handover_request_ack(
        &mut self,
        participator: HandoverParticipator,
        reconfiguration: RrcReconfiguration,
    ) -> Result<()> {
        let ue = participator.ue;
        if !self.cancel(ue, TimerKind::RelocPrep) {
            warn!("eNB {} late HandoverRequestAck ({}), ignored", self.station, participator);
            return Ok(());
        }

        let (items, buffered) = match self.connections.try_find_mut(ue) {
            Some(info) if info.is_connected() && info.participator == Some(participator) => {
                info.state = ConnectionState::Handover;
                info.schedulable = false;
                (info.sn_status_items(), std::mem::take(&mut info.buffered))
            }
            _ => {
                return Err(Error::violation(
                    self.station,
                    format!("HandoverRequestAck for {participator} without a matching preparation"),
                ))
            }
        };

        info!("eNB {} executing handover {}", self.station, participator);
        self.emit(RanAction::Radio {
            to: ue,
            message: RadioMessage::Reconfiguration(reconfiguration),
        });
        self.arm(ue, TimerKind::RelocOverall)?;
        self.send(EpcMessage::SnStatusTransfer { participator, items });
        for BufferedSdu { bearer_id, data } in buffered {
            self.send(EpcMessage::DataForwarding {
                participator,
                bearer_id,
                data,
            });
        }
        Ok(())
    }

    fn on_sn_status_transfer(&mut self, participator: HandoverParticipator, items: &[SnStatusItem]) {
        let ue = participator.ue;
        self.cancel(ue, TimerKind::WaitSnStatusTransfer);
        match self.connections.try_find_mut(ue) {
            Some(info) => {
                info.apply_sn_status(items);
                info.schedulable = true;
            }
            None => warn!("eNB {} SnStatusTransfer for unknown UE {}", self.station, ue),
        }
    }

    fn on_data_forwarding(&mut self, participator: HandoverParticipator, bearer_id: u8, data: Bytes) {
        match self.connections.try_find_mut(participator.ue) {
            Some(info) => info.buffered.push(BufferedSdu { bearer_id, data }),
            None => warn!(
                "eNB {} dropped forwarded data for unknown UE {}",
                self.station, participator.ue
            ),
        }
    }

    fn on_path_switch_request_ack(&mut self, participator: HandoverParticipator, result: bool) -> Result<()> {
        if !result {
            return Err(Error::violation(
                self.station,
                format!("path switch failed for {participator}"),
            ));
        }
        let ue = participator.ue;
        self.cancel(ue, TimerKind::WaitPathSwitchReqAck);
        if !self.is_running(ue, TimerKind::WaitEndMarker) {
            self.complete_handover(participator);
        }
        self.send(EpcMessage::UeContextRelease { participator });
        Ok(())
    }

    fn on_end_marker_at_target(&mut self, participator: HandoverParticipator) {
        let ue = participator.ue;
        self.cancel(ue, TimerKind::WaitEndMarker);
        if !self.is_running(ue, TimerKind::WaitPathSwitchReqAck) {
            self.complete_handover(participator);
        }
    }

    fn complete_handover(&mut self, participator: HandoverParticipator) {
        match self.connections.try_find_mut(participator.ue) {
            Some(info) if info.is_connected() && info.participator == Some(participator) => {
                info.participator = None;
            }
            _ => {
                debug!("eNB {} handover {} already closed", self.station, participator);
                return;
            }
        }
        self.stats.handovers_completed += 1;
        info!("eNB {} handover completed {}", self.station, participator);
        self.emit(RanAction::Notify(RanSignal::HandoverCompleted { participator }));
    }

    fn on_ue_context_release(&mut self, participator: HandoverParticipator) -> Result<()> {
        let ue = participator.ue;
        self.cancel(ue, TimerKind::RelocOverall);
        match self.connections.state_of(ue) {
            None => {
                debug!("eNB {} UeContextRelease for released UE {}", self.station, ue);
                Ok(())
            }
            Some(ConnectionState::Handover) => {
                self.release_context(ue);
                Ok(())
            }
            Some(state) => Err(Error::violation(
                self.station,
                format!("UeContextRelease for {ue} in state {state}"),
            )),
        }
    }

    fn preparation_failed(&mut self, participator: HandoverParticipator) {
        let ue = participator.ue;
        self.stats.handovers_failed += 1;
        warn!(
            "eNB {} handover preparation failed {}, policy {}",
            self.station, participator, self.config.preparation_failure_policy
        );
        match self.config.preparation_failure_policy {
            PreparationFailurePolicy::RevertToConnected => {
                if let Some(info) = self.connections.try_find_mut(ue) {
                    info.state = ConnectionState::Connected;
                    info.participator = None;
                    info.schedulable = true;
                }
            }
            PreparationFailurePolicy::ReleaseContext => self.detach(ue),
        }
        self.emit(RanAction::Notify(RanSignal::HandoverFailed { participator }));
    }

    /// Handles a timer expiry; stale expiries are ignored.
    pub fn on_timer(&mut self, key: TimerKey, token: TimerToken) -> Result<Vec<RanAction>> {
        self.outbox.clear();
        if !self.timers.take_expired(key, token) {
            trace!("eNB {} stale expiry {}", self.station, key);
            return Ok(Vec::new());
        }
        debug!("eNB {} timer {} expired", self.station, key);

        let ue = key.peer;
        let participator = self.connections.try_find(ue).and_then(|info| info.participator);

        match key.kind {
            TimerKind::RelocPrep => {
                if let Some(p) = participator {
                    self.preparation_failed(p);
                }
            }
            TimerKind::RelocOverall => {
                if self.connections.state_of(ue) == Some(ConnectionState::Handover) {
                    warn!("eNB {} no UeContextRelease for {}", self.station, ue);
                    self.release_context(ue);
                }
            }
            TimerKind::WaitSnStatusTransfer => {
                warn!(
                    "eNB {} no SnStatusTransfer for {}, continuing without it",
                    self.station, ue
                );
                if let Some(info) = self.connections.try_find_mut(ue) {
                    info.schedulable = true;
                }
            }
            TimerKind::WaitAttachUeByHo => {
                warn!("eNB {} UE {} never arrived by handover", self.station, ue);
                if let Some(p) = participator {
                    self.stats.handovers_failed += 1;
                    self.emit(RanAction::Notify(RanSignal::HandoverFailed { participator: p }));
                }
                self.detach(ue);
            }
            TimerKind::WaitEndMarker | TimerKind::WaitPathSwitchReqAck => {
                if let Some(p) = participator {
                    warn!("eNB {} handover {} stalled on {}", self.station, p, key.kind);
                    if let Some(info) = self.connections.try_find_mut(ue) {
                        info.participator = None;
                    }
                    self.stats.handovers_failed += 1;
                    self.emit(RanAction::Notify(RanSignal::HandoverStalled {
                        participator: p,
                        timer: key.kind,
                    }));
                }
            }
            other => {
                return Err(Error::StateMachine(format!(
                    "eNB {} got terminal timer {other}",
                    self.station
                )))
            }
        }
        Ok(self.take_actions())
    }
}

impl EpcHandler for EnbRrc {
    fn on_handover_signal(&mut self, src: StationId, message: EpcMessage) -> Result<()> {
        self.outbox.clear();
        self.handle_epc(src, message)
    }
}
