//! Terminal side of the random-access handshake
//!
//! ```text
//!            start                      grant
//!   Idle ──────────▶ RaGrantWaiting ──────────▶ Connected
//!                      │      ▲
//!         grant-wait   │      │ backoff timeout
//!         timeout      ▼      │ (retransmit)
//!                   RaBackoffWaiting ──grant──▶ Connected
//!
//!   grant-wait timeout with the counter past the limit ──▶ Failed (back to Idle)
//! ```
//!
//! The preamble transmission counter starts at 1 and is incremented after
//! every transmission, so with a limit of `N` the procedure arms the
//! grant-wait timer exactly `N` times before giving up.

use std::fmt;
use std::time::Duration;

use epcsim_common::{Error, RandomAccessConfig, Result, StationId, PREAMBLE_INDEX_MAX};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::stats::MacStats;

/// MAC state of the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacState {
    /// No procedure running
    #[default]
    Idle,
    /// Preamble sent, waiting for a grant
    RaGrantWaiting,
    /// Waiting out a backoff before the next preamble
    RaBackoffWaiting,
    /// Grant obtained
    Connected,
}

impl fmt::Display for MacState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacState::Idle => write!(f, "Idle"),
            MacState::RaGrantWaiting => write!(f, "RaGrantWaiting"),
            MacState::RaBackoffWaiting => write!(f, "RaBackoffWaiting"),
            MacState::Connected => write!(f, "Connected"),
        }
    }
}

/// One preamble to put on the air.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreambleTransmission {
    /// Station the preamble is aimed at
    pub target: StationId,
    /// Preamble index in `[0, PREAMBLE_INDEX_MAX)`
    pub index: u8,
    /// Transmit power (dBm)
    pub power_dbm: f64,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Part of a handover
    pub handover: bool,
}

/// Result of a grant-wait timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStep {
    /// Retry after the given backoff
    Backoff(Duration),
    /// Attempts exhausted against this station
    Failed(StationId),
}

/// Terminal random-access procedure.
#[derive(Debug)]
pub struct RandomAccess {
    config: RandomAccessConfig,
    state: MacState,
    preamble_transmission_counter: u32,
    target: Option<StationId>,
    handover: bool,
    stats: MacStats,
}

impl RandomAccess {
    /// Creates an idle procedure.
    pub fn new(config: RandomAccessConfig) -> Self {
        Self {
            config,
            state: MacState::Idle,
            preamble_transmission_counter: 1,
            target: None,
            handover: false,
            stats: MacStats::default(),
        }
    }

    /// Current MAC state.
    pub fn state(&self) -> MacState {
        self.state
    }

    /// Attempt number of the next preamble.
    pub fn preamble_transmission_counter(&self) -> u32 {
        self.preamble_transmission_counter
    }

    /// Station the procedure runs against.
    pub fn target(&self) -> Option<StationId> {
        self.target
    }

    /// Returns true if the running procedure is part of a handover.
    pub fn is_handover(&self) -> bool {
        self.handover
    }

    /// Random-access parameters.
    pub fn config(&self) -> &RandomAccessConfig {
        &self.config
    }

    /// Counters.
    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    /// Transmit power of attempt `attempt` (1-based).
    pub fn transmit_power(&self, attempt: u32) -> f64 {
        let ramp = f64::from(attempt.saturating_sub(1)) * self.config.ramping_step;
        self.config.initial_target_power + self.config.delta_preamble + ramp
    }

    /// Starts random access against `target`. The MAC must be idle.
    pub fn start<R: Rng>(
        &mut self,
        target: StationId,
        handover: bool,
        rng: &mut R,
    ) -> Result<PreambleTransmission> {
        if self.state != MacState::Idle {
            return Err(Error::StateMachine(format!(
                "random access towards {target} requested in MAC state {}",
                self.state
            )));
        }
        self.target = Some(target);
        self.handover = handover;
        self.preamble_transmission_counter = 1;
        info!(
            "Random access towards {}{}",
            target,
            if handover { " (handover)" } else { "" }
        );
        self.transmit(target, rng)
    }

    fn transmit<R: Rng>(&mut self, target: StationId, rng: &mut R) -> Result<PreambleTransmission> {
        let attempt = self.preamble_transmission_counter;
        let preamble = PreambleTransmission {
            target,
            index: rng.gen_range(0..PREAMBLE_INDEX_MAX),
            power_dbm: self.transmit_power(attempt),
            attempt,
            handover: self.handover,
        };
        self.preamble_transmission_counter += 1;
        self.state = MacState::RaGrantWaiting;
        self.stats.preambles_sent += 1;
        debug!(
            "Preamble {} to {} attempt {} at {:.1} dBm",
            preamble.index, target, attempt, preamble.power_dbm
        );
        Ok(preamble)
    }

    fn running_target(&self) -> Result<StationId> {
        self.target
            .ok_or_else(|| Error::StateMachine(format!("no random access target in MAC state {}", self.state)))
    }

    /// Handles a grant from `from`.
    ///
    /// Returns true if it completed the procedure. Grants from another
    /// station or outside a waiting state are ignored.
    pub fn on_grant(&mut self, from: StationId) -> bool {
        let waiting = matches!(self.state, MacState::RaGrantWaiting | MacState::RaBackoffWaiting);
        if !waiting || self.target != Some(from) {
            debug!("Grant from {} ignored in MAC state {}", from, self.state);
            return false;
        }
        self.stats.grants_received += 1;
        self.preamble_transmission_counter = 1;
        self.state = MacState::Connected;
        info!("Random access to {} succeeded", from);
        true
    }

    /// Handles expiry of the grant-wait timer.
    pub fn on_grant_wait_timeout<R: Rng>(&mut self, rng: &mut R) -> Result<TimeoutStep> {
        if self.state != MacState::RaGrantWaiting {
            return Err(Error::StateMachine(format!(
                "grant-wait timeout in MAC state {}",
                self.state
            )));
        }
        let target = self.running_target()?;

        if self.preamble_transmission_counter > self.config.max_retransmissions {
            warn!(
                "Random access to {} failed after {} preambles",
                target,
                self.preamble_transmission_counter - 1
            );
            self.stats.ra_failures += 1;
            self.reset();
            return Ok(TimeoutStep::Failed(target));
        }

        let backoff = self.sample_backoff(rng);
        self.state = MacState::RaBackoffWaiting;
        self.stats.backoffs += 1;
        debug!("No grant from {}, backing off {:?}", target, backoff);
        Ok(TimeoutStep::Backoff(backoff))
    }

    /// Handles expiry of the backoff timer by retransmitting.
    pub fn on_backoff_timeout<R: Rng>(&mut self, rng: &mut R) -> Result<PreambleTransmission> {
        if self.state != MacState::RaBackoffWaiting {
            return Err(Error::StateMachine(format!(
                "backoff timeout in MAC state {}",
                self.state
            )));
        }
        let target = self.running_target()?;
        self.transmit(target, rng)
    }

    /// Draws a backoff uniformly from `[0, backoff_window)`.
    pub fn sample_backoff<R: Rng>(&self, rng: &mut R) -> Duration {
        let window_us = self.config.backoff_window().as_micros() as u64;
        if window_us == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rng.gen_range(0..window_us))
    }

    /// Drops any running procedure and returns to idle.
    pub fn reset(&mut self) {
        self.state = MacState::Idle;
        self.preamble_transmission_counter = 1;
        self.target = None;
        self.handover = false;
    }
}
