//! Configuration structures for random access, RRC timers, handover and the EPC
//!
//! Every section carries the reference defaults, so a YAML file only needs
//! to name the values it overrides.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::addressing::SignalingSubnet;
use crate::error::Error;
use crate::logging::LogLevel;
use crate::types::StationId;

/// Number of distinct random-access preambles.
pub const PREAMBLE_INDEX_MAX: u8 = 64;

/// Terminal-side random-access parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomAccessConfig {
    /// Preamble transmissions allowed before random access fails
    pub max_retransmissions: u32,
    /// Preamble initial received target power (dBm)
    pub initial_target_power: f64,
    /// Power increase per retransmission (dB)
    pub ramping_step: f64,
    /// Preamble format dependent power offset (dB)
    pub delta_preamble: f64,
    /// Backoff is drawn uniformly from `[0, backoff_window_ms)`
    pub backoff_window_ms: u64,
    /// How long to wait for a grant after each preamble (RA response window)
    pub grant_wait_ms: u64,
}

impl Default for RandomAccessConfig {
    fn default() -> Self {
        Self {
            max_retransmissions: 4,
            initial_target_power: -90.0,
            ramping_step: 2.0,
            delta_preamble: 0.0,
            backoff_window_ms: 10,
            grant_wait_ms: 10,
        }
    }
}

impl RandomAccessConfig {
    /// Grant-wait timer duration.
    pub fn grant_wait(&self) -> Duration {
        Duration::from_millis(self.grant_wait_ms)
    }

    /// Backoff window.
    pub fn backoff_window(&self) -> Duration {
        Duration::from_millis(self.backoff_window_ms)
    }
}

/// Terminal-side RRC establishment timers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RrcTimerConfig {
    /// Wait for RRC-Connected after a fresh random access (ms)
    pub wait_rrc_connected_ms: u64,
    /// Wait for RRC-Connected-Reconfiguration after a handover random access (ms)
    pub wait_rrc_connected_reconf_ms: u64,
}

impl Default for RrcTimerConfig {
    fn default() -> Self {
        Self {
            wait_rrc_connected_ms: 10,
            wait_rrc_connected_reconf_ms: 10,
        }
    }
}

/// What the source station does when handover preparation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreparationFailurePolicy {
    /// Keep serving the terminal in the connected state
    #[default]
    RevertToConnected,
    /// Drop the terminal: delete its route, detach it at the anchor
    ReleaseContext,
}

impl fmt::Display for PreparationFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreparationFailurePolicy::RevertToConnected => write!(f, "revert-to-connected"),
            PreparationFailurePolicy::ReleaseContext => write!(f, "release-context"),
        }
    }
}

/// Station-side handover timers and policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoverConfig {
    /// Source: wait for HandoverRequestAck (ms)
    pub reloc_prep_ms: u64,
    /// Source: wait for UeContextRelease (ms)
    pub reloc_overall_ms: u64,
    /// Target: wait for SnStatusTransfer (ms)
    pub wait_sn_status_transfer_ms: u64,
    /// Target: wait for the terminal to arrive by random access (ms)
    pub wait_attach_ue_by_ho_ms: u64,
    /// Target: wait for EndMarker (ms)
    pub wait_end_marker_ms: u64,
    /// Target: wait for PathSwitchRequestAck (ms)
    pub wait_path_switch_req_ack_ms: u64,
    /// Source behaviour on HoPreparationFailure
    pub preparation_failure_policy: PreparationFailurePolicy,
    /// Target admission control result
    pub admit_handover: bool,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            reloc_prep_ms: 200,
            reloc_overall_ms: 1000,
            wait_sn_status_transfer_ms: 500,
            wait_attach_ue_by_ho_ms: 500,
            wait_end_marker_ms: 200,
            wait_path_switch_req_ack_ms: 200,
            preparation_failure_policy: PreparationFailurePolicy::default(),
            admit_handover: true,
        }
    }
}

/// EPC (mobility anchor and signaling subnet) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpcConfig {
    /// Station acting as mobility anchor (SGW/MME)
    pub anchor: StationId,
    /// Subnet shared by the anchor and all eNBs
    #[serde(default)]
    pub subnet: SignalingSubnet,
    /// Fixed delivery delay for EPC messages (ms)
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,
}

fn default_message_delay_ms() -> u64 {
    1
}

impl Default for EpcConfig {
    fn default() -> Self {
        Self {
            anchor: StationId::new(1, 0),
            subnet: SignalingSubnet::default(),
            message_delay_ms: default_message_delay_ms(),
        }
    }
}

impl EpcConfig {
    /// EPC message delivery delay.
    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }
}

/// Simulated radio channel between terminals and stations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Delay of each PHY/MAC notification (ms)
    pub notification_delay_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            notification_delay_ms: 1,
        }
    }
}

impl RadioConfig {
    /// Radio notification delay.
    pub fn notification_delay(&self) -> Duration {
        Duration::from_millis(self.notification_delay_ms)
    }
}

/// Top-level configuration of one simulation run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Log level (overridden by `RUST_LOG`)
    #[serde(default)]
    pub log_level: LogLevel,
    /// Seed of the random generator driving preamble and backoff choices
    #[serde(default)]
    pub seed: u64,
    /// Random-access parameters
    #[serde(default)]
    pub random_access: RandomAccessConfig,
    /// RRC establishment timers
    #[serde(default)]
    pub rrc_timers: RrcTimerConfig,
    /// Handover timers and policies
    #[serde(default)]
    pub handover: HandoverConfig,
    /// EPC configuration
    #[serde(default)]
    pub epc: EpcConfig,
    /// Radio channel configuration
    #[serde(default)]
    pub radio: RadioConfig,
}

impl SimulationConfig {
    /// Parses a configuration from a YAML string.
    ///
    /// # Example
    /// ```
    /// use epcsim_common::SimulationConfig;
    ///
    /// let yaml = r#"
    /// seed: 7
    /// random_access:
    ///   max_retransmissions: 3
    /// epc:
    ///   anchor: { node_id: 1, interface_index: 0 }
    /// "#;
    ///
    /// let config = SimulationConfig::from_yaml(yaml).unwrap();
    /// assert_eq!(config.random_access.max_retransmissions, 3);
    /// assert_eq!(config.random_access.grant_wait_ms, 10);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Installs the global log subscriber at the configured level.
    pub fn init_logging(&self) {
        crate::logging::init_logging(self.log_level);
    }

    /// Serializes the configuration to a YAML string.
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks values that would make the run meaningless.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.epc.anchor.is_valid() {
            return Err(Error::Config("anchor station must be valid".into()));
        }
        if self.epc.subnet.prefix_len > 32 {
            return Err(Error::Config(format!(
                "subnet prefix length {} exceeds 32",
                self.epc.subnet.prefix_len
            )));
        }
        if self.epc.message_delay_ms == 0 {
            return Err(Error::Config("EPC message delay must be non-zero".into()));
        }
        if self.radio.notification_delay_ms == 0 {
            return Err(Error::Config("radio notification delay must be non-zero".into()));
        }
        if self.random_access.grant_wait_ms == 0 {
            return Err(Error::Config("grant wait duration must be non-zero".into()));
        }
        let ra = &self.random_access;
        if !(ra.initial_target_power.is_finite()
            && ra.ramping_step.is_finite()
            && ra.delta_preamble.is_finite())
        {
            return Err(Error::Config("random access power values must be finite".into()));
        }
        Ok(())
    }
}
