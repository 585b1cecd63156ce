// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration - single source of truth.
//!
//! This module centralizes ALL protocol timing constants and the runtime
//! configuration. **NEVER hardcode these elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time constants (timings, retry limits)
//! - **Level 2 (Dynamic)**: [`RuntimeConfig`] holding the engine flags,
//!   swapped atomically so the dispatch path reads them lock-free
//! - **Level 3 (Declarative)**: the serde schema types (`known_list`,
//!   per-controller system schemas), loadable from YAML with the
//!   `config-loaders` feature

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::protocol::address::DeviceId;

// =======================================================================
// Binding FSM timings (protocol defaults; tests may raise them)
// =======================================================================

/// Respondent: how long to listen for an Offer.
pub const TENDER_WAIT_TIME: Duration = Duration::from_secs(3);

/// Supplicant: how long to wait for an Accept after sending the Offer.
pub const ACCEPT_WAIT_TIME: Duration = Duration::from_secs(3);

/// Respondent: how long to wait for a Confirm after sending the Accept.
pub const AFFIRM_WAIT_TIME: Duration = Duration::from_secs(3);

/// Respondent: how long to wait for the optional Addenda (10E0).
pub const RATIFY_WAIT_TIME: Duration = Duration::from_secs(3);

/// BoundAccepted auto-transitions to Bound after this idle time.
pub const BOUND_ACCEPTED_LINGER: Duration = Duration::from_secs(3);

/// Supplicant: Confirm retransmits until an echo is seen.
pub const CONFIRM_RETRY_LIMIT: u8 = 3;

/// Offer/Accept send retry limit.
pub const SENDING_RETRY_LIMIT: u8 = 3;

/// Retransmit interval while waiting for a command echo.
pub const ECHO_RETRY_INTERVAL: Duration = Duration::from_millis(800);

// =======================================================================
// Discovery scheduler
// =======================================================================

/// Minimum polling floor ("min cycle").
pub const MIN_CYCLE_SECS: u64 = 3;

/// Minimum registration interval ("max cycle").
pub const MAX_CYCLE_SECS: u64 = 30;

/// Backoff ceiling: a registration with > 5 consecutive failures is
/// throttled to one attempt per day.
pub const THROTTLE_SECS: u64 = 24 * 60 * 60;

/// Initial-delay jitter bounds, seconds.
pub const JITTER_MIN_SECS: f64 = 0.05;
pub const JITTER_MAX_SECS: f64 = 0.45;

/// Consecutive unanswered sends before an entity is send-deprecated.
pub const QOS_TX_LIMIT: u32 = 12;

// =======================================================================
// Message interpretation
// =======================================================================

/// Two consecutive I-arrays within this window merge as one array.
pub const ARRAY_MERGE_WINDOW: Duration = Duration::from_secs(3);

/// Slack added to the 1F09 cycle length when matching 30C9 arrays against
/// sensor announcements (zone-sensor eavesdropping).
pub const SENSOR_MATCH_SLACK: Duration = Duration::from_secs(5);

/// Default (and maximum) zone count per TCS.
pub const DEFAULT_MAX_ZONES: u8 = 12;
pub const ABSOLUTE_MAX_ZONES: u8 = 16;

// =======================================================================
// Schedule engine
// =======================================================================

/// Per-TCS schedule lock acquisition timeout.
pub const SCHEDULE_LOCK_TIMEOUT: Duration = Duration::from_secs(3 * 60);

// =======================================================================
// Processing reduction levels
// =======================================================================

pub const DONT_UPDATE_ENTITIES: u8 = 1;
pub const DONT_CREATE_ENTITIES: u8 = 2;
pub const DONT_CREATE_MESSAGES: u8 = 3;

/// How eagerly to use the OTB's native OpenTherm values over the
/// controller-reported ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseNativeOt {
    Always,
    #[default]
    Prefer,
    Avoid,
    Never,
}

/// The engine flags (the `config:` mapping of the YAML file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub disable_discovery: bool,
    pub enable_eavesdrop: bool,
    pub max_zones: u8,
    pub reduce_processing: u8,
    pub use_aliases: bool,
    pub use_native_ot: UseNativeOt,
    pub disable_sending: bool,
    pub enforce_known_list: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            disable_discovery: false,
            enable_eavesdrop: false,
            max_zones: DEFAULT_MAX_ZONES,
            reduce_processing: 0,
            use_aliases: false,
            use_native_ot: UseNativeOt::default(),
            disable_sending: false,
            enforce_known_list: false,
        }
    }
}

impl GatewayConfig {
    /// Range-check the numeric fields.
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=ABSOLUTE_MAX_ZONES).contains(&self.max_zones) {
            return Err(Error::Config(format!("max_zones out of range: {}", self.max_zones)));
        }
        if self.reduce_processing > DONT_CREATE_MESSAGES {
            return Err(Error::Config(format!(
                "reduce_processing out of range: {}",
                self.reduce_processing
            )));
        }
        Ok(())
    }
}

/// Per-device traits, as carried by the known/block lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceTraits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub faked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

/// The stored-hotwater slots of a controller schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DhwSchema {
    pub sensor: Option<DeviceId>,
    pub dhw_valve: Option<DeviceId>,
    pub htg_valve: Option<DeviceId>,
}

/// One zone of a controller schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZoneSchema {
    #[serde(rename = "class", skip_serializing_if = "Option::is_none")]
    pub klass: Option<String>,
    pub sensor: Option<DeviceId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actuators: Vec<DeviceId>,
}

/// The `system:` block of a controller schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemBlock {
    pub appliance_control: Option<DeviceId>,
}

/// A controller-keyed system schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemSchema {
    pub system: SystemBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_hotwater: Option<DhwSchema>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub underfloor_heating: BTreeMap<DeviceId, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub zones: BTreeMap<String, ZoneSchema>,
}

/// The full configuration surface the gateway recognizes.
///
/// `serial_port` and `packet_log` are accepted (the CLI owns them) but the
/// core does not interpret them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_log: Option<serde_json::Value>,
    pub config: GatewayConfig,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub known_list: BTreeMap<DeviceId, DeviceTraits>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub block_list: BTreeMap<DeviceId, DeviceTraits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_tcs: Option<DeviceId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphans_heat: Vec<DeviceId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphans_hvac: Vec<DeviceId>,
    /// Controller-keyed system schemas (any other top-level key that parses
    /// as a device id)
    #[serde(flatten)]
    pub schemas: BTreeMap<DeviceId, SystemSchema>,
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        self.config.validate()?;
        for id in self.known_list.keys().chain(self.block_list.keys()) {
            if !id.is_addressable() {
                return Err(Error::Config(format!("not an addressable device id: {id}")));
            }
        }
        Ok(())
    }

    /// Load from a YAML document.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml(doc: &str) -> Result<Self, Error> {
        let cfg: Self =
            serde_yaml::from_str(doc).map_err(|e| Error::Config(format!("bad YAML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Runtime configuration: the engine flags behind an atomic swap, so the
/// per-packet dispatch path never takes a lock to read them.
#[derive(Debug)]
pub struct RuntimeConfig {
    flags: ArcSwap<GatewayConfig>,
}

impl RuntimeConfig {
    pub fn new(config: GatewayConfig) -> Self {
        Self { flags: ArcSwap::from_pointee(config) }
    }

    /// A snapshot of the current flags (cheap: one atomic load).
    pub fn get(&self) -> Arc<GatewayConfig> {
        self.flags.load_full()
    }

    /// Replace the flags wholesale.
    pub fn set(&self, config: GatewayConfig) {
        self.flags.store(Arc::new(config));
    }

    /// Mutate a copy of the flags and swap it in.
    pub fn update(&self, f: impl FnOnce(&mut GatewayConfig)) {
        let mut next = (*self.get()).clone();
        f(&mut next);
        self.set(next);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GatewayConfig::default().validate().is_ok());
        assert_eq!(GatewayConfig::default().max_zones, 12);
    }

    #[test]
    fn max_zones_bounds() {
        let mut cfg = GatewayConfig::default();
        cfg.max_zones = 16;
        assert!(cfg.validate().is_ok());
        cfg.max_zones = 17;
        assert!(cfg.validate().is_err());
        cfg.max_zones = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn runtime_flags_swap() {
        let rt = RuntimeConfig::default();
        assert!(!rt.get().enable_eavesdrop);
        rt.update(|c| c.enable_eavesdrop = true);
        assert!(rt.get().enable_eavesdrop);
    }

    #[cfg(feature = "config-loaders")]
    #[test]
    fn yaml_round_trip() {
        let doc = r#"
config:
  enforce_known_list: true
  max_zones: 8
known_list:
  "01:145038": {class: CTL}
  "18:002563": {}
  "03:123456": {faked: true}
main_tcs: "01:145038"
"01:145038":
  system:
    appliance_control: "13:888888"
  zones:
    "07": {class: RAD, sensor: "03:123456"}
"#;
        let cfg = Config::from_yaml(doc).unwrap();
        assert!(cfg.config.enforce_known_list);
        assert_eq!(cfg.config.max_zones, 8);
        assert_eq!(cfg.known_list.len(), 3);
        let ctl: DeviceId = "01:145038".parse().unwrap();
        assert_eq!(cfg.main_tcs, Some(ctl));
        let schema = cfg.schemas.get(&ctl).unwrap();
        assert_eq!(
            schema.system.appliance_control,
            Some("13:888888".parse().unwrap())
        );
        assert_eq!(schema.zones.get("07").unwrap().klass.as_deref(), Some("RAD"));
    }
}
