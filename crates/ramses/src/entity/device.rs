// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Devices: the leaf entities of the graph.
//!
//! A device's role is a tagged variant, not a subclass: promotion narrows
//! `role` in place (generic -> specific, never the reverse, never across
//! the Heat/HVAC domain boundary). Faking is a plain record beside the
//! device, not a dynamic attribute.

use serde_json::{json, Value};

use crate::error::Error;
use crate::index::MessageIndex;
use crate::protocol::address::{DeviceId, Domain, Role};
use crate::protocol::code::Code;
use crate::protocol::payload::Payload;

use super::{Arena, ChildId, CircuitIdx, DeviceIdx, ParentRef, SystemIdx};

/// Faking state: impersonation of a real device, or a fully-virtual one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faking {
    /// Packets are generated on this device's behalf
    pub active: bool,
    /// The vendor binding scheme, if any (`itho`/`nuaire`/`orcon`)
    pub scheme: Option<String>,
}

/// A device entity.
#[derive(Debug)]
pub struct Device {
    pub id: DeviceId,
    pub(crate) idx: DeviceIdx,
    pub role: Role,
    /// True once the role came from an explicit schema/known-list class
    /// (explicit classes are never overridden by promotion)
    pub role_is_explicit: bool,
    pub alias: Option<String>,
    pub faking: Faking,
    pub index: MessageIndex,
    pub parent: Option<ParentRef>,
    pub child_id: Option<ChildId>,
    pub ctl: Option<DeviceIdx>,
    pub tcs: Option<SystemIdx>,
    /// Consecutive unanswered sends (send-deprecation counter)
    pub qos_tx_count: u32,
    /// Heat devices only: has this device shown controller behaviour?
    pub iz_controller: Option<bool>,
    /// UFH controllers only: circuit idx -> circuit entity
    pub circuits: std::collections::BTreeMap<u8, CircuitIdx>,
}

/// Allocate a device in the arena. The caller maintains the id map.
pub(crate) fn alloc_device(arena: &mut Arena, id: DeviceId, role: Role) -> DeviceIdx {
    let idx = DeviceIdx(arena.devices.len() as u32);
    arena.devices.push(Device {
        id,
        idx,
        role,
        role_is_explicit: false,
        alias: None,
        faking: Faking::default(),
        index: MessageIndex::new(),
        parent: None,
        child_id: None,
        ctl: None,
        tcs: None,
        qos_tx_count: 0,
        iz_controller: None,
        circuits: std::collections::BTreeMap::new(),
    });
    idx
}

impl Device {
    pub(crate) fn handle(&self) -> DeviceIdx {
        self.idx
    }

    /// True if this device is (still) promotable.
    pub fn is_promotable(&self) -> bool {
        !self.role_is_explicit && self.role.is_promotable()
    }

    /// Narrow the role. No-ops on non-promotions; refuses demotions and
    /// cross-domain moves.
    pub fn promote(&mut self, to: Role) -> Result<bool, Error> {
        if to == self.role || to.is_promotable() {
            return Ok(false); // not a promotion
        }
        if !self.is_promotable() {
            return Ok(false); // already specific (never demote/re-class)
        }
        let cross_domain = match (self.role, to.domain()) {
            (Role::Hea, Domain::Hvac) | (Role::Hvc, Domain::Heat) => true,
            _ => false,
        };
        if cross_domain {
            return Err(Error::SchemaInconsistent(format!(
                "{}: cross-domain promotion {} -> {}",
                self.id, self.role, to
            )));
        }
        log::warn!(
            "[ENTITY] Promoting the device class of {} ({}) to {} - set an explicit class in the known_list to silence this",
            self.id,
            self.role,
            to
        );
        self.role = to;
        Ok(true)
    }

    /// Mark the device as faked (idempotent).
    pub fn make_fake(&mut self) {
        if !self.faking.active {
            self.faking.active = true;
            log::info!("[ENTITY] Faking now enabled for: {}", self.id);
        }
    }

    pub fn is_faked(&self) -> bool {
        self.faking.active
    }

    /// Reset/bump the send-deprecation counter.
    pub fn note_send_outcome(&mut self, answered: bool) {
        if answered {
            self.qos_tx_count = 0;
        } else {
            self.qos_tx_count += 1;
            if self.qos_tx_count == crate::config::QOS_TX_LIMIT {
                log::warn!(
                    "[ENTITY] Sending now deprecated for {} (consider adjusting device_id filters)",
                    self.id
                );
            }
        }
    }

    pub fn is_send_deprecated(&self) -> bool {
        self.qos_tx_count > crate::config::QOS_TX_LIMIT
    }

    /// True if a battery announcement (or role) says this runs on battery.
    pub fn has_battery(&self) -> bool {
        matches!(self.role, Role::Trv | Role::Thm | Role::Dhw)
            || self.index.latest(Code::_1060).is_some()
    }

    /// The OEM code from the stored device-info, if any.
    pub fn oem_code(&self) -> Option<u8> {
        match self.index.latest(Code::_10E0).map(|m| m.payload()) {
            Some(Payload::DeviceInfo(info)) => Some(info.oem_code),
            _ => None,
        }
    }

    /// The device's own announced temperature (sensors, TRVs, stats).
    pub fn temperature(&self) -> Option<f64> {
        match self.index.latest(Code::_30C9).map(|m| m.payload()) {
            Some(Payload::ZoneTemps(v)) => v.first().and_then(|e| e.temperature),
            _ => None,
        }
    }

    /// The device's own announced setpoint.
    pub fn setpoint(&self) -> Option<f64> {
        match self.index.latest(Code::_2309).map(|m| m.payload()) {
            Some(Payload::Setpoints(v)) => v.first().and_then(|e| e.setpoint),
            _ => None,
        }
    }

    /// The device's announced heat demand (TRVs, OTB, UFC).
    pub fn heat_demand(&self) -> Option<f64> {
        match self.index.latest(Code::_3150).map(|m| m.payload()) {
            Some(Payload::HeatDemand(v)) => v.first().and_then(|e| e.heat_demand),
            _ => None,
        }
    }

    /// The device's relay demand (BDRs).
    pub fn relay_demand(&self) -> Option<f64> {
        match self.index.latest(Code::_0008).map(|m| m.payload()) {
            Some(Payload::RelayDemand(rd)) => rd.relay_demand,
            _ => None,
        }
    }

    /// The device's open-window state (TRVs).
    pub fn window_open(&self) -> Option<bool> {
        match self.index.latest(Code::_12B0).map(|m| m.payload()) {
            Some(Payload::WindowState(w)) => w.window_open,
            _ => None,
        }
    }

    /// The battery-low flag, if the device announces battery state.
    pub fn battery_low(&self) -> Option<bool> {
        match self.index.latest(Code::_1060).map(|m| m.payload()) {
            Some(Payload::Battery(b)) => Some(b.battery_low),
            _ => None,
        }
    }

    /// Ghost-device guard: present only if it ever appeared as a source.
    pub fn is_present(&self, now: chrono::NaiveDateTime) -> bool {
        self.index.iter_all().any(|m| m.src() == self.id && !m.is_expired(now))
    }

    // --- JSON views ---------------------------------------------------------

    /// The fixed attributes (for the schema view).
    pub fn schema_view(&self) -> Value {
        json!({ "class": self.role.slug() })
    }

    /// The traits (known-list shaped).
    pub fn traits_view(&self) -> Value {
        json!({
            "class": self.role.slug(),
            "alias": self.alias,
            "faked": self.faking.active,
            "scheme": self.faking.scheme,
            "_sent": self
                .index
                .codes_seen()
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>(),
        })
    }

    /// The state attributes (for the status view): the latest payload of
    /// every code this device has announced.
    pub fn status_view(&self) -> Value {
        let mut map = serde_json::Map::new();
        for code in self.index.codes_seen() {
            if let Some(msg) = self.index.latest(code) {
                if msg.src() != self.id {
                    continue;
                }
                let key = code.name().map_or_else(|| code.to_string(), str::to_string);
                map.insert(key, msg.payload().to_json());
            }
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, role: Role) -> Device {
        let mut arena = Arena::default();
        let idx = alloc_device(&mut arena, id.parse().unwrap(), role);
        arena.devices.remove(idx.index())
    }

    #[test]
    fn promotion_narrows_once() {
        let mut dev = device("32:155617", Role::Hvc);
        assert!(dev.promote(Role::Co2).unwrap());
        assert_eq!(dev.role, Role::Co2);
        // a later, different fingerprint does not re-class it
        assert!(!dev.promote(Role::Fan).unwrap());
        assert_eq!(dev.role, Role::Co2);
    }

    #[test]
    fn promotion_never_demotes() {
        let mut dev = device("32:155617", Role::Fan);
        assert!(!dev.promote(Role::Hvc).unwrap());
        assert_eq!(dev.role, Role::Fan);
    }

    #[test]
    fn cross_domain_promotion_is_rejected() {
        let mut dev = device("30:111111", Role::Hea);
        assert!(dev.promote(Role::Fan).is_err());

        let mut dev = device("30:111111", Role::Hvc);
        assert!(dev.promote(Role::Trv).is_err());
    }

    #[test]
    fn explicit_class_wins() {
        let mut dev = device("32:155617", Role::Hvc);
        dev.role_is_explicit = true;
        assert!(!dev.promote(Role::Co2).unwrap());
        assert_eq!(dev.role, Role::Hvc);
    }

    #[test]
    fn send_deprecation_threshold() {
        let mut dev = device("13:111111", Role::Bdr);
        for _ in 0..=crate::config::QOS_TX_LIMIT {
            dev.note_send_outcome(false);
        }
        assert!(dev.is_send_deprecated());
        dev.note_send_outcome(true);
        assert!(!dev.is_send_deprecated());
    }
}
