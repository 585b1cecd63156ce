// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heating zones and the DHW zone.
//!
//! A zone's heating class may be discovered after construction (from 0005
//! zone-type queries, 000C device roles, or eavesdropped actuator traffic).
//! Class transitions are monotone: unknown -> any, and ELE -> VAL; nothing
//! else, and never a downgrade back to unknown.

use std::fmt;

use serde_json::{json, Value};

use crate::error::Error;
use crate::index::MessageIndex;
use crate::protocol::address::Role;
use crate::protocol::code::Code;
use crate::protocol::payload::Payload;

use super::{Arena, DeviceIdx, DhwIdx, SystemIdx, ZoneIdx};

/// The heating class of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneClass {
    Unknown,
    /// Radiator valves (HR92/HR80)
    Rad,
    /// Electric heat (BDR relay, no feedback loop)
    Ele,
    /// Zone valve (BDR relay driving a valve)
    Val,
    /// Underfloor heating (HCC80/HCE80 circuits)
    Ufh,
    /// Mixing valve (HM80)
    Mix,
}

impl ZoneClass {
    pub fn slug(self) -> &'static str {
        match self {
            Self::Unknown => "???",
            Self::Rad => "RAD",
            Self::Ele => "ELE",
            Self::Val => "VAL",
            Self::Ufh => "UFH",
            Self::Mix => "MIX",
        }
    }

    pub fn from_slug(s: &str) -> Option<Self> {
        Some(match s {
            "RAD" => Self::Rad,
            "ELE" => Self::Ele,
            "VAL" => Self::Val,
            "UFH" => Self::Ufh,
            "MIX" => Self::Mix,
            _ => return None,
        })
    }

    /// The 0005/000C zone-type byte for this class.
    pub fn zone_type(self) -> Option<u8> {
        match self {
            Self::Unknown => None,
            Self::Rad => Some(0x08),
            Self::Ufh => Some(0x09),
            Self::Val => Some(0x0A),
            Self::Mix => Some(0x0B),
            Self::Ele => Some(0x11),
        }
    }

    /// Inverse of [`ZoneClass::zone_type`].
    pub fn from_zone_type(b: u8) -> Option<Self> {
        match b {
            0x08 => Some(Self::Rad),
            0x09 => Some(Self::Ufh),
            0x0A => Some(Self::Val),
            0x0B => Some(Self::Mix),
            0x11 => Some(Self::Ele),
            _ => None,
        }
    }
}

impl fmt::Display for ZoneClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// True if `role` may actuate a zone of class `klass`.
pub fn actuator_role_fits(klass: ZoneClass, role: Role) -> bool {
    match klass {
        ZoneClass::Unknown => matches!(role, Role::Trv | Role::Bdr | Role::Ufc),
        ZoneClass::Rad => role == Role::Trv,
        ZoneClass::Ele | ZoneClass::Val | ZoneClass::Mix => role == Role::Bdr,
        ZoneClass::Ufh => role == Role::Ufc,
    }
}

/// A heating zone, identified by `(tcs, zone_idx)`.
#[derive(Debug)]
pub struct Zone {
    pub(crate) idx: ZoneIdx,
    pub tcs: SystemIdx,
    pub zone_idx: u8,
    pub class: ZoneClass,
    pub sensor: Option<DeviceIdx>,
    pub actuators: Vec<DeviceIdx>,
    pub index: MessageIndex,
}

pub(crate) fn alloc_zone(arena: &mut Arena, tcs: SystemIdx, zone_idx: u8) -> ZoneIdx {
    let idx = ZoneIdx(arena.zones.len() as u32);
    arena.zones.push(Zone {
        idx,
        tcs,
        zone_idx,
        class: ZoneClass::Unknown,
        sensor: None,
        actuators: Vec::new(),
        index: MessageIndex::new(),
    });
    arena.system_mut(tcs).zones.insert(zone_idx, idx);
    idx
}

impl Zone {
    pub(crate) fn handle(&self) -> ZoneIdx {
        self.idx
    }

    /// Promote the zone's class. Monotone: unknown -> known, ELE -> VAL;
    /// anything else is a schema inconsistency (same-class is a no-op).
    pub fn set_class(&mut self, klass: ZoneClass) -> Result<bool, Error> {
        if klass == self.class || klass == ZoneClass::Unknown {
            return Ok(false);
        }
        match self.class {
            ZoneClass::Unknown => {}
            ZoneClass::Ele if klass == ZoneClass::Val => {}
            _ => {
                return Err(Error::SchemaInconsistent(format!(
                    "zone {:02X} changed class: {} to {klass}",
                    self.zone_idx, self.class
                )));
            }
        }
        log::info!("[ENTITY] Zone {:02X} is now a {klass} zone", self.zone_idx);
        self.class = klass;
        Ok(true)
    }

    /// The latest temperature, setpoint, etc - payload-backed accessors.
    pub fn temperature(&self) -> Option<f64> {
        match self.index.latest(Code::_30C9).map(|m| m.payload()) {
            Some(Payload::ZoneTemps(v)) => {
                v.iter().find(|e| e.zone_idx == self.zone_idx).and_then(|e| e.temperature)
            }
            _ => None,
        }
    }

    pub fn setpoint(&self) -> Option<f64> {
        match self.index.latest(Code::_2309).map(|m| m.payload()) {
            Some(Payload::Setpoints(v)) => {
                v.iter().find(|e| e.zone_idx == self.zone_idx).and_then(|e| e.setpoint)
            }
            _ => None,
        }
    }

    pub fn window_open(&self) -> Option<bool> {
        match self.index.latest(Code::_12B0).map(|m| m.payload()) {
            Some(Payload::WindowState(w)) => w.window_open,
            _ => None,
        }
    }

    pub fn heat_demand(&self) -> Option<f64> {
        match self.index.latest(Code::_3150).map(|m| m.payload()) {
            Some(Payload::HeatDemand(v)) => {
                v.iter().find(|e| e.idx == self.zone_idx).and_then(|e| e.heat_demand)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> Option<String> {
        match self.index.latest(Code::_0004).map(|m| m.payload()) {
            Some(Payload::ZoneName(n)) => n.name.clone(),
            _ => None,
        }
    }

    pub fn schema_view(&self, arena: &Arena) -> Value {
        json!({
            "class": (self.class != ZoneClass::Unknown).then(|| self.class.slug()),
            "sensor": self.sensor.map(|s| arena.device(s).id),
            "actuators": self
                .actuators
                .iter()
                .map(|&a| arena.device(a).id)
                .collect::<Vec<_>>(),
        })
    }

    pub fn status_view(&self) -> Value {
        json!({
            "name": self.name(),
            "temperature": self.temperature(),
            "setpoint": self.setpoint(),
            "window_open": self.window_open(),
            "heat_demand": self.heat_demand(),
        })
    }
}

/// The stored hot water zone - unique per TCS, idx `HW`.
#[derive(Debug)]
pub struct DhwZone {
    pub(crate) idx: DhwIdx,
    pub tcs: SystemIdx,
    pub sensor: Option<DeviceIdx>,
    pub dhw_valve: Option<DeviceIdx>,
    pub htg_valve: Option<DeviceIdx>,
    pub index: MessageIndex,
}

pub(crate) fn alloc_dhw(arena: &mut Arena, tcs: SystemIdx) -> DhwIdx {
    let idx = DhwIdx(arena.dhws.len() as u32);
    arena.dhws.push(DhwZone {
        idx,
        tcs,
        sensor: None,
        dhw_valve: None,
        htg_valve: None,
        index: MessageIndex::new(),
    });
    arena.system_mut(tcs).dhw = Some(idx);
    idx
}

impl DhwZone {
    pub(crate) fn handle(&self) -> DhwIdx {
        self.idx
    }

    pub fn temperature(&self) -> Option<f64> {
        match self.index.latest(Code::_1260).map(|m| m.payload()) {
            Some(Payload::DhwTemp(t)) => t.temperature,
            _ => None,
        }
    }

    pub fn mode(&self) -> Option<&'static str> {
        match self.index.latest(Code::_1F41).map(|m| m.payload()) {
            Some(Payload::DhwMode(m)) => Some(m.mode),
            _ => None,
        }
    }

    pub fn setpoint(&self) -> Option<f64> {
        match self.index.latest(Code::_10A0).map(|m| m.payload()) {
            Some(Payload::DhwParams(p)) => p.setpoint,
            _ => None,
        }
    }

    pub fn schema_view(&self, arena: &Arena) -> Value {
        json!({
            "sensor": self.sensor.map(|s| arena.device(s).id),
            "dhw_valve": self.dhw_valve.map(|s| arena.device(s).id),
            "htg_valve": self.htg_valve.map(|s| arena.device(s).id),
        })
    }

    pub fn status_view(&self) -> Value {
        json!({
            "temperature": self.temperature(),
            "mode": self.mode(),
            "setpoint": self.setpoint(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone {
            idx: ZoneIdx(0),
            tcs: SystemIdx(0),
            zone_idx: 0x01,
            class: ZoneClass::Unknown,
            sensor: None,
            actuators: Vec::new(),
            index: MessageIndex::new(),
        }
    }

    #[test]
    fn class_promotion_is_monotone() {
        let mut z = zone();
        assert!(z.set_class(ZoneClass::Ele).unwrap());
        assert!(z.set_class(ZoneClass::Val).unwrap()); // ELE -> VAL allowed
        assert!(!z.set_class(ZoneClass::Val).unwrap()); // same class: no-op
        assert!(z.set_class(ZoneClass::Rad).is_err()); // anything else: fatal
        assert!(!z.set_class(ZoneClass::Unknown).unwrap()); // never downgrade
        assert_eq!(z.class, ZoneClass::Val);
    }

    #[test]
    fn rad_never_becomes_val() {
        let mut z = zone();
        z.set_class(ZoneClass::Rad).unwrap();
        assert!(z.set_class(ZoneClass::Val).is_err());
    }

    #[test]
    fn actuator_fit_table() {
        assert!(actuator_role_fits(ZoneClass::Rad, Role::Trv));
        assert!(!actuator_role_fits(ZoneClass::Rad, Role::Bdr));
        assert!(actuator_role_fits(ZoneClass::Val, Role::Bdr));
        assert!(actuator_role_fits(ZoneClass::Ufh, Role::Ufc));
        assert!(!actuator_role_fits(ZoneClass::Ufh, Role::Trv));
        assert!(actuator_role_fits(ZoneClass::Unknown, Role::Trv));
    }
}
