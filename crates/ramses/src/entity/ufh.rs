// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Underfloor heating circuits.
//!
//! A UFH controller (02:) parents up to eight circuits, each a 1-byte
//! circuit index. A circuit may be mapped (via 000C from the owning TCS)
//! onto one of the TCS's heating zones.

use serde_json::{json, Value};

use crate::index::MessageIndex;
use crate::protocol::code::Code;
use crate::protocol::payload::Payload;

use super::{Arena, CircuitIdx, DeviceIdx, ZoneIdx};

/// One heated loop of a UFH controller.
#[derive(Debug)]
pub struct UfhCircuit {
    pub(crate) idx: CircuitIdx,
    pub ufc: DeviceIdx,
    pub cct_idx: u8,
    /// The heating zone this circuit feeds, once known
    pub zone: Option<ZoneIdx>,
    pub index: MessageIndex,
}

/// Allocate a circuit under its controller (idempotent per cct idx).
pub(crate) fn get_or_alloc_circuit(
    arena: &mut Arena,
    ufc: DeviceIdx,
    cct_idx: u8,
) -> CircuitIdx {
    if let Some(&existing) = arena.device(ufc).circuits.get(&cct_idx) {
        return existing;
    }
    let idx = CircuitIdx(arena.circuits.len() as u32);
    arena.circuits.push(UfhCircuit { idx, ufc, cct_idx, zone: None, index: MessageIndex::new() });
    arena.device_mut(ufc).circuits.insert(cct_idx, idx);
    idx
}

impl UfhCircuit {
    pub(crate) fn handle(&self) -> CircuitIdx {
        self.idx
    }

    /// The circuit's setpoint bounds, from the controller's 22C9 array.
    pub fn setpoint_bounds(&self) -> Option<(f64, f64)> {
        match self.index.latest(Code::_22C9).map(|m| m.payload()) {
            Some(Payload::UfhSetpoints(v)) => v
                .iter()
                .find(|e| e.ufh_idx == self.cct_idx)
                .and_then(|e| Some((e.setpoint_low?, e.setpoint_high?))),
            _ => None,
        }
    }

    /// The circuit's heat demand, from the controller's 3150 array.
    pub fn heat_demand(&self) -> Option<f64> {
        match self.index.latest(Code::_3150).map(|m| m.payload()) {
            Some(Payload::HeatDemand(v)) => {
                v.iter().find(|e| e.idx == self.cct_idx).and_then(|e| e.heat_demand)
            }
            _ => None,
        }
    }

    pub fn status_view(&self, arena: &Arena) -> Value {
        json!({
            "circuit_idx": format!("{:02X}", self.cct_idx),
            "zone_idx": self.zone.map(|z| format!("{:02X}", arena.zone(z).zone_idx)),
            "setpoint_bounds": self.setpoint_bounds().map(|(lo, hi)| vec![lo, hi]),
            "heat_demand": self.heat_demand(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::device::alloc_device;
    use crate::protocol::address::Role;

    #[test]
    fn circuit_allocation_is_idempotent() {
        let mut arena = Arena::default();
        let ufc = alloc_device(&mut arena, "02:044446".parse().unwrap(), Role::Ufc);
        let c1 = get_or_alloc_circuit(&mut arena, ufc, 0x01);
        let c1_again = get_or_alloc_circuit(&mut arena, ufc, 0x01);
        let c2 = get_or_alloc_circuit(&mut arena, ufc, 0x02);
        assert_eq!(c1, c1_again);
        assert_ne!(c1, c2);
        assert_eq!(arena.device(ufc).circuits.len(), 2);
    }
}
