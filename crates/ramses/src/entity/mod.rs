// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The entity graph: devices, systems, zones, DHW and UFH circuits.
//!
//! All entities live in one arena owned by the gateway; cross-references
//! are typed integer handles, so the graph has no ownership cycles. The
//! parent/child invariants of the schema are enforced at the single choke
//! point, [`set_device_parent`]:
//!
//! - a device has at most one parent (a second, different parent is a
//!   schema inconsistency)
//! - a device belongs to at most one controller
//! - a zone's actuators must match its heating class; the DHW zone's
//!   slots take exactly one sensor (07:) and 13: valves

pub mod device;
pub mod system;
pub mod ufh;
pub mod zone;

use std::fmt;

use crate::error::Error;
use crate::protocol::address::Role;

pub use device::{Device, Faking};
pub use system::System;
pub use ufh::UfhCircuit;
pub use zone::{DhwZone, Zone, ZoneClass};

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle_type!(
    /// Handle to a [`Device`] in the arena.
    DeviceIdx
);
handle_type!(
    /// Handle to a [`System`] (TCS) in the arena.
    SystemIdx
);
handle_type!(
    /// Handle to a heating [`Zone`] in the arena.
    ZoneIdx
);
handle_type!(
    /// Handle to a [`DhwZone`] in the arena.
    DhwIdx
);
handle_type!(
    /// Handle to a [`UfhCircuit`] in the arena.
    CircuitIdx
);

/// The slot a child occupies in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildId {
    /// A zone index, `00`..`0F`
    Zone(u8),
    /// The heating-valve domain of the DHW zone
    DomainF9,
    /// The hotwater-valve/sensor domain of the DHW zone
    DomainFA,
    /// The appliance-control domain
    DomainFC,
    /// A direct child of the TCS itself
    System,
    /// The local gateway
    Gateway,
}

impl fmt::Display for ChildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zone(idx) => write!(f, "{idx:02X}"),
            Self::DomainF9 => f.write_str("F9"),
            Self::DomainFA => f.write_str("FA"),
            Self::DomainFC => f.write_str("FC"),
            Self::System => f.write_str("FF"),
            Self::Gateway => f.write_str("gw"),
        }
    }
}

/// A device's parent in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    System(SystemIdx),
    Zone(ZoneIdx),
    Dhw(DhwIdx),
    /// UFH controllers parent their circuits (and act as mini-TCSs)
    UfhCtl(DeviceIdx),
}

/// The arena holding every entity of one gateway.
#[derive(Debug, Default)]
pub struct Arena {
    pub(crate) devices: Vec<Device>,
    pub(crate) systems: Vec<System>,
    pub(crate) zones: Vec<Zone>,
    pub(crate) dhws: Vec<DhwZone>,
    pub(crate) circuits: Vec<UfhCircuit>,
}

impl Arena {
    pub fn device(&self, idx: DeviceIdx) -> &Device {
        &self.devices[idx.index()]
    }

    pub fn device_mut(&mut self, idx: DeviceIdx) -> &mut Device {
        &mut self.devices[idx.index()]
    }

    pub fn system(&self, idx: SystemIdx) -> &System {
        &self.systems[idx.index()]
    }

    pub fn system_mut(&mut self, idx: SystemIdx) -> &mut System {
        &mut self.systems[idx.index()]
    }

    pub fn zone(&self, idx: ZoneIdx) -> &Zone {
        &self.zones[idx.index()]
    }

    pub fn zone_mut(&mut self, idx: ZoneIdx) -> &mut Zone {
        &mut self.zones[idx.index()]
    }

    pub fn dhw(&self, idx: DhwIdx) -> &DhwZone {
        &self.dhws[idx.index()]
    }

    pub fn dhw_mut(&mut self, idx: DhwIdx) -> &mut DhwZone {
        &mut self.dhws[idx.index()]
    }

    pub fn circuit(&self, idx: CircuitIdx) -> &UfhCircuit {
        &self.circuits[idx.index()]
    }

    pub fn circuit_mut(&mut self, idx: CircuitIdx) -> &mut UfhCircuit {
        &mut self.circuits[idx.index()]
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn systems(&self) -> impl Iterator<Item = &System> {
        self.systems.iter()
    }
}

/// Assign `dev`'s parent, enforcing the schema invariants. Idempotent for
/// the same parent; a *different* parent (or controller) is fatal to the
/// operation.
pub fn set_device_parent(
    arena: &mut Arena,
    dev_idx: DeviceIdx,
    parent: ParentRef,
    child_id: ChildId,
    is_sensor: bool,
) -> Result<(), Error> {
    let (dev_id, dev_role, prev_parent, prev_ctl) = {
        let dev = arena.device(dev_idx);
        (dev.id, dev.role, dev.parent, dev.ctl)
    };

    if let Some(existing) = prev_parent {
        if existing == parent {
            return Ok(()); // idempotent re-assignment
        }
        return Err(Error::SchemaInconsistent(format!(
            "{dev_id} cant change parent: {existing:?} to {parent:?}"
        )));
    }

    // which controller does this parent imply?
    let ctl = match parent {
        ParentRef::System(s) => Some(arena.system(s).ctl),
        ParentRef::Zone(z) => Some(arena.system(arena.zone(z).tcs).ctl),
        ParentRef::Dhw(d) => Some(arena.system(arena.dhw(d).tcs).ctl),
        ParentRef::UfhCtl(u) => Some(u),
    };
    if let (Some(prev), Some(new)) = (prev_ctl, ctl) {
        if prev != new {
            return Err(Error::SchemaInconsistent(format!(
                "{dev_id} cant change controller: {} to {}",
                arena.device(prev).id,
                arena.device(new).id
            )));
        }
    }

    // role/slot validation per parent kind
    match parent {
        ParentRef::Zone(z_idx) => {
            let klass = arena.zone(z_idx).class;
            if is_sensor {
                if !matches!(dev_role, Role::Ctl | Role::Prg | Role::Thm | Role::Trv) {
                    return Err(Error::SchemaInconsistent(format!(
                        "{dev_id} ({dev_role}) cant be a zone sensor"
                    )));
                }
            } else if !zone::actuator_role_fits(klass, dev_role) {
                return Err(Error::SchemaInconsistent(format!(
                    "{dev_id} ({dev_role}) cant actuate a {klass} zone"
                )));
            }
            let zone_idx = arena.zone(z_idx).zone_idx;
            if child_id != ChildId::Zone(zone_idx) {
                return Err(Error::SchemaInconsistent(format!(
                    "{dev_id}: child_id {child_id} must match zone idx {zone_idx:02X}"
                )));
            }
        }
        ParentRef::Dhw(d_idx) => {
            if is_sensor {
                if dev_role != Role::Dhw {
                    return Err(Error::SchemaInconsistent(format!(
                        "{dev_id} ({dev_role}) cant be the DHW sensor (must be 07:)"
                    )));
                }
            } else {
                if dev_role != Role::Bdr {
                    return Err(Error::SchemaInconsistent(format!(
                        "{dev_id} ({dev_role}) cant be a DHW valve (must be 13:)"
                    )));
                }
                if !matches!(child_id, ChildId::DomainF9 | ChildId::DomainFA) {
                    return Err(Error::SchemaInconsistent(format!(
                        "{dev_id}: DHW valve child_id must be F9 or FA, not {child_id}"
                    )));
                }
            }
            // slot uniqueness
            let dhw = arena.dhw(d_idx);
            let slot = if is_sensor {
                dhw.sensor
            } else if child_id == ChildId::DomainF9 {
                dhw.htg_valve
            } else {
                dhw.dhw_valve
            };
            if let Some(existing) = slot {
                if existing != dev_idx {
                    return Err(Error::SchemaInconsistent(format!(
                        "DHW slot {child_id} changed: {} to {dev_id}",
                        arena.device(existing).id
                    )));
                }
            }
        }
        ParentRef::System(_) => {
            if is_sensor {
                if dev_role != Role::Out {
                    return Err(Error::SchemaInconsistent(format!(
                        "{dev_id} ({dev_role}) cant be the system sensor"
                    )));
                }
            } else if !matches!(dev_role, Role::Bdr | Role::Otb | Role::Ufc | Role::Out) {
                return Err(Error::SchemaInconsistent(format!(
                    "{dev_id} ({dev_role}) cant be a system child"
                )));
            }
            if !matches!(child_id, ChildId::DomainFC | ChildId::System) {
                return Err(Error::SchemaInconsistent(format!(
                    "{dev_id}: TCS child_id must be FC or FF, not {child_id}"
                )));
            }
        }
        ParentRef::UfhCtl(_) => {
            // circuits attach via their own path; devices never parent here
            return Err(Error::SchemaInconsistent(format!(
                "{dev_id}: only circuits can be children of a UFH controller"
            )));
        }
    }

    // all checks passed: write both sides of the link
    match parent {
        ParentRef::Zone(z_idx) => {
            if is_sensor {
                if let Some(existing) = arena.zone(z_idx).sensor {
                    if existing != dev_idx {
                        return Err(Error::SchemaInconsistent(format!(
                            "zone {:02X} changed sensor: {} to {dev_id}",
                            arena.zone(z_idx).zone_idx,
                            arena.device(existing).id
                        )));
                    }
                }
                arena.zone_mut(z_idx).sensor = Some(dev_idx);
            } else if !arena.zone(z_idx).actuators.contains(&dev_idx) {
                arena.zone_mut(z_idx).actuators.push(dev_idx);
            }
        }
        ParentRef::Dhw(d_idx) => {
            let dhw = arena.dhw_mut(d_idx);
            if is_sensor {
                dhw.sensor = Some(dev_idx);
            } else if child_id == ChildId::DomainF9 {
                dhw.htg_valve = Some(dev_idx);
            } else {
                dhw.dhw_valve = Some(dev_idx);
            }
        }
        ParentRef::System(s_idx) => {
            if child_id == ChildId::DomainFC {
                if let Some(existing) = arena.system(s_idx).app_cntrl {
                    if existing != dev_idx {
                        return Err(Error::SchemaInconsistent(format!(
                            "TCS changed appliance_control: {} to {dev_id}",
                            arena.device(existing).id
                        )));
                    }
                }
                arena.system_mut(s_idx).app_cntrl = Some(dev_idx);
            } else if dev_role == Role::Ufc {
                let sys = arena.system_mut(s_idx);
                if !sys.ufh_ctls.contains(&dev_idx) {
                    sys.ufh_ctls.push(dev_idx);
                }
            }
        }
        ParentRef::UfhCtl(_) => unreachable!(),
    }

    let tcs = match parent {
        ParentRef::System(s) => Some(s),
        ParentRef::Zone(z) => Some(arena.zone(z).tcs),
        ParentRef::Dhw(d) => Some(arena.dhw(d).tcs),
        ParentRef::UfhCtl(u) => arena.device(u).tcs,
    };

    let dev = arena.device_mut(dev_idx);
    dev.parent = Some(parent);
    dev.child_id = Some(child_id);
    dev.ctl = ctl;
    dev.tcs = tcs;
    Ok(())
}
