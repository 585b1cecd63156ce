// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The dispatcher: address-set validation, on-demand entity creation,
//! filter lists, role validation, promotion, and routing of each message
//! to the entities it concerns.
//!
//! All of this mutates the single [`State`] owned by the gateway; the
//! gateway serialises calls (one message at a time), which is what gives
//! entities their non-overlapping `handle_msg` guarantee.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::config::{
    DeviceTraits, GatewayConfig, DONT_CREATE_ENTITIES, DONT_UPDATE_ENTITIES, SENSOR_MATCH_SLACK,
};
use crate::discovery::{self, EntityKey, Scheduler};
use crate::entity::{
    self, device, system, ufh, zone, Arena, ChildId, DeviceIdx, ParentRef, SystemIdx, ZoneClass,
};
use crate::error::{Error, PacketError};
use crate::index::MessageIndex;
use crate::message::Message;
use crate::protocol::address::{best_dev_role, DeviceId, Role};
use crate::protocol::code::{role_may_tx, rx_check_exempt, Code, CodeDomain, Verb};
use crate::protocol::packet::Header;
use crate::protocol::payload::Payload;

/// Default id the local gateway uses until its real id is learned from
/// the transport.
pub const DEFAULT_GWY_ID: DeviceId = DeviceId::NUL_DEV;

/// The mutable core owned by the gateway.
pub struct State {
    pub arena: Arena,
    pub device_by_id: HashMap<DeviceId, DeviceIdx>,
    pub known_list: BTreeMap<DeviceId, DeviceTraits>,
    pub block_list: BTreeSet<DeviceId>,
    /// Recently-rejected ids (filtered out, or structurally unwanted)
    pub unwanted: LruCache<DeviceId, ()>,
    /// Foreign HGI-type gateways already warned about (one-shot warning)
    pub foreign_warned: HashSet<DeviceId>,
    /// The previous message, for array-continuation detection
    pub prev_msg: Option<Message>,
    pub discovery: Scheduler,
    /// The local gateway's device id, once learned
    pub gwy_id: Option<DeviceId>,
    pub main_tcs: Option<SystemIdx>,
}

impl State {
    pub fn new() -> Self {
        Self {
            arena: Arena::default(),
            device_by_id: HashMap::new(),
            known_list: BTreeMap::new(),
            block_list: BTreeSet::new(),
            unwanted: LruCache::new(NonZeroUsize::new(128).expect("non-zero")),
            foreign_warned: HashSet::new(),
            prev_msg: None,
            discovery: Scheduler::new(),
            gwy_id: None,
            main_tcs: None,
        }
    }

    pub fn gwy_id(&self) -> DeviceId {
        self.gwy_id.unwrap_or(DEFAULT_GWY_ID)
    }

    pub fn device_idx(&self, id: DeviceId) -> Option<DeviceIdx> {
        self.device_by_id.get(&id).copied()
    }

    /// The primary TCS (explicitly configured, or the first seen).
    pub fn primary_tcs(&self) -> Option<SystemIdx> {
        self.main_tcs.or_else(|| self.arena.systems().next().map(system::System::handle))
    }

    /// Look up a device, creating it if the filter lists allow.
    ///
    /// `observed` is the (verb, code) evidence used for the initial role.
    pub fn get_or_create_device(
        &mut self,
        id: DeviceId,
        observed: Option<(Verb, Code)>,
        cfg: &GatewayConfig,
    ) -> Result<DeviceIdx, Error> {
        if let Some(idx) = self.device_by_id.get(&id) {
            return Ok(*idx);
        }
        self.check_filter_lists(id, cfg)?;

        let traits = self.known_list.get(&id).cloned().unwrap_or_default();
        let explicit = traits.class.as_deref().and_then(Role::from_slug);
        let role = explicit
            .unwrap_or_else(|| best_dev_role(id, observed, cfg.enable_eavesdrop));

        log::debug!("[ENTITY] Creating a device: {id} ({})", role.slug());
        let idx = device::alloc_device(&mut self.arena, id, role);
        {
            let dev = self.arena.device_mut(idx);
            dev.role_is_explicit = explicit.is_some();
            dev.alias = traits.alias;
            dev.faking.scheme = traits.scheme;
            if traits.faked {
                dev.make_fake();
            }
        }
        self.device_by_id.insert(id, idx);

        // register the device's own periodic polls
        let now = chrono::Utc::now().naive_utc();
        let gwy_id = self.gwy_id();
        for (cmd, interval, delay) in discovery::device_discovery_cmds(role, id) {
            self.discovery.add(EntityKey::Device(id), cmd, interval, delay, now, gwy_id);
        }

        // a controller-typed device is a controller: its TCS exists from
        // the start, which keeps replay order-independent
        if role.is_controller() && id.is_controller_type() {
            self.get_or_create_system(idx, cfg)?;
        }

        Ok(idx)
    }

    fn check_filter_lists(&mut self, id: DeviceId, cfg: &GatewayConfig) -> Result<(), Error> {
        let is_local_gwy = Some(id) == self.gwy_id;
        if is_local_gwy {
            return Ok(()); // the local gateway need not be in the known_list
        }
        if self.unwanted.contains(&id) {
            return Err(Error::Lookup(format!("cant create {id}: it is unwanted or invalid")));
        }
        if cfg.enforce_known_list && !self.known_list.contains_key(&id) {
            self.unwanted.put(id, ());
            return Err(Error::Lookup(format!(
                "cant create {id}: it is not an allowed device_id (if required, add it to the known_list)"
            )));
        }
        if self.block_list.contains(&id) {
            self.unwanted.put(id, ());
            return Err(Error::Lookup(format!(
                "cant create {id}: it is a blocked device_id (if required, remove it from the block_list)"
            )));
        }
        Ok(())
    }

    /// Get (or create) the TCS rooted at a controller device.
    pub fn get_or_create_system(
        &mut self,
        ctl_idx: DeviceIdx,
        cfg: &GatewayConfig,
    ) -> Result<SystemIdx, Error> {
        if let Some(sys) = self.arena.device(ctl_idx).tcs {
            return Ok(sys);
        }
        let ctl = self.arena.device(ctl_idx);
        if !ctl.id.is_controller_type() {
            return Err(Error::SchemaInconsistent(format!(
                "invalid device type to be a controller: {}",
                ctl.id
            )));
        }
        let ctl_id = ctl.id;
        let sys = system::alloc_system(&mut self.arena, ctl_idx, cfg.max_zones);
        if self.main_tcs.is_none() {
            self.main_tcs = Some(sys);
        }
        let now = chrono::Utc::now().naive_utc();
        let gwy_id = self.gwy_id();
        for (cmd, interval, delay) in discovery::system_discovery_cmds(ctl_id) {
            self.discovery.add(EntityKey::System(ctl_id), cmd, interval, delay, now, gwy_id);
        }
        Ok(sys)
    }

    /// Get (or create) a heating zone on a TCS, bounded by `max_zones`.
    pub fn get_or_create_zone(
        &mut self,
        sys: SystemIdx,
        zone_idx: u8,
    ) -> Result<crate::entity::ZoneIdx, Error> {
        if let Some(&z) = self.arena.system(sys).zones.get(&zone_idx) {
            return Ok(z);
        }
        let max_zones = self.arena.system(sys).max_zones;
        if zone_idx >= max_zones {
            return Err(Error::SchemaInconsistent(format!(
                "zone idx {zone_idx:02X} out of range (max_zones={max_zones})"
            )));
        }
        let ctl_id = self.arena.device(self.arena.system(sys).ctl).id;
        let z = zone::alloc_zone(&mut self.arena, sys, zone_idx);
        let now = chrono::Utc::now().naive_utc();
        let gwy_id = self.gwy_id();
        for (cmd, interval, delay) in discovery::zone_discovery_cmds(ctl_id, zone_idx) {
            self.discovery.add(EntityKey::Zone(ctl_id, zone_idx), cmd, interval, delay, now, gwy_id);
        }
        Ok(z)
    }

    /// Get (or create) the DHW zone of a TCS.
    pub fn get_or_create_dhw(&mut self, sys: SystemIdx) -> crate::entity::DhwIdx {
        if let Some(d) = self.arena.system(sys).dhw {
            return d;
        }
        let ctl_id = self.arena.device(self.arena.system(sys).ctl).id;
        let d = zone::alloc_dhw(&mut self.arena, sys);
        let now = chrono::Utc::now().naive_utc();
        let gwy_id = self.gwy_id();
        for (cmd, interval, delay) in discovery::dhw_discovery_cmds(ctl_id) {
            self.discovery.add(EntityKey::Dhw(ctl_id), cmd, interval, delay, now, gwy_id);
        }
        d
    }

    /// The message index of a discovery owner (for freshness queries).
    pub fn index_of(&self, owner: &EntityKey) -> Option<&MessageIndex> {
        match owner {
            EntityKey::Device(id) => self.device_idx(*id).map(|d| &self.arena.device(d).index),
            EntityKey::System(id) => {
                let d = self.device_idx(*id)?;
                let sys = self.arena.device(d).tcs?;
                Some(&self.arena.system(sys).index)
            }
            EntityKey::Zone(id, zone_idx) => {
                let d = self.device_idx(*id)?;
                let sys = self.arena.device(d).tcs?;
                let z = *self.arena.system(sys).zones.get(zone_idx)?;
                Some(&self.arena.zone(z).index)
            }
            EntityKey::Dhw(id) => {
                let d = self.device_idx(*id)?;
                let sys = self.arena.device(d).tcs?;
                Some(&self.arena.dhw(self.arena.system(sys).dhw?).index)
            }
        }
    }

    /// When did `owner` last hear a message matching `hdr` (I or RP)?
    pub fn latest_for_header(&self, owner: &EntityKey, hdr: &Header) -> Option<chrono::NaiveDateTime> {
        let index = self.index_of(owner)?;
        [Verb::I, Verb::Rp]
            .into_iter()
            .filter_map(|v| index.lookup(&hdr.with_verb(v)).map(Message::dtm))
            .max()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// True if `this` is the continuation of `prev`'s array (two consecutive
/// I-frames of the same code from the same source within the window).
pub fn detect_array_fragment(this: &Message, prev: &Message) -> bool {
    prev.has_array()
        && matches!(this.code(), Code::_000A | Code::_22C9)
        && this.code() == prev.code()
        && this.verb() == Verb::I
        && prev.verb() == Verb::I
        && this.src() == prev.src()
        && this.dtm()
            < prev.dtm() + chrono::Duration::from_std(crate::config::ARRAY_MERGE_WINDOW).unwrap_or_default()
}

/// Validate the packet's address set against the code's domain.
fn check_msg_addrs(msg: &Message) -> Result<(), Error> {
    let (src, dst) = (msg.src(), msg.dst());
    if src != dst
        && src.device_type() == dst.device_type()
        && (src.domain() == crate::protocol::address::Domain::Heat || src.is_hgi())
    {
        match msg.code().domain() {
            CodeDomain::HeatOnly => {
                return Err(PacketError::AddrSetInvalid(format!(
                    "invalid addr pair: {src}/{dst}"
                ))
                .into());
            }
            CodeDomain::Either => {
                log::warn!("[DISPATCH] {msg} < invalid addr pair: {src}/{dst}, is it HVAC?");
            }
            CodeDomain::HvacOnly => {}
            CodeDomain::Unknown => {
                log::info!("[DISPATCH] {msg} < invalid addr pair: {src}/{dst}, is it HVAC?");
            }
        }
    }
    Ok(())
}

/// Validate that the source's role may transmit `(verb, code)`.
fn check_src_role(state: &State, src_idx: DeviceIdx, msg: &Message) -> Result<(), Error> {
    let role = state.arena.device(src_idx).role;
    if matches!(role, Role::Hgi | Role::Dev | Role::Hea | Role::Hvc) {
        return Ok(()); // promotable generics (and the HGI) are unconstrained
    }
    if !role_may_tx(role, msg.verb(), msg.code()) {
        return Err(PacketError::Invalid(format!(
            "{msg} < unexpected verb/code for {role} to Tx"
        ))
        .into());
    }
    Ok(())
}

/// Validate that the destination's role may receive `(verb, code)`.
fn check_dst_role(state: &State, dst_idx: DeviceIdx, msg: &Message) -> Result<(), Error> {
    let role = state.arena.device(dst_idx).role;
    if matches!(role, Role::Hgi | Role::Dev | Role::Hea | Role::Hvc) {
        return Ok(());
    }
    if rx_check_exempt(role, msg.verb(), msg.code()) {
        return Ok(());
    }
    // to receive X, the dst must be able to send the complement of X
    if !role_may_tx(role, msg.verb().complement(), msg.code()) {
        return Err(PacketError::Invalid(format!(
            "{msg} < unexpected verb/code for {role} to Rx"
        ))
        .into());
    }
    Ok(())
}

/// Validate and route one message: create devices on demand, enforce the
/// role tables, promote generics, then hand it to the owning entities.
pub fn process_msg(
    state: &mut State,
    cfg: &GatewayConfig,
    msg: &Message,
) -> Result<(), Error> {
    check_msg_addrs(msg)?;

    if cfg.reduce_processing >= DONT_CREATE_ENTITIES {
        return Ok(());
    }

    // one-shot warning for foreign gateways
    let src = msg.src();
    if src.is_hgi()
        && state.gwy_id.is_some_and(|gwy| gwy != src)
        && !state.foreign_warned.contains(&src)
    {
        state.foreign_warned.insert(src);
        log::warn!(
            "[DISPATCH] Foreign gateway detected: {src} (consider enforcing a known_list)"
        );
    }

    let observed = Some((msg.verb(), msg.code()));
    let src_idx = state.get_or_create_device(src, observed, cfg)?;

    let dst = msg.dst();
    let dst_idx = if dst != src && dst.is_addressable() {
        match state.get_or_create_device(dst, None, cfg) {
            Ok(idx) => Some(idx),
            Err(Error::Lookup(_)) => None, // filtered: src may still be routed
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    check_src_role(state, src_idx, msg)?;
    if let Some(dst_idx) = dst_idx {
        let src_is_gwy = state.gwy_id == Some(src);
        if !src_is_gwy && msg.verb() != Verb::I {
            check_dst_role(state, dst_idx, msg)?;
        }
    }

    if cfg.reduce_processing >= DONT_UPDATE_ENTITIES {
        return Ok(());
    }

    // promotion: narrow a generic role using the observed traffic
    if state.arena.device(src_idx).is_promotable() {
        let best = best_dev_role(src, observed, cfg.enable_eavesdrop);
        if !best.is_promotable() {
            state.arena.device_mut(src_idx).promote(best)?;
        }
    }

    device_handle_msg(state, cfg, src_idx, msg)?;

    // fully-faked destinations see their inbound traffic too
    if let Some(dst_idx) = dst_idx {
        if dst_idx != src_idx && state.arena.device(dst_idx).is_faked() {
            state.arena.device_mut(dst_idx).index.insert(msg.clone());
        }
    }

    Ok(())
}

/// A device's message handler: store, then role-specific side effects.
fn device_handle_msg(
    state: &mut State,
    cfg: &GatewayConfig,
    dev_idx: DeviceIdx,
    msg: &Message,
) -> Result<(), Error> {
    state.arena.device_mut(dev_idx).index.insert(msg.clone());
    state.arena.device_mut(dev_idx).note_send_outcome(true);

    // controller detection: some codes (and zone arrays) are only ever
    // sent by a controller
    let dev = state.arena.device(dev_idx);
    let is_ctl_evidence = msg.verb() == Verb::I
        && (matches!(msg.code(), Code::_1F09 | Code::_2E04 | Code::_0005 | Code::_0418)
            || (msg.has_array() && matches!(msg.code(), Code::_30C9 | Code::_2309 | Code::_000A)));
    if dev.id.is_controller_type() && dev.tcs.is_none() && is_ctl_evidence {
        log::info!("[DISPATCH] {} is a controller (evidence: {})", dev.id, msg.code());
        state.get_or_create_system(dev_idx, cfg)?;
    }

    // route controller traffic into its TCS
    if let Some(sys) = state.arena.device(dev_idx).tcs {
        if state.arena.system(sys).ctl == dev_idx {
            system_handle_msg(state, cfg, sys, msg)?;
        }
    }

    // UFH controllers: circuits from their own 22C9/3150 arrays
    if state.arena.device(dev_idx).role == Role::Ufc {
        ufc_handle_msg(state, dev_idx, msg);
    }

    // parent eavesdropping: a zone-indexed frame sent *to* a controller
    if cfg.enable_eavesdrop {
        eavesdrop_parent_zone(state, dev_idx, msg)?;
    }

    Ok(())
}

/// The TCS message handler: zone creation/routing and the capabilities.
fn system_handle_msg(
    state: &mut State,
    cfg: &GatewayConfig,
    sys: SystemIdx,
    msg: &Message,
) -> Result<(), Error> {
    state.arena.system_mut(sys).index.insert(msg.clone());

    match msg.payload() {
        // 0005: the zone presence mask declares zones (and their class)
        Payload::SystemZones(sz) => {
            let klass = ZoneClass::from_zone_type(sz.zone_type);
            for (i, &present) in sz.zone_mask.iter().enumerate() {
                if !present {
                    continue;
                }
                match state.get_or_create_zone(sys, i as u8) {
                    Ok(z) => {
                        if let Some(klass) = klass {
                            state.arena.zone_mut(z).set_class(klass)?;
                        }
                    }
                    Err(e) => log::warn!("[DISPATCH] {msg} < {e}"),
                }
            }
            return Ok(());
        }
        // 000C: the devices bound to a zone/domain, per device role
        Payload::ZoneDevices(zd) => {
            return system_handle_000c(state, cfg, sys, zd);
        }
        // DHW codes create/route to the stored-hotwater zone
        Payload::DhwTemp(_) | Payload::DhwMode(_) | Payload::DhwParams(_) => {
            let d = state.get_or_create_dhw(sys);
            state.arena.dhw_mut(d).index.insert(msg.clone());
            return Ok(());
        }
        _ => {}
    }

    // zone-indexed payloads route to their zones (arrays to each element)
    let zone_idxs = msg.payload().zone_idxs();
    for zone_idx in &zone_idxs {
        let z = if cfg.enable_eavesdrop || msg.has_array() {
            match state.get_or_create_zone(sys, *zone_idx) {
                Ok(z) => Some(z),
                Err(e) => {
                    log::warn!("[DISPATCH] {msg} < {e}");
                    None
                }
            }
        } else {
            state.arena.system(sys).zones.get(zone_idx).copied()
        };
        if let Some(z) = z {
            state.arena.zone_mut(z).index.insert(msg.clone());
        }
    }

    // zone-sensor eavesdropping from time-coincident 30C9 matching
    if cfg.enable_eavesdrop
        && msg.code() == Code::_30C9
        && msg.has_array()
        && state.arena.system(sys).zones.values().any(|&z| state.arena.zone(z).sensor.is_none())
    {
        eavesdrop_zone_sensors(state, sys, msg);
    } else if msg.code() == Code::_30C9 && msg.has_array() {
        state.arena.system_mut(sys).prev_30c9 = Some(msg.clone());
    }

    Ok(())
}

/// 000C: bind the listed devices into the named zone/domain slot.
fn system_handle_000c(
    state: &mut State,
    cfg: &GatewayConfig,
    sys: SystemIdx,
    zd: &crate::protocol::payload::heat::ZoneDevices,
) -> Result<(), Error> {
    // device-role byte: 00 = zone actuators, 04 = zone sensor,
    // 08..11 = zone-type actuators, 0D = DHW sensor, 0E = hotwater valve
    // (FA), 0F = heating valve (F9), 10 = appliance control (FC)
    match zd.device_role {
        0x0D => {
            let d = state.get_or_create_dhw(sys);
            for id in &zd.devices {
                let dev = state.get_or_create_device(*id, None, cfg)?;
                entity::set_device_parent(
                    &mut state.arena,
                    dev,
                    ParentRef::Dhw(d),
                    ChildId::DomainFA,
                    true,
                )?;
            }
        }
        0x0E | 0x0F => {
            let d = state.get_or_create_dhw(sys);
            let child_id =
                if zd.device_role == 0x0F { ChildId::DomainF9 } else { ChildId::DomainFA };
            for id in &zd.devices {
                let dev = state.get_or_create_device(*id, None, cfg)?;
                entity::set_device_parent(&mut state.arena, dev, ParentRef::Dhw(d), child_id, false)?;
            }
        }
        0x10 => {
            for id in &zd.devices {
                let dev = state.get_or_create_device(*id, None, cfg)?;
                entity::set_device_parent(
                    &mut state.arena,
                    dev,
                    ParentRef::System(sys),
                    ChildId::DomainFC,
                    false,
                )?;
            }
        }
        role_byte => {
            let z = match state.get_or_create_zone(sys, zd.zone_idx) {
                Ok(z) => z,
                Err(e) => {
                    log::warn!("[DISPATCH] 000C: {e}");
                    return Ok(());
                }
            };
            if let Some(klass) = ZoneClass::from_zone_type(role_byte) {
                state.arena.zone_mut(z).set_class(klass)?;
            }
            let is_sensor = role_byte == 0x04;
            for id in &zd.devices {
                let dev = state.get_or_create_device(*id, None, cfg)?;
                entity::set_device_parent(
                    &mut state.arena,
                    dev,
                    ParentRef::Zone(z),
                    ChildId::Zone(zd.zone_idx),
                    is_sensor,
                )?;
            }
        }
    }
    Ok(())
}

/// A UFH controller's own arrays create/refresh its circuits; its 000C
/// replies map a circuit onto a zone of the owning TCS.
fn ufc_handle_msg(state: &mut State, ufc_idx: DeviceIdx, msg: &Message) {
    let cct_idxs: Vec<u8> = match msg.payload() {
        Payload::UfhSetpoints(v) => v.iter().map(|e| e.ufh_idx).collect(),
        Payload::HeatDemand(v) if msg.src() == msg.dst() => {
            v.iter().map(|e| e.idx).filter(|&i| i < 0x08).collect()
        }
        // a UFC's 000C reply: (circuit idx, the controller it is bound to)
        Payload::ZoneDevices(zd) => {
            let c = ufh::get_or_alloc_circuit(&mut state.arena, ufc_idx, zd.zone_idx);
            state.arena.circuit_mut(c).index.insert(msg.clone());
            let sys = state.arena.device(ufc_idx).tcs.or_else(|| {
                zd.devices
                    .iter()
                    .filter_map(|id| state.device_idx(*id))
                    .find_map(|d| state.arena.device(d).tcs)
            });
            if let Some(sys) = sys {
                if let Some(&z) = state.arena.system(sys).zones.get(&zd.zone_idx) {
                    state.arena.circuit_mut(c).zone = Some(z);
                }
            }
            return;
        }
        _ => return,
    };
    for cct_idx in cct_idxs {
        let c = ufh::get_or_alloc_circuit(&mut state.arena, ufc_idx, cct_idx);
        state.arena.circuit_mut(c).index.insert(msg.clone());
    }
}

/// Eavesdrop a device's parent zone from a zone-indexed frame it sent to
/// a controller.
fn eavesdrop_parent_zone(
    state: &mut State,
    dev_idx: DeviceIdx,
    msg: &Message,
) -> Result<(), Error> {
    let dev = state.arena.device(dev_idx);
    if dev.parent.is_some() || msg.src() == msg.dst() || msg.src() != dev.id {
        return Ok(());
    }
    let Some(dst_idx) = state.device_idx(msg.dst()) else { return Ok(()) };
    let Some(sys) = state.arena.device(dst_idx).tcs else { return Ok(()) };
    if state.arena.system(sys).ctl != dst_idx {
        return Ok(());
    }

    let role = dev.role;
    let zone_idxs = msg.payload().zone_idxs();
    let [zone_idx] = zone_idxs[..] else { return Ok(()) };

    let is_sensor = match role {
        Role::Thm => true,
        Role::Trv | Role::Bdr => false,
        _ => return Ok(()),
    };
    let z = match state.get_or_create_zone(sys, zone_idx) {
        Ok(z) => z,
        Err(_) => return Ok(()),
    };
    entity::set_device_parent(
        &mut state.arena,
        dev_idx,
        ParentRef::Zone(z),
        ChildId::Zone(zone_idx),
        is_sensor,
    )
}

/// Determine zone sensors by matching zone and sensor temperatures within
/// one sync cycle (bounded by the 1F09 countdown plus the slack constant).
fn eavesdrop_zone_sensors(state: &mut State, sys: SystemIdx, this: &Message) {
    let prev = state.arena.system_mut(sys).prev_30c9.replace(this.clone());
    let Some(prev) = prev else { return };

    let Some(secs) = state.arena.system(sys).sync_remaining() else { return };
    let window = chrono::Duration::seconds(secs as i64)
        + chrono::Duration::from_std(SENSOR_MATCH_SLACK).unwrap_or_default();
    if this.dtm() > prev.dtm() + window {
        return; // can only compare against the previous cycle's array
    }

    let (Payload::ZoneTemps(now_temps), Payload::ZoneTemps(prev_temps)) =
        (this.payload(), prev.payload())
    else {
        return;
    };

    // zones whose temperature changed this cycle, to a unique value
    let changed: Vec<(u8, f64)> = now_temps
        .iter()
        .filter(|e| !prev_temps.contains(*e))
        .filter_map(|e| e.temperature.map(|t| (e.zone_idx, t)))
        .collect();
    let testable: Vec<(u8, f64)> = changed
        .iter()
        .filter(|(idx, t)| {
            state
                .arena
                .system(sys)
                .zones
                .get(idx)
                .is_some_and(|&z| state.arena.zone(z).sensor.is_none())
                && changed.iter().filter(|(_, t2)| t2 == t).count() == 1
        })
        .copied()
        .collect();
    if testable.is_empty() {
        return;
    }

    // sensors that announced a fresh temperature during the same cycle
    let ctl_idx = state.arena.system(sys).ctl;
    let sensors: Vec<(DeviceIdx, f64)> = state
        .arena
        .devices()
        .filter(|d| matches!(d.role, Role::Thm | Role::Trv))
        .filter(|d| d.ctl.is_none() || d.ctl == Some(ctl_idx))
        .filter_map(|d| {
            let m = d.index.latest(Code::_30C9)?;
            if m.dtm() <= prev.dtm() {
                return None;
            }
            match m.payload() {
                Payload::ZoneTemps(v) => {
                    v.first().and_then(|e| e.temperature).map(|t| (d.handle(), t))
                }
                _ => None,
            }
        })
        .collect();

    for (zone_idx, temp) in &testable {
        let matches: Vec<DeviceIdx> = sensors
            .iter()
            .filter(|(_, t)| t == temp)
            .map(|(d, _)| *d)
            .collect();
        let [sensor] = matches[..] else { continue };
        if let Some(&z) = state.arena.system(sys).zones.get(zone_idx) {
            if let Err(e) = entity::set_device_parent(
                &mut state.arena,
                sensor,
                ParentRef::Zone(z),
                ChildId::Zone(*zone_idx),
                true,
            ) {
                log::warn!("[DISPATCH] eavesdropped sensor rejected: {e}");
            }
        }
    }

    // if exactly one testable zone remains and no sensor matched it, the
    // controller itself is (very likely) its sensor
    let ctl_is_sensor = state
        .arena
        .system(sys)
        .zones
        .values()
        .any(|&z| state.arena.zone(z).sensor == Some(ctl_idx));
    if ctl_is_sensor {
        return;
    }
    let remaining: Vec<(u8, f64)> = testable
        .iter()
        .filter(|(idx, _)| {
            state
                .arena
                .system(sys)
                .zones
                .get(idx)
                .is_some_and(|&z| state.arena.zone(z).sensor.is_none())
        })
        .copied()
        .collect();
    let [(zone_idx, temp)] = remaining[..] else { return };
    if sensors.iter().any(|(_, t)| *t == temp) {
        return;
    }
    if let Some(&z) = state.arena.system(sys).zones.get(&zone_idx) {
        let _ = entity::set_device_parent(
            &mut state.arena,
            ctl_idx,
            ParentRef::Zone(z),
            ChildId::Zone(zone_idx),
            true,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::Packet;
    use chrono::NaiveDate;

    fn msg_at(secs: u32, frame: &str) -> Message {
        let dtm =
            NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(8, 0, secs).unwrap();
        Message::from_packet(Packet::parse(dtm, frame).unwrap()).unwrap()
    }

    fn cfg() -> GatewayConfig {
        GatewayConfig { enable_eavesdrop: true, ..GatewayConfig::default() }
    }

    #[test]
    fn temperature_array_routes_to_zones() {
        let mut state = State::new();
        let msg = msg_at(
            0,
            "045  I --- 01:158182 --:------ 01:158182 30C9 012 0007D00106A4020898",
        );
        // the controller must first be recognised (1F09 is the evidence)
        process_msg(
            &mut state,
            &cfg(),
            &msg_at(0, "045  I --- 01:158182 --:------ 01:158182 1F09 003 FF0532"),
        )
        .unwrap();
        process_msg(&mut state, &cfg(), &msg).unwrap();

        let ctl = state.device_idx("01:158182".parse().unwrap()).unwrap();
        let sys = state.arena.device(ctl).tcs.unwrap();
        assert_eq!(state.arena.system(sys).zones.len(), 3);
        for (zone_idx, temp) in [(0x00, 20.0), (0x01, 17.0), (0x02, 22.0)] {
            let z = state.arena.system(sys).zones[&zone_idx];
            assert_eq!(state.arena.zone(z).temperature(), Some(temp), "zone {zone_idx:02X}");
        }
    }

    #[test]
    fn promotion_from_generic_hvac() {
        let mut state = State::new();
        process_msg(
            &mut state,
            &cfg(),
            &msg_at(0, "045  I --- 32:155617 63:262142 --:------ 1298 003 0003E8"),
        )
        .unwrap();
        let dev = state.device_idx("32:155617".parse().unwrap()).unwrap();
        assert_eq!(state.arena.device(dev).role, Role::Co2);

        // a later 31DA does not downgrade the class
        process_msg(
            &mut state,
            &cfg(),
            &msg_at(1, "045  I --- 32:155617 63:262142 --:------ 31E0 004 00000000"),
        )
        .unwrap();
        assert_eq!(state.arena.device(dev).role, Role::Co2);
    }

    #[test]
    fn known_list_enforcement_drops_strangers() {
        let mut state = State::new();
        let mut cfg = cfg();
        cfg.enforce_known_list = true;
        let err = process_msg(
            &mut state,
            &cfg,
            &msg_at(0, "045  I --- 07:045960 --:------ 07:045960 1260 003 000911"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
        assert!(state.device_by_id.is_empty());
        // and the id is remembered as unwanted
        assert!(state.unwanted.contains(&"07:045960".parse().unwrap()));
    }

    #[test]
    fn heat_only_code_between_same_types_is_rejected() {
        let mut state = State::new();
        let err = process_msg(
            &mut state,
            &cfg(),
            &msg_at(0, "045  I --- 01:078710 01:144246 --:------ 1F09 003 FF04B5"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Packet(PacketError::AddrSetInvalid(_))));
    }

    #[test]
    fn role_violation_is_packet_invalid() {
        let mut state = State::new();
        // create a TRV first
        process_msg(
            &mut state,
            &cfg(),
            &msg_at(0, "045  I --- 04:111111 --:------ 04:111111 30C9 003 0007D0"),
        )
        .unwrap();
        // a TRV announcing a system sync is nonsense
        let err = process_msg(
            &mut state,
            &cfg(),
            &msg_at(1, "045  I --- 04:111111 --:------ 04:111111 1F09 003 FF04B5"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Packet(PacketError::Invalid(_))));
    }

    #[test]
    fn dedup_keeps_the_later_message() {
        let mut state = State::new();
        process_msg(
            &mut state,
            &cfg(),
            &msg_at(0, "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF0532"),
        )
        .unwrap();
        process_msg(
            &mut state,
            &cfg(),
            &msg_at(0, "045  I --- 01:145038 --:------ 01:145038 30C9 003 0107D0"),
        )
        .unwrap();
        let later = msg_at(1, "045  I --- 01:145038 --:------ 01:145038 30C9 003 010866");
        process_msg(&mut state, &cfg(), &later).unwrap();

        let ctl = state.device_idx("01:145038".parse().unwrap()).unwrap();
        let dev = state.arena.device(ctl);
        assert_eq!(dev.index.latest(Code::_30C9), Some(&later));
        assert_eq!(dev.index.all_for_code(Code::_30C9).count(), 1);
    }

    #[test]
    fn array_continuation_detection() {
        let first = msg_at(
            0,
            "045  I --- 01:158182 --:------ 01:158182 000A 012 001001F409C4011101F409C4",
        );
        let second =
            msg_at(2, "045  I --- 01:158182 --:------ 01:158182 000A 006 081001F409C4");
        assert!(detect_array_fragment(&second, &first));

        let late = msg_at(9, "045  I --- 01:158182 --:------ 01:158182 000A 006 081001F409C4");
        assert!(!detect_array_fragment(&late, &first));
    }

    #[test]
    fn zone_idx_bounded_by_max_zones() {
        let mut state = State::new();
        process_msg(
            &mut state,
            &cfg(),
            &msg_at(0, "045  I --- 01:158182 --:------ 01:158182 1F09 003 FF0532"),
        )
        .unwrap();
        let ctl = state.device_idx("01:158182".parse().unwrap()).unwrap();
        let sys = state.arena.device(ctl).tcs.unwrap();
        assert!(state.get_or_create_zone(sys, 0x0B).is_ok());
        assert!(state.get_or_create_zone(sys, 0x0C).is_err()); // max_zones = 12
    }
}
