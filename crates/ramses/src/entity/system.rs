// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The TCS (Temperature Control System) entity.
//!
//! The original modelled system behaviours as a tower of mixins; here each
//! behaviour is an explicit capability block composed into [`System`]:
//! multi-zone bookkeeping, stored hot water, system mode, language,
//! datetime, schedule sync (with the per-TCS fragment lock) and the fault
//! logbook. The capabilities share the system's message index.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::OwnedMutexGuard;

use crate::config::SCHEDULE_LOCK_TIMEOUT;
use crate::error::{Error, ScheduleError};
use crate::index::MessageIndex;
use crate::message::Message;
use crate::protocol::code::Code;
use crate::protocol::payload::Payload;

use super::{Arena, DeviceIdx, DhwIdx, SystemIdx, ZoneIdx};

/// The per-TCS schedule lock: one 0404 conversation at a time, reentrant
/// for the same zone idx.
#[derive(Debug)]
pub struct ScheduleLock {
    inner: Arc<tokio::sync::Mutex<()>>,
    holder: Mutex<Option<u8>>,
}

impl Default for ScheduleLock {
    fn default() -> Self {
        Self { inner: Arc::new(tokio::sync::Mutex::new(())), holder: Mutex::new(None) }
    }
}

/// A held schedule lock; released on drop (cancellation-safe).
#[derive(Debug)]
pub struct ScheduleLockGuard {
    _guard: OwnedMutexGuard<()>,
    lock: Arc<ScheduleLock>,
}

impl Drop for ScheduleLockGuard {
    fn drop(&mut self) {
        *self.lock.holder.lock() = None;
    }
}

impl ScheduleLock {
    /// Acquire for `zone_idx`, waiting at most the 3-minute limit.
    /// Reentrant acquisition for the same idx returns None (already held).
    pub async fn obtain(
        self: &Arc<Self>,
        zone_idx: u8,
    ) -> Result<Option<ScheduleLockGuard>, Error> {
        if *self.holder.lock() == Some(zone_idx) {
            return Ok(None); // reentrant for the same zone idx
        }
        let guard = tokio::time::timeout(SCHEDULE_LOCK_TIMEOUT, self.inner.clone().lock_owned())
            .await
            .map_err(|_| Error::Schedule(ScheduleError::LockTimeout))?;
        *self.holder.lock() = Some(zone_idx);
        Ok(Some(ScheduleLockGuard { _guard: guard, lock: Arc::clone(self) }))
    }

    /// The zone idx currently holding the lock, if any.
    pub fn holder(&self) -> Option<u8> {
        *self.holder.lock()
    }

    pub(crate) fn release(&self) {
        *self.holder.lock() = None;
    }
}

/// A TCS, rooted at its controller device.
#[derive(Debug)]
pub struct System {
    pub(crate) idx: SystemIdx,
    pub ctl: DeviceIdx,
    pub index: MessageIndex,
    /// zone idx -> zone entity (never includes the DHW zone)
    pub zones: std::collections::BTreeMap<u8, ZoneIdx>,
    pub dhw: Option<DhwIdx>,
    /// The FC (appliance control) slot: a BDR or an OTB
    pub app_cntrl: Option<DeviceIdx>,
    pub ufh_ctls: Vec<DeviceIdx>,
    pub max_zones: u8,
    /// The previous 30C9 array, for zone-sensor eavesdropping
    pub prev_30c9: Option<Message>,
    pub sched_lock: Arc<ScheduleLock>,
}

pub(crate) fn alloc_system(arena: &mut Arena, ctl: DeviceIdx, max_zones: u8) -> SystemIdx {
    let idx = SystemIdx(arena.systems.len() as u32);
    arena.systems.push(System {
        idx,
        ctl,
        index: MessageIndex::new(),
        zones: std::collections::BTreeMap::new(),
        dhw: None,
        app_cntrl: None,
        ufh_ctls: Vec::new(),
        max_zones,
        prev_30c9: None,
        sched_lock: Arc::new(ScheduleLock::default()),
    });
    let sys = idx;
    let dev = arena.device_mut(ctl);
    dev.tcs = Some(sys);
    dev.ctl = Some(ctl);
    dev.iz_controller = Some(true);
    idx
}

impl System {
    pub(crate) fn handle(&self) -> SystemIdx {
        self.idx
    }

    // --- capability accessors (index-backed) --------------------------------

    /// The 1F09 cycle countdown, seconds.
    pub fn sync_remaining(&self) -> Option<f64> {
        match self.index.latest(Code::_1F09).map(|m| m.payload()) {
            Some(Payload::SystemSync(s)) => Some(s.remaining_seconds),
            _ => None,
        }
    }

    pub fn system_mode(&self) -> Option<&'static str> {
        match self.index.latest(Code::_2E04).map(|m| m.payload()) {
            Some(Payload::SystemMode(m)) => Some(m.system_mode),
            _ => None,
        }
    }

    pub fn language(&self) -> Option<String> {
        match self.index.latest(Code::_0100).map(|m| m.payload()) {
            Some(Payload::Language(l)) => Some(l.language.clone()),
            _ => None,
        }
    }

    /// The 0006 change counter (schedule version).
    pub fn schedule_version(&self) -> Option<u16> {
        match self.index.latest(Code::_0006).map(|m| m.payload()) {
            Some(Payload::ScheduleSync(s)) => s.change_counter,
            _ => None,
        }
    }

    /// The controller's reported date and time (313F).
    pub fn datetime(&self) -> Option<chrono::NaiveDateTime> {
        match self.index.latest(Code::_313F).map(|m| m.payload()) {
            Some(Payload::Datetime(d)) => d.datetime,
            _ => None,
        }
    }

    /// System-wide heat demand (3150 at domain FC).
    pub fn heat_demand(&self) -> Option<f64> {
        match self.index.latest(Code::_3150).map(|m| m.payload()) {
            Some(Payload::HeatDemand(v)) => {
                v.iter().find(|e| e.idx == 0xFC).and_then(|e| e.heat_demand)
            }
            _ => None,
        }
    }

    pub fn tpi_params(&self) -> Option<Value> {
        match self.index.latest(Code::_1100).map(|m| m.payload()) {
            Some(p @ Payload::TpiParams(_)) => Some(p.to_json()),
            _ => None,
        }
    }

    /// The fault log, newest-first, one entry per retained log idx.
    pub fn fault_log(&self) -> Vec<Value> {
        let mut entries: Vec<_> = self
            .index
            .all_for_code(Code::_0418)
            .filter_map(|m| match m.payload() {
                Payload::FaultLogEntry(Some(e)) => Some(e.clone()),
                _ => None,
            })
            .collect();
        entries.sort_by_key(|e| e.log_idx);
        entries.iter().filter_map(|e| serde_json::to_value(e).ok()).collect()
    }

    // --- views --------------------------------------------------------------

    pub fn schema_view(&self, arena: &Arena) -> Value {
        let mut zones = serde_json::Map::new();
        for (&zone_idx, &z) in &self.zones {
            zones.insert(format!("{zone_idx:02X}"), arena.zone(z).schema_view(arena));
        }
        let mut schema = json!({
            "system": {
                "appliance_control": self.app_cntrl.map(|d| arena.device(d).id),
            },
            "zones": Value::Object(zones),
        });
        if let Some(dhw) = self.dhw {
            schema["stored_hotwater"] = arena.dhw(dhw).schema_view(arena);
        }
        if !self.ufh_ctls.is_empty() {
            schema["underfloor_heating"] = Value::Object(
                self.ufh_ctls
                    .iter()
                    .map(|&u| (arena.device(u).id.to_string(), json!({})))
                    .collect(),
            );
        }
        schema
    }

    pub fn status_view(&self, arena: &Arena) -> Value {
        let mut zones = serde_json::Map::new();
        for (&zone_idx, &z) in &self.zones {
            zones.insert(format!("{zone_idx:02X}"), arena.zone(z).status_view());
        }
        json!({
            "system_mode": self.system_mode(),
            "heat_demand": self.heat_demand(),
            "zones": Value::Object(zones),
            "stored_hotwater": self.dhw.map(|d| arena.dhw(d).status_view()),
        })
    }

    pub fn params_view(&self) -> Value {
        json!({
            "language": self.language(),
            "tpi_params": self.tpi_params(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schedule_lock_is_reentrant_per_idx() {
        let lock = Arc::new(ScheduleLock::default());
        let guard = lock.obtain(0x01).await.unwrap();
        assert!(guard.is_some());
        assert_eq!(lock.holder(), Some(0x01));

        // same idx: reentrant, no second guard
        assert!(lock.obtain(0x01).await.unwrap().is_none());

        drop(guard);
        lock.release();
        assert_eq!(lock.holder(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_lock_times_out() {
        let lock = Arc::new(ScheduleLock::default());
        let _held = lock.obtain(0x01).await.unwrap();

        let err = lock.obtain(0x02).await.unwrap_err();
        assert_eq!(err, Error::Schedule(ScheduleError::LockTimeout));
    }
}
