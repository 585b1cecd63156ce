// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The discovery scheduler: per-entity periodic commands with freshness
//! short-circuiting, failure backoff, and code|ctx deprecation.
//!
//! Each registration tracks `next_due`, `last_msg` and `failures`. On each
//! tick:
//! 1. if a fresher message for the registration's response header arrived
//!    since the last send, the send is skipped and rescheduled;
//! 2. otherwise, if due, the command goes out with wait-for-reply; success
//!    zeroes `failures`, timeout bumps it and applies backoff
//!    (1-2 failures -> min cycle, 3-5 -> max cycle, >5 -> throttled to 24 h).
//!
//! A header may also be *deprecated*: two unsupported-looking responses in
//! a row (e.g. OpenTherm `DATA_INVALID`) stop the polling without I/O
//! until a later supported response resets it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::config::{
    JITTER_MAX_SECS, JITTER_MIN_SECS, MAX_CYCLE_SECS, MIN_CYCLE_SECS, THROTTLE_SECS,
};
use crate::protocol::address::DeviceId;
use crate::protocol::code::Code;
use crate::protocol::command::Command;
use crate::protocol::packet::Header;

/// Which entity's message index answers freshness queries for a
/// registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Device(DeviceId),
    System(DeviceId),
    Zone(DeviceId, u8),
    Dhw(DeviceId),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(id) => write!(f, "{id}"),
            Self::System(id) => write!(f, "{id}_tcs"),
            Self::Zone(id, z) => write!(f, "{id}_{z:02X}"),
            Self::Dhw(id) => write!(f, "{id}_HW"),
        }
    }
}

/// One periodic command registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub owner: EntityKey,
    pub cmd: Command,
    pub rx_header: Header,
    pub interval: Duration,
    pub timeout: Duration,
    pub next_due: NaiveDateTime,
    pub last_msg: Option<NaiveDateTime>,
    pub failures: u32,
}

/// A command the poller should send now.
#[derive(Debug, Clone)]
pub struct DueCommand {
    pub key: String,
    pub cmd: Command,
    pub timeout: Duration,
}

/// The scheduler state (owned by the gateway, ticked by one poller task).
#[derive(Debug, Default)]
pub struct Scheduler {
    regs: HashMap<String, Registration>,
    /// code-level deprecation: None = one strike, Some(false) = deprecated
    supported: HashMap<String, Option<bool>>,
    /// code|ctx-level deprecation (OpenTherm msg-ids)
    supported_ctx: HashMap<String, Option<bool>>,
}

/// Deterministic 0.05..=0.45 s start jitter, derived from the key (no RNG
/// needed: the point is de-synchronising registrations, not randomness).
fn jitter(key: &str) -> Duration {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let frac = (hasher.finish() % 1000) as f64 / 1000.0;
    Duration::from_secs_f64(JITTER_MIN_SECS + frac * (JITTER_MAX_SECS - JITTER_MIN_SECS))
}

fn backoff(failures: u32) -> Duration {
    match failures {
        0 => Duration::from_secs(0),
        1 | 2 => Duration::from_secs(MIN_CYCLE_SECS),
        3..=5 => Duration::from_secs(MAX_CYCLE_SECS),
        _ => Duration::from_secs(THROTTLE_SECS),
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a periodic command. Commands without a response header, or
    /// already-registered headers, are skipped.
    pub fn add(
        &mut self,
        owner: EntityKey,
        cmd: Command,
        interval: Duration,
        delay: Duration,
        now: NaiveDateTime,
        gwy_id: DeviceId,
    ) {
        let Some(rx_header) = cmd.rx_header(gwy_id) else {
            log::warn!("[DISC] cmd without a response header not added to discovery");
            return;
        };
        let key = format!("{owner}|{rx_header}");
        if self.regs.contains_key(&key) {
            log::info!("[DISC] duplicate header not added to discovery: {key}");
            return;
        }
        let interval = interval.max(Duration::from_secs(MAX_CYCLE_SECS));
        let delay = if delay.is_zero() { delay } else { delay + jitter(&key) };
        let timeout = if cmd.qos.rx_timeout.is_zero() {
            Duration::from_secs(MIN_CYCLE_SECS)
        } else {
            cmd.qos.rx_timeout * (u32::from(cmd.qos.retry_limit) + 1)
        };
        self.regs.insert(
            key,
            Registration {
                owner,
                cmd,
                rx_header,
                interval,
                timeout,
                next_due: now + chrono::Duration::from_std(delay).unwrap_or_default(),
                last_msg: None,
                failures: 0,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn registration(&self, key: &str) -> Option<&Registration> {
        self.regs.get(key)
    }

    /// Everything due at `now`. `latest` answers "when did the owner last
    /// hear a message for this header (any of I/RP)".
    pub fn collect_due(
        &mut self,
        now: NaiveDateTime,
        latest: impl Fn(&EntityKey, &Header) -> Option<NaiveDateTime>,
    ) -> Vec<DueCommand> {
        let mut due = Vec::new();
        for (key, reg) in &mut self.regs {
            let interval = chrono::Duration::from_std(reg.interval).unwrap_or_default();

            // a fresher message makes the send unnecessary
            if let Some(dtm) = latest(&reg.owner, &reg.rx_header) {
                if reg.next_due < dtm + interval {
                    reg.failures = 0;
                    reg.last_msg = Some(dtm);
                    reg.next_due = dtm + interval;
                }
            }
            if reg.next_due > now {
                continue;
            }

            // deprecated headers are skipped without I/O
            reg.next_due = now + interval; // may be reinstated later
            let code_key = format!("{}|{}", reg.owner, reg.cmd.code);
            if self.supported.get(&code_key).copied() == Some(Some(false)) {
                continue;
            }
            if reg.cmd.code == Code::_3220 {
                let ctx_key = format!("{code_key}|{:02X}", reg.cmd.payload.get(2).copied().unwrap_or(0));
                if self.supported_ctx.get(&ctx_key).copied() == Some(Some(false)) {
                    continue;
                }
            }

            reg.next_due = now + interval.max(chrono::Duration::seconds(MIN_CYCLE_SECS as i64));
            due.push(DueCommand { key: key.clone(), cmd: reg.cmd.clone(), timeout: reg.timeout });
        }
        due
    }

    /// Record the outcome of a sent discovery command.
    pub fn note_result(&mut self, key: &str, reply_dtm: Option<NaiveDateTime>, now: NaiveDateTime) {
        let Some(reg) = self.regs.get_mut(key) else { return };
        let interval = chrono::Duration::from_std(reg.interval).unwrap_or_default();
        match reply_dtm {
            Some(dtm) => {
                reg.failures = 0;
                reg.last_msg = Some(dtm);
                reg.next_due = dtm + interval;
            }
            None => {
                reg.failures += 1;
                reg.last_msg = None;
                let wait = backoff(reg.failures);
                reg.next_due = now + chrono::Duration::from_std(wait).unwrap_or_default();
                let level = if reg.failures > 5 { log::Level::Error } else { log::Level::Info };
                log::log!(
                    level,
                    "[DISC] No response for {key} ({}/5): retrying in {wait:?}",
                    reg.failures
                );
            }
        }
    }

    /// How long the poller may sleep before the next registration is due.
    pub fn next_wakeup(&self, now: NaiveDateTime) -> Duration {
        let floor = Duration::from_secs(MIN_CYCLE_SECS);
        let ceil = Duration::from_secs(MAX_CYCLE_SECS);
        match self.regs.values().map(|r| r.next_due).min() {
            Some(next) => (next - now).to_std().unwrap_or(floor).clamp(floor, ceil),
            None => ceil,
        }
    }

    /// Strike (or reinstate) a code|ctx. Two strikes deprecate it.
    pub fn deprecate(&mut self, owner: &EntityKey, code: Code, ctx: Option<&str>, reset: bool) {
        let (table, idx) = match ctx {
            None => (&mut self.supported, format!("{owner}|{code}")),
            Some(c) => (&mut self.supported_ctx, format!("{owner}|{code}|{c}")),
        };
        if reset {
            if table.remove(&idx).flatten() == Some(false) {
                log::info!("[DISC] Polling now reinstated for {idx}: it now appears supported");
            }
            return;
        }
        match table.get(&idx) {
            None => {
                table.insert(idx, None); // first strike
            }
            Some(None) => {
                log::info!(
                    "[DISC] Polling now deprecated for {idx}: it appears to be unsupported"
                );
                table.insert(idx, Some(false));
            }
            Some(Some(_)) => {}
        }
    }

    /// True if the code|ctx has not been deprecated.
    pub fn is_supported(&self, owner: &EntityKey, code: Code, ctx: Option<&str>) -> bool {
        let value = match ctx {
            None => self.supported.get(&format!("{owner}|{code}")),
            Some(c) => self.supported_ctx.get(&format!("{owner}|{code}|{c}")),
        };
        value.copied().flatten() != Some(false)
    }
}

// --- default discovery tables ----------------------------------------------

const HOURS_24: Duration = Duration::from_secs(24 * 60 * 60);
const HOURS_1: Duration = Duration::from_secs(60 * 60);
const MINS_5: Duration = Duration::from_secs(5 * 60);

/// The periodic commands a device of `role` polls for itself.
pub fn device_discovery_cmds(
    role: crate::protocol::address::Role,
    id: DeviceId,
) -> Vec<(Command, Duration, Duration)> {
    use crate::protocol::address::Role;
    let mut cmds = vec![(Command::get_device_info(id), HOURS_24, Duration::ZERO)];
    match role {
        Role::Bdr => {
            cmds.push((Command::get_relay_demand(id, 0x00), HOURS_1, Duration::ZERO));
            cmds.push((Command::get_tpi_params(id, 0x00), HOURS_24, Duration::ZERO));
        }
        Role::Otb => {
            // the fast OpenTherm set; unsupported ids deprecate themselves
            for msg_id in [0x00, 0x11, 0x12, 0x13, 0x19, 0x1A, 0x1C] {
                cmds.push((Command::get_opentherm(id, msg_id), MINS_5, Duration::ZERO));
            }
            for msg_id in [0x03, 0x05, 0x1B, 0x38, 0x39, 0x7D] {
                cmds.push((Command::get_opentherm(id, msg_id), HOURS_24, Duration::ZERO));
            }
        }
        Role::Fan => {
            cmds.push((Command::get_ventilation_state(id), MINS_5, Duration::ZERO));
            cmds.push((
                Command::get_fan_rate(id),
                HOURS_24,
                Duration::from_secs(15),
            ));
        }
        _ => {}
    }
    cmds
}

/// The periodic commands a TCS polls against its controller.
pub fn system_discovery_cmds(ctl: DeviceId) -> Vec<(Command, Duration, Duration)> {
    let mut cmds = Vec::new();
    for zone_type in [0x08, 0x09, 0x0A, 0x0B, 0x11, 0x04] {
        cmds.push((Command::get_system_zones(ctl, zone_type), HOURS_24, Duration::ZERO));
    }
    cmds.push((Command::get_system_mode(ctl), MINS_5, Duration::ZERO));
    cmds.push((Command::get_datetime(ctl), HOURS_1, Duration::ZERO));
    cmds.push((Command::get_language(ctl), HOURS_24, Duration::ZERO));
    cmds.push((Command::get_schedule_version(ctl), MINS_5, Duration::ZERO));
    cmds.push((Command::get_fault_log_entry(ctl, 0x00), HOURS_1, Duration::ZERO));
    cmds
}

/// The periodic commands a heating zone polls against its controller.
pub fn zone_discovery_cmds(ctl: DeviceId, zone_idx: u8) -> Vec<(Command, Duration, Duration)> {
    vec![
        (Command::get_zone_name(ctl, zone_idx), HOURS_24, Duration::ZERO),
        (Command::get_zone_params(ctl, zone_idx), HOURS_1, Duration::ZERO),
        (Command::get_setpoint(ctl, zone_idx), MINS_5, Duration::ZERO),
        (Command::get_zone_temp(ctl, zone_idx), MINS_5, Duration::ZERO),
        (Command::get_window_state(ctl, zone_idx), MINS_5, Duration::ZERO),
    ]
}

/// The periodic commands the DHW zone polls against its controller.
pub fn dhw_discovery_cmds(ctl: DeviceId) -> Vec<(Command, Duration, Duration)> {
    vec![
        (Command::get_dhw_params(ctl), HOURS_24, Duration::ZERO),
        (Command::get_dhw_mode(ctl), MINS_5, Duration::ZERO),
        (Command::get_dhw_temp(ctl), MINS_5, Duration::ZERO),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn gwy() -> DeviceId {
        "18:002563".parse().unwrap()
    }

    fn ctl() -> DeviceId {
        "01:145038".parse().unwrap()
    }

    fn scheduler_with_one_reg() -> (Scheduler, String) {
        let mut sched = Scheduler::new();
        let owner = EntityKey::System(ctl());
        let cmd = Command::get_system_mode(ctl());
        let key = format!("{owner}|{}", cmd.rx_header(gwy()).unwrap());
        sched.add(owner, cmd, Duration::from_secs(300), Duration::ZERO, now(), gwy());
        (sched, key)
    }

    #[test]
    fn registration_and_due() {
        let (mut sched, key) = scheduler_with_one_reg();
        assert_eq!(sched.len(), 1);

        let due = sched.collect_due(now(), |_, _| None);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, key);

        // immediately after, nothing is due
        assert!(sched.collect_due(now(), |_, _| None).is_empty());
    }

    #[test]
    fn duplicate_headers_are_skipped() {
        let (mut sched, _) = scheduler_with_one_reg();
        sched.add(
            EntityKey::System(ctl()),
            Command::get_system_mode(ctl()),
            Duration::from_secs(600),
            Duration::ZERO,
            now(),
            gwy(),
        );
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn fresh_messages_defer_the_send() {
        let (mut sched, _) = scheduler_with_one_reg();
        // a message arrived moments ago: no I/O needed
        let due = sched.collect_due(now(), |_, _| Some(now() - chrono::Duration::seconds(1)));
        assert!(due.is_empty());
    }

    #[test]
    fn backoff_escalates_to_throttle() {
        let (mut sched, key) = scheduler_with_one_reg();
        let mut t = now();
        for expected in [
            MIN_CYCLE_SECS,
            MIN_CYCLE_SECS,
            MAX_CYCLE_SECS,
            MAX_CYCLE_SECS,
            MAX_CYCLE_SECS,
            THROTTLE_SECS,
        ] {
            let due = sched.collect_due(t, |_, _| None);
            assert_eq!(due.len(), 1, "at {t}");
            sched.note_result(&key, None, t);
            let reg = sched.registration(&key).unwrap();
            assert_eq!((reg.next_due - t).num_seconds(), expected as i64);
            t = reg.next_due;
        }
        // > 5 failures: throttled to 24 h
        assert!(sched.registration(&key).unwrap().failures > 5);
    }

    #[test]
    fn success_resets_failures() {
        let (mut sched, key) = scheduler_with_one_reg();
        sched.collect_due(now(), |_, _| None);
        sched.note_result(&key, None, now());
        assert_eq!(sched.registration(&key).unwrap().failures, 1);
        sched.note_result(&key, Some(now()), now());
        assert_eq!(sched.registration(&key).unwrap().failures, 0);
    }

    #[test]
    fn two_strikes_deprecate_then_reset_reinstates() {
        let mut sched = Scheduler::new();
        let owner = EntityKey::Device("10:048122".parse().unwrap());
        assert!(sched.is_supported(&owner, Code::_3220, Some("47")));
        sched.deprecate(&owner, Code::_3220, Some("47"), false);
        assert!(sched.is_supported(&owner, Code::_3220, Some("47"))); // one strike
        sched.deprecate(&owner, Code::_3220, Some("47"), false);
        assert!(!sched.is_supported(&owner, Code::_3220, Some("47"))); // two strikes
        sched.deprecate(&owner, Code::_3220, Some("47"), true);
        assert!(sched.is_supported(&owner, Code::_3220, Some("47")));
    }

    #[test]
    fn deprecated_headers_are_skipped_without_io() {
        let mut sched = Scheduler::new();
        let otb: DeviceId = "10:048122".parse().unwrap();
        let owner = EntityKey::Device(otb);
        sched.add(
            owner.clone(),
            Command::get_opentherm(otb, 0x47),
            Duration::from_secs(300),
            Duration::ZERO,
            now(),
            gwy(),
        );
        sched.deprecate(&owner, Code::_3220, Some("47"), false);
        sched.deprecate(&owner, Code::_3220, Some("47"), false);
        assert!(sched.collect_due(now(), |_, _| None).is_empty());
    }
}
