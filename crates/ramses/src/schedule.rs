// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The 0404 schedule engine: fragment assembly and the switchpoint codec.
//!
//! A zone's weekly schedule travels as 1-based fragments of one zlib
//! stream; the inflated stream is a sequence of 20-byte little-endian
//! records `(zone_idx, day_of_week, time-of-day minutes, value)`, where
//! the value is a centi-degree setpoint for heating zones or a 0/1
//! enabled flag for the DHW zone.
//!
//! Assembly succeeds only when fragments `1..=total_frags` are all
//! present and agree on `total_frags`; a fragment carrying a different
//! total restarts the set (the schedule changed mid-fetch). All fragment
//! I/O is guarded by the owning TCS's schedule lock.

use std::future::Future;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, ScheduleError};
use crate::message::Message;
use crate::protocol::address::DeviceId;
use crate::protocol::command::Command;
use crate::protocol::payload::heat::ScheduleFragment;
use crate::protocol::payload::Payload;

const RECORD_LEN: usize = 20;
const FRAGMENT_LEN: usize = 41;

/// One switchpoint: a time of day plus either a heating setpoint or a
/// DHW enabled flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switchpoint {
    pub time_of_day: String, // "HH:MM"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_setpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// One day's switchpoints (day 0 = Monday).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day_of_week: u8,
    pub switchpoints: Vec<Switchpoint>,
}

/// A full weekly schedule for one zone (or the DHW zone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub zone_idx: u8,
    pub schedule: Vec<DaySchedule>,
}

/// Inflate and decode a complete, ordered fragment sequence.
pub fn fragments_to_schedule(fragments: &[Vec<u8>]) -> Result<Schedule, Error> {
    let blob: Vec<u8> = fragments.iter().flatten().copied().collect();
    let mut raw = Vec::new();
    ZlibDecoder::new(blob.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| Error::Schedule(ScheduleError::Flow(format!("inflate failed: {e}"))))?;
    if raw.is_empty() || raw.len() % RECORD_LEN != 0 {
        return Err(ScheduleError::Flow(format!("bad schedule length: {}", raw.len())).into());
    }

    let mut zone_idx = 0;
    let mut old_day = 0;
    let mut schedule: Vec<DaySchedule> = Vec::new();
    let mut switchpoints: Vec<Switchpoint> = Vec::new();
    for rec in raw.chunks_exact(RECORD_LEN) {
        // <xxxxB xxxB xxxH xxH xx> (little-endian)
        zone_idx = rec[4];
        let dow = rec[8];
        let tod = u16::from_le_bytes([rec[12], rec[13]]);
        let val = u16::from_le_bytes([rec[16], rec[17]]);

        if dow > old_day {
            schedule.push(DaySchedule { day_of_week: old_day, switchpoints });
            switchpoints = Vec::new();
            old_day = dow;
        }
        let (heat_setpoint, enabled) = match val {
            0 | 1 => (None, Some(val == 1)),
            v => (Some(f64::from(v) / 100.0), None),
        };
        switchpoints.push(Switchpoint {
            time_of_day: format!("{:02}:{:02}", tod / 60, tod % 60),
            heat_setpoint,
            enabled,
        });
    }
    schedule.push(DaySchedule { day_of_week: old_day, switchpoints });

    Ok(Schedule { zone_idx, schedule })
}

/// Encode and deflate a schedule into wire fragments.
pub fn schedule_to_fragments(sched: &Schedule) -> Result<Vec<Vec<u8>>, Error> {
    let mut raw = Vec::new();
    for day in &sched.schedule {
        for sp in &day.switchpoints {
            let (h, m) = parse_tod(&sp.time_of_day)?;
            let tod = u16::from(h) * 60 + u16::from(m);
            let val: u16 = match (sp.heat_setpoint, sp.enabled) {
                (Some(t), _) => (t * 100.0).round() as u16,
                (None, Some(enabled)) => u16::from(enabled),
                (None, None) => {
                    return Err(ScheduleError::Flow(
                        "switchpoint needs a heat_setpoint or an enabled flag".into(),
                    )
                    .into());
                }
            };
            let mut rec = [0u8; RECORD_LEN];
            rec[4] = sched.zone_idx;
            rec[8] = day.day_of_week;
            rec[12..14].copy_from_slice(&tod.to_le_bytes());
            rec[16..18].copy_from_slice(&val.to_le_bytes());
            raw.extend_from_slice(&rec);
        }
    }

    let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(9));
    enc.write_all(&raw)
        .and_then(|()| enc.finish())
        .map(|blob| blob.chunks(FRAGMENT_LEN).map(<[u8]>::to_vec).collect())
        .map_err(|e| Error::Schedule(ScheduleError::Flow(format!("deflate failed: {e}"))))
}

fn parse_tod(s: &str) -> Result<(u8, u8), Error> {
    let bad = || Error::Schedule(ScheduleError::Flow(format!("bad time_of_day: {s:?}")));
    let (h, m) = s.split_once(':').ok_or_else(bad)?;
    let h: u8 = h.parse().map_err(|_| bad())?;
    let m: u8 = m.parse().map_err(|_| bad())?;
    if h > 23 || m > 59 {
        return Err(bad());
    }
    Ok((h, m))
}

/// An in-progress fragment set.
#[derive(Debug, Default)]
pub struct FragmentSet {
    frags: Vec<Option<Vec<u8>>>,
}

impl FragmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one received fragment in. A fragment whose `total_frags`
    /// disagrees with the set restarts it (the schedule changed).
    pub fn update(&mut self, frag: &ScheduleFragment) {
        let Some(total) = frag.total_frags else {
            self.frags.clear(); // the zone has no schedule
            return;
        };
        if self.frags.len() != usize::from(total) {
            self.frags = vec![None; usize::from(total)];
        }
        if frag.frag_number >= 1 && usize::from(frag.frag_number) <= self.frags.len() {
            self.frags[usize::from(frag.frag_number) - 1] = Some(frag.fragment.clone());
        }
    }

    pub fn total(&self) -> u8 {
        self.frags.len() as u8
    }

    /// The 1-based fragment numbers still missing.
    pub fn missing(&self) -> Vec<u8> {
        self.frags
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_none())
            .map(|(i, _)| (i + 1) as u8)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.frags.is_empty() && self.frags.iter().all(Option::is_some)
    }

    /// Assemble and decode; fails unless every fragment is present.
    pub fn assemble(&self) -> Result<Schedule, Error> {
        if !self.is_complete() {
            return Err(ScheduleError::Flow(format!(
                "missing fragments: {:?} of {}",
                self.missing(),
                self.frags.len()
            ))
            .into());
        }
        let fragments: Vec<Vec<u8>> =
            self.frags.iter().map(|f| f.clone().unwrap_or_default()).collect();
        fragments_to_schedule(&fragments)
    }
}

/// Fetch a zone's schedule, fragment by fragment. `send` transmits an RQ
/// and resolves with the correlated reply, or None on timeout.
///
/// The caller must hold the TCS schedule lock for `zone_idx`.
pub async fn fetch_schedule<F, Fut>(
    ctl: DeviceId,
    zone_idx: u8,
    send: F,
) -> Result<Schedule, Error>
where
    F: Fn(Command) -> Fut,
    Fut: Future<Output = Result<Option<Message>, Error>>,
{
    let mut set = FragmentSet::new();
    let mut budget = 16u8; // churn guard: a schedule is at most ~6 fragments

    // the first request also learns total_frags
    let mut want = 1u8;
    loop {
        let cmd = Command::get_schedule_fragment(ctl, zone_idx, want, set.total());
        let reply = send(cmd).await?.ok_or_else(|| {
            Error::Schedule(ScheduleError::Flow(format!(
                "no reply for fragment {want} of zone {zone_idx:02X}"
            )))
        })?;
        match reply.payload() {
            Payload::ScheduleFragment(frag) => {
                if frag.total_frags.is_none() {
                    return Err(ScheduleError::Flow(format!(
                        "zone {zone_idx:02X} has no schedule"
                    ))
                    .into());
                }
                set.update(frag);
            }
            other => {
                return Err(ScheduleError::Flow(format!(
                    "unexpected reply payload: {other:?}"
                ))
                .into());
            }
        }
        if set.is_complete() {
            return set.assemble();
        }
        want = *set.missing().first().ok_or_else(|| {
            Error::Schedule(ScheduleError::Flow("empty fragment set".into()))
        })?;
        budget -= 1;
        if budget == 0 {
            return Err(ScheduleError::Flow(format!(
                "schedule for zone {zone_idx:02X} kept changing underneath the fetch"
            ))
            .into());
        }
    }
}

/// Write a schedule back, fragment by fragment (W 0404). The caller must
/// hold the TCS schedule lock.
pub async fn store_schedule<F, Fut>(
    ctl: DeviceId,
    sched: &Schedule,
    send: F,
) -> Result<(), Error>
where
    F: Fn(Command) -> Fut,
    Fut: Future<Output = Result<Option<Message>, Error>>,
{
    let fragments = schedule_to_fragments(sched)?;
    let total = fragments.len() as u8;
    for (i, frag) in fragments.iter().enumerate() {
        let cmd =
            Command::put_schedule_fragment(ctl, sched.zone_idx, (i + 1) as u8, total, frag);
        send(cmd).await?;
    }
    Ok(())
}
