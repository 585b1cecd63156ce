// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A message: a packet plus its typed payload and expiry logic.

use chrono::NaiveDateTime;

use crate::error::Error;
use crate::protocol::address::DeviceId;
use crate::protocol::code::{Code, Expiry, Verb};
use crate::protocol::packet::{Ctx, Header, Packet};
use crate::protocol::payload::{self, Payload};

/// A parsed packet with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pkt: Packet,
    payload: Payload,
    /// True once an array continuation has been merged in
    merged_array: bool,
}

impl Message {
    /// Parse a packet's payload and wrap it.
    pub fn from_packet(pkt: Packet) -> Result<Self, Error> {
        let payload = payload::parse(&pkt)?;
        Ok(Self { pkt, payload, merged_array: false })
    }

    pub fn packet(&self) -> &Packet {
        &self.pkt
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn dtm(&self) -> NaiveDateTime {
        self.pkt.dtm()
    }

    pub fn verb(&self) -> Verb {
        self.pkt.verb()
    }

    pub fn code(&self) -> Code {
        self.pkt.code()
    }

    pub fn src(&self) -> DeviceId {
        self.pkt.src()
    }

    pub fn dst(&self) -> DeviceId {
        self.pkt.dst()
    }

    pub fn ctx(&self) -> Ctx {
        if self.merged_array {
            Ctx::Array
        } else {
            self.pkt.ctx()
        }
    }

    pub fn header(&self) -> Header {
        let mut hdr = self.pkt.header();
        if self.merged_array {
            hdr.ctx = Ctx::Array;
        }
        hdr
    }

    /// True if the payload is (or has become) an index array.
    pub fn has_array(&self) -> bool {
        self.merged_array || self.pkt.has_array()
    }

    /// Merge a continuation packet's elements onto this message (the two
    /// consecutive-I heuristic). The merged message keeps the later dtm.
    pub fn merge_continuation(&self, later: &Self) -> Option<Self> {
        let merged_payload = match (&self.payload, &later.payload) {
            (Payload::ZoneParams(a), Payload::ZoneParams(b)) => {
                Payload::ZoneParams(a.iter().chain(b).cloned().collect())
            }
            (Payload::UfhSetpoints(a), Payload::UfhSetpoints(b)) => {
                Payload::UfhSetpoints(a.iter().chain(b).cloned().collect())
            }
            (Payload::ZoneTemps(a), Payload::ZoneTemps(b)) => {
                Payload::ZoneTemps(a.iter().chain(b).cloned().collect())
            }
            (Payload::Setpoints(a), Payload::Setpoints(b)) => {
                Payload::Setpoints(a.iter().chain(b).cloned().collect())
            }
            _ => return None,
        };
        Some(Self { pkt: later.pkt.clone(), payload: merged_payload, merged_array: true })
    }

    /// True if the message is stale at `now`, per its code's expiry policy.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        let age = (now - self.dtm()).to_std().unwrap_or_default();
        match self.code().expiry() {
            Expiry::Never => false,
            Expiry::After(ttl) => age > ttl,
            Expiry::SyncCycle => match &self.payload {
                Payload::SystemSync(sync) => {
                    age.as_secs_f64() > sync.remaining_seconds * 3.0
                }
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "|| {:18} | {:18} | {} | {:16} | {} ||",
            self.src().to_string(),
            self.dst().to_string(),
            self.verb(),
            self.code().name().unwrap_or("unknown"),
            self.header(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn msg_at(secs: u32, frame: &str) -> Message {
        let dtm =
            NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(8, 0, secs).unwrap();
        Message::from_packet(Packet::parse(dtm, frame).unwrap()).unwrap()
    }

    fn now_at(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(8, 0, secs).unwrap()
    }

    #[test]
    fn window_state_expires_after_an_hour() {
        let msg = msg_at(0, "045  I --- 01:145038 --:------ 01:145038 12B0 003 01C800");
        assert!(!msg.is_expired(now_at(0) + chrono::Duration::minutes(59)));
        assert!(msg.is_expired(now_at(0) + chrono::Duration::minutes(61)));
    }

    #[test]
    fn sync_expiry_follows_the_cycle() {
        // remaining = 133.0 s; expires after 399 s
        let msg = msg_at(0, "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF0532");
        assert!(!msg.is_expired(now_at(0) + chrono::Duration::seconds(398)));
        assert!(msg.is_expired(now_at(0) + chrono::Duration::seconds(400)));
    }

    #[test]
    fn temperatures_never_expire() {
        let msg = msg_at(0, "045  I --- 04:111111 --:------ 04:111111 30C9 003 0007D0");
        assert!(!msg.is_expired(now_at(0) + chrono::Duration::days(7)));
    }

    #[test]
    fn continuation_merge_extends_the_array() {
        let first = msg_at(
            0,
            "045  I --- 01:158182 --:------ 01:158182 000A 012 001001F409C4011101F409C4",
        );
        let second = msg_at(2, "045  I --- 01:158182 --:------ 01:158182 000A 006 081001F409C4");
        let merged = first.merge_continuation(&second).unwrap();
        assert!(merged.has_array());
        assert_eq!(merged.ctx(), Ctx::Array);
        let Payload::ZoneParams(zones) = merged.payload() else { panic!() };
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[2].zone_idx, 0x08);
        assert_eq!(merged.dtm(), second.dtm());
    }
}
