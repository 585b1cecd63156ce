// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-entity message index.
//!
//! Two structures per entity:
//! - `by_code`: code -> latest I-or-RP message (fast attribute access)
//! - `by_code_verb_ctx`: code -> verb -> ctx -> message (header lookups,
//!   retention of distinct contexts such as every fault-log index)
//!
//! Insertion is most-recent-wins per header and timestamp-monotonic within
//! a context: a message older than the one already indexed for its header
//! is ignored. Expired messages are evicted on a housekeeping pass.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::message::Message;
use crate::protocol::code::{Code, Verb};
use crate::protocol::packet::{Ctx, Header};

/// Default retention for the housekeeping pass.
pub const HOUSEKEEPING_RETENTION_SECS: i64 = 24 * 60 * 60;

/// Statistics for one index (exposed via the admin-ish surfaces).
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexStats {
    pub inserted: u64,
    pub superseded: u64,
    pub evicted: u64,
}

/// A deduplicated per-entity store keyed by `(code, verb, ctx)`.
#[derive(Debug, Default)]
pub struct MessageIndex {
    by_code: HashMap<Code, Message>,
    by_code_verb_ctx: HashMap<Code, HashMap<Verb, HashMap<Ctx, Message>>>,
    stats: IndexStats,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message, superseding any message with the same header.
    ///
    /// Returns the superseded message, if any. An insert older than the
    /// currently-indexed message for the same header is a no-op.
    pub fn insert(&mut self, msg: Message) -> Option<Message> {
        let slot = self
            .by_code_verb_ctx
            .entry(msg.code())
            .or_default()
            .entry(msg.verb())
            .or_default()
            .entry(msg.ctx());

        use std::collections::hash_map::Entry;
        let old = match slot {
            Entry::Occupied(mut e) => {
                if e.get().dtm() > msg.dtm() {
                    return None; // stale: keep the newer message
                }
                self.stats.superseded += 1;
                Some(e.insert(msg.clone()))
            }
            Entry::Vacant(e) => {
                e.insert(msg.clone());
                None
            }
        };

        if matches!(msg.verb(), Verb::I | Verb::Rp) {
            let keep = self.by_code.get(&msg.code()).map_or(true, |m| m.dtm() <= msg.dtm());
            if keep {
                self.by_code.insert(msg.code(), msg);
            }
        }

        self.stats.inserted += 1;
        old
    }

    /// The latest I/RP message for a code.
    pub fn latest(&self, code: Code) -> Option<&Message> {
        self.by_code.get(&code)
    }

    /// The latest unexpired I/RP message for a code.
    pub fn latest_fresh(&self, code: Code, now: NaiveDateTime) -> Option<&Message> {
        self.by_code.get(&code).filter(|m| !m.is_expired(now))
    }

    /// Exact `(code, verb, ctx)` lookup.
    pub fn get(&self, code: Code, verb: Verb, ctx: &Ctx) -> Option<&Message> {
        self.by_code_verb_ctx.get(&code)?.get(&verb)?.get(ctx)
    }

    /// Header lookup. A header without a ctx suffix matches either the
    /// no-index or the indeterminate slot.
    pub fn lookup(&self, hdr: &Header) -> Option<&Message> {
        let by_ctx = self.by_code_verb_ctx.get(&hdr.code)?.get(&hdr.verb)?;
        let msg = match &hdr.ctx {
            Ctx::None | Ctx::Indeterminate => {
                by_ctx.get(&Ctx::None).or_else(|| by_ctx.get(&Ctx::Indeterminate))
            }
            ctx => by_ctx.get(ctx),
        }?;
        (msg.header().code == hdr.code && msg.src() == hdr.src).then_some(msg)
    }

    /// All verb/ctx slots for a code (e.g. every fault-log index).
    pub fn all_for_code(&self, code: Code) -> impl Iterator<Item = &Message> {
        self.by_code_verb_ctx
            .get(&code)
            .into_iter()
            .flat_map(|by_verb| by_verb.values())
            .flat_map(|by_ctx| by_ctx.values())
    }

    /// Every message in the index, in no particular order.
    pub fn iter_all(&self) -> impl Iterator<Item = &Message> {
        self.by_code_verb_ctx
            .values()
            .flat_map(|by_verb| by_verb.values())
            .flat_map(|by_ctx| by_ctx.values())
    }

    /// The codes seen, sorted (for the `traits` view).
    pub fn codes_seen(&self) -> Vec<Code> {
        let mut codes: Vec<Code> = self.by_code.keys().copied().collect();
        codes.sort();
        codes
    }

    /// Drop a single message by its key (used when an expired message is
    /// referenced by an API).
    pub fn remove(&mut self, code: Code, verb: Verb, ctx: &Ctx) -> Option<Message> {
        let removed = self.by_code_verb_ctx.get_mut(&code)?.get_mut(&verb)?.remove(ctx);
        if let Some(msg) = &removed {
            if self.by_code.get(&code).is_some_and(|m| m.dtm() == msg.dtm()) {
                self.by_code.remove(&code);
            }
            self.stats.evicted += 1;
        }
        removed
    }

    /// Evict everything expired at `now`, plus anything older than the
    /// retention window. Returns the eviction count.
    pub fn evict_expired(&mut self, now: NaiveDateTime) -> usize {
        let horizon = now - chrono::Duration::seconds(HOUSEKEEPING_RETENTION_SECS);
        let mut evicted = 0;
        for by_verb in self.by_code_verb_ctx.values_mut() {
            for by_ctx in by_verb.values_mut() {
                by_ctx.retain(|_, m| {
                    let keep = !m.is_expired(now) && m.dtm() >= horizon;
                    if !keep {
                        evicted += 1;
                    }
                    keep
                });
            }
            by_verb.retain(|_, by_ctx| !by_ctx.is_empty());
        }
        self.by_code_verb_ctx.retain(|_, by_verb| !by_verb.is_empty());
        self.by_code.retain(|_, m| !m.is_expired(now) && m.dtm() >= horizon);
        self.stats.evicted += evicted as u64;
        evicted
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.iter_all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code_verb_ctx.is_empty()
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

    #[test]
    fn insert_then_lookup_by_header() {
        let mut idx = MessageIndex::new();
        let msg = msg_at(0, "053 RP --- 01:145038 18:002563 --:------ 0008 002 00C8");
        let hdr = msg.header();
        idx.insert(msg.clone());
        assert_eq!(idx.lookup(&hdr), Some(&msg));
        assert_eq!(idx.lookup(&hdr).unwrap().header(), hdr);
    }

    #[test]
    fn same_header_supersedes() {
        let mut idx = MessageIndex::new();
        let first = msg_at(0, "045  I --- 01:145038 --:------ 01:145038 30C9 003 0007D0");
        let second = msg_at(1, "045  I --- 01:145038 --:------ 01:145038 30C9 003 000866");
        idx.insert(first.clone());
        let old = idx.insert(second.clone());
        assert_eq!(old, Some(first));
        assert_eq!(idx.latest(Code::_30C9), Some(&second));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn stale_insert_is_ignored() {
        let mut idx = MessageIndex::new();
        let newer = msg_at(5, "045  I --- 01:145038 --:------ 01:145038 30C9 003 000866");
        let older = msg_at(1, "045  I --- 01:145038 --:------ 01:145038 30C9 003 0007D0");
        idx.insert(newer.clone());
        assert_eq!(idx.insert(older), None);
        assert_eq!(idx.latest(Code::_30C9), Some(&newer));
    }

    #[test]
    fn distinct_contexts_are_retained() {
        let mut idx = MessageIndex::new();
        // two fault-log entries at different log idxs
        let frame = |idx_byte: &str, secs| {
            msg_at(
                secs,
                &format!(
                    "045 RP --- 01:145038 18:002563 --:------ 0418 022 0040{idx_byte}B000040000040155D3B0000000000000366E99"
                ),
            )
        };
        idx.insert(frame("00", 0));
        idx.insert(frame("01", 1));
        assert_eq!(idx.all_for_code(Code::_0418).count(), 2);
    }

    #[test]
    fn rq_does_not_shadow_latest() {
        let mut idx = MessageIndex::new();
        let rp = msg_at(0, "053 RP --- 01:145038 18:002563 --:------ 0008 002 00C8");
        idx.insert(rp.clone());
        let rq = msg_at(1, "053 RQ --- 18:002563 01:145038 --:------ 0008 001 00");
        idx.insert(rq);
        assert_eq!(idx.latest(Code::_0008), Some(&rp));
    }

    #[test]
    fn eviction_honours_expiry_and_retention() {
        let mut idx = MessageIndex::new();
        idx.insert(msg_at(0, "045  I --- 01:145038 --:------ 01:145038 12B0 003 01C800"));
        idx.insert(msg_at(0, "045  I --- 04:111111 --:------ 04:111111 30C9 003 0007D0"));

        // two hours on: the window-state has expired, the temp has not
        let now = NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(idx.evict_expired(now), 1);
        assert!(idx.latest(Code::_12B0).is_none());
        assert!(idx.latest(Code::_30C9).is_some());

        // two days on: everything is beyond the retention window
        let now = NaiveDate::from_ymd_opt(2025, 11, 4).unwrap().and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(idx.evict_expired(now), 1);
        assert!(idx.is_empty());
    }
}
