// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The immutable parsed frame and its derived correlation header.
//!
//! A raw line (already stripped of the transport's framing) has the shape:
//!
//! ```text
//! RSSI VERB SEQ SRC ADDR2 DST CODE LEN PAYLOAD_HEX
//! 045   I  --- 07:045960 --:------ 07:045960 1260 003 000911
//! ```
//!
//! The three address slots collapse to a `(src, dst)` pair: announce-style
//! frames carry the src in slot 0 and repeat it (or a sentinel) in slot 2;
//! directed frames carry src in slot 0 and dst in slot 1.

use std::fmt;

use chrono::NaiveDateTime;

use crate::error::{Error, PacketError};
use crate::protocol::address::DeviceId;
use crate::protocol::code::{Code, IndexPolicy, Verb};

/// Maximum payload length, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 96;

/// Per-code array element size, for codes that may carry index arrays.
fn array_element_len(code: Code) -> Option<usize> {
    match code {
        Code::_30C9 | Code::_2309 => Some(3),
        Code::_000A | Code::_22C9 => Some(6),
        Code::_3150 => Some(2),
        _ => None,
    }
}

/// The context part of a header - three distinct variants plus the
/// "not determinable" case for unknown codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ctx {
    /// The code never carries an index
    None,
    /// The payload is an array of sub-payloads, each with its own idx
    Array,
    /// A concrete index, as uppercase hex chars (2 or 4)
    Idx(String),
    /// Unknown code: no context can be derived
    Indeterminate,
}

impl Ctx {
    /// The header suffix: empty for None/Indeterminate, `True` for arrays,
    /// the hex chars otherwise.
    pub fn header_suffix(&self) -> Option<&str> {
        match self {
            Self::None | Self::Indeterminate => None,
            Self::Array => Some("True"),
            Self::Idx(s) => Some(s),
        }
    }
}

/// A parsed correlation header: `CODE|VERB|SRC[|CTX]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    pub code: Code,
    pub verb: Verb,
    pub src: DeviceId,
    pub ctx: Ctx,
}

impl Header {
    /// Parse a header string back into its parts (ctx arrives as written).
    pub fn parse(s: &str) -> Result<Self, Error> {
        let mut it = s.split('|');
        let bad = || Error::from(PacketError::Invalid(format!("bad header: {s:?}")));
        let code: Code = it.next().ok_or_else(bad)?.parse()?;
        let verb = Verb::from_token(it.next().ok_or_else(bad)?).ok_or_else(bad)?;
        let src: DeviceId = it.next().ok_or_else(bad)?.parse()?;
        let ctx = match it.next() {
            Some("True") => Ctx::Array,
            Some(idx) => Ctx::Idx(idx.to_string()),
            None => Ctx::None,
        };
        if it.next().is_some() {
            return Err(bad());
        }
        Ok(Self { code, verb, src, ctx })
    }

    /// The same header with a different verb (for I/RP freshness lookups).
    pub fn with_verb(&self, verb: Verb) -> Self {
        Self { verb, ..self.clone() }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.code, self.verb, self.src)?;
        if let Some(suffix) = self.ctx.header_suffix() {
            write!(f, "|{suffix}")?;
        }
        Ok(())
    }
}

/// An immutable parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    dtm: NaiveDateTime,
    rssi: u8,
    verb: Verb,
    seqn: Option<u8>,
    addrs: [DeviceId; 3],
    code: Code,
    payload: Vec<u8>,
}

impl Packet {
    /// Parse a frame (no timestamp), stamping it with `dtm`.
    ///
    /// Validates: 3-digit RSSI in 0..=255, a known verb token, canonical
    /// addresses in a legal slot combination, a 4-hex-digit code, and
    /// `LEN == len(PAYLOAD_HEX) / 2` within `1..=96`.
    pub fn parse(dtm: NaiveDateTime, frame: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = frame.split_ascii_whitespace().collect();
        if fields.len() != 9 {
            return Err(PacketError::Invalid(format!("wrong field count: {frame:?}")).into());
        }

        let rssi_s = fields[0];
        if rssi_s.len() != 3 || !rssi_s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PacketError::Invalid(format!("bad RSSI: {rssi_s:?}")).into());
        }
        let rssi_raw: u16 = rssi_s
            .parse()
            .map_err(|_| PacketError::Invalid(format!("bad RSSI: {rssi_s:?}")))?;
        let rssi = u8::try_from(rssi_raw)
            .map_err(|_| PacketError::Invalid(format!("RSSI out of range: {rssi_raw}")))?;

        let verb = Verb::from_token(fields[1])
            .ok_or_else(|| PacketError::Invalid(format!("bad verb: {:?}", fields[1])))?;

        let seqn = match fields[2] {
            "---" => None,
            s if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse::<u8>().ok() // evofw3 emits a rolling 0..=255 counter
            }
            s => return Err(PacketError::Invalid(format!("bad seqn: {s:?}")).into()),
        };

        let addrs = [
            fields[3].parse::<DeviceId>()?,
            fields[4].parse::<DeviceId>()?,
            fields[5].parse::<DeviceId>()?,
        ];
        resolve_addrs(&addrs)?; // reject illegal slot combinations early

        let code: Code = fields[6].parse()?;

        let len_s = fields[7];
        if len_s.len() != 3 || !len_s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PacketError::Invalid(format!("bad length: {len_s:?}")).into());
        }
        let len: usize = len_s
            .parse()
            .map_err(|_| PacketError::Invalid(format!("bad length: {len_s:?}")))?;

        let payload = parse_hex(fields[8])?;
        if payload.len() != len {
            return Err(PacketError::Invalid(format!(
                "length mismatch: LEN={len}, payload={}",
                payload.len()
            ))
            .into());
        }
        if !(1..=MAX_PAYLOAD_LEN).contains(&len) {
            return Err(PacketError::Invalid(format!("length out of range: {len}")).into());
        }

        Ok(Self { dtm, rssi, verb, seqn, addrs, code, payload })
    }

    /// Format the frame (without its timestamp), inverse of [`Packet::parse`].
    pub fn format_frame(&self) -> String {
        let seqn = match self.seqn {
            Some(n) => format!("{n:03}"),
            None => "---".to_string(),
        };
        format!(
            "{:03} {} {} {} {} {} {} {:03} {}",
            self.rssi,
            self.verb.token(),
            seqn,
            self.addrs[0],
            self.addrs[1],
            self.addrs[2],
            self.code,
            self.payload.len(),
            self.payload_hex(),
        )
    }

    pub fn dtm(&self) -> NaiveDateTime {
        self.dtm
    }

    pub fn rssi(&self) -> u8 {
        self.rssi
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as uppercase hex.
    pub fn payload_hex(&self) -> String {
        to_hex(&self.payload)
    }

    /// The three raw address slots, as parsed.
    pub fn addrs(&self) -> &[DeviceId; 3] {
        &self.addrs
    }

    /// The source address.
    pub fn src(&self) -> DeviceId {
        resolve_addrs(&self.addrs).map(|(src, _)| src).unwrap_or(DeviceId::NON_DEV)
    }

    /// The destination address (may equal `src` for announce frames).
    pub fn dst(&self) -> DeviceId {
        resolve_addrs(&self.addrs).map(|(_, dst)| dst).unwrap_or(DeviceId::NON_DEV)
    }

    /// True if the payload is an array of per-index sub-payloads.
    ///
    /// Arrays only occur on announce-style I-frames (src == dst) of the
    /// handful of codes with a fixed element size; a single-element payload
    /// from a controller still counts (the merge heuristic relies on it).
    pub fn has_array(&self) -> bool {
        let Some(elem) = array_element_len(self.code) else {
            return false;
        };
        if self.verb != Verb::I || self.src() != self.dst() {
            return false;
        }
        if self.payload.len() % elem != 0 {
            return false;
        }
        match self.code {
            // UFH controllers announce single- or multi-element arrays
            Code::_22C9 | Code::_3150 => self.src().device_type() == 2,
            _ => self.payload.len() > elem,
        }
    }

    /// The header context for this packet.
    pub fn ctx(&self) -> Ctx {
        if self.has_array() {
            return Ctx::Array;
        }
        match self.code.index_policy() {
            IndexPolicy::None => Ctx::None,
            IndexPolicy::Simple => match self.payload.first() {
                Some(b) => Ctx::Idx(format!("{b:02X}")),
                None => Ctx::Indeterminate,
            },
            IndexPolicy::Complex => self.complex_ctx(),
            IndexPolicy::Unknown => Ctx::Indeterminate,
        }
    }

    fn complex_ctx(&self) -> Ctx {
        let p = &self.payload;
        match self.code {
            // zone_type pair: idx byte + type byte
            Code::_0005 | Code::_000C if p.len() >= 2 => {
                Ctx::Idx(format!("{:02X}{:02X}", p[0], p[1]))
            }
            // zone idx + fragment number
            Code::_0404 if p.len() >= 6 => Ctx::Idx(format!("{:02X}{:02X}", p[0], p[5])),
            Code::_0404 if p.len() >= 1 => Ctx::Idx(format!("{:02X}", p[0])),
            // fault-log index
            Code::_0418 if p.len() >= 3 => Ctx::Idx(format!("{:02X}", p[2])),
            // OpenTherm msg-id
            Code::_3220 if p.len() >= 3 => Ctx::Idx(format!("{:02X}", p[2])),
            // binding payloads carry per-element indices; no single ctx
            Code::_1FC9 => Ctx::None,
            _ => Ctx::Indeterminate,
        }
    }

    /// The correlation header, `CODE|VERB|SRC[|CTX]`.
    pub fn header(&self) -> Header {
        Header { code: self.code, verb: self.verb, src: self.src(), ctx: self.ctx() }
    }

    /// The header as its canonical string form.
    pub fn header_str(&self) -> String {
        self.header().to_string()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dtm.format("%Y-%m-%dT%H:%M:%S%.6f"), self.format_frame())
    }
}

/// Resolve the three address slots to `(src, dst)`, rejecting illegal
/// combinations.
fn resolve_addrs(addrs: &[DeviceId; 3]) -> Result<(DeviceId, DeviceId), Error> {
    let [a0, a1, a2] = *addrs;
    match (a0.is_non_device(), a1.is_non_device(), a2.is_non_device()) {
        // announce: src in slot 0, dst repeated (or a sentinel) in slot 2
        (false, true, false) => Ok((a0, a2)),
        // directed: src in slot 0, dst in slot 1
        (false, false, true) => Ok((a0, a1)),
        // degenerate announce: only slot 2 populated (src == dst)
        (true, true, false) => Ok((a2, a2)),
        _ => Err(PacketError::Invalid(format!("bad addr slots: {a0} {a1} {a2}")).into()),
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, Error> {
    if s.len() % 2 != 0 {
        return Err(PacketError::Invalid(format!("odd-length payload: {s:?}")).into());
    }
    if !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_lowercase()) {
        return Err(PacketError::Invalid(format!("non-hex payload: {s:?}")).into());
    }
    Ok((0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap_or(0))
        .collect())
}

/// Render bytes as uppercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dtm() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_micro_opt(8, 30, 0, 1234).unwrap()
    }

    #[test]
    fn parse_announce_frame() {
        let pkt =
            Packet::parse(dtm(), "045  I --- 07:045960 --:------ 07:045960 1260 003 000911")
                .unwrap();
        assert_eq!(pkt.verb(), Verb::I);
        assert_eq!(pkt.code(), Code::_1260);
        assert_eq!(pkt.src().to_string(), "07:045960");
        assert_eq!(pkt.dst(), pkt.src());
        assert_eq!(pkt.payload(), &[0x00, 0x09, 0x11]);
        assert_eq!(pkt.ctx(), Ctx::Idx("00".into()));
    }

    #[test]
    fn parse_directed_frame() {
        let pkt = Packet::parse(dtm(), "053 RP --- 01:145038 18:002563 --:------ 0008 002 00C8")
            .unwrap();
        assert_eq!(pkt.verb(), Verb::Rp);
        assert_eq!(pkt.src().to_string(), "01:145038");
        assert_eq!(pkt.dst().to_string(), "18:002563");
        assert_eq!(pkt.header_str(), "0008|RP|01:145038|00");
    }

    #[test]
    fn format_is_inverse_of_parse() {
        for frame in [
            "045  I --- 07:045960 --:------ 07:045960 1260 003 000911",
            "053 RP --- 01:145038 18:002563 --:------ 0008 002 00C8",
            "072  I --- 01:158182 --:------ 01:158182 30C9 012 0007D00106A4020898",
        ] {
            let pkt = Packet::parse(dtm(), frame).unwrap();
            let pkt2 = Packet::parse(dtm(), &pkt.format_frame()).unwrap();
            assert_eq!(pkt, pkt2);
        }
    }

    #[test]
    fn rejects_malformed_frames() {
        let cases = [
            "45  I --- 07:045960 --:------ 07:045960 1260 003 000911", // 2-digit RSSI
            "999  I --- 07:045960 --:------ 07:045960 1260 003 000911", // RSSI > 255
            "045 XX --- 07:045960 --:------ 07:045960 1260 003 000911", // bad verb
            "045  I --- 07:045960 --:------ 07:045960 1260 004 000911", // LEN mismatch
            "045  I --- 07:045960 --:------ 07:045960 1260 003 0009",  // LEN mismatch
            "045  I --- 07:045960 --:------ 07:045960 1260 000 ",      // no payload
            "045  I --- 07:045960 12:000000 07:045960 1260 003 000911", // bad slots
            "045  I --- 07:045960 --:------ 07:045960 126 003 000911", // short code
            "045  I --- 07:045960 --:------ 07:045960 1260 003 0009aa", // lowercase hex
        ];
        for frame in cases {
            assert!(Packet::parse(dtm(), frame).is_err(), "{frame}");
        }
    }

    #[test]
    fn array_detection_and_ctx() {
        // three-element 30C9 array from a controller
        let pkt = Packet::parse(
            dtm(),
            "045  I --- 01:158182 --:------ 01:158182 30C9 012 0007D00106A4020898",
        )
        .unwrap();
        assert!(pkt.has_array());
        assert_eq!(pkt.ctx(), Ctx::Array);
        assert_eq!(pkt.header_str(), "30C9| I|01:158182|True");

        // a single-element 30C9 is not an array, even from a controller
        // (the continuation heuristic upgrades it at the message layer)
        let pkt = Packet::parse(dtm(), "045  I --- 01:158182 --:------ 01:158182 30C9 003 0107D0")
            .unwrap();
        assert!(!pkt.has_array());
        assert_eq!(pkt.ctx(), Ctx::Idx("01".into()));
        assert_eq!(pkt.header_str(), "30C9| I|01:158182|01");

        // a single-element 22C9 from a UFH controller is an array-of-one
        let pkt = Packet::parse(
            dtm(),
            "045  I --- 02:044446 --:------ 02:044446 22C9 006 0407D00A2801",
        )
        .unwrap();
        assert!(pkt.has_array());
    }

    #[test]
    fn complex_ctx_rules() {
        // 0418: ctx is the log index (byte 2)
        let pkt = Packet::parse(
            dtm(),
            "045 RP --- 01:145038 18:002563 --:------ 0418 009 004000B0000000000000",
        );
        // 10-byte payload vs LEN 9: mismatch, fix the frame
        assert!(pkt.is_err());
        let pkt = Packet::parse(
            dtm(),
            "045 RP --- 01:145038 18:002563 --:------ 0418 010 004000B0000000000000",
        )
        .unwrap();
        assert_eq!(pkt.ctx(), Ctx::Idx("00".into()));

        // 3220: ctx is the OpenTherm msg-id (byte 2)
        let pkt = Packet::parse(dtm(), "045 RP --- 10:048122 01:145038 --:------ 3220 005 0040110000")
            .unwrap();
        assert_eq!(pkt.ctx(), Ctx::Idx("11".into()));

        // 1F09 has no index at all
        let pkt = Packet::parse(dtm(), "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF0532")
            .unwrap();
        assert_eq!(pkt.ctx(), Ctx::None);
        assert_eq!(pkt.header_str(), "1F09| I|01:145038");
    }

    #[test]
    fn header_parse_round_trip() {
        for hdr in ["30C9| I|01:158182|True", "0008|RP|01:145038|00", "1F09| I|01:145038"] {
            let parsed = Header::parse(hdr).unwrap();
            assert_eq!(parsed.to_string(), hdr);
        }
    }

    #[test]
    fn unknown_code_ctx_is_indeterminate() {
        let pkt = Packet::parse(dtm(), "045  I --- 30:111111 --:------ 30:111111 7FFF 002 0102")
            .unwrap();
        assert_eq!(pkt.ctx(), Ctx::Indeterminate);
        assert_eq!(pkt.header_str(), "7FFF| I|30:111111");
    }
}
