// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed payload parsing - one schema per (code, verb).
//!
//! [`parse`] turns a packet's raw bytes into a [`Payload`] value. Known
//! array codes always yield a `Vec` (a single element is a one-entry Vec);
//! unknown codes fall back to [`Payload::Raw`] so the message still lands
//! in the index. A malformed payload for a *known* code is an error - the
//! dispatcher drops the packet and logs.

pub mod heat;
pub mod hvac;
pub mod opentherm;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, PacketError};
use crate::protocol::address::DeviceId;
use crate::protocol::code::{Code, Verb};
use crate::protocol::packet::Packet;

pub(crate) type PayloadResult<T> = Result<T, Error>;

/// One element of a 1FC9 (binding) payload: the codes a device offers or
/// accepts, each tied to its packed device id. The idx byte doubles as the
/// vendor OEM code on addenda-bearing entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindEntry {
    #[serde(serialize_with = "hex2")]
    pub idx: u8,
    pub code: Code,
    pub device_id: DeviceId,
}

pub fn parse_1fc9(p: &[u8]) -> PayloadResult<Vec<BindEntry>> {
    if p.len() == 1 {
        return Ok(Vec::new()); // a bare confirm carries just its idx
    }
    if p.is_empty() || p.len() % 6 != 0 {
        return Err(PacketError::PayloadInvalid(format!("1FC9: {} bytes", p.len())).into());
    }
    p.chunks_exact(6)
        .map(|c| {
            Ok(BindEntry {
                idx: c[0],
                code: Code(u16::from_be_bytes([c[1], c[2]])),
                device_id: heat::device_id_from_3(&c[3..6])?,
            })
        })
        .collect()
}

/// The discriminated payload sum.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    SystemSync(heat::SystemSync),            // 1F09
    ZoneTemps(Vec<heat::ZoneTemp>),          // 30C9
    Setpoints(Vec<heat::ZoneSetpoint>),      // 2309
    ZoneParams(Vec<heat::ZoneParams>),       // 000A
    ZoneName(heat::ZoneName),                // 0004
    SystemZones(heat::SystemZones),          // 0005
    ZoneDevices(heat::ZoneDevices),          // 000C
    RelayDemand(heat::RelayDemand),          // 0008
    RelayFailsafe(Vec<heat::RelayFailsafe>), // 0009
    HeatDemand(Vec<heat::HeatDemand>),       // 3150
    WindowState(heat::WindowState),          // 12B0
    ZoneMode(heat::ZoneMode),                // 2349
    SystemMode(heat::SystemMode),            // 2E04
    DhwTemp(heat::DhwTemp),                  // 1260
    DhwMode(heat::DhwMode),                  // 1F41
    DhwParams(heat::DhwParams),              // 10A0
    TpiParams(heat::TpiParams),              // 1100
    MixValveParams(heat::MixValveParams),    // 1030
    Language(heat::Language),                // 0100
    Datetime(heat::SystemDatetime),          // 313F
    ScheduleSync(heat::ScheduleSync),        // 0006
    ScheduleFragment(heat::ScheduleFragment), // 0404
    FaultLogEntry(Option<heat::FaultLogEntry>), // 0418 (None = empty slot)
    Weather(heat::Weather),                  // 0002 / 1290
    Battery(heat::BatteryState),             // 1060
    DeviceInfo(heat::DeviceInfo),            // 10E0
    ActuatorState(heat::ActuatorState),      // 3EF0
    ActuatorCycle(heat::ActuatorCycle),      // 3EF1
    ActuatorSync(heat::ActuatorSync),        // 3B00
    UfhSetpoints(Vec<heat::UfhSetpoint>),    // 22C9
    RfCheck(heat::RfCheck),                  // 0016
    FanRate(hvac::FanRate),                  // 22F1
    FanBoost(hvac::FanBoost),                // 22F3
    FanState(hvac::FanState),                // 31D9
    Ventilation(hvac::VentilationState),     // 31DA
    Co2(hvac::Co2Level),                     // 1298
    Humidity(hvac::IndoorHumidity),          // 12A0
    VentDemand(hvac::VentDemand),            // 31E0
    Presence(hvac::Presence),                // 2E10
    OpenTherm(opentherm::OpenThermMsg),      // 3220
    OpenThermSync(opentherm::OpenThermSync), // 1FD4
    Bind(Vec<BindEntry>),                    // 1FC9
    /// Unknown code, or a bare query: the payload as uppercase hex
    Raw(String),
}

impl Payload {
    /// The payload as a JSON value, for the status/params views.
    pub fn to_json(&self) -> Value {
        fn ser<T: Serialize>(v: &T) -> Value {
            serde_json::to_value(v).unwrap_or(Value::Null)
        }
        match self {
            Self::SystemSync(v) => ser(v),
            Self::ZoneTemps(v) => ser(v),
            Self::Setpoints(v) => ser(v),
            Self::ZoneParams(v) => ser(v),
            Self::ZoneName(v) => ser(v),
            Self::SystemZones(v) => ser(v),
            Self::ZoneDevices(v) => ser(v),
            Self::RelayDemand(v) => ser(v),
            Self::RelayFailsafe(v) => ser(v),
            Self::HeatDemand(v) => ser(v),
            Self::WindowState(v) => ser(v),
            Self::ZoneMode(v) => ser(v),
            Self::SystemMode(v) => ser(v),
            Self::DhwTemp(v) => ser(v),
            Self::DhwMode(v) => ser(v),
            Self::DhwParams(v) => ser(v),
            Self::TpiParams(v) => ser(v),
            Self::MixValveParams(v) => ser(v),
            Self::Language(v) => ser(v),
            Self::Datetime(v) => ser(v),
            Self::ScheduleSync(v) => ser(v),
            Self::ScheduleFragment(v) => ser(v),
            Self::FaultLogEntry(v) => ser(v),
            Self::Weather(v) => ser(v),
            Self::Battery(v) => ser(v),
            Self::DeviceInfo(v) => ser(v),
            Self::ActuatorState(v) => ser(v),
            Self::ActuatorCycle(v) => ser(v),
            Self::ActuatorSync(v) => ser(v),
            Self::UfhSetpoints(v) => ser(v),
            Self::RfCheck(v) => ser(v),
            Self::FanRate(v) => ser(v),
            Self::FanBoost(v) => ser(v),
            Self::FanState(v) => ser(v),
            Self::Ventilation(v) => ser(v),
            Self::Co2(v) => ser(v),
            Self::Humidity(v) => ser(v),
            Self::VentDemand(v) => ser(v),
            Self::Presence(v) => ser(v),
            Self::OpenTherm(v) => ser(v),
            Self::OpenThermSync(v) => ser(v),
            Self::Bind(v) => ser(v),
            Self::Raw(v) => Value::String(v.clone()),
        }
    }

    /// The zone idxs named by this payload, if it is zone-indexed.
    pub fn zone_idxs(&self) -> Vec<u8> {
        match self {
            Self::ZoneTemps(v) => v.iter().map(|e| e.zone_idx).collect(),
            Self::Setpoints(v) => v.iter().map(|e| e.zone_idx).collect(),
            Self::ZoneParams(v) => v.iter().map(|e| e.zone_idx).collect(),
            Self::ZoneName(v) => vec![v.zone_idx],
            Self::ZoneDevices(v) => vec![v.zone_idx],
            Self::WindowState(v) => vec![v.zone_idx],
            Self::ZoneMode(v) => vec![v.zone_idx],
            Self::ScheduleFragment(v) => vec![v.zone_idx],
            Self::HeatDemand(v) => {
                v.iter().map(|e| e.idx).filter(|&i| i < 0x10).collect()
            }
            Self::RelayDemand(v) if v.idx < 0x10 => vec![v.idx],
            _ => Vec::new(),
        }
    }
}

/// Parse a packet's payload into its typed form.
pub fn parse(pkt: &Packet) -> Result<Payload, Error> {
    let p = pkt.payload();
    let raw = || Ok(Payload::Raw(pkt.payload_hex()));

    // Bare queries carry no parsable state (0404 RQs do: they name the
    // fragment being requested).
    if pkt.verb() == Verb::Rq && !matches!(pkt.code(), Code::_0404 | Code::_3220) {
        return raw();
    }

    match pkt.code() {
        Code::_1F09 => heat::parse_1f09(p).map(Payload::SystemSync),
        Code::_30C9 => heat::parse_30c9(p).map(Payload::ZoneTemps),
        Code::_2309 => heat::parse_2309(p).map(Payload::Setpoints),
        Code::_000A => heat::parse_000a(p).map(Payload::ZoneParams),
        Code::_0004 => heat::parse_0004(p).map(Payload::ZoneName),
        Code::_0005 => heat::parse_0005(p).map(Payload::SystemZones),
        Code::_000C => heat::parse_000c(p).map(Payload::ZoneDevices),
        Code::_0008 => heat::parse_0008(p).map(Payload::RelayDemand),
        Code::_0009 => heat::parse_0009(p).map(Payload::RelayFailsafe),
        Code::_3150 => heat::parse_3150(p).map(Payload::HeatDemand),
        Code::_12B0 => heat::parse_12b0(p).map(Payload::WindowState),
        Code::_2349 => heat::parse_2349(p).map(Payload::ZoneMode),
        Code::_2E04 => heat::parse_2e04(p).map(Payload::SystemMode),
        Code::_1260 => heat::parse_1260(p).map(Payload::DhwTemp),
        Code::_1F41 => heat::parse_1f41(p).map(Payload::DhwMode),
        Code::_10A0 => heat::parse_10a0(p).map(Payload::DhwParams),
        Code::_1100 => heat::parse_1100(p).map(Payload::TpiParams),
        Code::_1030 => heat::parse_1030(p).map(Payload::MixValveParams),
        Code::_0100 => heat::parse_0100(p).map(Payload::Language),
        Code::_313F => heat::parse_313f(p).map(Payload::Datetime),
        Code::_0006 => heat::parse_0006(p).map(Payload::ScheduleSync),
        Code::_0404 => heat::parse_0404(p).map(Payload::ScheduleFragment),
        Code::_0418 => heat::parse_0418(p).map(Payload::FaultLogEntry),
        Code::_0002 => heat::parse_0002(p).map(Payload::Weather),
        Code::_1290 => heat::parse_1290(p).map(Payload::Weather),
        Code::_1060 => heat::parse_1060(p).map(Payload::Battery),
        Code::_10E0 => heat::parse_10e0(p).map(Payload::DeviceInfo),
        Code::_3EF0 => heat::parse_3ef0(p).map(Payload::ActuatorState),
        Code::_3EF1 => heat::parse_3ef1(p).map(Payload::ActuatorCycle),
        Code::_3B00 => heat::parse_3b00(p).map(Payload::ActuatorSync),
        Code::_22C9 => heat::parse_22c9(p).map(Payload::UfhSetpoints),
        Code::_0016 => heat::parse_0016(p).map(Payload::RfCheck),
        Code::_22F1 => hvac::parse_22f1(p).map(Payload::FanRate),
        Code::_22F3 => hvac::parse_22f3(p).map(Payload::FanBoost),
        Code::_31D9 => hvac::parse_31d9(p).map(Payload::FanState),
        Code::_31DA => hvac::parse_31da(p).map(Payload::Ventilation),
        Code::_1298 => hvac::parse_1298(p).map(Payload::Co2),
        Code::_12A0 => hvac::parse_12a0(p).map(Payload::Humidity),
        Code::_31E0 => hvac::parse_31e0(p).map(Payload::VentDemand),
        Code::_2E10 => hvac::parse_2e10(p).map(Payload::Presence),
        // an RQ 3220 still names its msg-id; stays typed so discovery can
        // track deprecation per msg-id
        Code::_3220 => opentherm::parse_3220(p).map(Payload::OpenTherm),
        Code::_1FD4 => opentherm::parse_1fd4(p).map(Payload::OpenThermSync),
        Code::_1FC9 => parse_1fc9(p).map(Payload::Bind),
        _ => raw(),
    }
}

// --- field decoding conventions ---------------------------------------------

/// Signed centi-degrees; `0x7FFF` is the sensor-fault/None sentinel.
pub(crate) fn opt_temp(b: &[u8]) -> Option<f64> {
    let v = i16::from_be_bytes([b[0], b[1]]);
    (v != 0x7FFF).then(|| f64::from(v) / 100.0)
}

/// Half-percent counts in `0..=200`; `0xFF` (and out-of-range) is None.
pub(crate) fn opt_percent(b: u8) -> Option<f64> {
    (b <= 200).then(|| f64::from(b) / 200.0)
}

/// Serialize a `u8` index as two uppercase hex chars (`"00"`, `"FC"`, ...).
pub(crate) fn hex2<S: serde::Serializer>(v: &u8, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{v:02X}"))
}
