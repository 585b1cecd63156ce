// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload parsers for the Heat (CH/DHW) domain codes.
//!
//! Conventions on the wire:
//! - temperatures are signed centi-degrees (`0x7FFF` = sensor fault/None)
//! - demands/positions are half-percent counts (`0..=200`, `0xFF` = None)
//! - the first payload byte of most codes is a zone idx or domain id

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::{Error, PacketError};
use crate::protocol::address::DeviceId;
use crate::protocol::payload::{hex2, opt_percent, opt_temp, PayloadResult};

/// 1F09: the controller's sync-cycle countdown, tenths of a second.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSync {
    #[serde(serialize_with = "hex2")]
    pub frame_type: u8, // FF = I (cycle), F8 = W (request)
    pub remaining_seconds: f64,
}

pub fn parse_1f09(p: &[u8]) -> PayloadResult<SystemSync> {
    expect_len(p, 3)?;
    Ok(SystemSync {
        frame_type: p[0],
        remaining_seconds: f64::from(u16::from_be_bytes([p[1], p[2]])) / 10.0,
    })
}

/// One element of a 30C9 (temperature) array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneTemp {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub temperature: Option<f64>,
}

pub fn parse_30c9(p: &[u8]) -> PayloadResult<Vec<ZoneTemp>> {
    each_chunk(p, 3, |c| {
        Ok(ZoneTemp { zone_idx: c[0], temperature: opt_temp(&c[1..3]) })
    })
}

/// One element of a 2309 (setpoint) array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSetpoint {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub setpoint: Option<f64>,
}

pub fn parse_2309(p: &[u8]) -> PayloadResult<Vec<ZoneSetpoint>> {
    each_chunk(p, 3, |c| Ok(ZoneSetpoint { zone_idx: c[0], setpoint: opt_temp(&c[1..3]) }))
}

/// One element of a 000A (zone params) array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneParams {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub local_override: bool,
    pub openwindow_function: bool,
    pub multiroom_mode: bool,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
}

pub fn parse_000a(p: &[u8]) -> PayloadResult<Vec<ZoneParams>> {
    each_chunk(p, 6, |c| {
        let flags = c[1];
        Ok(ZoneParams {
            zone_idx: c[0],
            local_override: flags & 0x01 == 0,
            openwindow_function: flags & 0x02 == 0,
            multiroom_mode: flags & 0x10 != 0,
            min_temp: opt_temp(&c[2..4]),
            max_temp: opt_temp(&c[4..6]),
        })
    })
}

/// 0004: a zone's display name (empty payload tail = name not set).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneName {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub name: Option<String>,
}

pub fn parse_0004(p: &[u8]) -> PayloadResult<ZoneName> {
    if p.len() < 2 {
        return Err(short(p));
    }
    let name = if p.len() <= 2 || p[2] == 0x7F {
        None
    } else {
        let bytes: Vec<u8> = p[2..].iter().copied().take_while(|&b| b != 0x00).collect();
        String::from_utf8(bytes).ok().filter(|s| !s.is_empty())
    };
    Ok(ZoneName { zone_idx: p[0], name })
}

/// 0005: which zone idxs exist for a zone type (a 16-bit presence mask).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemZones {
    #[serde(serialize_with = "hex2")]
    pub zone_type: u8,
    pub zone_mask: Vec<bool>,
}

pub fn parse_0005(p: &[u8]) -> PayloadResult<SystemZones> {
    expect_len(p, 4)?;
    let mask = u16::from_le_bytes([p[2], p[3]]);
    Ok(SystemZones {
        zone_type: p[1],
        zone_mask: (0..16).map(|i| mask & (1 << i) != 0).collect(),
    })
}

/// 000C: the devices bound to a zone/domain for a given device role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneDevices {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    #[serde(serialize_with = "hex2")]
    pub device_role: u8,
    pub devices: Vec<DeviceId>,
}

pub fn parse_000c(p: &[u8]) -> PayloadResult<ZoneDevices> {
    if p.len() < 6 || p.len() % 6 != 0 {
        return Err(short(p));
    }
    let mut devices = Vec::new();
    for c in p.chunks_exact(6) {
        // c[2] == 0x7F means "no device in this slot"
        if c[2] == 0x7F {
            continue;
        }
        devices.push(device_id_from_3(&c[3..6])?);
    }
    Ok(ZoneDevices { zone_idx: p[0], device_role: p[1], devices })
}

/// 0008: relay demand for a zone or domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayDemand {
    #[serde(serialize_with = "hex2")]
    pub idx: u8,
    pub relay_demand: Option<f64>,
}

pub fn parse_0008(p: &[u8]) -> PayloadResult<RelayDemand> {
    expect_len(p, 2)?;
    Ok(RelayDemand { idx: p[0], relay_demand: opt_percent(p[1]) })
}

/// 0009: relay failsafe mode for a zone or domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayFailsafe {
    #[serde(serialize_with = "hex2")]
    pub idx: u8,
    pub relay_failsafe_enabled: Option<bool>,
}

pub fn parse_0009(p: &[u8]) -> PayloadResult<Vec<RelayFailsafe>> {
    each_chunk(p, 3, |c| {
        Ok(RelayFailsafe {
            idx: c[0],
            relay_failsafe_enabled: match c[1] {
                0x00 => Some(false),
                0x01 => Some(true),
                _ => None,
            },
        })
    })
}

/// One element of a 3150 (heat demand) array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatDemand {
    #[serde(serialize_with = "hex2")]
    pub idx: u8, // zone idx, or a domain id (FC = appliance control)
    pub heat_demand: Option<f64>,
}

pub fn parse_3150(p: &[u8]) -> PayloadResult<Vec<HeatDemand>> {
    each_chunk(p, 2, |c| Ok(HeatDemand { idx: c[0], heat_demand: opt_percent(c[1]) }))
}

/// 12B0: a zone's open-window state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowState {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub window_open: Option<bool>,
}

pub fn parse_12b0(p: &[u8]) -> PayloadResult<WindowState> {
    expect_len(p, 3)?;
    Ok(WindowState {
        zone_idx: p[0],
        window_open: match p[1] {
            0x00 => Some(false),
            0xC8 => Some(true),
            _ => None,
        },
    })
}

/// 2349: a zone's mode (setpoint override + duration).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneMode {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub mode: &'static str,
    pub setpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDateTime>,
}

pub fn parse_2349(p: &[u8]) -> PayloadResult<ZoneMode> {
    if p.len() != 7 && p.len() != 13 {
        return Err(short(p));
    }
    let mode = match p[3] {
        0x00 => "follow_schedule",
        0x01 => "advanced_override",
        0x02 => "permanent_override",
        0x03 => "countdown_override",
        0x04 => "temporary_override",
        other => return Err(PacketError::PayloadInvalid(format!("2349 mode: {other:02X}")).into()),
    };
    let until = if p.len() == 13 { parse_dts(&p[7..13]) } else { None };
    Ok(ZoneMode { zone_idx: p[0], mode, setpoint: opt_temp(&p[1..3]), until })
}

/// 2E04: the system (TCS) mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMode {
    pub system_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDateTime>,
}

pub fn parse_2e04(p: &[u8]) -> PayloadResult<SystemMode> {
    if p.is_empty() {
        return Err(short(p));
    }
    let system_mode = match p[0] {
        0x00 => "auto",
        0x01 => "heat_off",
        0x02 => "eco_boost",
        0x03 => "away",
        0x04 => "day_off",
        0x05 => "day_off_eco",
        0x06 => "auto_with_reset",
        0x07 => "custom",
        other => return Err(PacketError::PayloadInvalid(format!("2E04 mode: {other:02X}")).into()),
    };
    let until = if p.len() >= 8 && p[7] == 0x01 { parse_dts(&p[1..7]) } else { None };
    Ok(SystemMode { system_mode, until })
}

/// 1260: the stored hot water temperature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DhwTemp {
    #[serde(serialize_with = "hex2")]
    pub dhw_idx: u8,
    pub temperature: Option<f64>,
}

pub fn parse_1260(p: &[u8]) -> PayloadResult<DhwTemp> {
    expect_len(p, 3)?;
    Ok(DhwTemp { dhw_idx: p[0], temperature: opt_temp(&p[1..3]) })
}

/// 1F41: the stored hot water mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DhwMode {
    #[serde(serialize_with = "hex2")]
    pub dhw_idx: u8,
    pub active: Option<bool>,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDateTime>,
}

pub fn parse_1f41(p: &[u8]) -> PayloadResult<DhwMode> {
    if p.len() != 6 && p.len() != 12 {
        return Err(short(p));
    }
    let mode = match p[2] {
        0x00 => "follow_schedule",
        0x01 => "advanced_override",
        0x02 => "permanent_override",
        0x04 => "temporary_override",
        other => return Err(PacketError::PayloadInvalid(format!("1F41 mode: {other:02X}")).into()),
    };
    let until = if p.len() == 12 { parse_dts(&p[6..12]) } else { None };
    Ok(DhwMode {
        dhw_idx: p[0],
        active: match p[1] {
            0x00 => Some(false),
            0x01 => Some(true),
            _ => None,
        },
        mode,
        until,
    })
}

/// 10A0: the stored hot water params.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DhwParams {
    #[serde(serialize_with = "hex2")]
    pub dhw_idx: u8,
    pub setpoint: Option<f64>,
    pub overrun: Option<u8>,
    pub differential: Option<f64>,
}

pub fn parse_10a0(p: &[u8]) -> PayloadResult<DhwParams> {
    if p.len() < 3 {
        return Err(short(p));
    }
    Ok(DhwParams {
        dhw_idx: p[0],
        setpoint: opt_temp(&p[1..3]),
        overrun: p.get(3).copied(),
        differential: if p.len() >= 6 { opt_temp(&p[4..6]) } else { None },
    })
}

/// 1100: TPI (time-proportional-integral) params for a relay domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TpiParams {
    #[serde(serialize_with = "hex2")]
    pub domain_id: u8,
    pub cycle_rate: f64,       // cycles per hour
    pub min_on_time: f64,      // minutes
    pub min_off_time: f64,     // minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proportional_band_width: Option<f64>,
}

pub fn parse_1100(p: &[u8]) -> PayloadResult<TpiParams> {
    if p.len() < 5 {
        return Err(short(p));
    }
    Ok(TpiParams {
        domain_id: p[0],
        cycle_rate: f64::from(p[1]) / 4.0,
        min_on_time: f64::from(p[2]) / 4.0,
        min_off_time: f64::from(p[3]) / 4.0,
        proportional_band_width: if p.len() >= 7 { opt_temp(&p[5..7]) } else { None },
    })
}

/// 1030: mixing-valve params.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixValveParams {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub max_flow_setpoint: u8,
    pub min_flow_setpoint: u8,
    pub valve_run_time: u8,
    pub pump_run_time: u8,
}

pub fn parse_1030(p: &[u8]) -> PayloadResult<MixValveParams> {
    expect_len(p, 16)?;
    // after the zone idx: five 3-byte param records of (param-id, 01, value)
    let value = |param: u8| p[1..].chunks_exact(3).find(|c| c[0] == param).map(|c| c[2]);
    let field = |param: u8| {
        value(param)
            .ok_or_else(|| Error::from(PacketError::PayloadInvalid(format!("1030 missing {param:02X}"))))
    };
    Ok(MixValveParams {
        zone_idx: p[0],
        max_flow_setpoint: field(0xC8)?,
        min_flow_setpoint: field(0xC9)?,
        valve_run_time: field(0xCA)?,
        pump_run_time: field(0xCB)?,
    })
}

/// 0100: the controller's display language.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Language {
    pub language: String,
}

pub fn parse_0100(p: &[u8]) -> PayloadResult<Language> {
    if p.len() < 3 {
        return Err(short(p));
    }
    let lang: Vec<u8> = p[1..3].iter().copied().filter(|&b| b != 0xFF).collect();
    Ok(Language {
        language: String::from_utf8(lang)
            .map_err(|_| PacketError::PayloadInvalid("0100 language".into()))?,
    })
}

/// 313F: the controller's date and time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemDatetime {
    pub datetime: Option<NaiveDateTime>,
}

pub fn parse_313f(p: &[u8]) -> PayloadResult<SystemDatetime> {
    expect_len(p, 9)?;
    // 00 FC ss mm hh dd MM yyyy
    let year = u16::from_be_bytes([p[7], p[8]]);
    let datetime = NaiveDate::from_ymd_opt(i32::from(year), u32::from(p[6]), u32::from(p[5]))
        .and_then(|d| d.and_hms_opt(u32::from(p[4]) & 0x1F, u32::from(p[3]), u32::from(p[2])));
    Ok(SystemDatetime { datetime })
}

/// 0006: the schedule change counter (bumps whenever any schedule changes).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSync {
    pub change_counter: Option<u16>,
}

pub fn parse_0006(p: &[u8]) -> PayloadResult<ScheduleSync> {
    expect_len(p, 4)?;
    let counter = (p[1] != 0xFF).then(|| u16::from_be_bytes([p[2], p[3]]));
    Ok(ScheduleSync { change_counter: counter })
}

/// 0404: one fragment of a zone's schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleFragment {
    #[serde(serialize_with = "hex2")]
    pub zone_idx: u8,
    pub frag_number: u8,
    pub total_frags: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fragment: Vec<u8>,
}

pub fn parse_0404(p: &[u8]) -> PayloadResult<ScheduleFragment> {
    if p.len() < 7 {
        return Err(short(p));
    }
    let frag_len = p[4] as usize;
    let fragment = if p.len() > 7 { p[7..].to_vec() } else { Vec::new() };
    if !fragment.is_empty() && fragment.len() != frag_len {
        return Err(PacketError::PayloadInvalid(format!(
            "0404 fragment length: {} != {frag_len}",
            fragment.len(),
        ))
        .into());
    }
    Ok(ScheduleFragment {
        zone_idx: p[0],
        frag_number: p[5],
        total_frags: (p[6] != 0xFF).then_some(p[6]),
        fragment,
    })
}

/// 0418: one fault-log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultLogEntry {
    #[serde(serialize_with = "hex2")]
    pub log_idx: u8,
    pub timestamp: Option<NaiveDateTime>,
    pub fault_state: &'static str,
    pub fault_type: &'static str,
    #[serde(serialize_with = "hex2")]
    pub domain_idx: u8,
    pub device_class: &'static str,
    pub device_id: Option<DeviceId>,
}

pub fn parse_0418(p: &[u8]) -> PayloadResult<Option<FaultLogEntry>> {
    expect_len(p, 22)?;
    if p[4..].iter().all(|&b| b == 0x00) {
        return Ok(None); // an empty slot terminates fault-log pagination
    }
    let fault_state = match p[1] {
        0x00 => "fault",
        0x40 => "restore",
        0xC0 => "unknown_c0",
        _ => "unknown",
    };
    let fault_type = match p[5] {
        0x01 => "system_fault",
        0x03 => "mains_low",
        0x04 => "battery_low",
        0x05 => "battery_error",
        0x06 => "comms_fault",
        0x0A => "sensor_error",
        _ => "unknown",
    };
    let device_class = match p[8] {
        0x00 => "controller",
        0x01 => "sensor",
        0x04 => "actuator",
        0x05 => "dhw_sensor",
        0x06 => "rf_gateway",
        _ => "unknown",
    };
    // seconds since 1980-01-01, packed into bytes 10..14
    let secs = u32::from_be_bytes([p[10], p[11], p[12], p[13]]);
    let timestamp = NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|epoch| epoch + chrono::Duration::seconds(i64::from(secs)));
    let device_id = if p[19..22] == [0xFF; 3] || p[19..22] == [0x7F; 3] {
        None
    } else {
        Some(device_id_from_3(&p[19..22])?)
    };
    Ok(Some(FaultLogEntry {
        log_idx: p[2],
        timestamp,
        fault_state,
        fault_type,
        domain_idx: p[9],
        device_class,
        device_id,
    }))
}

/// 0002: outdoor weather sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Weather {
    pub temperature: Option<f64>,
}

pub fn parse_0002(p: &[u8]) -> PayloadResult<Weather> {
    if p.len() < 3 {
        return Err(short(p));
    }
    Ok(Weather { temperature: opt_temp(&p[1..3]) })
}

/// 1290: outdoor temperature (OTB-sourced).
pub fn parse_1290(p: &[u8]) -> PayloadResult<Weather> {
    expect_len(p, 3)?;
    Ok(Weather { temperature: opt_temp(&p[1..3]) })
}

/// 1060: battery state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryState {
    #[serde(serialize_with = "hex2")]
    pub idx: u8,
    pub battery_low: bool,
    pub battery_level: Option<f64>,
}

pub fn parse_1060(p: &[u8]) -> PayloadResult<BatteryState> {
    expect_len(p, 3)?;
    Ok(BatteryState {
        idx: p[0],
        battery_low: p[2] == 0x00,
        battery_level: opt_percent(p[1]),
    })
}

/// 10E0: device information (also the binding addenda payload).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    #[serde(serialize_with = "hex2")]
    pub oem_code: u8,
    pub manufacturer_sub_id: String,
    pub product_id: String,
    pub description: Option<String>,
}

pub fn parse_10e0(p: &[u8]) -> PayloadResult<DeviceInfo> {
    if p.len() < 19 {
        return Err(short(p));
    }
    let description = {
        let bytes: Vec<u8> = p[19..].iter().copied().take_while(|&b| b != 0x00).collect();
        String::from_utf8(bytes).ok().filter(|s| !s.is_empty())
    };
    Ok(DeviceInfo {
        oem_code: p[1],
        manufacturer_sub_id: format!("{:02X}", p[2]),
        product_id: crate::protocol::packet::to_hex(&p[3..5]),
        description,
    })
}

/// 3EF0: actuator state (relay/OTB modulation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorState {
    pub modulation_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flame_on: Option<bool>,
}

pub fn parse_3ef0(p: &[u8]) -> PayloadResult<ActuatorState> {
    if p.len() < 3 {
        return Err(short(p));
    }
    let flame_on = (p.len() >= 4).then(|| p[3] & 0x08 != 0);
    Ok(ActuatorState { modulation_level: opt_percent(p[1]), flame_on })
}

/// 3EF1: actuator cycle stats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorCycle {
    pub countdown: u16,
    pub actuator_enabled: bool,
    pub modulation_level: Option<f64>,
}

pub fn parse_3ef1(p: &[u8]) -> PayloadResult<ActuatorCycle> {
    expect_len(p, 7)?;
    Ok(ActuatorCycle {
        countdown: u16::from_be_bytes([p[1], p[2]]),
        actuator_enabled: p[5] != 0x00,
        modulation_level: opt_percent(p[5]),
    })
}

/// 3B00: actuator sync pulse (TPI clock for BDRs).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorSync {
    #[serde(serialize_with = "hex2")]
    pub domain_id: u8,
    pub actuator_sync: bool,
}

pub fn parse_3b00(p: &[u8]) -> PayloadResult<ActuatorSync> {
    expect_len(p, 2)?;
    Ok(ActuatorSync { domain_id: p[0], actuator_sync: p[1] == 0xC8 })
}

/// One element of a 22C9 (UFH circuit setpoint bounds) array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UfhSetpoint {
    #[serde(serialize_with = "hex2")]
    pub ufh_idx: u8,
    pub setpoint_low: Option<f64>,
    pub setpoint_high: Option<f64>,
}

pub fn parse_22c9(p: &[u8]) -> PayloadResult<Vec<UfhSetpoint>> {
    each_chunk(p, 6, |c| {
        Ok(UfhSetpoint {
            ufh_idx: c[0],
            setpoint_low: opt_temp(&c[1..3]),
            setpoint_high: opt_temp(&c[3..5]),
        })
    })
}

/// 0016: RF signal check reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfCheck {
    pub rf_strength: Option<u8>,
}

pub fn parse_0016(p: &[u8]) -> PayloadResult<RfCheck> {
    expect_len(p, 2)?;
    Ok(RfCheck { rf_strength: (p[1] != 0xFF).then_some(p[1]) })
}

// --- shared helpers ---------------------------------------------------------

fn expect_len(p: &[u8], len: usize) -> Result<(), Error> {
    if p.len() == len {
        Ok(())
    } else {
        Err(PacketError::PayloadInvalid(format!("expected {len} bytes, got {}", p.len())).into())
    }
}

fn short(p: &[u8]) -> Error {
    PacketError::PayloadInvalid(format!("payload too short: {} bytes", p.len())).into()
}

/// Parse an array payload as fixed-size chunks (a single chunk is fine).
fn each_chunk<T>(
    p: &[u8],
    size: usize,
    f: impl Fn(&[u8]) -> Result<T, Error>,
) -> Result<Vec<T>, Error> {
    if p.is_empty() || p.len() % size != 0 {
        return Err(PacketError::PayloadInvalid(format!(
            "payload not a multiple of {size}: {} bytes",
            p.len()
        ))
        .into());
    }
    p.chunks_exact(size).map(f).collect()
}

/// A 3-byte packed device id: 2-bit pad + 6-bit type + 18-bit serial.
pub(crate) fn device_id_from_3(b: &[u8]) -> Result<DeviceId, Error> {
    let raw = u32::from_be_bytes([0, b[0], b[1], b[2]]);
    let typ = ((raw >> 18) & 0x3F) as u8;
    let serial = raw & 0x3FFFF;
    DeviceId::new(typ, serial)
}

/// Inverse of [`device_id_from_3`] (used by the Command builders).
pub(crate) fn device_id_to_3(id: DeviceId) -> [u8; 3] {
    let raw = (u32::from(id.device_type()) << 18) | (id.serial() & 0x3FFFF);
    [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8]
}

/// `dd hh MM yyyy`-packed end-time used by zone/DHW override modes.
fn parse_dts(b: &[u8]) -> Option<NaiveDateTime> {
    // mm hh dd MM yyyy (2 bytes)
    let year = u16::from_be_bytes([b[4], b[5]]);
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(b[3]), u32::from(b[2]))
        .and_then(|d| d.and_hms_opt(u32::from(b[1]), u32::from(b[0]), 0))
}
