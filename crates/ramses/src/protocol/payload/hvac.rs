// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload parsers for the HVAC (ventilation) domain codes.

use serde::Serialize;

use crate::error::PacketError;
use crate::protocol::payload::{hex2, opt_percent, opt_temp, PayloadResult};

/// 22F1: a remote's fan-rate selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanRate {
    pub rate: f64,       // step / scale
    pub step: u8,
    pub scale: u8,
}

pub fn parse_22f1(p: &[u8]) -> PayloadResult<FanRate> {
    if p.len() != 3 {
        return Err(PacketError::PayloadInvalid(format!("22F1: {} bytes", p.len())).into());
    }
    let scale = if p[2] == 0 { 10 } else { p[2] };
    Ok(FanRate { rate: f64::from(p[1]) / f64::from(scale), step: p[1], scale })
}

/// 22F3: a remote's boost-timer push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanBoost {
    pub boost_timer_mins: u16,
}

pub fn parse_22f3(p: &[u8]) -> PayloadResult<FanBoost> {
    if p.len() < 3 {
        return Err(PacketError::PayloadInvalid(format!("22F3: {} bytes", p.len())).into());
    }
    Ok(FanBoost { boost_timer_mins: u16::from(p[2]) })
}

/// 31D9: basic fan state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanState {
    #[serde(serialize_with = "hex2")]
    pub idx: u8,
    pub exhaust_fan_speed: Option<f64>,
    pub passive: bool,
    pub damper_only: bool,
    pub filter_dirty: bool,
    pub frost_cycle: bool,
}

pub fn parse_31d9(p: &[u8]) -> PayloadResult<FanState> {
    if p.len() < 3 {
        return Err(PacketError::PayloadInvalid(format!("31D9: {} bytes", p.len())).into());
    }
    let flags = p[1];
    Ok(FanState {
        idx: p[0],
        exhaust_fan_speed: opt_percent(p[2]),
        passive: flags & 0x02 != 0,
        damper_only: flags & 0x04 != 0,
        filter_dirty: flags & 0x20 != 0,
        frost_cycle: flags & 0x40 != 0,
    })
}

/// 31DA: the full ventilation state (everything optional - units differ
/// in which fields they populate).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VentilationState {
    #[serde(serialize_with = "hex2")]
    pub idx: u8,
    pub air_quality: Option<f64>,
    pub co2_level: Option<u16>,
    pub indoor_humidity: Option<f64>,
    pub outdoor_humidity: Option<f64>,
    pub exhaust_temp: Option<f64>,
    pub supply_temp: Option<f64>,
    pub indoor_temp: Option<f64>,
    pub outdoor_temp: Option<f64>,
    pub speed_capabilities: Option<u16>,
    pub bypass_position: Option<f64>,
    pub exhaust_fan_speed: Option<f64>,
    pub supply_fan_speed: Option<f64>,
    pub remaining_mins: Option<u16>,
    pub post_heat: Option<f64>,
    pub pre_heat: Option<f64>,
    pub supply_flow: Option<f64>,
    pub exhaust_flow: Option<f64>,
}

pub fn parse_31da(p: &[u8]) -> PayloadResult<VentilationState> {
    if p.len() < 29 {
        return Err(PacketError::PayloadInvalid(format!("31DA: {} bytes", p.len())).into());
    }
    let u16_at = |i: usize| {
        let v = u16::from_be_bytes([p[i], p[i + 1]]);
        (v != 0xFFFF && v != 0x7FFF).then_some(v)
    };
    Ok(VentilationState {
        idx: p[0],
        air_quality: opt_percent(p[1]),
        co2_level: u16_at(3),
        indoor_humidity: opt_percent(p[5]),
        outdoor_humidity: opt_percent(p[6]),
        exhaust_temp: opt_temp(&p[7..9]),
        supply_temp: opt_temp(&p[9..11]),
        indoor_temp: opt_temp(&p[11..13]),
        outdoor_temp: opt_temp(&p[13..15]),
        speed_capabilities: u16_at(15),
        bypass_position: opt_percent(p[17]),
        exhaust_fan_speed: opt_percent(p[18]),
        supply_fan_speed: opt_percent(p[19]),
        remaining_mins: u16_at(20),
        post_heat: opt_percent(p[22]),
        pre_heat: opt_percent(p[23]),
        supply_flow: u16_at(24).map(|v| f64::from(v) / 100.0),
        exhaust_flow: u16_at(26).map(|v| f64::from(v) / 100.0),
    })
}

/// 1298: a CO2 sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Co2Level {
    pub co2_level: Option<u16>, // ppm
}

pub fn parse_1298(p: &[u8]) -> PayloadResult<Co2Level> {
    if p.len() != 3 {
        return Err(PacketError::PayloadInvalid(format!("1298: {} bytes", p.len())).into());
    }
    let v = u16::from_be_bytes([p[1], p[2]]);
    Ok(Co2Level { co2_level: (v != 0x7FFF).then_some(v) })
}

/// 12A0: an indoor relative humidity reading (plus optional temp/dewpoint).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndoorHumidity {
    pub indoor_humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dewpoint_temp: Option<f64>,
}

pub fn parse_12a0(p: &[u8]) -> PayloadResult<IndoorHumidity> {
    if p.is_empty() || p.len() < 2 {
        return Err(PacketError::PayloadInvalid(format!("12A0: {} bytes", p.len())).into());
    }
    Ok(IndoorHumidity {
        indoor_humidity: (p[1] != 0xFF && p[1] <= 100).then(|| f64::from(p[1]) / 100.0),
        temperature: if p.len() >= 4 { opt_temp(&p[2..4]) } else { None },
        dewpoint_temp: if p.len() >= 6 { opt_temp(&p[4..6]) } else { None },
    })
}

/// 31E0: ventilation demand pushed by a sensor/remote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VentDemand {
    #[serde(serialize_with = "hex2")]
    pub idx: u8,
    pub vent_demand: Option<f64>,
}

pub fn parse_31e0(p: &[u8]) -> PayloadResult<VentDemand> {
    if p.len() < 4 {
        return Err(PacketError::PayloadInvalid(format!("31E0: {} bytes", p.len())).into());
    }
    Ok(VentDemand { idx: p[0], vent_demand: opt_percent(p[2]) })
}

/// 2E10: presence detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presence {
    pub presence_detected: bool,
}

pub fn parse_2e10(p: &[u8]) -> PayloadResult<Presence> {
    if p.len() < 2 {
        return Err(PacketError::PayloadInvalid(format!("2E10: {} bytes", p.len())).into());
    }
    Ok(Presence { presence_detected: p[1] != 0x00 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn co2_reading() {
        let co2 = parse_1298(&[0x00, 0x03, 0xE8]).unwrap();
        assert_eq!(co2.co2_level, Some(1000));
        let co2 = parse_1298(&[0x00, 0x7F, 0xFF]).unwrap();
        assert_eq!(co2.co2_level, None);
    }

    #[test]
    fn fan_rate_scaling() {
        let rate = parse_22f1(&[0x00, 0x02, 0x07]).unwrap();
        assert_eq!(rate.step, 2);
        assert_eq!(rate.scale, 7);
        let rate = parse_22f1(&[0x00, 0x04, 0x00]).unwrap(); // Orcon omits the scale
        assert_eq!(rate.scale, 10);
    }

    #[test]
    fn humidity_is_a_fraction() {
        let hum = parse_12a0(&[0x00, 50]).unwrap();
        assert_eq!(hum.indoor_humidity, Some(0.5));
        assert_eq!(hum.temperature, None);
    }

    #[test]
    fn ventilation_state_options() {
        let mut p = vec![0xFF_u8; 29];
        p[0] = 0x00;
        p[18] = 100; // exhaust fan at 50%
        let vs = parse_31da(&p).unwrap();
        assert_eq!(vs.exhaust_fan_speed, Some(0.5));
        assert_eq!(vs.co2_level, None);
        assert_eq!(vs.indoor_temp, None);
    }
}
