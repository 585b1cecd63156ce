// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device identifiers and the device-type registry.
//!
//! A RAMSES device id is a `(type, serial)` pair rendered as `TT:SSSSSS`
//! (two decimal digits, colon, six decimal digits). The type digit pair
//! selects the device's domain (Heat vs HVAC) and its default role.
//!
//! Two sentinel ids exist on the wire:
//! - `--:------` - the "non-device" slot filler (unused address slots)
//! - `63:262142` - the null/broadcast address (binding offers go here)

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, PacketError};
use crate::protocol::code::{Code, Verb};

/// Domain of a device: CH/DHW heating, or ventilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Heat,
    Hvac,
    /// Either domain (e.g. the `30:` type is an RFG or a FAN)
    Ambiguous,
}

/// Short role tag for a device (the "slug").
///
/// `Dev`, `Hea` and `Hvc` are the promotable generics: a device created with
/// one of these may later be narrowed to a specific role, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    // Heat (CH/DHW)
    Ctl, // evohome controller
    Prg, // programmer (controller-capable)
    Ufc, // underfloor heating controller
    Thm, // room thermostat
    Trv, // radiator valve actuator
    Dhw, // stored hot water sensor
    Otb, // OpenTherm bridge
    Bdr, // relay
    Out, // outdoor sensor
    // Gateway
    Hgi,
    // HVAC
    Rfg, // internet gateway (RFG100)
    Fan, // ventilation unit
    Co2, // CO2 sensor
    Hum, // humidity sensor
    Rem, // remote / switch
    Dis, // display remote
    // Promotable generics
    Hea,
    Hvc,
    Dev,
}

impl Role {
    /// The canonical three-letter tag, as used in logs and schema dicts.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Ctl => "CTL",
            Self::Prg => "PRG",
            Self::Ufc => "UFC",
            Self::Thm => "THM",
            Self::Trv => "TRV",
            Self::Dhw => "DHW",
            Self::Otb => "OTB",
            Self::Bdr => "BDR",
            Self::Out => "OUT",
            Self::Hgi => "HGI",
            Self::Rfg => "RFG",
            Self::Fan => "FAN",
            Self::Co2 => "CO2",
            Self::Hum => "HUM",
            Self::Rem => "REM",
            Self::Dis => "DIS",
            Self::Hea => "HEA",
            Self::Hvc => "HVC",
            Self::Dev => "DEV",
        }
    }

    /// Parse a slug (as found in a `known_list` `class` trait).
    pub fn from_slug(s: &str) -> Option<Self> {
        Some(match s {
            "CTL" => Self::Ctl,
            "PRG" => Self::Prg,
            "UFC" => Self::Ufc,
            "THM" => Self::Thm,
            "TRV" => Self::Trv,
            "DHW" => Self::Dhw,
            "OTB" => Self::Otb,
            "BDR" => Self::Bdr,
            "OUT" => Self::Out,
            "HGI" => Self::Hgi,
            "RFG" => Self::Rfg,
            "FAN" => Self::Fan,
            "CO2" => Self::Co2,
            "HUM" => Self::Hum,
            "REM" => Self::Rem,
            "DIS" => Self::Dis,
            "HEA" => Self::Hea,
            "HVC" => Self::Hvc,
            "DEV" => Self::Dev,
            _ => return None,
        })
    }

    /// True for the generic roles that promotion may narrow.
    pub fn is_promotable(self) -> bool {
        matches!(self, Self::Dev | Self::Hea | Self::Hvc)
    }

    /// The domain a (specific) role belongs to.
    pub fn domain(self) -> Domain {
        match self {
            Self::Ctl
            | Self::Prg
            | Self::Ufc
            | Self::Thm
            | Self::Trv
            | Self::Dhw
            | Self::Otb
            | Self::Bdr
            | Self::Out
            | Self::Hea => Domain::Heat,
            Self::Rfg | Self::Fan | Self::Co2 | Self::Hum | Self::Rem | Self::Dis | Self::Hvc => {
                Domain::Hvac
            }
            Self::Hgi | Self::Dev => Domain::Ambiguous,
        }
    }

    /// True if this role may act as a TCS controller.
    pub fn is_controller(self) -> bool {
        matches!(self, Self::Ctl | Self::Prg)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// A device identifier: two-digit type + six-digit serial.
///
/// Sentinels are represented in-band: [`DeviceId::NON_DEV`] for `--:------`
/// and [`DeviceId::NUL_DEV`] for the null/broadcast `63:262142`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    typ: u8,     // 0..=99, or TYPE_NON for the non-device sentinel
    serial: u32, // 0..=999_999
}

const TYPE_NON: u8 = 0xFF;

impl DeviceId {
    /// The unused-address-slot sentinel, `--:------`.
    pub const NON_DEV: Self = Self { typ: TYPE_NON, serial: 0 };

    /// The null/broadcast address, `63:262142`.
    pub const NUL_DEV: Self = Self { typ: 63, serial: 262_142 };

    /// Build an id from its parts, checking the decimal ranges.
    pub fn new(typ: u8, serial: u32) -> Result<Self, Error> {
        if typ > 99 || serial > 999_999 {
            return Err(PacketError::Invalid(format!("device id out of range: {typ}:{serial}")).into());
        }
        Ok(Self { typ, serial })
    }

    /// The two-digit type.
    pub fn device_type(&self) -> u8 {
        self.typ
    }

    /// The six-digit serial.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// True for `--:------`.
    pub fn is_non_device(&self) -> bool {
        self.typ == TYPE_NON
    }

    /// True for the null/broadcast address.
    pub fn is_nul_device(&self) -> bool {
        *self == Self::NUL_DEV
    }

    /// True for any addressable (non-sentinel) id.
    pub fn is_addressable(&self) -> bool {
        !self.is_non_device() && !self.is_nul_device()
    }

    /// True if the type is an HGI80-compatible gateway (`18:`).
    pub fn is_hgi(&self) -> bool {
        self.typ == 18
    }

    /// The domain implied by the device type alone.
    pub fn domain(&self) -> Domain {
        if self.is_non_device() || self.is_nul_device() {
            return Domain::Ambiguous;
        }
        match self.typ {
            1 | 2 | 3 | 4 | 7 | 10 | 12 | 13 | 17 | 22 | 23 | 34 => Domain::Heat,
            18 => Domain::Ambiguous, // the gateway talks to both domains
            30 => Domain::Ambiguous, // RFG100 (Heat) or a FAN (HVAC)
            _ => Domain::Hvac,
        }
    }

    /// The default role for this device type (Heat types are reliable;
    /// everything else starts life as a promotable generic).
    pub fn default_role(&self) -> Role {
        match self.typ {
            1 => Role::Ctl,
            2 => Role::Ufc,
            3 | 12 | 22 | 34 => Role::Thm,
            4 => Role::Trv,
            7 => Role::Dhw,
            10 => Role::Otb,
            13 => Role::Bdr,
            17 => Role::Out,
            18 => Role::Hgi,
            23 => Role::Prg,
            _ => Role::Hvc,
        }
    }

    /// True if this device type may be a TCS controller (`01:`, `23:`).
    pub fn is_controller_type(&self) -> bool {
        matches!(self.typ, 1 | 23)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_non_device() {
            f.write_str("--:------")
        } else {
            write!(f, "{:02}:{:06}", self.typ, self.serial)
        }
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({self})")
    }
}

impl serde::Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s == "--:------" {
            return Ok(Self::NON_DEV);
        }
        let bad = || Error::from(PacketError::Invalid(format!("bad device id: {s:?}")));
        if s.len() != 9 || s.as_bytes()[2] != b':' {
            return Err(bad());
        }
        let typ: u8 = s[..2].parse().map_err(|_| bad())?;
        let serial: u32 = s[3..].parse().map_err(|_| bad())?;
        // the parse above accepts "+1" etc; insist on plain digits
        if !s[..2].bytes().all(|b| b.is_ascii_digit()) || !s[3..].bytes().all(|b| b.is_ascii_digit())
        {
            return Err(bad());
        }
        Self::new(typ, serial)
    }
}

/// True if `s` is a well-formed, addressable device id.
pub fn is_valid_dev_id(s: &str) -> bool {
    s.parse::<DeviceId>().map(|id| id.is_addressable()).unwrap_or(false)
}

/// Best role for a device, given an observed message.
///
/// Priority: explicit class (caller's concern) > HGI by type > Heat type
/// table > HVAC verb/code table > generic HVC.
pub fn best_dev_role(id: DeviceId, observed: Option<(Verb, Code)>, eavesdrop: bool) -> Role {
    if id.is_hgi() {
        return Role::Hgi;
    }
    if id.domain() == Domain::Heat {
        return id.default_role();
    }
    if eavesdrop {
        if let Some((verb, code)) = observed {
            if let Some(role) = hvac_role_by_verb_code(verb, code) {
                return role;
            }
        }
    }
    Role::Hvc
}

/// The HVAC verb/code fingerprint table (cardinal codes).
pub fn hvac_role_by_verb_code(verb: Verb, code: Code) -> Option<Role> {
    match (verb, code) {
        (Verb::I, Code::_1298) => Some(Role::Co2),
        (Verb::I, Code::_12A0) => Some(Role::Hum),
        (Verb::I, Code::_22F1) | (Verb::I, Code::_22F3) => Some(Role::Rem),
        (Verb::I, Code::_31D9) | (Verb::I, Code::_31DA) | (Verb::Rp, Code::_31DA) => {
            Some(Role::Fan)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        let id: DeviceId = "01:145038".parse().unwrap();
        assert_eq!(id.device_type(), 1);
        assert_eq!(id.to_string(), "01:145038");
        assert_eq!(id.default_role(), Role::Ctl);

        let non: DeviceId = "--:------".parse().unwrap();
        assert!(non.is_non_device());
        assert_eq!(non.to_string(), "--:------");

        let nul: DeviceId = "63:262142".parse().unwrap();
        assert!(nul.is_nul_device());
        assert!(!nul.is_addressable());
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["1:145038", "01-145038", "01:14503", "xx:123456", "01:+12345"] {
            assert!(bad.parse::<DeviceId>().is_err(), "{bad}");
        }
        assert!(!is_valid_dev_id("63:262142")); // valid form, but not addressable
        assert!(is_valid_dev_id("13:123456"));
    }

    #[test]
    fn role_tables() {
        assert_eq!("04:111111".parse::<DeviceId>().unwrap().default_role(), Role::Trv);
        assert_eq!("18:000730".parse::<DeviceId>().unwrap().default_role(), Role::Hgi);
        assert_eq!(
            hvac_role_by_verb_code(Verb::I, Code::_1298),
            Some(Role::Co2)
        );
        assert_eq!(hvac_role_by_verb_code(Verb::Rq, Code::_1298), None);
        assert!(Role::Hvc.is_promotable());
        assert!(!Role::Fan.is_promotable());
    }

    #[test]
    fn best_role_prefers_heat_types() {
        let trv: DeviceId = "04:222222".parse().unwrap();
        assert_eq!(best_dev_role(trv, Some((Verb::I, Code::_1298)), true), Role::Trv);

        let hvac: DeviceId = "32:155617".parse().unwrap();
        assert_eq!(best_dev_role(hvac, Some((Verb::I, Code::_1298)), true), Role::Co2);
        assert_eq!(best_dev_role(hvac, Some((Verb::I, Code::_1298)), false), Role::Hvc);
    }
}
