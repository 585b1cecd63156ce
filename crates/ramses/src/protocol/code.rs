// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The command-code registry - single source of truth for per-code traits.
//!
//! Every 16-bit code carries a fixed semantic. This module centralizes what
//! the rest of the crate needs to know about a code:
//! - its short name (for logs and the `traits` view)
//! - how its header context is derived ([`IndexPolicy`])
//! - how long a message of that code stays fresh ([`Expiry`])
//! - which domain(s) it belongs to (address-set validation)
//! - which device roles may transmit it, per verb (role validation)
//!
//! Codes that only ever appear in dev-only discovery lists with fixed
//! payloads (0150, 1098, 10B0, 1FD0, 2400, 2410, 2420) are deliberately
//! absent from the registry: they decode via the raw-hex fallback.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, PacketError};
use crate::protocol::address::Role;

/// Packet direction/kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    /// Information (unsolicited broadcast)
    I,
    /// Request
    Rq,
    /// Response
    Rp,
    /// Write
    W,
}

impl Verb {
    /// The two-character wire token (` I`, `RQ`, `RP`, ` W`).
    pub fn token(self) -> &'static str {
        match self {
            Self::I => " I",
            Self::Rq => "RQ",
            Self::Rp => "RP",
            Self::W => " W",
        }
    }

    /// Parse a wire token (leading space optional).
    pub fn from_token(s: &str) -> Option<Self> {
        match s.trim() {
            "I" => Some(Self::I),
            "RQ" => Some(Self::Rq),
            "RP" => Some(Self::Rp),
            "W" => Some(Self::W),
            _ => None,
        }
    }

    /// The verb the peer must have sent for us to receive this one
    /// (RQ pairs with RP, W elicits I).
    pub fn complement(self) -> Self {
        match self {
            Self::Rq => Self::Rp,
            Self::Rp => Self::Rq,
            Self::W | Self::I => Self::I,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A 16-bit RAMSES command code, rendered as four uppercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(pub u16);

#[allow(non_upper_case_globals)] // codes are conventionally written as hex
impl Code {
    pub const _0001: Self = Self(0x0001); // rf_unknown
    pub const _0002: Self = Self(0x0002); // sensor_weather
    pub const _0004: Self = Self(0x0004); // zone_name
    pub const _0005: Self = Self(0x0005); // system_zones
    pub const _0006: Self = Self(0x0006); // schedule_sync
    pub const _0008: Self = Self(0x0008); // relay_demand
    pub const _0009: Self = Self(0x0009); // relay_failsafe
    pub const _000A: Self = Self(0x000A); // zone_params
    pub const _000C: Self = Self(0x000C); // zone_devices
    pub const _0016: Self = Self(0x0016); // rf_check
    pub const _0100: Self = Self(0x0100); // language
    pub const _0404: Self = Self(0x0404); // zone_schedule
    pub const _0418: Self = Self(0x0418); // system_fault
    pub const _1030: Self = Self(0x1030); // mixvalve_params
    pub const _1060: Self = Self(0x1060); // device_battery
    pub const _10A0: Self = Self(0x10A0); // dhw_params
    pub const _10E0: Self = Self(0x10E0); // device_info
    pub const _1100: Self = Self(0x1100); // tpi_params
    pub const _1260: Self = Self(0x1260); // dhw_temp
    pub const _1290: Self = Self(0x1290); // outdoor_temp
    pub const _1298: Self = Self(0x1298); // co2_level
    pub const _12A0: Self = Self(0x12A0); // indoor_humidity
    pub const _12B0: Self = Self(0x12B0); // window_state
    pub const _1F09: Self = Self(0x1F09); // system_sync
    pub const _1F41: Self = Self(0x1F41); // dhw_mode
    pub const _1FC9: Self = Self(0x1FC9); // rf_bind
    pub const _1FD4: Self = Self(0x1FD4); // opentherm_sync
    pub const _2309: Self = Self(0x2309); // setpoint
    pub const _2349: Self = Self(0x2349); // zone_mode
    pub const _22C9: Self = Self(0x22C9); // ufh_setpoint
    pub const _22F1: Self = Self(0x22F1); // fan_rate
    pub const _22F3: Self = Self(0x22F3); // fan_boost
    pub const _2E04: Self = Self(0x2E04); // system_mode
    pub const _2E10: Self = Self(0x2E10); // presence_detect
    pub const _30C9: Self = Self(0x30C9); // temperature
    pub const _313F: Self = Self(0x313F); // datetime
    pub const _3150: Self = Self(0x3150); // heat_demand
    pub const _31D9: Self = Self(0x31D9); // fan_state
    pub const _31DA: Self = Self(0x31DA); // ventilation_state
    pub const _31E0: Self = Self(0x31E0); // vent_demand
    pub const _3220: Self = Self(0x3220); // opentherm_msg
    pub const _3B00: Self = Self(0x3B00); // actuator_sync
    pub const _3EF0: Self = Self(0x3EF0); // actuator_state
    pub const _3EF1: Self = Self(0x3EF1); // actuator_cycle

    /// The short name used in logs and the `traits` view, if known.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::_0001 => "rf_unknown",
            Self::_0002 => "sensor_weather",
            Self::_0004 => "zone_name",
            Self::_0005 => "system_zones",
            Self::_0006 => "schedule_sync",
            Self::_0008 => "relay_demand",
            Self::_0009 => "relay_failsafe",
            Self::_000A => "zone_params",
            Self::_000C => "zone_devices",
            Self::_0016 => "rf_check",
            Self::_0100 => "language",
            Self::_0404 => "zone_schedule",
            Self::_0418 => "system_fault",
            Self::_1030 => "mixvalve_params",
            Self::_1060 => "device_battery",
            Self::_10A0 => "dhw_params",
            Self::_10E0 => "device_info",
            Self::_1100 => "tpi_params",
            Self::_1260 => "dhw_temp",
            Self::_1290 => "outdoor_temp",
            Self::_1298 => "co2_level",
            Self::_12A0 => "indoor_humidity",
            Self::_12B0 => "window_state",
            Self::_1F09 => "system_sync",
            Self::_1F41 => "dhw_mode",
            Self::_1FC9 => "rf_bind",
            Self::_1FD4 => "opentherm_sync",
            Self::_2309 => "setpoint",
            Self::_2349 => "zone_mode",
            Self::_22C9 => "ufh_setpoint",
            Self::_22F1 => "fan_rate",
            Self::_22F3 => "fan_boost",
            Self::_2E04 => "system_mode",
            Self::_2E10 => "presence_detect",
            Self::_30C9 => "temperature",
            Self::_313F => "datetime",
            Self::_3150 => "heat_demand",
            Self::_31D9 => "fan_state",
            Self::_31DA => "ventilation_state",
            Self::_31E0 => "vent_demand",
            Self::_3220 => "opentherm_msg",
            Self::_3B00 => "actuator_sync",
            Self::_3EF0 => "actuator_state",
            Self::_3EF1 => "actuator_cycle",
            _ => return None,
        })
    }

    /// True if the code is in the registry (has a name).
    pub fn is_known(self) -> bool {
        self.name().is_some()
    }

    /// How the header context is derived for this code.
    pub fn index_policy(self) -> IndexPolicy {
        match self {
            Self::_0005 | Self::_000C | Self::_0404 | Self::_0418 | Self::_1FC9 | Self::_3220 => {
                IndexPolicy::Complex
            }
            Self::_0001
            | Self::_0002
            | Self::_0006
            | Self::_0016
            | Self::_0100
            | Self::_10E0
            | Self::_1290
            | Self::_1F09
            | Self::_1FD4
            | Self::_2E04
            | Self::_313F => IndexPolicy::None,
            _ if self.is_known() => IndexPolicy::Simple,
            _ => IndexPolicy::Unknown,
        }
    }

    /// The freshness policy for messages of this code.
    pub fn expiry(self) -> Expiry {
        match self {
            Self::_12B0 => Expiry::After(Duration::from_secs(60 * 60)),
            Self::_313F => Expiry::After(Duration::from_secs(3)),
            Self::_1F09 => Expiry::SyncCycle, // remaining_seconds x 3, from the payload
            _ => Expiry::Never,
        }
    }

    /// The domain(s) a code may legally appear in.
    pub fn domain(self) -> CodeDomain {
        match self {
            // ventilation-only codes
            Self::_1298 | Self::_12A0 | Self::_22F1 | Self::_22F3 | Self::_2E10 | Self::_31D9
            | Self::_31DA | Self::_31E0 => CodeDomain::HvacOnly,
            // codes either domain uses (binding, battery, info, rf checks)
            Self::_0001 | Self::_0016 | Self::_1060 | Self::_10E0 | Self::_1FC9 => {
                CodeDomain::Either
            }
            _ if self.is_known() => CodeDomain::HeatOnly,
            _ => CodeDomain::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({:04X})", self.0)
    }
}

impl serde::Serialize for Code {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for Code {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_lowercase()) {
            return Err(PacketError::Invalid(format!("bad code: {s:?}")).into());
        }
        u16::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| PacketError::Invalid(format!("bad code: {s:?}")).into())
    }
}

/// How a code's header context (`ctx`) is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPolicy {
    /// The code never carries an index: `ctx` is [`Ctx::None`]
    None,
    /// `ctx` is the first payload byte (zone idx / domain id / child id)
    Simple,
    /// `ctx` is computed per-code (0005, 000C, 0404, 0418, 1FC9, 3220)
    Complex,
    /// Not in the registry: `ctx` is not determinable
    Unknown,
}

/// Which domain a code belongs to, for address-set validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeDomain {
    HeatOnly,
    HvacOnly,
    Either,
    Unknown,
}

/// Freshness policy for a code's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Messages of this code never expire
    Never,
    /// Fixed time-to-live from the packet timestamp
    After(Duration),
    /// Derived from the packet itself (1F09: remaining_seconds x 3)
    SyncCycle,
}

/// True if `role` may transmit `(verb, code)`.
///
/// This is the Tx half of the role-permission table; the dispatcher derives
/// the Rx check from it via [`Verb::complement`]. Promotable roles (and the
/// HGI, which can do what it likes) are not constrained here - the
/// dispatcher skips them.
pub fn role_may_tx(role: Role, verb: Verb, code: Code) -> bool {
    use Verb::{Rp, Rq, I, W};

    // Codes any (specific) device may emit.
    if matches!(code, Code::_1FC9 | Code::_10E0 | Code::_0016 | Code::_0001) {
        return true;
    }
    if code == Code::_1060 && verb == I {
        return true; // any battery-powered device announces its state
    }

    match role {
        Role::Ctl | Role::Prg => match (verb, code) {
            (I | Rp, Code::_0002 | Code::_0004 | Code::_0005 | Code::_0006 | Code::_0008) => true,
            (I | Rp, Code::_0009 | Code::_000A | Code::_000C | Code::_0100 | Code::_0404) => true,
            (I | Rp, Code::_0418 | Code::_1030 | Code::_10A0 | Code::_1100 | Code::_1260) => true,
            (I | Rp, Code::_12B0 | Code::_1F09 | Code::_1F41 | Code::_2309 | Code::_2349) => true,
            (I | Rp, Code::_2E04 | Code::_30C9 | Code::_313F | Code::_3B00) => true,
            (I, Code::_3150) => true,
            (Rq, Code::_3EF0 | Code::_3EF1 | Code::_0008 | Code::_313F) => true,
            (W, Code::_2349 | Code::_2309 | Code::_1F41 | Code::_313F) => true,
            _ => false,
        },
        Role::Trv => matches!(
            (verb, code),
            (I, Code::_0004 | Code::_0100 | Code::_12B0 | Code::_2309 | Code::_30C9)
                | (I, Code::_313F | Code::_3150)
                | (W, Code::_2309) // some TRV firmwares push setpoints back
        ),
        Role::Thm => matches!(
            (verb, code),
            (I, Code::_0002 | Code::_2309 | Code::_30C9 | Code::_12B0)
                | (W, Code::_2309 | Code::_2349)
                | (Rq, Code::_000A | Code::_313F)
        ),
        Role::Bdr => matches!(
            (verb, code),
            (I, Code::_0008 | Code::_0009 | Code::_1100 | Code::_3B00 | Code::_3EF0)
                | (Rp, Code::_0008 | Code::_1100 | Code::_3EF0 | Code::_3EF1)
                | (Rq, Code::_3EF0) // historical exception, seen in the wild
        ),
        Role::Otb => matches!(
            (verb, code),
            (I, Code::_1FD4 | Code::_3150 | Code::_3EF0)
                | (Rp, Code::_3220 | Code::_3EF0 | Code::_3EF1 | Code::_10A0 | Code::_1260)
                | (Rq, Code::_3220)
        ),
        Role::Dhw => matches!((verb, code), (I, Code::_1260) | (Rq, Code::_10A0)),
        Role::Out => matches!((verb, code), (I, Code::_0002 | Code::_1290)),
        Role::Ufc => matches!(
            (verb, code),
            (I, Code::_0008 | Code::_22C9 | Code::_3150)
                | (Rp, Code::_0005 | Code::_000C | Code::_22C9)
                | (Rq, Code::_313F)
        ),
        Role::Fan => matches!(
            (verb, code),
            (I, Code::_31D9 | Code::_31DA | Code::_1298 | Code::_12A0)
                | (Rp, Code::_31D9 | Code::_31DA | Code::_22F1 | Code::_3220)
        ),
        Role::Rem | Role::Dis => matches!(
            (verb, code),
            (I, Code::_22F1 | Code::_22F3 | Code::_31E0) | (Rq, Code::_31D9 | Code::_31DA)
        ),
        Role::Co2 => matches!((verb, code), (I, Code::_1298 | Code::_31E0 | Code::_2E10)),
        Role::Hum => matches!((verb, code), (I, Code::_12A0)),
        Role::Rfg => matches!(
            (verb, code),
            (Rq, Code::_0404 | Code::_0418 | Code::_313F | Code::_3220) | (W, Code::_313F)
        ),
        // the gateway, and the promotable generics, are unconstrained
        Role::Hgi | Role::Dev | Role::Hea | Role::Hvc => true,
    }
}

/// Historical exceptions to the Rx-side role check, `(role, verb, code)`
/// tuples the field has shown to be legal despite the table.
pub fn rx_check_exempt(role: Role, verb: Verb, code: Code) -> bool {
    matches!(
        (role, verb, code),
        (Role::Ctl, Verb::Rq, Code::_3EF1)
            | (Role::Bdr, Verb::Rq, Code::_3EF0)
            | (_, Verb::W, Code::_0001)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_tokens() {
        assert_eq!(Verb::I.token(), " I");
        assert_eq!(Verb::from_token(" I"), Some(Verb::I));
        assert_eq!(Verb::from_token("RQ"), Some(Verb::Rq));
        assert_eq!(Verb::from_token("XX"), None);
        assert_eq!(Verb::Rq.complement(), Verb::Rp);
        assert_eq!(Verb::W.complement(), Verb::I);
    }

    #[test]
    fn code_parse_format() {
        let code: Code = "30C9".parse().unwrap();
        assert_eq!(code, Code::_30C9);
        assert_eq!(code.to_string(), "30C9");
        assert!("30c9".parse::<Code>().is_err()); // lowercase rejected
        assert!("30C".parse::<Code>().is_err());

        let unknown: Code = "7FFF".parse().unwrap();
        assert!(!unknown.is_known());
        assert_eq!(unknown.index_policy(), IndexPolicy::Unknown);
    }

    #[test]
    fn registry_coherence() {
        assert_eq!(Code::_1FC9.index_policy(), IndexPolicy::Complex);
        assert_eq!(Code::_1F09.index_policy(), IndexPolicy::None);
        assert_eq!(Code::_30C9.index_policy(), IndexPolicy::Simple);
        assert_eq!(Code::_12B0.expiry(), Expiry::After(Duration::from_secs(3600)));
        assert_eq!(Code::_1F09.expiry(), Expiry::SyncCycle);
        assert_eq!(Code::_1F09.domain(), CodeDomain::HeatOnly);
        assert_eq!(Code::_31DA.domain(), CodeDomain::HvacOnly);
        assert_eq!(Code::_1FC9.domain(), CodeDomain::Either);
    }

    #[test]
    fn role_permissions() {
        assert!(role_may_tx(Role::Ctl, Verb::I, Code::_30C9));
        assert!(!role_may_tx(Role::Trv, Verb::I, Code::_1F09));
        assert!(role_may_tx(Role::Trv, Verb::I, Code::_30C9));
        assert!(role_may_tx(Role::Co2, Verb::I, Code::_1298));
        assert!(!role_may_tx(Role::Hum, Verb::I, Code::_1298));
        // binding and device-info are universal
        assert!(role_may_tx(Role::Trv, Verb::I, Code::_1FC9));
        // the whitelisted historical exceptions
        assert!(rx_check_exempt(Role::Bdr, Verb::Rq, Code::_3EF0));
        assert!(rx_check_exempt(Role::Ctl, Verb::Rq, Code::_3EF1));
        assert!(!rx_check_exempt(Role::Trv, Verb::Rq, Code::_3EF0));
    }
}
