// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The OpenTherm message (3220) encapsulation.
//!
//! A 3220 payload is `00 | msg-type | msg-id | value(2)`. The msg-type's
//! top three bits select the frame kind; `DataInvalid`/`UnknownDataId`
//! replies are what drives discovery deprecation for unsupported msg-ids.

use serde::Serialize;

use crate::error::PacketError;
use crate::protocol::payload::PayloadResult;

/// OpenTherm frame kind (the top three bits of the msg-type byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OtMsgType {
    ReadData,
    WriteData,
    InvalidData,
    Reserved,
    ReadAck,
    WriteAck,
    DataInvalid,
    UnknownDataId,
}

impl OtMsgType {
    fn from_byte(b: u8) -> Self {
        match (b >> 4) & 0x07 {
            0 => Self::ReadData,
            1 => Self::WriteData,
            2 => Self::InvalidData,
            3 => Self::Reserved,
            4 => Self::ReadAck,
            5 => Self::WriteAck,
            6 => Self::DataInvalid,
            _ => Self::UnknownDataId,
        }
    }

    /// True for the two reply kinds that mean "this msg-id is unsupported".
    pub fn is_unsupported(self) -> bool {
        matches!(self, Self::DataInvalid | Self::UnknownDataId)
    }
}

/// The well-known msg-id registry (the subset the discovery lists poll).
pub fn ot_msg_name(msg_id: u8) -> Option<&'static str> {
    Some(match msg_id {
        0x00 => "status",
        0x01 => "control_setpoint",
        0x03 => "slave_config",
        0x05 => "fault_flags",
        0x11 => "rel_modulation_level",
        0x12 => "ch_water_pressure",
        0x13 => "dhw_flow_rate",
        0x19 => "boiler_water_temp",
        0x1A => "dhw_temp",
        0x1B => "outside_temp",
        0x1C => "return_water_temp",
        0x38 => "dhw_setpoint",
        0x39 => "max_ch_setpoint",
        0x73 => "oem_diagnostic_code",
        0x7D => "opentherm_version_slave",
        _ => return None,
    })
}

/// A decoded 3220 message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenThermMsg {
    pub msg_type: OtMsgType,
    pub msg_id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_name: Option<&'static str>,
    /// The raw 16-bit data value
    pub value_raw: u16,
    /// The value as f8.8 fixed point, where the msg-id calls for it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Msg-ids whose value is an f8.8 fixed-point number.
fn is_f8_8(msg_id: u8) -> bool {
    matches!(msg_id, 0x01 | 0x11 | 0x12 | 0x13 | 0x19 | 0x1A | 0x1B | 0x1C | 0x38 | 0x39)
}

pub fn parse_3220(p: &[u8]) -> PayloadResult<OpenThermMsg> {
    if p.len() != 5 {
        return Err(PacketError::PayloadInvalid(format!("3220: {} bytes", p.len())).into());
    }
    let msg_type = OtMsgType::from_byte(p[1]);
    let msg_id = p[2];
    let value_raw = u16::from_be_bytes([p[3], p[4]]);
    let value = (is_f8_8(msg_id) && !msg_type.is_unsupported())
        .then(|| f64::from(value_raw as i16) / 256.0);
    Ok(OpenThermMsg { msg_type, msg_id, msg_name: ot_msg_name(msg_id), value_raw, value })
}

/// 1FD4: the OTB's sync ticker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenThermSync {
    pub ticker: u16,
}

pub fn parse_1fd4(p: &[u8]) -> PayloadResult<OpenThermSync> {
    if p.len() != 3 {
        return Err(PacketError::PayloadInvalid(format!("1FD4: {} bytes", p.len())).into());
    }
    Ok(OpenThermSync { ticker: u16::from_be_bytes([p[1], p[2]]) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_ack_f8_8() {
        // ReadAck (4), msg-id 0x19 (boiler water temp), value 0x2E80 = 46.5
        let msg = parse_3220(&[0x00, 0x40, 0x19, 0x2E, 0x80]).unwrap();
        assert_eq!(msg.msg_type, OtMsgType::ReadAck);
        assert_eq!(msg.msg_name, Some("boiler_water_temp"));
        assert_eq!(msg.value, Some(46.5));
    }

    #[test]
    fn unknown_dataid_flags_unsupported() {
        let msg = parse_3220(&[0x00, 0x70, 0x47, 0x00, 0x00]).unwrap();
        assert_eq!(msg.msg_type, OtMsgType::UnknownDataId);
        assert!(msg.msg_type.is_unsupported());
        assert_eq!(msg.value, None);
    }
}
