// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound command construction.
//!
//! A [`Command`] is an unsent frame: verb, code, destination, payload, plus
//! the QoS block the sender honours (priority, retry limit, reply timeout).
//! Constructors exist for every frame the core emits: discovery queries,
//! mode writes, binding phases, and the faked-device setters.

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::{Error, PacketError};
use crate::protocol::address::DeviceId;
use crate::protocol::code::{Code, Verb};
use crate::protocol::packet::{to_hex, Header, Packet};
use crate::protocol::payload::heat::device_id_to_3;

/// Transmission priority. Binding phases and faked setters go out High;
/// discovery polls go out Low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Default,
    High,
}

/// The QoS block attached to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosParams {
    /// Resend attempts after the first send (0 = send once)
    pub retry_limit: u8,
    /// How long to wait for the echo/reply of a single attempt
    pub rx_timeout: Duration,
    /// Wait for the correlated reply (None = RQ yes, otherwise no)
    pub wait_for_reply: Option<bool>,
}

impl Default for QosParams {
    fn default() -> Self {
        Self { retry_limit: 3, rx_timeout: Duration::from_millis(500), wait_for_reply: None }
    }
}

/// An unsent frame plus its QoS block.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub verb: Verb,
    pub code: Code,
    /// The source to impersonate; None = the local gateway (HGI)
    pub src: Option<DeviceId>,
    /// The destination; equal to src (or None) for announce-style frames
    pub dst: Option<DeviceId>,
    pub payload: Vec<u8>,
    pub priority: Priority,
    pub qos: QosParams,
}

impl Command {
    /// General-purpose constructor from frame attributes.
    pub fn from_attrs(verb: Verb, dst: DeviceId, code: Code, payload: Vec<u8>) -> Self {
        Self {
            verb,
            code,
            src: None,
            dst: Some(dst),
            payload,
            priority: Priority::Default,
            qos: QosParams::default(),
        }
    }

    /// Parse a hex payload string (uppercase) into a command.
    pub fn from_hex(verb: Verb, dst: DeviceId, code: Code, payload_hex: &str) -> Result<Self, Error> {
        if payload_hex.len() % 2 != 0
            || !payload_hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_lowercase())
        {
            return Err(PacketError::Invalid(format!("bad payload hex: {payload_hex:?}")).into());
        }
        let payload = (0..payload_hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&payload_hex[i..i + 2], 16).unwrap_or(0))
            .collect();
        Ok(Self::from_attrs(verb, dst, code, payload))
    }

    fn announce(src: DeviceId, code: Code, payload: Vec<u8>) -> Self {
        Self {
            verb: Verb::I,
            code,
            src: Some(src),
            dst: None,
            payload,
            priority: Priority::High,
            qos: QosParams::default(),
        }
    }

    /// Override the source (for faked devices).
    pub fn with_src(mut self, src: DeviceId) -> Self {
        self.src = Some(src);
        self
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the QoS block.
    pub fn with_qos(mut self, qos: QosParams) -> Self {
        self.qos = qos;
        self
    }

    /// Materialize the command as a [`Packet`], stamped with `dtm` and the
    /// resolved source id (the local gateway's id, unless impersonating).
    pub fn to_packet(&self, dtm: NaiveDateTime, gwy_id: DeviceId) -> Result<Packet, Error> {
        Packet::parse(dtm, &self.to_frame(gwy_id))
    }

    /// Render the frame text (RSSI `000`, no seqn).
    pub fn to_frame(&self, gwy_id: DeviceId) -> String {
        let src = self.src.unwrap_or(gwy_id);
        let (a0, a1, a2) = match self.dst {
            Some(dst) if dst != src => (src, dst, DeviceId::NON_DEV),
            _ => (src, DeviceId::NON_DEV, src),
        };
        format!(
            "000 {} --- {} {} {} {} {:03} {}",
            self.verb.token(),
            a0,
            a1,
            a2,
            self.code,
            self.payload.len(),
            to_hex(&self.payload),
        )
    }

    /// The echo header: what this command looks like once observed on air.
    pub fn tx_header(&self, gwy_id: DeviceId) -> Option<Header> {
        let dtm = NaiveDateTime::default();
        self.to_packet(dtm, gwy_id).map(|p| p.header()).ok()
    }

    /// The expected reply header, if this command solicits one.
    pub fn rx_header(&self, gwy_id: DeviceId) -> Option<Header> {
        if self.verb != Verb::Rq && self.verb != Verb::W {
            return None;
        }
        let dst = self.dst?;
        let src = self.src.unwrap_or(gwy_id);
        if dst == src || !dst.is_addressable() {
            return None;
        }
        let tx = self.tx_header(gwy_id)?;
        Some(Header { code: self.code, verb: self.verb.complement(), src: dst, ctx: tx.ctx })
    }

    /// Whether the sender should wait for the correlated reply.
    pub fn wants_reply(&self) -> bool {
        self.qos.wait_for_reply.unwrap_or(self.verb == Verb::Rq)
    }

    // --- discovery queries --------------------------------------------------

    pub fn get_zone_name(ctl: DeviceId, zone_idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_0004, vec![zone_idx, 0x00])
    }

    pub fn get_zone_params(ctl: DeviceId, zone_idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_000A, vec![zone_idx])
    }

    pub fn get_setpoint(ctl: DeviceId, zone_idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_2309, vec![zone_idx])
    }

    pub fn get_zone_temp(ctl: DeviceId, zone_idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_30C9, vec![zone_idx])
    }

    pub fn get_window_state(ctl: DeviceId, zone_idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_12B0, vec![zone_idx])
    }

    pub fn get_zone_mode(ctl: DeviceId, zone_idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_2349, vec![zone_idx])
    }

    pub fn get_system_zones(ctl: DeviceId, zone_type: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_0005, vec![0x00, zone_type])
    }

    pub fn get_zone_devices(ctl: DeviceId, zone_idx: u8, device_role: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_000C, vec![zone_idx, device_role])
    }

    pub fn get_system_mode(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_2E04, vec![0xFF])
    }

    pub fn get_system_sync(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_1F09, vec![0x00])
    }

    pub fn get_datetime(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_313F, vec![0x00])
    }

    pub fn get_language(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_0100, vec![0x00])
    }

    pub fn get_schedule_version(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_0006, vec![0x00])
    }

    pub fn get_tpi_params(dev: DeviceId, domain_id: u8) -> Self {
        Self::from_attrs(Verb::Rq, dev, Code::_1100, vec![domain_id])
    }

    pub fn get_dhw_temp(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_1260, vec![0x00])
    }

    pub fn get_dhw_mode(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_1F41, vec![0x00])
    }

    pub fn get_dhw_params(ctl: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_10A0, vec![0x00])
    }

    pub fn get_relay_demand(dev: DeviceId, idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, dev, Code::_0008, vec![idx])
    }

    pub fn get_device_info(dev: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, dev, Code::_10E0, vec![0x00])
    }

    pub fn get_opentherm(otb: DeviceId, msg_id: u8) -> Self {
        Self::from_attrs(Verb::Rq, otb, Code::_3220, vec![0x00, 0x00, msg_id, 0x00, 0x00])
    }

    pub fn get_fault_log_entry(ctl: DeviceId, log_idx: u8) -> Self {
        Self::from_attrs(Verb::Rq, ctl, Code::_0418, vec![0x00, 0x00, log_idx])
    }

    /// RQ one schedule fragment; `total_frags` is 0 on the first request.
    pub fn get_schedule_fragment(
        ctl: DeviceId,
        zone_idx: u8,
        frag_number: u8,
        total_frags: u8,
    ) -> Self {
        Self::from_attrs(
            Verb::Rq,
            ctl,
            Code::_0404,
            vec![zone_idx, 0x20, 0x00, 0x08, 0x00, frag_number, total_frags],
        )
    }

    pub fn get_ventilation_state(fan: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, fan, Code::_31DA, vec![0x00])
    }

    pub fn get_fan_rate(fan: DeviceId) -> Self {
        Self::from_attrs(Verb::Rq, fan, Code::_22F1, vec![0x00])
    }

    // --- writes -------------------------------------------------------------

    pub fn set_zone_setpoint(ctl: DeviceId, zone_idx: u8, setpoint: f64) -> Self {
        let centi = (setpoint * 100.0).round() as i16;
        let b = centi.to_be_bytes();
        Self::from_attrs(Verb::W, ctl, Code::_2309, vec![zone_idx, b[0], b[1]])
            .with_priority(Priority::High)
    }

    pub fn set_system_mode(ctl: DeviceId, mode: u8) -> Self {
        Self::from_attrs(Verb::W, ctl, Code::_2E04, vec![mode, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00])
            .with_priority(Priority::High)
    }

    /// W one schedule fragment back to the controller.
    pub fn put_schedule_fragment(
        ctl: DeviceId,
        zone_idx: u8,
        frag_number: u8,
        total_frags: u8,
        fragment: &[u8],
    ) -> Self {
        let mut payload = vec![
            zone_idx,
            0x20,
            0x00,
            0x08,
            fragment.len() as u8,
            frag_number,
            total_frags,
        ];
        payload.extend_from_slice(fragment);
        Self::from_attrs(Verb::W, ctl, Code::_0404, payload).with_priority(Priority::High)
    }

    // --- faked-device setters -----------------------------------------------

    /// I 30C9 on behalf of a (faked) zone sensor.
    pub fn put_sensor_temp(sensor: DeviceId, temp: Option<f64>) -> Self {
        let b = match temp {
            Some(t) => ((t * 100.0).round() as i16).to_be_bytes(),
            None => 0x7FFF_i16.to_be_bytes(),
        };
        Self::announce(sensor, Code::_30C9, vec![0x00, b[0], b[1]])
    }

    /// I 1298 on behalf of a (faked) CO2 sensor.
    pub fn put_co2_level(sensor: DeviceId, ppm: u16) -> Self {
        let b = ppm.to_be_bytes();
        Self::announce(sensor, Code::_1298, vec![0x00, b[0], b[1]])
    }

    /// I 12A0 on behalf of a (faked) humidity sensor.
    pub fn put_indoor_humidity(sensor: DeviceId, humidity: f64) -> Self {
        let pct = (humidity * 100.0).round().clamp(0.0, 100.0) as u8;
        Self::announce(sensor, Code::_12A0, vec![0x00, pct])
    }

    /// I 22F1 on behalf of a (faked) remote, directed at its fan.
    pub fn put_fan_rate(remote: DeviceId, fan: DeviceId, step: u8, scale: u8) -> Self {
        Self {
            verb: Verb::I,
            code: Code::_22F1,
            src: Some(remote),
            dst: Some(fan),
            payload: vec![0x00, step, scale],
            priority: Priority::High,
            qos: QosParams::default(),
        }
    }

    /// I 0002 on behalf of a (faked) outdoor sensor.
    pub fn put_weather_temp(sensor: DeviceId, temp: f64) -> Self {
        let b = ((temp * 100.0).round() as i16).to_be_bytes();
        Self::announce(sensor, Code::_0002, vec![0x00, b[0], b[1], 0x02])
    }

    // --- binding phases -----------------------------------------------------

    /// Build a 1FC9 phase frame: the codes on offer/accept, each entry
    /// packing the sender's id, plus the OEM entry and the trailing
    /// self-binding entry on offers.
    pub fn put_bind(
        verb: Verb,
        src: DeviceId,
        codes: &[Code],
        dst: Option<DeviceId>,
        idx: u8,
        oem_code: Option<u8>,
    ) -> Self {
        let packed = device_id_to_3(src);
        let mut payload = Vec::with_capacity(6 * (codes.len() + 2));
        for code in codes {
            payload.push(idx);
            payload.extend_from_slice(&code.0.to_be_bytes());
            payload.extend_from_slice(&packed);
        }
        if let Some(oem) = oem_code {
            payload.push(oem);
            payload.extend_from_slice(&Code::_10E0.0.to_be_bytes());
            payload.extend_from_slice(&packed);
        }
        if verb == Verb::I && dst.map_or(true, |d| !d.is_addressable() || d == src) {
            // offers close with a 1FC9 entry naming the sender itself
            payload.push(0x00);
            payload.extend_from_slice(&Code::_1FC9.0.to_be_bytes());
            payload.extend_from_slice(&packed);
        }
        if payload.is_empty() {
            payload.push(idx); // a bare confirm carries just its idx
        }
        Self {
            verb,
            code: Code::_1FC9,
            src: Some(src),
            dst,
            payload,
            priority: Priority::High,
            qos: QosParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn gwy() -> DeviceId {
        "18:002563".parse().unwrap()
    }

    fn dtm() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn rq_frame_layout() {
        let ctl: DeviceId = "01:145038".parse().unwrap();
        let cmd = Command::get_setpoint(ctl, 0x01);
        assert_eq!(
            cmd.to_frame(gwy()),
            "000 RQ --- 18:002563 01:145038 --:------ 2309 001 01"
        );
        assert!(cmd.wants_reply());
    }

    #[test]
    fn announce_frame_layout() {
        let thm: DeviceId = "03:123456".parse().unwrap();
        let cmd = Command::put_sensor_temp(thm, Some(21.5));
        assert_eq!(
            cmd.to_frame(gwy()),
            "000  I --- 03:123456 --:------ 03:123456 30C9 003 000866"
        );
        assert!(!cmd.wants_reply());
    }

    #[test]
    fn rx_header_is_reply_shaped() {
        let ctl: DeviceId = "01:145038".parse().unwrap();
        let cmd = Command::get_setpoint(ctl, 0x01);
        let hdr = cmd.rx_header(gwy()).unwrap();
        assert_eq!(hdr.to_string(), "2309|RP|01:145038|01");

        // announce frames have no reply
        let thm: DeviceId = "03:123456".parse().unwrap();
        assert!(Command::put_sensor_temp(thm, None).rx_header(gwy()).is_none());
    }

    #[test]
    fn opentherm_rq_ctx_matches_reply() {
        let otb: DeviceId = "10:048122".parse().unwrap();
        let cmd = Command::get_opentherm(otb, 0x11);
        let rx = cmd.rx_header(gwy()).unwrap();
        assert_eq!(rx.to_string(), "3220|RP|10:048122|11");
    }

    #[test]
    fn bind_offer_payload_shape() {
        let rem: DeviceId = "37:155617".parse().unwrap();
        let cmd = Command::put_bind(Verb::I, rem, &[Code::_22F1], None, 0x00, None);
        // (00,22F1,self) + trailing (00,1FC9,self)
        assert_eq!(cmd.payload.len(), 12);
        assert_eq!(&cmd.payload[1..3], &[0x22, 0xF1]);
        assert_eq!(&cmd.payload[7..9], &[0x1F, 0xC9]);

        let pkt = cmd.to_packet(dtm(), gwy()).unwrap();
        assert_eq!(pkt.src(), rem);
        assert_eq!(pkt.dst(), rem); // announce: dst repeats src
    }

    #[test]
    fn bind_offer_with_oem_code() {
        let rem: DeviceId = "29:181813".parse().unwrap();
        let cmd = Command::put_bind(Verb::I, rem, &[Code::_31E0], None, 0x00, Some(0x67));
        // (00,31E0), (67,10E0), (00,1FC9)
        assert_eq!(cmd.payload.len(), 18);
        assert_eq!(cmd.payload[6], 0x67);
        assert_eq!(&cmd.payload[7..9], &[0x10, 0xE0]);
    }

    #[test]
    fn bind_accept_is_directed() {
        let fan: DeviceId = "32:155617".parse().unwrap();
        let rem: DeviceId = "37:155617".parse().unwrap();
        let cmd = Command::put_bind(Verb::W, fan, &[Code::_31D9, Code::_31DA], Some(rem), 0x00, None);
        assert_eq!(cmd.payload.len(), 12); // no trailing 1FC9 entry on accepts
        let pkt = cmd.to_packet(dtm(), gwy()).unwrap();
        assert_eq!(pkt.dst(), rem);
    }
}
