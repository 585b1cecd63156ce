// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The send path: echo/reply correlation by header, retry/failure
//! semantics, and the request-driven flows built on top (schedule fetch,
//! fault-log pagination).

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use ramses::schedule::{DaySchedule, Switchpoint};
use ramses::transport::{LoopbackTransport, RamsesTransport};
use ramses::{Code, Config, Error, Gateway, Packet, Schedule, Verb};

/// A transport that scripts a peer: every sent frame is echoed (RF
/// behaviour), then any rule-produced replies are injected.
struct ScriptedTransport {
    inner: Arc<LoopbackTransport>,
    script: Box<dyn Fn(&Packet) -> Vec<String> + Send + Sync>,
}

impl RamsesTransport for ScriptedTransport {
    fn send_frame(&self, frame: &str) -> Result<(), Error> {
        self.inner.send_frame(frame)?;
        let dtm = NaiveDateTime::default();
        if let Ok(pkt) = Packet::parse(dtm, frame) {
            for reply in (self.script)(&pkt) {
                self.inner.inject(&reply);
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.inner.close();
    }
}

async fn scripted_gateway(
    script: impl Fn(&Packet) -> Vec<String> + Send + Sync + 'static,
) -> Gateway {
    let (inner, rx) = LoopbackTransport::new();
    let transport = Arc::new(ScriptedTransport { inner, script: Box::new(script) });
    let mut config = Config::default();
    config.config.disable_discovery = true;
    let gwy = Gateway::new(config, transport, rx).unwrap();
    gwy.start(None).await.unwrap();
    gwy
}

#[tokio::test(start_paused = true)]
async fn rq_correlates_its_rp_by_header() {
    let gwy = scripted_gateway(|pkt| {
        if pkt.verb() == Verb::Rq && pkt.code() == Code::_2309 {
            vec!["063 RP --- 01:145038 18:000730 --:------ 2309 003 0105DC".to_string()]
        } else {
            Vec::new()
        }
    })
    .await;

    let ctl = "01:145038".parse().unwrap();
    let reply = gwy
        .async_send_cmd(ramses::Command::get_setpoint(ctl, 0x01), None, None, Some(true))
        .await
        .unwrap()
        .expect("a correlated reply");
    assert_eq!(reply.verb(), Verb::Rp);
    assert_eq!(reply.src(), ctl);
    assert_eq!(reply.header().to_string(), "2309|RP|01:145038|01");

    gwy.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_sends_fail_after_the_retry_budget() {
    // a dead adapter: no echo, no replies
    let (inner, rx) = LoopbackTransport::new();
    inner.set_echo(false);
    let transport = inner.clone();
    let mut config = Config::default();
    config.config.disable_discovery = true;
    let gwy = Gateway::new(config, transport, rx).unwrap();
    gwy.start(None).await.unwrap();

    let ctl = "01:145038".parse().unwrap();
    let started = tokio::time::Instant::now();
    let err = gwy
        .async_send_cmd(ramses::Command::get_setpoint(ctl, 0x01), Some(2), None, Some(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SendFailed(_)));
    // three attempts of 500 ms each
    assert!(started.elapsed() >= Duration::from_millis(1500));

    gwy.stop().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_sending_is_surfaced() {
    let (transport, rx) = LoopbackTransport::new();
    let mut config = Config::default();
    config.config.disable_sending = true;
    let gwy = Gateway::new(config, transport, rx).unwrap();
    gwy.start(None).await.unwrap();

    let ctl = "01:145038".parse().unwrap();
    let err = gwy
        .async_send_cmd(ramses::Command::get_setpoint(ctl, 0x01), None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SendFailed(_)));

    gwy.stop().await;
}

fn zone_schedule() -> Schedule {
    Schedule {
        zone_idx: 0x01,
        schedule: (0..7)
            .map(|dow| DaySchedule {
                day_of_week: dow,
                switchpoints: (0..4)
                    .map(|i| Switchpoint {
                        time_of_day: format!("{:02}:{:02}", 5 + i * 4, (dow * 5 + i) % 60),
                        heat_setpoint: Some(12.0 + f64::from(dow * 4 + i) * 0.25),
                        enabled: None,
                    })
                    .collect(),
            })
            .collect(),
    }
}

#[tokio::test(start_paused = true)]
async fn schedule_fetch_reassembles_all_fragments() {
    let sched = zone_schedule();
    let frags = ramses::schedule::schedule_to_fragments(&sched).unwrap();
    assert!(frags.len() >= 2, "need a multi-fragment schedule to be meaningful");
    let total = frags.len() as u8;

    let gwy = scripted_gateway(move |pkt| {
        if pkt.verb() != Verb::Rq || pkt.code() != Code::_0404 {
            return Vec::new();
        }
        let want = pkt.payload()[5] as usize;
        let data = &frags[want - 1];
        vec![format!(
            "063 RP --- 01:145038 18:000730 --:------ 0404 {:03} 01200008{:02X}{:02X}{:02X}{}",
            7 + data.len(),
            data.len(),
            want,
            total,
            ramses::protocol::packet::to_hex(data),
        )]
    })
    .await;

    // the controller must exist (and with it, its TCS and schedule lock)
    gwy.ingest_frame(
        chrono::Utc::now().naive_utc(),
        "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF0532",
    );

    let ctl = "01:145038".parse().unwrap();
    let fetched = gwy.get_schedule(ctl, 0x01).await.unwrap();
    assert_eq!(fetched, sched);

    gwy.stop().await;
}

#[tokio::test(start_paused = true)]
async fn faultlog_pages_until_the_empty_slot() {
    let entry = |idx: u8| {
        format!(
            "063 RP --- 01:145038 18:000730 --:------ 0418 022 0040{idx:02X}B000040000040155D3B0000000000000366E99"
        )
    };
    let empty = |idx: u8| {
        format!(
            "063 RP --- 01:145038 18:000730 --:------ 0418 022 0000{idx:02X}B000000000000000000000000000000000"
        )
    };

    let gwy = scripted_gateway(move |pkt| {
        if pkt.verb() != Verb::Rq || pkt.code() != Code::_0418 {
            return Vec::new();
        }
        let idx = pkt.payload()[2];
        vec![if idx < 2 { entry(idx) } else { empty(idx) }]
    })
    .await;

    let ctl = "01:145038".parse().unwrap();
    let log = gwy.get_faultlog(ctl, 8).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["log_idx"], serde_json::json!("00"));
    assert_eq!(log[1]["log_idx"], serde_json::json!("01"));

    gwy.stop().await;
}
