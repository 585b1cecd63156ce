// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Snapshot/restore stability: exporting the state and replaying it into
//! a fresh gateway (in any order) reproduces the same schema.

use chrono::{NaiveDate, NaiveDateTime};
use ramses::{shrink, Config, Gateway, LoopbackTransport};

fn dtm(secs: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(9, 0, secs).unwrap()
}

fn gateway() -> Gateway {
    let (transport, rx) = LoopbackTransport::new();
    let mut config = Config::default();
    config.config.enable_eavesdrop = true;
    Gateway::new(config, transport, rx).unwrap()
}

/// A small synthetic traffic log covering a TCS, zones, DHW and an OTB.
fn traffic() -> Vec<(u32, &'static str)> {
    vec![
        (0, "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF0532"),
        (1, "045  I --- 01:145038 --:------ 01:145038 30C9 012 0007D00106A4020898"),
        (2, "045  I --- 01:145038 --:------ 01:145038 2309 009 0005DC0106A4020708"),
        (3, "053 RP --- 01:145038 18:000730 --:------ 1260 003 000911"),
        (4, "072  I --- 01:145038 --:------ 01:145038 2E04 008 00FFFFFFFFFFFF00"),
        (5, "045  I --- 04:111111 --:------ 04:111111 30C9 003 0007D0"),
        (6, "051  I --- 13:888888 --:------ 13:888888 3B00 002 FCC8"),
        (7, "084 RP --- 10:048122 18:000730 --:------ 3220 005 0040192E80"),
        (8, "045  I --- 32:155617 63:262142 --:------ 1298 003 0003E8"),
    ]
}

#[test]
fn snapshot_then_restore_is_idempotent() {
    let gwy1 = gateway();
    for (secs, frame) in traffic() {
        gwy1.ingest_frame(dtm(secs), frame);
    }
    let (schema1, pkts1) = gwy1.get_state(false);
    assert!(!pkts1.is_empty());

    // restore into a fresh gateway, in snapshot (sorted) order
    let gwy2 = gateway();
    gwy2.replay(pkts1.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let (schema2, pkts2) = gwy2.get_state(false);

    assert_eq!(shrink(&schema1), shrink(&schema2));
    assert_eq!(pkts1, pkts2);
}

#[test]
fn restore_order_does_not_matter() {
    let gwy1 = gateway();
    for (secs, frame) in traffic() {
        gwy1.ingest_frame(dtm(secs), frame);
    }
    let (schema1, pkts1) = gwy1.get_state(false);

    // replay in several shuffled orders; the schema must be stable
    let entries: Vec<(&str, &str)> =
        pkts1.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let mut orders = vec![entries.clone()];
    let mut reversed = entries.clone();
    reversed.reverse();
    orders.push(reversed);
    let mut rotated = entries.clone();
    rotated.rotate_left(entries.len() / 2);
    orders.push(rotated);
    let mut shuffled = entries;
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    rng.shuffle(&mut shuffled);
    orders.push(shuffled);

    for order in orders {
        let gwy = gateway();
        gwy.replay(order.into_iter());
        let (schema, _) = gwy.get_state(false);
        assert_eq!(shrink(&schema1), shrink(&schema), "schema differs under reorder");
    }
}

#[test]
fn snapshot_excludes_queries_and_expired() {
    let gwy = gateway();
    gwy.ingest_frame(dtm(0), "045  I --- 04:111111 --:------ 04:111111 30C9 003 0007D0");
    gwy.ingest_frame(dtm(1), "045 RQ --- 18:000730 01:145038 --:------ 30C9 001 00");
    // a window-state that will have expired by snapshot time
    let old = dtm(0) - chrono::Duration::hours(2);
    gwy.ingest_frame(old, "045  I --- 04:111111 --:------ 04:111111 12B0 003 0000C8");

    let (_, pkts) = gwy.get_state(false);
    assert!(pkts.keys().all(|k| !k.contains(" RQ ")), "queries must not persist");
    assert!(
        !pkts.values().any(|v| v == "0000C8"),
        "expired messages must not persist: {pkts:?}"
    );
    // but with include_expired they do
    let (_, pkts) = gwy.get_state(true);
    assert!(pkts.values().any(|v| v == "0000C8"));
}

#[test]
fn restored_gateway_answers_the_same_status_queries() {
    let gwy1 = gateway();
    for (secs, frame) in traffic() {
        gwy1.ingest_frame(dtm(secs), frame);
    }
    let (_, pkts) = gwy1.get_state(false);

    let gwy2 = gateway();
    gwy2.replay(pkts.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let status1 = gwy1.status();
    let status2 = gwy2.status();
    assert_eq!(
        status1["systems"]["01:145038"]["zones"],
        status2["systems"]["01:145038"]["zones"]
    );
    assert_eq!(
        status1["systems"]["01:145038"]["stored_hotwater"],
        status2["systems"]["01:145038"]["stored_hotwater"]
    );
}
