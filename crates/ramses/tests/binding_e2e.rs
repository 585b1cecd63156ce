// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The 1FC9 handshake end-to-end over the loopback transport: a faked
//! remote (Supplicant) binds to a faked fan (Respondent) through one
//! gateway, every phase travelling as a real frame.

use std::time::Duration;

use ramses::binding::BindState;
use ramses::{BindTimings, Code, Config, DeviceTraits, Error, Gateway, LoopbackTransport};

const REMOTE: &str = "37:155617";
const FAN: &str = "32:155617";

fn config_with_fakes() -> Config {
    let mut config = Config::default();
    config.config.disable_discovery = true;
    for id in [REMOTE, FAN] {
        config
            .known_list
            .insert(id.parse().unwrap(), DeviceTraits { faked: true, ..Default::default() });
    }
    config
}

async fn started_gateway() -> Gateway {
    let (transport, rx) = LoopbackTransport::new();
    let gwy = Gateway::new(config_with_fakes(), transport, rx).unwrap();
    gwy.start(None).await.unwrap();
    gwy
}

#[tokio::test(start_paused = true)]
async fn supplicant_and_respondent_bind_round_trip() {
    let gwy = started_gateway().await;
    let remote = REMOTE.parse().unwrap();
    let fan = FAN.parse().unwrap();

    // the fan listens first (give it a generous window)
    let respondent = {
        let gwy = gwy.clone();
        tokio::spawn(async move {
            gwy.wait_for_binding_request(
                fan,
                &[Code::_31D9, Code::_31DA],
                0x00,
                Some(BindTimings {
                    tender_wait: Duration::from_secs(300),
                    ..BindTimings::default()
                }),
            )
            .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(gwy.binding_state(fan), Some(BindState::Listening));

    // the remote offers its codes
    let supplicant = gwy
        .initiate_binding_process(remote, &[Code::_22F1, Code::_22F3], None, None)
        .await
        .unwrap();

    // the supplicant concluded on its confirm echo
    assert_eq!(gwy.binding_state(remote), Some(BindState::Bound));
    let accept = supplicant.accept.expect("the fan's accept");
    assert_eq!(accept.src(), fan);
    assert_eq!(accept.dst(), remote);

    // the respondent saw the offer and the confirm
    let summary = respondent.await.unwrap().unwrap();
    let tender = summary.tender.expect("the remote's offer");
    assert_eq!(tender.src(), remote);
    let affirm = summary.affirm.expect("the remote's confirm");
    assert_eq!(affirm.src(), remote);
    assert_eq!(affirm.dst(), fan);

    // BoundAccepted decays to Bound three seconds later
    assert_eq!(gwy.binding_state(fan), Some(BindState::BoundAccepted));
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(gwy.binding_state(fan), Some(BindState::Bound));

    gwy.stop().await;
}

#[tokio::test(start_paused = true)]
async fn supplicant_times_out_when_nobody_answers() {
    let gwy = started_gateway().await;
    let remote = REMOTE.parse().unwrap();

    let started = tokio::time::Instant::now();
    let err = gwy
        .initiate_binding_process(remote, &[Code::_22F1], None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Binding(ramses::BindingError::FlowFailed(_))));
    assert_eq!(gwy.binding_state(remote), Some(BindState::Failed));

    // 3 s accept-wait x (1 + 3 retries) = up to 12 s of waiting
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(9), "waited only {waited:?}");

    gwy.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rebinding_is_allowed_only_from_a_terminal_state() {
    let gwy = started_gateway().await;
    let remote = REMOTE.parse().unwrap();

    // first attempt fails (nobody answers)
    let _ = gwy.initiate_binding_process(remote, &[Code::_22F1], None, None).await;
    assert_eq!(gwy.binding_state(remote), Some(BindState::Failed));

    // Failed is terminal: a new handshake may start
    let err = gwy.initiate_binding_process(remote, &[Code::_22F1], None, None).await;
    assert!(err.is_err()); // still nobody answering, but it ran
    assert_eq!(gwy.binding_state(remote), Some(BindState::Failed));

    gwy.stop().await;
}

#[tokio::test(start_paused = true)]
async fn binding_requires_a_faked_device() {
    let (transport, rx) = LoopbackTransport::new();
    let mut config = Config::default();
    config.config.disable_discovery = true;
    let gwy = Gateway::new(config, transport, rx).unwrap();
    gwy.start(None).await.unwrap();

    let err = gwy
        .initiate_binding_process(REMOTE.parse().unwrap(), &[Code::_22F1], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceNotFaked(_)));

    gwy.stop().await;
}

#[tokio::test(start_paused = true)]
async fn orcon_scheme_offers_announce_style() {
    let gwy = started_gateway().await;
    let remote: ramses::DeviceId = REMOTE.parse().unwrap();
    let fan = FAN.parse().unwrap();

    let respondent = {
        let gwy = gwy.clone();
        tokio::spawn(async move {
            gwy.wait_for_binding_request(
                fan,
                &[Code::_31DA],
                0x00,
                Some(BindTimings {
                    tender_wait: Duration::from_secs(300),
                    ..BindTimings::default()
                }),
            )
            .await
        })
    };
    tokio::task::yield_now().await;

    let summary = gwy
        .initiate_binding_process(
            remote,
            &[Code::_22F1],
            Some(ramses::Vendor::Orcon),
            None,
        )
        .await
        .unwrap();
    assert_eq!(gwy.binding_state(remote), Some(BindState::Bound));

    // the respondent's view of the offer: announce-style, with the OEM
    // entry embedded in the payload
    let tender = respondent.await.unwrap().unwrap().tender.unwrap();
    assert_eq!(tender.src(), remote);
    assert_eq!(tender.dst(), remote); // orcon: dst repeats src
    let ramses::Payload::Bind(entries) = tender.payload() else {
        panic!("wrong payload: {:?}", tender.payload());
    };
    assert!(entries.iter().any(|e| e.idx == 0x67 && e.code == Code::_10E0));
    drop(summary);

    gwy.stop().await;
}
