// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-device binding context: the async driver around the pure FSM.
//!
//! The dispatcher feeds every relevant frame (1FC9/10E0, echoes included)
//! into [`BindContext::observe`], which advances the FSM synchronously and
//! queues the observation for whichever wait is in flight. The handshake
//! drivers ([`initiate_binding_process`](BindContext::initiate_binding_process),
//! [`wait_for_binding_request`](BindContext::wait_for_binding_request))
//! only ever consume the queue with a timeout - timer expiry and inbound
//! frames are uniform events.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{CONFIRM_RETRY_LIMIT, SENDING_RETRY_LIMIT};
use crate::error::{BindingError, Error};
use crate::message::Message;
use crate::protocol::address::DeviceId;
use crate::protocol::code::{Code, Verb};
use crate::protocol::command::Command;

use super::fsm::{self, BindAction, BindEvent, BindRole, BindState};
use super::{classify, BindPhase, BindTimings, Vendor};

/// One observed binding frame, as delivered to a waiting driver.
#[derive(Debug, Clone)]
struct Observation {
    phase: BindPhase,
    mine: bool,
    msg: Message,
}

/// The messages that made up a completed handshake.
#[derive(Debug, Clone)]
pub struct BindingSummary {
    pub tender: Option<Message>,
    pub accept: Option<Message>,
    pub affirm: Option<Message>,
    pub ratify: Option<Message>,
}

/// A device's binding context. At most one active handshake per device.
pub struct BindContext {
    dev: DeviceId,
    state: Mutex<BindState>,
    tx: mpsc::UnboundedSender<Observation>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Observation>>,
}

impl std::fmt::Debug for BindContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {:?}", self.dev, self.role(), self.state())
    }
}

impl BindContext {
    pub fn new(dev: DeviceId) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            dev,
            state: Mutex::new(BindState::Idle),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn device_id(&self) -> DeviceId {
        self.dev
    }

    pub fn state(&self) -> BindState {
        *self.state.lock()
    }

    pub fn role(&self) -> BindRole {
        self.state().role()
    }

    /// True while a handshake is in flight.
    pub fn is_binding(&self) -> bool {
        self.state().is_binding()
    }

    /// Apply one event; handles any resulting action.
    fn apply(self: &Arc<Self>, event: BindEvent) -> Option<BindAction> {
        let (prev, next, action) = {
            let mut st = self.state.lock();
            let prev = *st;
            let (next, action) = fsm::on_event(prev, event);
            *st = next;
            (prev, next, action)
        };
        if prev != next {
            log::debug!("[BIND] {}: {prev:?} -> {next:?} on {event:?}", self.dev);
        }
        if let Some(BindAction::StartLinger(linger)) = action {
            // BoundAccepted decays to Bound after the linger, unprompted
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let ctx = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(linger).await;
                    ctx.apply(BindEvent::LingerExpired);
                });
            }
        }
        action
    }

    /// Feed an observed frame (inbound packet or command echo) into the
    /// context. Only 1FC9/10E0 frames are relevant; others are ignored.
    pub fn observe(self: &Arc<Self>, msg: &Message) {
        if !matches!(msg.code(), Code::_1FC9 | Code::_10E0) {
            return;
        }
        let Some(phase) = classify(msg.verb(), msg.code(), msg.src(), msg.dst()) else {
            return;
        };
        let mine = msg.src() == self.dev;
        // offers are broadcast: a listener takes any; directed phases must
        // name this device
        if !mine && phase != BindPhase::Tender && msg.dst() != self.dev {
            return;
        }
        self.apply(BindEvent::Observed { phase, mine });
        let _ = self.tx.send(Observation { phase, mine, msg: msg.clone() });
    }

    /// Wait for a matching observation, or None on timeout.
    async fn wait_phase(
        &self,
        phase: BindPhase,
        mine: bool,
        timeout: std::time::Duration,
    ) -> Option<Message> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Some(obs) if obs.phase == phase && obs.mine == mine => return Some(obs.msg),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Reset to Idle, draining any stale observations. Errors if a
    /// handshake is already in flight.
    fn rearm(self: &Arc<Self>, verb: &str) -> Result<(), Error> {
        {
            let mut st = self.state.lock();
            if st.is_binding() {
                return Err(BindingError::Fsm(format!(
                    "{}: bad state for {verb}: {:?}",
                    self.dev, *st
                ))
                .into());
            }
            *st = BindState::Idle;
        }
        if let Ok(mut rx) = self.rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
        Ok(())
    }

    fn fail(self: &Arc<Self>, what: &str) -> Error {
        self.apply(BindEvent::RetriesExceeded);
        let msg = format!("{}: {what}", self.dev);
        log::warn!("[BIND] {msg}");
        BindingError::FlowFailed(msg).into()
    }

    /// Run the handshake as the Supplicant: Offer, await Accept, Confirm,
    /// optionally cast the Addenda. `send` transmits one command and
    /// resolves once its echo is seen on air.
    pub async fn initiate_binding_process<F, Fut>(
        self: &Arc<Self>,
        codes: &[Code],
        scheme: Vendor,
        timings: BindTimings,
        addenda: Option<Command>,
        send: F,
    ) -> Result<BindingSummary, Error>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        self.rearm("binding as a Supplicant")?;

        let offer =
            Command::put_bind(Verb::I, self.dev, codes, scheme.offer_dst(), 0x00, scheme.oem_code());

        // Step S1: send the Offer (retrying) and expect an Accept
        let mut accept = None;
        for _attempt in 0..=SENDING_RETRY_LIMIT {
            send(offer.clone()).await?;
            self.apply(BindEvent::Sent(BindPhase::Tender));
            if let Some(msg) = self.wait_phase(BindPhase::Accept, false, timings.accept_wait).await
            {
                accept = Some(msg);
                break;
            }
        }
        let Some(accept) = accept else {
            return Err(self.fail(&format!(
                "no Accept received after {} offers",
                SENDING_RETRY_LIMIT + 1
            )));
        };
        let respondent = accept.src();

        // Step S2: send the Confirm; its echo concludes the handshake
        let confirm = Command::put_bind(Verb::I, self.dev, codes, Some(respondent), 0x00, None);
        self.apply(BindEvent::Sent(BindPhase::Affirm));
        let mut affirm = None;
        for _attempt in 0..=CONFIRM_RETRY_LIMIT {
            send(confirm.clone()).await?;
            if let Some(msg) = self.wait_phase(BindPhase::Affirm, true, timings.affirm_wait).await {
                affirm = Some(msg);
                break;
            }
        }
        if affirm.is_none() {
            return Err(self.fail(&format!(
                "Confirm echo not received after {} sends",
                CONFIRM_RETRY_LIMIT + 1
            )));
        }

        // Step S3: the optional Addenda (device info), fire-and-forget
        let mut ratify = None;
        if let Some(cmd) = addenda {
            if send(cmd).await.is_ok() {
                ratify = self.wait_phase(BindPhase::Ratify, true, timings.ratify_wait).await;
            }
        }

        Ok(BindingSummary { tender: None, accept: Some(accept), affirm, ratify })
    }

    /// Run the handshake as the Respondent: listen for an Offer, Accept
    /// it, await the Confirm and (optionally) the Addenda.
    pub async fn wait_for_binding_request<F, Fut>(
        self: &Arc<Self>,
        codes: &[Code],
        idx: u8,
        timings: BindTimings,
        send: F,
    ) -> Result<BindingSummary, Error>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        self.rearm("binding as a Respondent")?;
        self.apply(BindEvent::Listen);

        // Step R1: expect an Offer
        let Some(tender) = self.wait_phase(BindPhase::Tender, false, timings.tender_wait).await
        else {
            self.apply(BindEvent::TimerExpired);
            let msg = format!("{}: no Offer within {:?}", self.dev, timings.tender_wait);
            log::warn!("[BIND] {msg}");
            return Err(BindingError::FlowFailed(msg).into());
        };
        let supplicant = tender.src();

        // Step R2: Accept it, then expect the Confirm
        let accept = Command::put_bind(Verb::W, self.dev, codes, Some(supplicant), idx, None);
        self.apply(BindEvent::Sent(BindPhase::Accept));
        let mut affirm = None;
        for _attempt in 0..=SENDING_RETRY_LIMIT {
            send(accept.clone()).await?;
            if let Some(msg) = self.wait_phase(BindPhase::Affirm, false, timings.affirm_wait).await
            {
                affirm = Some(msg);
                break;
            }
        }
        let Some(affirm) = affirm else {
            return Err(self.fail(&format!(
                "no Confirm received after {} accepts",
                SENDING_RETRY_LIMIT + 1
            )));
        };

        // Step R3: the Addenda is optional; its absence still binds
        let ratify = self.wait_phase(BindPhase::Ratify, false, timings.ratify_wait).await;
        if ratify.is_none() {
            self.apply(BindEvent::TimerExpired); // GotConfirm -> BoundAccepted
        }

        Ok(BindingSummary { tender: Some(tender), accept: None, affirm: Some(affirm), ratify })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::Packet;
    use chrono::NaiveDate;

    fn msg(frame: &str) -> Message {
        let dtm = NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(9, 0, 0).unwrap();
        Message::from_packet(Packet::parse(dtm, frame).unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn respondent_binds_without_addenda() {
        let fan: DeviceId = "32:155617".parse().unwrap();
        let ctx = BindContext::new(fan);
        let sent: Arc<Mutex<Vec<Command>>> = Arc::new(Mutex::new(Vec::new()));

        let driver = {
            let ctx = Arc::clone(&ctx);
            let sent = Arc::clone(&sent);
            tokio::spawn(async move {
                ctx.wait_for_binding_request(
                    &[Code::_31D9, Code::_31DA],
                    0x00,
                    BindTimings::default(),
                    move |cmd| {
                        sent.lock().push(cmd);
                        async { Ok(()) }
                    },
                )
                .await
            })
        };

        tokio::task::yield_now().await;
        assert_eq!(ctx.state(), BindState::Listening);
        assert!(ctx.is_binding());

        // the supplicant's broadcast offer arrives
        ctx.observe(&msg(
            "045  I --- 37:155617 63:262142 --:------ 1FC9 012 0022F1965FE1001FC9965FE1",
        ));
        tokio::task::yield_now().await;
        assert_eq!(ctx.state(), BindState::SentAccept);
        assert_eq!(sent.lock().len(), 1);
        assert_eq!(sent.lock()[0].verb, Verb::W);

        // the supplicant confirms, directed at us
        ctx.observe(&msg("045  I --- 37:155617 32:155617 --:------ 1FC9 001 00"));
        tokio::task::yield_now().await;
        assert_eq!(ctx.state(), BindState::GotConfirm);

        // no addenda: the ratify wait expires, then the linger fires
        let summary = driver.await.unwrap().unwrap();
        assert!(summary.tender.is_some());
        assert!(summary.ratify.is_none());
        assert_eq!(ctx.state(), BindState::BoundAccepted);
        assert!(!ctx.is_binding());

        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
        assert_eq!(ctx.state(), BindState::Bound);
    }

    #[tokio::test(start_paused = true)]
    async fn supplicant_times_out_to_failed() {
        let rem: DeviceId = "37:155617".parse().unwrap();
        let ctx = BindContext::new(rem);

        let err = ctx
            .initiate_binding_process(
                &[Code::_22F1],
                Vendor::Default,
                BindTimings::default(),
                None,
                |_cmd| async { Ok(()) },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Binding(BindingError::FlowFailed(_))));
        assert_eq!(ctx.state(), BindState::Failed);
        assert!(!ctx.is_binding());
    }

    #[tokio::test(start_paused = true)]
    async fn supplicant_happy_path_via_echoes() {
        let rem: DeviceId = "37:155617".parse().unwrap();
        let ctx = BindContext::new(rem);

        let driver = {
            let ctx = Arc::clone(&ctx);
            let echo_ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.initiate_binding_process(
                    &[Code::_22F1],
                    Vendor::Default,
                    BindTimings::default(),
                    None,
                    move |cmd| {
                        // fake transport: echo the frame straight back
                        let echo_ctx = Arc::clone(&echo_ctx);
                        async move {
                            let gwy: DeviceId = "18:002563".parse().unwrap();
                            let dtm = NaiveDate::from_ymd_opt(2025, 11, 2)
                                .unwrap()
                                .and_hms_opt(9, 0, 0)
                                .unwrap();
                            let pkt = cmd.to_packet(dtm, gwy)?;
                            echo_ctx.observe(&Message::from_packet(pkt)?);
                            Ok(())
                        }
                    },
                )
                .await
            })
        };

        tokio::task::yield_now().await;
        assert_eq!(ctx.state(), BindState::SentOffer);

        // the fan accepts
        ctx.observe(&msg(
            "045  W --- 32:155617 37:155617 --:------ 1FC9 012 0031D9825FE10031DA825FE1",
        ));
        tokio::task::yield_now().await;

        let summary = driver.await.unwrap().unwrap();
        assert_eq!(ctx.state(), BindState::Bound);
        assert_eq!(summary.accept.unwrap().src().to_string(), "32:155617");
        assert!(summary.affirm.is_some()); // the confirm echo
    }

    #[tokio::test]
    async fn concurrent_binding_is_an_fsm_error() {
        let rem: DeviceId = "37:155617".parse().unwrap();
        let ctx = BindContext::new(rem);
        *ctx.state.lock() = BindState::SentOffer;

        let err = ctx
            .initiate_binding_process(
                &[Code::_22F1],
                Vendor::Default,
                BindTimings::default(),
                None,
                |_cmd| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Binding(BindingError::Fsm(_))));
    }
}
