// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The gateway facade: owns the component graph and exposes send/receive
//! plus the global schema/status views.
//!
//! One receive task turns transport lines into packets, resolves pending
//! header-correlated replies, and drives the dispatcher; one poller task
//! ticks the discovery scheduler. Everything else is a method call that
//! either reads the state under its lock or enqueues a command.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::binding::{BindContext, BindTimings, BindingSummary, Vendor};
use crate::config::{Config, GatewayConfig, RuntimeConfig};
use crate::engine::{self, State};
use crate::entity::{self, zone::ZoneClass, ChildId, ParentRef};
use crate::error::Error;
use crate::message::Message;
use crate::protocol::address::{is_valid_dev_id, DeviceId, Domain, Role};
use crate::protocol::code::{Code, Verb};
use crate::protocol::command::{Command, Priority};
use crate::protocol::packet::Packet;
use crate::protocol::payload::Payload;
use crate::schedule::{self, Schedule};
use crate::transport::RamsesTransport;

/// The default local gateway id, used until/unless the config names one.
const DEFAULT_HGI_ID: &str = "18:000730";

struct Inner {
    cfg: RuntimeConfig,
    state: Mutex<State>,
    /// header-string -> oneshot for the next matching packet
    pending: DashMap<String, oneshot::Sender<Message>>,
    contexts: DashMap<DeviceId, Arc<BindContext>>,
    /// Fetched schedules, keyed by (ctl, zone_idx), with the 0006 change
    /// counter they were fetched at
    schedules: DashMap<(DeviceId, u8), (Option<u16>, Schedule)>,
    transport: Arc<dyn RamsesTransport>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    schema_config: Config,
}

/// The RAMSES gateway: the library's entry point.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// Build a gateway over a transport. `rx` is the inbound frame stream
    /// belonging to that transport.
    pub fn new(
        config: Config,
        transport: Arc<dyn RamsesTransport>,
        rx: mpsc::UnboundedReceiver<String>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut state = State::new();
        state.known_list = config.known_list.clone();
        state.block_list = config.block_list.keys().copied().collect();
        state.gwy_id = Some(local_gateway_id(&config));

        Ok(Self {
            inner: Arc::new(Inner {
                cfg: RuntimeConfig::new(config.config.clone()),
                state: Mutex::new(state),
                pending: DashMap::new(),
                contexts: DashMap::new(),
                schedules: DashMap::new(),
                transport,
                rx: Mutex::new(Some(rx)),
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                schema_config: config,
            }),
        })
    }

    /// The engine flags (atomically swappable).
    pub fn config(&self) -> Arc<GatewayConfig> {
        self.inner.cfg.get()
    }

    pub fn update_config(&self, f: impl FnOnce(&mut GatewayConfig)) {
        self.inner.cfg.update(f);
    }

    /// The local gateway's device id.
    pub fn hgi_id(&self) -> DeviceId {
        self.inner.state.lock().gwy_id()
    }

    /// Start the gateway: load the configured schema, optionally replay a
    /// packet snapshot, then spawn the receive and discovery tasks.
    pub async fn start(
        &self,
        restore_packets: Option<&BTreeMap<String, String>>,
    ) -> Result<(), Error> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Config("gateway already started".into()));
        }

        self.load_schema()?;
        if let Some(packets) = restore_packets {
            self.replay(packets.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        // the receive task
        let rx = self.inner.rx.lock().take();
        if let Some(mut rx) = rx {
            let gwy = self.clone();
            let handle = tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    gwy.ingest_frame(chrono::Utc::now().naive_utc(), &frame);
                }
            });
            self.inner.tasks.lock().push(handle);
        }

        // the discovery poller
        let cfg = self.config();
        if !cfg.disable_discovery && !cfg.disable_sending {
            let gwy = self.clone();
            let handle = tokio::spawn(async move { gwy.poll_discovery().await });
            self.inner.tasks.lock().push(handle);
        }

        Ok(())
    }

    /// Stop the gateway: cancel all tasks, fail pending replies, close the
    /// transport.
    pub async fn stop(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.pending.clear(); // waiters resolve with SendFailed
        self.inner.transport.close();
    }

    // --- schema loading -----------------------------------------------------

    /// Instantiate everything the configuration declares.
    fn load_schema(&self) -> Result<(), Error> {
        let cfg = self.config();
        let schema = self.inner.schema_config.clone();
        let mut state = self.inner.state.lock();

        // faked devices from the known_list exist from the start
        for (&id, traits) in &schema.known_list {
            if traits.faked {
                state.get_or_create_device(id, None, &cfg)?;
            }
        }

        for (&ctl_id, sys_schema) in &schema.schemas {
            let ctl = state.get_or_create_device(ctl_id, None, &cfg)?;
            let sys = state.get_or_create_system(ctl, &cfg)?;

            if let Some(app) = sys_schema.system.appliance_control {
                let dev = state.get_or_create_device(app, None, &cfg)?;
                entity::set_device_parent(
                    &mut state.arena,
                    dev,
                    ParentRef::System(sys),
                    ChildId::DomainFC,
                    false,
                )?;
            }

            if let Some(dhw_schema) = &sys_schema.stored_hotwater {
                let d = state.get_or_create_dhw(sys);
                let slots = [
                    (dhw_schema.sensor, ChildId::DomainFA, true),
                    (dhw_schema.dhw_valve, ChildId::DomainFA, false),
                    (dhw_schema.htg_valve, ChildId::DomainF9, false),
                ];
                for (id, child_id, is_sensor) in slots {
                    let Some(id) = id else { continue };
                    let dev = state.get_or_create_device(id, None, &cfg)?;
                    entity::set_device_parent(
                        &mut state.arena,
                        dev,
                        ParentRef::Dhw(d),
                        child_id,
                        is_sensor,
                    )?;
                }
            }

            for &ufc_id in sys_schema.underfloor_heating.keys() {
                let dev = state.get_or_create_device(ufc_id, None, &cfg)?;
                entity::set_device_parent(
                    &mut state.arena,
                    dev,
                    ParentRef::System(sys),
                    ChildId::System,
                    false,
                )?;
            }

            for (idx_str, zone_schema) in &sys_schema.zones {
                let zone_idx = u8::from_str_radix(idx_str, 16)
                    .map_err(|_| Error::Config(format!("bad zone idx: {idx_str:?}")))?;
                let z = state.get_or_create_zone(sys, zone_idx)?;
                if let Some(klass) = zone_schema.klass.as_deref().and_then(ZoneClass::from_slug)
                {
                    state.arena.zone_mut(z).set_class(klass)?;
                }
                if let Some(sensor) = zone_schema.sensor {
                    let dev = state.get_or_create_device(sensor, None, &cfg)?;
                    entity::set_device_parent(
                        &mut state.arena,
                        dev,
                        ParentRef::Zone(z),
                        ChildId::Zone(zone_idx),
                        true,
                    )?;
                }
                for &act in &zone_schema.actuators {
                    let dev = state.get_or_create_device(act, None, &cfg)?;
                    entity::set_device_parent(
                        &mut state.arena,
                        dev,
                        ParentRef::Zone(z),
                        ChildId::Zone(zone_idx),
                        false,
                    )?;
                }
            }
        }

        for &id in schema.orphans_heat.iter().chain(&schema.orphans_hvac) {
            state.get_or_create_device(id, None, &cfg)?;
        }

        if let Some(main) = schema.main_tcs {
            if let Some(ctl) = state.device_idx(main) {
                state.main_tcs = state.arena.device(ctl).tcs;
            }
        }

        Ok(())
    }

    // --- the receive path ---------------------------------------------------

    /// Parse and process one inbound line. Lines starting `!` are gateway
    /// meta-flags, not packets.
    pub fn ingest_frame(&self, dtm: NaiveDateTime, frame: &str) {
        if frame.is_empty() || frame.starts_with('!') {
            return;
        }
        let pkt = match Packet::parse(dtm, frame) {
            Ok(pkt) => pkt,
            Err(e) => {
                log::warn!("[GW] dropped frame: {e} ({frame:?})");
                return;
            }
        };
        let msg = match Message::from_packet(pkt) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("[GW] dropped payload: {e} ({frame:?})");
                return;
            }
        };

        // resolve a header-correlated waiter, if any
        if let Some((_, tx)) = self.inner.pending.remove(&msg.header().to_string()) {
            let _ = tx.send(msg.clone());
        }

        self.ingest_message(msg);
    }

    /// Dispatch one parsed message (shared by live receive and replay).
    fn ingest_message(&self, msg: Message) {
        let cfg = self.config();
        let msg = {
            let mut state = self.inner.state.lock();

            // the two-packet array-continuation heuristic
            let merged = state
                .prev_msg
                .as_ref()
                .filter(|prev| engine::detect_array_fragment(&msg, prev))
                .and_then(|prev| prev.merge_continuation(&msg));
            let msg = merged.unwrap_or(msg);
            state.prev_msg = Some(msg.clone());

            if let Err(e) = engine::process_msg(&mut state, &cfg, &msg) {
                if e.is_local() {
                    log::warn!("[GW] {} < {e}", msg.packet());
                } else {
                    log::error!("[GW] {} < {e}", msg.packet());
                }
            }

            // OpenTherm discovery deprecation: unsupported msg-ids strike
            if msg.verb() == Verb::Rp && msg.code() == Code::_3220 {
                if let Payload::OpenTherm(ot) = msg.payload() {
                    let owner = crate::discovery::EntityKey::Device(msg.src());
                    let ctx = format!("{:02X}", ot.msg_id);
                    state.discovery.deprecate(
                        &owner,
                        Code::_3220,
                        Some(&ctx),
                        !ot.msg_type.is_unsupported(),
                    );
                }
            }
            msg
        };

        // binding fan-out, outside the state lock
        if matches!(msg.code(), Code::_1FC9 | Code::_10E0) {
            for entry in &self.inner.contexts {
                if entry.value().is_binding() || entry.key() == &msg.src() {
                    entry.value().observe(&msg);
                }
            }
        }
    }

    // --- the send path ------------------------------------------------------

    /// Send a command; when `wait_for_reply` resolves true, correlate and
    /// return the reply packet, otherwise the echo.
    pub async fn async_send_cmd(
        &self,
        cmd: Command,
        max_retries: Option<u8>,
        timeout: Option<Duration>,
        wait_for_reply: Option<bool>,
    ) -> Result<Option<Message>, Error> {
        let cfg = self.config();
        if cfg.disable_sending {
            return Err(Error::SendFailed(format!("sending is disabled: {}", cmd.code)));
        }

        let gwy_id = self.hgi_id();
        if let Some(dst) = cmd.dst {
            let state = self.inner.state.lock();
            if let Some(idx) = state.device_idx(dst) {
                if state.arena.device(idx).is_send_deprecated() {
                    log::warn!("[GW] sending was deprecated for {dst}, ignoring request");
                    return Ok(None);
                }
            }
        }

        let retries = max_retries.unwrap_or(cmd.qos.retry_limit);
        let timeout = timeout.unwrap_or(cmd.qos.rx_timeout);
        let want_reply = wait_for_reply.unwrap_or_else(|| cmd.wants_reply());

        let tx_hdr = cmd
            .tx_header(gwy_id)
            .ok_or_else(|| Error::SendFailed(format!("unframeable command: {}", cmd.code)))?
            .to_string();
        let rx_hdr = cmd.rx_header(gwy_id).map(|h| h.to_string());
        let frame = cmd.to_frame(gwy_id);

        for _attempt in 0..=retries {
            let (echo_tx, echo_rx) = oneshot::channel();
            self.inner.pending.insert(tx_hdr.clone(), echo_tx);
            let reply_rx = if want_reply {
                rx_hdr.as_ref().map(|hdr| {
                    let (tx, rx) = oneshot::channel();
                    self.inner.pending.insert(hdr.clone(), tx);
                    rx
                })
            } else {
                None
            };

            self.inner.transport.send_frame(&frame)?;

            let echo = tokio::time::timeout(timeout, echo_rx).await;
            let Ok(Ok(echo)) = echo else {
                self.inner.pending.remove(&tx_hdr);
                if let Some(hdr) = &rx_hdr {
                    self.inner.pending.remove(hdr);
                }
                continue; // no echo: retry
            };

            let Some(reply_rx) = reply_rx else {
                return Ok(Some(echo));
            };
            match tokio::time::timeout(timeout, reply_rx).await {
                Ok(Ok(reply)) => return Ok(Some(reply)),
                _ => {
                    if let Some(hdr) = &rx_hdr {
                        self.inner.pending.remove(hdr);
                    }
                    continue; // echoed but unanswered: retry
                }
            }
        }

        if let Some(dst) = cmd.dst {
            let mut state = self.inner.state.lock();
            if let Some(idx) = state.device_idx(dst) {
                state.arena.device_mut(idx).note_send_outcome(false);
            }
        }
        Err(Error::SendFailed(format!(
            "{tx_hdr}: no {} after {} attempts",
            if want_reply { "reply" } else { "echo" },
            retries + 1,
        )))
    }

    /// Fire-and-track variant: spawns the send and returns its task.
    /// Failures are logged, not surfaced. `num_repeats` re-transmits the
    /// frame that many extra times, `gap_duration` apart (for lossy-RF
    /// bursts); `priority` overrides the command's own.
    pub fn send_cmd(
        &self,
        cmd: Command,
        gap_duration: Duration,
        num_repeats: u8,
        priority: Option<Priority>,
    ) -> JoinHandle<Option<Message>> {
        let gwy = self.clone();
        let cmd = match priority {
            Some(p) => cmd.with_priority(p),
            None => cmd,
        };
        tokio::spawn(async move {
            let frame = cmd.to_frame(gwy.hgi_id());
            let result = gwy.async_send_cmd(cmd, None, None, None).await;
            match result {
                Ok(reply) => {
                    for _ in 0..num_repeats {
                        tokio::time::sleep(gap_duration).await;
                        if let Err(e) = gwy.inner.transport.send_frame(&frame) {
                            log::warn!("[GW] repeat send failed: {e}");
                            break;
                        }
                    }
                    reply
                }
                Err(e) => {
                    log::error!("[GW] failed to send: {e}");
                    None
                }
            }
        })
    }

    // --- discovery ----------------------------------------------------------

    async fn poll_discovery(&self) {
        let mut last_housekeeping = chrono::Utc::now().naive_utc();
        loop {
            let now = chrono::Utc::now().naive_utc();
            let (due, sleep_for) = {
                let mut state = self.inner.state.lock();
                let State { discovery, arena, device_by_id, .. } = &mut *state;
                let due = discovery.collect_due(now, |owner, hdr| {
                    latest_for(arena, device_by_id, owner, hdr)
                });
                (due, discovery.next_wakeup(now))
            };

            for item in due {
                let reply = tokio::time::timeout(
                    item.timeout.max(Duration::from_secs(1)),
                    self.async_send_cmd(item.cmd, None, None, Some(true)),
                )
                .await;
                let dtm = match reply {
                    Ok(Ok(Some(msg))) => Some(msg.dtm()),
                    Ok(Ok(None)) => None,
                    Ok(Err(e)) => {
                        log::warn!("[DISC] failed to send discovery cmd: {e}");
                        None
                    }
                    Err(_) => None,
                };
                let now = chrono::Utc::now().naive_utc();
                self.inner.state.lock().discovery.note_result(&item.key, dtm, now);
            }

            // hourly housekeeping over every index
            let now = chrono::Utc::now().naive_utc();
            if (now - last_housekeeping).num_seconds() >= 3600 {
                last_housekeeping = now;
                self.evict_expired(now);
            }

            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Evict expired messages from every entity index.
    pub fn evict_expired(&self, now: NaiveDateTime) -> usize {
        let mut state = self.inner.state.lock();
        let arena = &mut state.arena;
        let mut evicted = 0;
        for dev in &mut arena.devices {
            evicted += dev.index.evict_expired(now);
        }
        for sys in &mut arena.systems {
            evicted += sys.index.evict_expired(now);
        }
        for zone in &mut arena.zones {
            evicted += zone.index.evict_expired(now);
        }
        for dhw in &mut arena.dhws {
            evicted += dhw.index.evict_expired(now);
        }
        for cct in &mut arena.circuits {
            evicted += cct.index.evict_expired(now);
        }
        evicted
    }

    // --- faking -------------------------------------------------------------

    /// Mark a device as faked, optionally creating it first.
    pub fn fake_device(&self, device_id: DeviceId, create: bool) -> Result<(), Error> {
        if !is_valid_dev_id(&device_id.to_string()) {
            return Err(Error::Config(format!("not a valid device id: {device_id}")));
        }
        let cfg = self.config();
        let mut state = self.inner.state.lock();
        if !create && !state.device_by_id.contains_key(&device_id) {
            return Err(Error::Lookup(format!("device id does not exist: {device_id}")));
        }
        if create && cfg.enforce_known_list && !state.known_list.contains_key(&device_id) {
            return Err(Error::Lookup(format!(
                "device id is not in the known_list: {device_id}"
            )));
        }
        let idx = state.get_or_create_device(device_id, None, &cfg)?;
        state.arena.device_mut(idx).make_fake();
        Ok(())
    }

    fn ensure_faked(&self, device_id: DeviceId) -> Result<(), Error> {
        let state = self.inner.state.lock();
        let faked = state
            .device_idx(device_id)
            .map(|idx| state.arena.device(idx).is_faked())
            .unwrap_or(false);
        if faked {
            Ok(())
        } else {
            Err(Error::DeviceNotFaked(format!(
                "{device_id} (faking is configured in the known_list)"
            )))
        }
    }

    /// Faked zone sensor: announce a temperature on its behalf.
    pub async fn put_sensor_temp(
        &self,
        device_id: DeviceId,
        temp: Option<f64>,
    ) -> Result<(), Error> {
        self.ensure_faked(device_id)?;
        self.async_send_cmd(Command::put_sensor_temp(device_id, temp), None, None, Some(false))
            .await
            .map(|_| ())
    }

    /// Faked CO2 sensor: announce a CO2 level.
    pub async fn put_co2_level(&self, device_id: DeviceId, ppm: u16) -> Result<(), Error> {
        self.ensure_faked(device_id)?;
        self.async_send_cmd(Command::put_co2_level(device_id, ppm), None, None, Some(false))
            .await
            .map(|_| ())
    }

    /// Faked humidity sensor: announce an indoor humidity (0.0..=1.0).
    pub async fn put_indoor_humidity(
        &self,
        device_id: DeviceId,
        humidity: f64,
    ) -> Result<(), Error> {
        self.ensure_faked(device_id)?;
        self.async_send_cmd(
            Command::put_indoor_humidity(device_id, humidity),
            None,
            None,
            Some(false),
        )
        .await
        .map(|_| ())
    }

    /// Faked remote: push a fan rate at its fan.
    pub async fn put_fan_rate(
        &self,
        device_id: DeviceId,
        fan_id: DeviceId,
        step: u8,
        scale: u8,
    ) -> Result<(), Error> {
        self.ensure_faked(device_id)?;
        self.async_send_cmd(
            Command::put_fan_rate(device_id, fan_id, step, scale),
            None,
            None,
            Some(false),
        )
        .await
        .map(|_| ())
    }

    // --- binding ------------------------------------------------------------

    fn binding_context(&self, device_id: DeviceId) -> Result<Arc<BindContext>, Error> {
        self.ensure_faked(device_id)?;
        Ok(self
            .inner
            .contexts
            .entry(device_id)
            .or_insert_with(|| BindContext::new(device_id))
            .clone())
    }

    /// The device's configured vendor scheme, if any.
    fn scheme_of(&self, device_id: DeviceId) -> Vendor {
        let state = self.inner.state.lock();
        state
            .device_idx(device_id)
            .and_then(|idx| state.arena.device(idx).faking.scheme.as_deref().and_then(Vendor::from_name))
            .unwrap_or_default()
    }

    /// Start a binding as the Supplicant and drive it to completion.
    pub async fn initiate_binding_process(
        &self,
        device_id: DeviceId,
        codes: &[Code],
        scheme: Option<Vendor>,
        timings: Option<BindTimings>,
    ) -> Result<BindingSummary, Error> {
        let ctx = self.binding_context(device_id)?;
        let scheme = scheme.unwrap_or_else(|| self.scheme_of(device_id));

        // the addenda is the device's own stored 10E0, when it has one
        let addenda = {
            let state = self.inner.state.lock();
            state.device_idx(device_id).and_then(|idx| {
                let dev = state.arena.device(idx);
                dev.index.latest(Code::_10E0).map(|m| Command {
                    verb: Verb::I,
                    code: Code::_10E0,
                    src: Some(device_id),
                    dst: None,
                    payload: m.packet().payload().to_vec(),
                    priority: Priority::High,
                    qos: Default::default(),
                })
            })
        };

        ctx.initiate_binding_process(
            codes,
            scheme,
            timings.unwrap_or_default(),
            addenda,
            |cmd| async move { self.async_send_cmd(cmd, None, None, Some(false)).await.map(|_| ()) },
        )
        .await
    }

    /// Listen for a binding as the Respondent and drive it to completion.
    pub async fn wait_for_binding_request(
        &self,
        device_id: DeviceId,
        codes: &[Code],
        idx: u8,
        timings: Option<BindTimings>,
    ) -> Result<BindingSummary, Error> {
        let ctx = self.binding_context(device_id)?;
        ctx.wait_for_binding_request(codes, idx, timings.unwrap_or_default(), |cmd| async move {
            self.async_send_cmd(cmd, None, None, Some(false)).await.map(|_| ())
        })
        .await
    }

    /// A device's binding state, if it has a context.
    pub fn binding_state(&self, device_id: DeviceId) -> Option<crate::binding::BindState> {
        self.inner.contexts.get(&device_id).map(|c| c.state())
    }

    // --- schedules & fault log ----------------------------------------------

    fn sched_lock_of(
        &self,
        ctl_id: DeviceId,
    ) -> Result<Arc<crate::entity::system::ScheduleLock>, Error> {
        let state = self.inner.state.lock();
        let idx = state
            .device_idx(ctl_id)
            .ok_or_else(|| Error::Lookup(format!("no such controller: {ctl_id}")))?;
        let sys = state
            .arena
            .device(idx)
            .tcs
            .ok_or_else(|| Error::Lookup(format!("{ctl_id} is not a controller")))?;
        Ok(Arc::clone(&state.arena.system(sys).sched_lock))
    }

    /// The 0006 change counter the controller currently reports, polling
    /// for it if nothing is indexed yet.
    async fn schedule_version(&self, ctl_id: DeviceId) -> Option<u16> {
        let known = {
            let state = self.inner.state.lock();
            state
                .device_idx(ctl_id)
                .and_then(|idx| state.arena.device(idx).tcs)
                .and_then(|sys| state.arena.system(sys).schedule_version())
        };
        if known.is_some() {
            return known;
        }
        let reply = self
            .async_send_cmd(Command::get_schedule_version(ctl_id), None, None, Some(true))
            .await
            .ok()
            .flatten()?;
        match reply.payload() {
            Payload::ScheduleSync(sync) => sync.change_counter,
            _ => None,
        }
    }

    /// Fetch a zone's weekly schedule (0404 fragment assembly under the
    /// per-TCS lock). A schedule already fetched at the controller's
    /// current 0006 change counter is served from cache without I/O.
    pub async fn get_schedule(
        &self,
        ctl_id: DeviceId,
        zone_idx: u8,
    ) -> Result<Schedule, Error> {
        let version = self.schedule_version(ctl_id).await;
        if version.is_some() {
            if let Some(cached) = self.inner.schedules.get(&(ctl_id, zone_idx)) {
                if cached.0 == version {
                    return Ok(cached.1.clone());
                }
            }
        }

        let lock = self.sched_lock_of(ctl_id)?;
        let _guard = lock.obtain(zone_idx).await?;
        let sched = schedule::fetch_schedule(ctl_id, zone_idx, |cmd| async move {
            self.async_send_cmd(cmd, None, None, Some(true)).await
        })
        .await?;
        self.inner.schedules.insert((ctl_id, zone_idx), (version, sched.clone()));
        Ok(sched)
    }

    /// Write a zone's weekly schedule back.
    pub async fn set_schedule(&self, ctl_id: DeviceId, sched: &Schedule) -> Result<(), Error> {
        let lock = self.sched_lock_of(ctl_id)?;
        let _guard = lock.obtain(sched.zone_idx).await?;
        schedule::store_schedule(ctl_id, sched, |cmd| async move {
            self.async_send_cmd(cmd, None, None, Some(false)).await
        })
        .await?;
        // the write bumps the controller's change counter; drop the cache
        self.inner.schedules.remove(&(ctl_id, sched.zone_idx));
        Ok(())
    }

    /// Faked outdoor sensor: announce a weather temperature.
    pub async fn put_weather_temp(&self, device_id: DeviceId, temp: f64) -> Result<(), Error> {
        self.ensure_faked(device_id)?;
        self.async_send_cmd(Command::put_weather_temp(device_id, temp), None, None, Some(false))
            .await
            .map(|_| ())
    }

    /// Page the controller's fault log (RQ 0418 by log idx) until an empty
    /// slot, newest first.
    pub async fn get_faultlog(&self, ctl_id: DeviceId, limit: u8) -> Result<Vec<Value>, Error> {
        let mut entries = Vec::new();
        for log_idx in 0..limit {
            let reply = self
                .async_send_cmd(
                    Command::get_fault_log_entry(ctl_id, log_idx),
                    None,
                    None,
                    Some(true),
                )
                .await?;
            match reply.as_ref().map(Message::payload) {
                Some(Payload::FaultLogEntry(Some(entry))) => {
                    entries.push(serde_json::to_value(entry).unwrap_or(Value::Null));
                }
                _ => break, // an empty slot ends the log
            }
        }
        Ok(entries)
    }

    // --- views & snapshot ---------------------------------------------------

    /// The global schema view.
    pub fn schema(&self) -> Value {
        let state = self.inner.state.lock();
        let now = chrono::Utc::now().naive_utc();

        let mut schema = serde_json::Map::new();
        let main_tcs = state
            .primary_tcs()
            .map(|sys| state.arena.device(state.arena.system(sys).ctl).id.to_string());
        schema.insert("main_tcs".into(), json!(main_tcs));

        for sys in state.arena.systems() {
            let ctl_id = state.arena.device(sys.ctl).id;
            schema.insert(ctl_id.to_string(), sys.schema_view(&state.arena));
        }

        let mut orphans_heat: Vec<String> = Vec::new();
        let mut orphans_hvac: Vec<String> = Vec::new();
        for dev in state.arena.devices() {
            if !dev.is_present(now) {
                continue;
            }
            match dev.role.domain() {
                Domain::Heat if dev.tcs.is_none() && dev.role != Role::Hgi => {
                    orphans_heat.push(dev.id.to_string());
                }
                Domain::Hvac => orphans_hvac.push(dev.id.to_string()),
                _ => {}
            }
        }
        orphans_heat.sort();
        orphans_hvac.sort();
        schema.insert("orphans_heat".into(), json!(orphans_heat));
        schema.insert("orphans_hvac".into(), json!(orphans_hvac));

        Value::Object(schema)
    }

    /// The global status view (device states keyed by id).
    pub fn status(&self) -> Value {
        let state = self.inner.state.lock();
        let devices: serde_json::Map<String, Value> = state
            .arena
            .devices()
            .map(|d| (d.id.to_string(), d.status_view()))
            .collect();
        let systems: serde_json::Map<String, Value> = state
            .arena
            .systems()
            .map(|s| {
                (state.arena.device(s.ctl).id.to_string(), s.status_view(&state.arena))
            })
            .collect();
        json!({ "devices": Value::Object(devices), "systems": Value::Object(systems) })
    }

    /// The traits of every known device (the working known_list).
    pub fn known_list(&self) -> Value {
        let state = self.inner.state.lock();
        let devices: serde_json::Map<String, Value> =
            state.arena.devices().map(|d| (d.id.to_string(), d.traits_view())).collect();
        Value::Object(devices)
    }

    /// Freeze the gateway and export `(schema, packets)`. Restoring the
    /// packets (in any order) reproduces the same schema.
    pub fn get_state(&self, include_expired: bool) -> (Value, BTreeMap<String, String>) {
        let now = chrono::Utc::now().naive_utc();
        let packets = {
            let state = self.inner.state.lock();
            let mut packets = BTreeMap::new();
            let mut keep = |msg: &Message| {
                if wanted_msg(msg, include_expired, now) {
                    let (head, payload) = snapshot_parts(msg.packet());
                    packets.insert(head, payload);
                }
            };
            for dev in state.arena.devices() {
                dev.index.iter_all().for_each(&mut keep);
            }
            for sys in state.arena.systems() {
                sys.index.iter_all().for_each(&mut keep);
            }
            for zone in &state.arena.zones {
                zone.index.iter_all().for_each(&mut keep);
            }
            for dhw in &state.arena.dhws {
                dhw.index.iter_all().for_each(&mut keep);
            }
            packets
        };
        (self.schema(), packets)
    }

    /// Replay a packet snapshot through the dispatcher (used by `start`).
    pub fn replay<'a>(&self, packets: impl Iterator<Item = (&'a str, &'a str)>) {
        for (head, payload) in packets {
            let Some((dtm_str, frame_head)) = head.split_once(' ') else {
                log::warn!("[GW] bad snapshot key: {head:?}");
                continue;
            };
            let Ok(dtm) = NaiveDateTime::parse_from_str(dtm_str, "%Y-%m-%dT%H:%M:%S%.f") else {
                log::warn!("[GW] bad snapshot dtm: {dtm_str:?}");
                continue;
            };
            self.ingest_frame(dtm, &format!("{frame_head} {payload}"));
        }
    }
}

/// The snapshot retention policy.
fn wanted_msg(msg: &Message, include_expired: bool, now: NaiveDateTime) -> bool {
    if msg.code() == Code::_313F {
        // usually expired, but useful for back-to-back restarts
        return matches!(msg.verb(), Verb::I | Verb::Rp);
    }
    if msg.is_expired(now) && !include_expired {
        return false;
    }
    if msg.code() == Code::_0404 {
        return matches!(msg.verb(), Verb::I | Verb::W) && msg.packet().payload().len() > 7;
    }
    !matches!(msg.verb(), Verb::W | Verb::Rq)
}

/// Split a packet into its snapshot key (dtm + frame head) and payload.
fn snapshot_parts(pkt: &Packet) -> (String, String) {
    let frame = pkt.format_frame();
    let (head, payload) = frame.rsplit_once(' ').expect("frame always has a payload");
    (
        format!("{} {}", pkt.dtm().format("%Y-%m-%dT%H:%M:%S%.6f"), head),
        payload.to_string(),
    )
}

/// The configured local gateway id: an HGI-classed known_list entry, or
/// the well-known default.
fn local_gateway_id(config: &Config) -> DeviceId {
    config
        .known_list
        .iter()
        .find(|(id, traits)| traits.class.as_deref() == Some("HGI") || (id.is_hgi() && traits.class.is_none()))
        .map(|(id, _)| *id)
        .unwrap_or_else(|| DEFAULT_HGI_ID.parse().expect("well-formed"))
}

/// Remove nulls, empties, `false`s and `_`-prefixed keys, recursively
/// (the transform snapshot-equality is defined under).
pub fn shrink(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let shrunk: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), shrink(v)))
                .filter(|(_, v)| !is_falsy(v))
                .collect();
            Value::Object(shrunk)
        }
        Value::Array(items) => Value::Array(items.iter().map(shrink).collect()),
        other => other.clone(),
    }
}

fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// When did `owner` last hear a message matching `hdr` (I or RP)?
fn latest_for(
    arena: &crate::entity::Arena,
    device_by_id: &std::collections::HashMap<DeviceId, crate::entity::DeviceIdx>,
    owner: &crate::discovery::EntityKey,
    hdr: &crate::protocol::packet::Header,
) -> Option<NaiveDateTime> {
    use crate::discovery::EntityKey;
    let index = match owner {
        EntityKey::Device(id) => device_by_id.get(id).map(|&d| &arena.device(d).index),
        EntityKey::System(id) => {
            let &d = device_by_id.get(id)?;
            arena.device(d).tcs.map(|sys| &arena.system(sys).index)
        }
        EntityKey::Zone(id, zone_idx) => {
            let &d = device_by_id.get(id)?;
            let sys = arena.device(d).tcs?;
            arena.system(sys).zones.get(zone_idx).map(|&z| &arena.zone(z).index)
        }
        EntityKey::Dhw(id) => {
            let &d = device_by_id.get(id)?;
            let sys = arena.device(d).tcs?;
            arena.system(sys).dhw.map(|dhw| &arena.dhw(dhw).index)
        }
    }?;
    [Verb::I, Verb::Rp]
        .into_iter()
        .filter_map(|v| index.lookup(&hdr.with_verb(v)).map(Message::dtm))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrink_removes_falsy_and_private_keys() {
        let v = json!({
            "main_tcs": "01:145038",
            "_private": {"x": 1},
            "empty": {},
            "absent": null,
            "flag": false,
            "zones": {"00": {"class": "RAD", "sensor": null}},
        });
        let s = shrink(&v);
        assert_eq!(
            s,
            json!({
                "main_tcs": "01:145038",
                "zones": {"00": {"class": "RAD"}},
            })
        );
    }

    #[test]
    fn snapshot_parts_round_trip() {
        let dtm = chrono::NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_micro_opt(8, 30, 0, 123_456)
            .unwrap();
        let pkt = Packet::parse(dtm, "045  I --- 07:045960 --:------ 07:045960 1260 003 000911")
            .unwrap();
        let (head, payload) = snapshot_parts(&pkt);
        assert!(head.starts_with("2025-11-02T08:30:00.123456 045"));
        assert_eq!(payload, "000911");

        let (dtm_str, frame_head) = head.split_once(' ').unwrap();
        let dtm2 = NaiveDateTime::parse_from_str(dtm_str, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        let pkt2 = Packet::parse(dtm2, &format!("{frame_head} {payload}")).unwrap();
        assert_eq!(pkt, pkt2);
    }

    #[test]
    fn local_gateway_id_prefers_the_config() {
        let mut config = Config::default();
        assert_eq!(local_gateway_id(&config).to_string(), DEFAULT_HGI_ID);
        config
            .known_list
            .insert("18:002563".parse().unwrap(), crate::config::DeviceTraits::default());
        assert_eq!(local_gateway_id(&config).to_string(), "18:002563");
    }
}
