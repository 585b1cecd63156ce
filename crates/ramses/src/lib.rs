// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RAMSES - a RAMSES-II protocol decoder & analyser
//!
//! A pure Rust decoder/analyser for the RAMSES-II radio protocol used by
//! Honeywell evohome heating systems (CH/DHW) and compatible HVAC
//! ventilation equipment. A physical adapter (evofw3/HGI80) exchanges
//! ASCII-framed packets with the RF network; this crate turns those
//! frames into a live, queryable model of the systems on the air.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ramses::{Config, Gateway, LoopbackTransport};
//!
//! # async fn example() -> ramses::Result<()> {
//! let (transport, rx) = LoopbackTransport::new();
//! let gwy = Gateway::new(Config::default(), transport, rx)?;
//! gwy.start(None).await?;
//!
//! // frames flow in via the transport; query the model at any time
//! let (schema, packets) = gwy.get_state(false);
//! assert!(schema.is_object() && packets.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          Gateway facade                            |
//! |    start/stop | send_cmd | get_state | fake_device | schedules     |
//! +--------------------------------------------------------------------+
//! |                            Dispatcher                              |
//! |  addr-set checks | filters | role tables | promotion | routing     |
//! +--------------------------------------------------------------------+
//! |                           Entity graph                             |
//! |   Devices | Systems (TCS) | Zones | DHW | UFH circuits | indexes   |
//! +--------------------------------------------------------------------+
//! |                          Protocol layer                            |
//! |   frames | headers/ctx | payload schemas | commands | 1FC9 FSM     |
//! +--------------------------------------------------------------------+
//! |                        Transport (external)                        |
//! |            serial/TTY framing is not this crate's concern          |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Gateway`] | Entry point: owns the entity graph and the transport |
//! | [`Packet`] | One immutable parsed frame, with its correlation header |
//! | [`Message`] | Packet + typed payload + expiry |
//! | [`Command`] | An unsent frame plus its QoS block |
//! | [`DeviceId`] | A `TT:SSSSSS` device identifier |
//! | [`Code`] | A 16-bit RAMSES command code |
//!
//! ## Concurrency model
//!
//! The core is single-threaded cooperative: run it on a current-thread
//! tokio runtime. Entity state is mutated only under the gateway's state
//! lock, one message at a time; binding timers, discovery sleeps and
//! reply correlation are the only suspension points.

/// The 1FC9 binding subsystem (supplicant/respondent handshake FSM).
pub mod binding;
/// Global configuration: timing constants, engine flags, schema types.
pub mod config;
/// The discovery scheduler (periodic commands, backoff, deprecation).
pub mod discovery;
/// The dispatcher and the gateway's mutable core state.
pub mod engine;
/// The entity graph: devices, systems, zones, DHW, UFH circuits.
pub mod entity;
/// Library-level error taxonomy.
pub mod error;
/// The gateway facade.
pub mod gateway;
/// The per-entity deduplicated message index.
pub mod index;
/// Messages: packets plus typed payloads and expiry.
pub mod message;
/// The protocol layer: addresses, codes, frames, payloads, commands.
pub mod protocol;
/// The 0404 schedule engine (fragments, zlib codec, TCS lock).
pub mod schedule;
/// The transport seam and the in-process loopback transport.
pub mod transport;

pub use binding::{BindContext, BindPhase, BindState, BindTimings, Vendor};
pub use config::{Config, DeviceTraits, GatewayConfig};
pub use error::{BindingError, Error, PacketError, Result, ScheduleError};
pub use gateway::{shrink, Gateway};
pub use index::MessageIndex;
pub use message::Message;
pub use protocol::{Code, Command, Ctx, DeviceId, Header, Packet, Payload, Priority, Verb};
pub use schedule::Schedule;
pub use transport::{LoopbackTransport, RamsesTransport};
