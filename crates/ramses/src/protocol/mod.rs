// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The RAMSES-II protocol layer: addresses, codes, frames, payload schemas
//! and outbound command construction.
//!
//! Everything above this layer (entities, binding, discovery, the gateway)
//! consumes parsed [`packet::Packet`]s and emits [`command::Command`]s; raw
//! byte I/O lives behind the transport seam.

pub mod address;
pub mod code;
pub mod command;
pub mod packet;
pub mod payload;

pub use address::{best_dev_role, is_valid_dev_id, DeviceId, Domain, Role};
pub use code::{Code, CodeDomain, Expiry, IndexPolicy, Verb};
pub use command::{Command, Priority, QosParams};
pub use packet::{Ctx, Header, Packet};
pub use payload::Payload;
