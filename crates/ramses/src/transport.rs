// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The transport seam.
//!
//! Byte-level serial/TTY I/O is not this crate's concern: the gateway only
//! needs something that accepts outbound frame text and a channel producing
//! inbound frame text. [`LoopbackTransport`] is the in-process stand-in:
//! every sent frame is echoed back as received (that is what an evofw3
//! adapter does over RF), and tests inject arbitrary frames directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;

/// What the gateway requires of a transport: fire-and-forget frame output.
/// Inbound frames arrive on the channel handed over at construction.
pub trait RamsesTransport: Send + Sync {
    /// Queue one frame for transmission.
    fn send_frame(&self, frame: &str) -> Result<(), Error>;

    /// Stop the transport; subsequent sends fail.
    fn close(&self);
}

/// An in-process transport that echoes every send back as a received frame.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
    echo: AtomicBool,
}

impl LoopbackTransport {
    /// Build the transport plus the inbound-frame receiver the gateway
    /// consumes.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self { tx, closed: AtomicBool::new(false), echo: AtomicBool::new(true) }),
            rx,
        )
    }

    /// Inject a frame as if it had been received over the air.
    pub fn inject(&self, frame: &str) {
        let _ = self.tx.send(frame.to_string());
    }

    /// Disable the RF echo (simulates a dead adapter for send-failure tests).
    pub fn set_echo(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::Relaxed);
    }
}

impl RamsesTransport for LoopbackTransport {
    fn send_frame(&self, frame: &str) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::SendFailed("transport closed".into()));
        }
        if self.echo.load(Ordering::Relaxed) {
            self.tx
                .send(frame.to_string())
                .map_err(|_| Error::SendFailed("receiver dropped".into()))?;
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}
