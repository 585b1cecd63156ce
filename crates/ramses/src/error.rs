// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Library-level error taxonomy.
//!
//! Errors are grouped by the layer that raises them:
//! - [`PacketError`] - frame/payload/address-set validation (protocol layer)
//! - [`BindingError`] - the 1FC9 handshake FSM and its flow
//! - [`ScheduleError`] - the 0404 fragment engine and its TCS-level lock
//! - [`Error`] - everything, for APIs that cross layers (the gateway facade)
//!
//! Local errors (malformed frames, role violations) are logged and swallowed
//! by the dispatcher; surfaced errors are returned to the caller. No error
//! tears down the gateway.

use std::fmt;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or validating a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// The frame is structurally invalid (bad RSSI, verb, length, ...)
    Invalid(String),

    /// The frame is well-formed, but its payload fails the code's schema
    PayloadInvalid(String),

    /// The src/dst address pair is illegal for the code's domain
    AddrSetInvalid(String),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(s) => write!(f, "invalid packet: {s}"),
            Self::PayloadInvalid(s) => write!(f, "invalid payload: {s}"),
            Self::AddrSetInvalid(s) => write!(f, "invalid addr set: {s}"),
        }
    }
}

impl std::error::Error for PacketError {}

/// Errors raised by the 1FC9 binding handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// The FSM was driven from an incompatible state (programmer error)
    Fsm(String),

    /// The handshake failed: timeout or retry limit exceeded
    FlowFailed(String),
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fsm(s) => write!(f, "binding FSM error: {s}"),
            Self::FlowFailed(s) => write!(f, "binding failed: {s}"),
        }
    }
}

impl std::error::Error for BindingError {}

/// Errors raised by the 0404 schedule fragment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The fragment engine was driven from an incompatible state
    Fsm(String),

    /// The get/set failed: missing fragments, timeout, or version churn
    Flow(String),

    /// The per-TCS schedule lock was not acquired within the limit
    LockTimeout,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fsm(s) => write!(f, "schedule FSM error: {s}"),
            Self::Flow(s) => write!(f, "schedule flow error: {s}"),
            Self::LockTimeout => write!(f, "schedule lock not acquired within 3 minutes"),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// The crate-wide error type (the exit taxonomy of the library).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A protocol-layer packet error
    Packet(PacketError),

    /// A command could not be sent, or no echo/reply arrived after retries
    SendFailed(String),

    /// A binding-layer error
    Binding(BindingError),

    /// A schedule-layer error
    Schedule(ScheduleError),

    /// The system state (usually the schema) became inconsistent
    SchemaInconsistent(String),

    /// A faked-device API was invoked on a device without faking enabled
    DeviceNotFaked(String),

    /// A second HGI-like gateway was observed on the network
    ForeignGateway(String),

    /// The configuration is invalid
    Config(String),

    /// A device id was filtered out, or an entity does not exist
    Lookup(String),
}

impl Error {
    /// Shorthand for a [`PacketError::Invalid`].
    pub fn packet_invalid(msg: impl Into<String>) -> Self {
        Self::Packet(PacketError::Invalid(msg.into()))
    }

    /// Shorthand for a [`PacketError::PayloadInvalid`].
    pub fn payload_invalid(msg: impl Into<String>) -> Self {
        Self::Packet(PacketError::PayloadInvalid(msg.into()))
    }

    /// Shorthand for a [`BindingError::FlowFailed`].
    pub fn binding_failed(msg: impl Into<String>) -> Self {
        Self::Binding(BindingError::FlowFailed(msg.into()))
    }

    /// True if the dispatcher should swallow this error (log and continue).
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Packet(_) | Self::Lookup(_) | Self::ForeignGateway(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packet(e) => e.fmt(f),
            Self::SendFailed(s) => write!(f, "send failed: {s}"),
            Self::Binding(e) => e.fmt(f),
            Self::Schedule(e) => e.fmt(f),
            Self::SchemaInconsistent(s) => write!(f, "schema inconsistent: {s}"),
            Self::DeviceNotFaked(s) => write!(f, "device not faked: {s}"),
            Self::ForeignGateway(s) => write!(f, "foreign gateway: {s}"),
            Self::Config(s) => write!(f, "config error: {s}"),
            Self::Lookup(s) => write!(f, "lookup error: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Packet(e) => Some(e),
            Self::Binding(e) => Some(e),
            Self::Schedule(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PacketError> for Error {
    fn from(e: PacketError) -> Self {
        Self::Packet(e)
    }
}

impl From<BindingError> for Error {
    fn from(e: BindingError) -> Self {
        Self::Binding(e)
    }
}

impl From<ScheduleError> for Error {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trip() {
        let err = Error::from(PacketError::Invalid("len mismatch".into()));
        assert_eq!(err.to_string(), "invalid packet: len mismatch");
        assert!(err.is_local());

        let err = Error::binding_failed("no Accept after 3 retries");
        assert_eq!(err.to_string(), "binding failed: no Accept after 3 retries");
        assert!(!err.is_local());
    }

    #[test]
    fn source_chain() {
        use std::error::Error as _;
        let err = Error::from(BindingError::Fsm("bad state".into()));
        assert!(err.source().is_some());
    }
}
