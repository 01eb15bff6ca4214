//! Error taxonomy common to all components.
//!
//! One kind per outcome: a [`ConnectionError`] for transport failures, a
//! [`ResponseError`] for device-reported errors, or a library-level
//! [`GcError`] for everything the queue itself can reject a request with.

use std::io;
use thiserror::Error;

/// Library-specific codes added on top of the device's own error codes.
pub mod codes {
    pub const ETIMEDOUT: &str = "ETIMEDOUT";
    pub const ECONNLOST: &str = "ECONNLOST";
    pub const QUEUE_TIMEOUT: &str = "QUEUE_TIMEOUT";
    pub const SEND_TIMEOUT: &str = "SEND_TIMEOUT";
    pub const QUEUE_CLEARED: &str = "QUEUE_CLEARED";
    pub const BUSY_IR: &str = "BUSY_IR";
}

/// A transport-level failure: connect timeout, connect refusal, or a drop
/// of an already-open connection.
#[derive(Debug, Error)]
#[error("connection error [{code}] {address}:{port}{}", format_cause(.cause))]
pub struct ConnectionError {
    pub code: String,
    pub address: String,
    pub port: u16,
    #[source]
    pub cause: Option<io::Error>,
}

fn format_cause(cause: &Option<io::Error>) -> String {
    match cause {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}

impl ConnectionError {
    pub fn new(code: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            code: code.into(),
            address: address.into(),
            port,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: io::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    /// TCP connect did not complete within `connectionTimeout`.
    pub fn timed_out(address: impl Into<String>, port: u16) -> Self {
        Self::new(codes::ETIMEDOUT, address, port)
    }

    /// A previously-open connection was dropped.
    pub fn connection_lost(address: impl Into<String>, port: u16) -> Self {
        Self::new(codes::ECONNLOST, address, port)
    }
}

/// A device-reported error line, classified by [`crate::classify`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("device error [{code}] {message}")]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

impl ResponseError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The outcome of a single `send`: every request resolves to exactly one
/// of these variants, never more than one and never zero.
#[derive(Debug, Error)]
pub enum GcError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Request sat unsent longer than `queueTimeout`.
    #[error("[{code}] request timed out while queued", code = codes::QUEUE_TIMEOUT)]
    QueueTimeout,

    /// No correlated response arrived within `sendTimeout` of dispatch.
    #[error("[{code}] no response within send timeout", code = codes::SEND_TIMEOUT)]
    SendTimeout,

    /// The queue was cleared (disconnect or `close`) while the request was pending.
    #[error("[{code}] queue cleared", code = codes::QUEUE_CLEARED)]
    QueueCleared,

    /// A `sendir` was aborted because the IR connector stayed busy past its
    /// remaining send-timeout budget.
    #[error("[{code}] IR connector busy: {detail}", code = codes::BUSY_IR)]
    BusyIr { detail: String },
}

pub type Result<T> = std::result::Result<T, GcError>;
