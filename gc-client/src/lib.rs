//! # GC UNIFIED CLIENT
//!
//! A client for the GC family of IR/serial/relay control devices (Global
//! Connect, iTach, GC-100, Flex) speaking the Unified TCP API, a
//! line-oriented ASCII protocol on port 4998.
//!
//! ---------------------------------------------------------------------
//!
//! ## Core client
//!
//! - Build a [`Client`] with [`Client::new`], call
//!   [`connect`](Client::connect), then [`send`](Client::send) requests.
//! - [`send`] suspends the caller until the request resolves, times out,
//!   or the queue is cleared by a disconnect or [`close`](Client::close).
//! - Subscribe to connection lifecycle events with [`Client::events`].
//!
//! ## External collaborators
//!
//! Two helpers operate independently of [`Client`] and its transfer
//! queue:
//! - [`discovery::discover`] — UDP multicast device discovery.
//! - [`probe::query`] — a one-shot synchronous device-info dialogue.
//!
//! [`send`]: Client::send

pub mod backoff;
pub mod classify;
pub mod client;
pub mod conn;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod error_codes;
pub mod frame;
pub mod matcher;
pub mod options;
pub mod probe;
pub mod queue;
pub mod timer;

pub use client::Client;
pub use conn::{ConnectionEvent, StateKind};
pub use error::{ConnectionError, GcError, ResponseError, Result};
pub use options::{Options, OptionsUpdate};
