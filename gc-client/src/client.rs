//! Client facade: the public entry point wiring together the
//! options record, the connection supervisor and its transfer queue.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use crate::conn::{ConnectionEvent, StateKind, Supervisor};
use crate::error::GcError;
use crate::error_codes::{BuiltinCodes, HumanReadable};
use crate::options::{Options, OptionsUpdate};
use crate::queue::PushOptions;

/// A client for one GC-family device's control port.
///
/// Construct with [`Client::new`] (or [`Client::with_options`] for a
/// non-default configuration), call [`connect`](Client::connect), then
/// [`send`](Client::send) requests. `send` suspends the calling thread
/// until the request resolves, times out, or the queue is cleared — it
/// never returns early just because the connection dropped mid-wait; the
/// queue pauses in that case and resumes automatically after reconnect.
pub struct Client {
    supervisor: Arc<Supervisor>,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_options(Options::new(host, port))
    }

    pub fn with_options(options: Options) -> Self {
        let codes: Arc<dyn HumanReadable> = Arc::new(BuiltinCodes::new());
        Self {
            supervisor: Supervisor::new(options, codes),
        }
    }

    /// Start the connection supervisor with the current options.
    pub fn connect(&self) {
        self.supervisor.start();
    }

    pub fn connect_with(&self, update: OptionsUpdate) {
        self.supervisor.set_options(update);
        self.supervisor.start();
    }

    /// `close(opts?)`: stop the supervisor; if `reconnect` is still true
    /// afterwards, schedule a fresh `connect` after `reconnectDelay`.
    pub fn close(&self) {
        self.supervisor.stop();
        let snapshot = self.supervisor.options_snapshot();
        if snapshot.reconnect {
            let supervisor = self.supervisor.clone();
            thread::spawn(move || {
                thread::sleep(snapshot.reconnect_delay);
                supervisor.start();
            });
        }
    }

    pub fn close_with(&self, update: OptionsUpdate) {
        self.supervisor.set_options(update);
        self.close();
    }

    pub fn set_options(&self, update: OptionsUpdate) {
        self.supervisor.set_options(update);
    }

    pub fn options(&self) -> Options {
        self.supervisor.options_snapshot()
    }

    pub fn state(&self) -> StateKind {
        self.supervisor.state()
    }

    /// Subscribe to `state`/`connect`/`close`/`error` events. Each
    /// subscriber gets its own channel; events are broadcast to all.
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.supervisor.subscribe()
    }

    /// Send a request: append the record separator if missing, route
    /// `stopir` requests to the head of the queue, and block until
    /// the request resolves.
    pub fn send(&self, data: impl Into<String>) -> Result<String, GcError> {
        let mut raw = data.into();
        if !raw.ends_with('\r') {
            raw.push('\r');
        }
        let priority = raw.starts_with("stopir");
        let (send_timeout, queue_timeout) = {
            let o = self.supervisor.options_snapshot();
            (o.send_timeout, o.queue_timeout)
        };
        let rx = self.supervisor.queue().push(
            raw,
            PushOptions {
                send_timeout,
                queue_timeout,
                priority,
            },
        );
        rx.recv().unwrap_or(Err(GcError::QueueCleared))
    }
}
