//! Transfer queue: serialises requests onto the wire, correlates
//! inbound lines back to the request that produced them, and enforces the
//! queue-timeout / send-timeout budgets.
//!
//! A single background dispatcher thread owns the "at most one request in
//! flight" discipline: it blocks on a one-shot wake channel for the
//! duration of `sendTimeout`, so no second item can be taken off the queue
//! until the current one resolves, times out, or is cancelled. All other
//! mutation happens under one [`Mutex`], entered only for the instant it
//! takes to inspect or update the item list — never while blocked on I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::classify::{classify, Classification};
use crate::connector::Connector;
use crate::error::GcError;
use crate::error_codes::HumanReadable;
use crate::matcher::expected_prefix;
use crate::timer::Timer;

/// Supplies the byte-level write the queue needs to dispatch a request.
/// Implemented by the connection supervisor; kept free of any queue
/// knowledge so the two components only share this one seam.
pub trait WireSink: Send + Sync {
    fn write_request(&self, bytes: &[u8]) -> Result<(), GcError>;
}

/// Per-`push` overrides; defaults usually come from the facade's current
/// [`crate::options::Options`].
pub struct PushOptions {
    pub send_timeout: Duration,
    pub queue_timeout: Duration,
    pub priority: bool,
}

struct Request {
    id: u64,
    raw: String,
    #[allow(dead_code)] // carried for future diagnostics; not asserted on in tests
    prefix: String,
    expected_prefix: Option<String>,
    ir_id: Option<u32>,
    send_timeout: Duration,
    enqueued_at: Instant,
    dispatched_at: Option<Instant>,
    processed: bool,
    queue_timer: Option<Timer>,
    send_timer: Option<Timer>,
    retry_timer: Option<Timer>,
    outer_tx: Option<oneshot::Sender<Result<String, GcError>>>,
    /// Dropped (never sent) the instant this item finishes, so the
    /// dispatcher thread's blocked `recv_timeout` wakes immediately.
    inner_tx: Option<oneshot::Sender<()>>,
}

struct QueueState {
    items: VecDeque<Request>,
    paused: bool,
    next_id: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    sink: Arc<dyn WireSink>,
    codes: Arc<dyn HumanReadable>,
    kick_tx: Sender<()>,
    retry_interval_ms: AtomicU64,
    shutdown: AtomicBool,
}

/// The transfer queue. Not `Clone`: share it behind an `Arc<Queue>` when
/// more than one component (facade, supervisor) needs a handle.
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub fn new(sink: Arc<dyn WireSink>, codes: Arc<dyn HumanReadable>) -> Self {
        let (kick_tx, kick_rx) = mpsc::channel();
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                paused: false,
                next_id: 1,
            }),
            sink,
            codes,
            kick_tx,
            retry_interval_ms: AtomicU64::new(250),
            shutdown: AtomicBool::new(false),
        });
        let dispatcher_inner = inner.clone();
        thread::Builder::new()
            .name("gc-client-dispatcher".into())
            .spawn(move || run_dispatcher(dispatcher_inner, kick_rx))
            .expect("failed to spawn dispatcher thread");
        Self { inner }
    }

    pub fn set_retry_interval(&self, interval: Duration) {
        self.inner
            .retry_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Enqueue `raw` (already `\r`-terminated) and return a receiver for
    /// its eventual outcome.
    pub fn push(&self, raw: String, opts: PushOptions) -> oneshot::Receiver<Result<String, GcError>> {
        let mut guard = self.inner.state.lock().unwrap();

        if raw.starts_with("sendir") {
            if let Some(idx) = guard.items.iter().position(|r| !r.processed && r.raw == raw) {
                let mut superseded = guard.items.remove(idx).unwrap();
                if let Some(t) = superseded.queue_timer.take() {
                    t.cancel();
                }
                if let Some(tx) = superseded.outer_tx.take() {
                    let _ = tx.send(Ok("repeatir".to_string()));
                }
                debug!("collapsed duplicate sendir, id={}", superseded.id);
            }
        }

        let id = guard.next_id;
        guard.next_id += 1;

        let (outer_tx, outer_rx) = oneshot::channel();
        let request = Request {
            id,
            prefix: log_safe_prefix(&raw),
            expected_prefix: expected_prefix(&raw),
            ir_id: parse_sendir_id(&raw),
            send_timeout: opts.send_timeout,
            enqueued_at: Instant::now(),
            dispatched_at: None,
            processed: false,
            queue_timer: None,
            send_timer: None,
            retry_timer: None,
            outer_tx: Some(outer_tx),
            inner_tx: None,
            raw: raw.clone(),
        };

        if opts.priority {
            guard.items.push_front(request);
        } else {
            guard.items.push_back(request);
        }

        let timer_inner = self.inner.clone();
        let queue_timer = Timer::arm(opts.queue_timeout, move || {
            finish_item(&timer_inner, id, Err(GcError::QueueTimeout));
            let _ = timer_inner.kick_tx.send(());
        });
        if let Some(req) = guard.items.iter_mut().find(|r| r.id == id) {
            req.queue_timer = Some(queue_timer);
        } else {
            queue_timer.cancel();
        }

        drop(guard);
        let _ = self.inner.kick_tx.send(());
        outer_rx
    }

    pub fn clear(&self) {
        let ids: Vec<u64> = {
            let guard = self.inner.state.lock().unwrap();
            guard.items.iter().map(|r| r.id).collect()
        };
        for id in ids {
            finish_item(&self.inner, id, Err(GcError::QueueCleared));
        }
        let _ = self.inner.kick_tx.send(());
    }

    pub fn pause(&self) {
        self.inner.state.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        self.inner.state.lock().unwrap().paused = false;
        let _ = self.inner.kick_tx.send(());
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feed one complete, already-decoded protocol line to the queue.
    pub fn handle_response(&self, line: &str) {
        match classify(line, self.inner.codes.as_ref()) {
            Classification::DeviceError { code, message } => self.handle_error_response(code, message),
            Classification::Busy { connector, id } => self.handle_busy(connector, id),
            Classification::StopAck { connector } => self.handle_stop_ack(connector, line),
            Classification::Ok => self.handle_ordinary(line),
        }
    }

    fn handle_error_response(&self, code: String, message: String) {
        let oldest = {
            let guard = self.inner.state.lock().unwrap();
            guard.items.front().map(|r| r.id)
        };
        match oldest {
            Some(id) => {
                finish_item(
                    &self.inner,
                    id,
                    Err(GcError::Response(crate::error::ResponseError::new(code, message))),
                );
                let _ = self.inner.kick_tx.send(());
            }
            None => warn!("device error [{code}] {message} with no pending request"),
        }
    }

    fn handle_busy(&self, connector: Option<Connector>, id: Option<u32>) {
        let retry_interval = Duration::from_millis(self.inner.retry_interval_ms.load(Ordering::Relaxed));
        let margin = Duration::from_millis(100);

        let target = {
            let guard = self.inner.state.lock().unwrap();
            find_busy_target(&guard.items, connector, id)
        };
        let Some(target_id) = target else {
            warn!("busy signal with no matching queued sendir");
            return;
        };

        let details = {
            let guard = self.inner.state.lock().unwrap();
            guard
                .items
                .iter()
                .find(|r| r.id == target_id)
                .map(|r| (r.raw.clone(), r.dispatched_at.unwrap_or(r.enqueued_at), r.send_timeout))
        };
        let Some((raw, dispatched_at, send_timeout)) = details else {
            return;
        };

        if dispatched_at.elapsed() + retry_interval + margin < send_timeout {
            let sink = self.inner.sink.clone();
            let timer_inner = self.inner.clone();
            let retry_timer = Timer::arm(retry_interval, move || {
                if let Err(e) = sink.write_request(raw.as_bytes()) {
                    warn!("busy retry re-send failed: {e}");
                }
                // Clear the slot so a finished item can't hold a stale
                // handle to a timer that has already fired.
                let mut guard = timer_inner.state.lock().unwrap();
                if let Some(req) = guard.items.iter_mut().find(|r| r.id == target_id) {
                    req.retry_timer = None;
                }
            });
            let mut guard = self.inner.state.lock().unwrap();
            match guard.items.iter_mut().find(|r| r.id == target_id) {
                Some(req) => {
                    if let Some(stale) = req.retry_timer.replace(retry_timer) {
                        stale.cancel();
                    }
                }
                None => retry_timer.cancel(),
            }
        } else {
            let detail = match connector {
                Some(c) => format!("{c} exceeded send timeout budget while busy"),
                None => "exceeded send timeout budget while busy".to_string(),
            };
            finish_item(&self.inner, target_id, Err(GcError::BusyIr { detail }));
            let _ = self.inner.kick_tx.send(());
        }
    }

    fn handle_stop_ack(&self, connector: Connector, line: &str) {
        let prefix = format!("sendir,{connector},");
        let matched: Vec<u64> = {
            let guard = self.inner.state.lock().unwrap();
            guard.items.iter().filter(|r| r.raw.starts_with(&prefix)).map(|r| r.id).collect()
        };
        for id in matched {
            finish_item(&self.inner, id, Ok(line.to_string()));
        }
        let _ = self.inner.kick_tx.send(());
    }

    fn handle_ordinary(&self, line: &str) {
        let resolved = {
            let guard = self.inner.state.lock().unwrap();
            guard
                .items
                .iter()
                .find(|r| r.expected_prefix.as_deref().is_some_and(|p| line.starts_with(p)))
                .map(|r| (r.id, r.raw.clone(), r.enqueued_at))
        };
        let resolved = resolved.or_else(|| self.fallback_getversion_match(line));

        let Some((id, raw, enqueued_at)) = resolved else {
            trace!("unmatched response, dropping: {line}");
            return;
        };
        finish_item(&self.inner, id, Ok(line.to_string()));
        self.purge_superseded(&raw, enqueued_at);
        let _ = self.inner.kick_tx.send(());
    }

    fn fallback_getversion_match(&self, line: &str) -> Option<(u64, String, Instant)> {
        if !looks_like_version(line) {
            return None;
        }
        let guard = self.inner.state.lock().unwrap();
        guard
            .items
            .iter()
            .find(|r| r.raw.trim_end_matches('\r') == "getversion")
            .map(|r| (r.id, r.raw.clone(), r.enqueued_at))
    }

    fn purge_superseded(&self, resolved_raw: &str, resolved_enqueued_at: Instant) {
        let Some(prefix) = command_connector_prefix(resolved_raw) else {
            return;
        };
        let victims: Vec<u64> = {
            let guard = self.inner.state.lock().unwrap();
            guard
                .items
                .iter()
                .filter(|r| r.enqueued_at < resolved_enqueued_at && r.raw.starts_with(&prefix))
                .map(|r| r.id)
                .collect()
        };
        for id in victims {
            debug!("purging superseded request id={id}, prefix={prefix}");
            finish_item(&self.inner, id, Err(GcError::QueueCleared));
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let _ = self.inner.kick_tx.send(());
    }
}

fn run_dispatcher(inner: Arc<QueueInner>, kick_rx: Receiver<()>) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        match take_next(&inner) {
            Some((id, raw, send_timeout)) => dispatch_item(&inner, id, raw, send_timeout),
            None => {
                if kick_rx.recv().is_err() {
                    return;
                }
            }
        }
    }
}

fn take_next(inner: &Arc<QueueInner>) -> Option<(u64, String, Duration)> {
    let mut guard = inner.state.lock().unwrap();
    if guard.paused {
        return None;
    }
    let idx = guard.items.iter().position(|r| !r.processed)?;
    let req = &mut guard.items[idx];
    req.processed = true;
    if let Some(t) = req.queue_timer.take() {
        t.cancel();
    }
    Some((req.id, req.raw.clone(), req.send_timeout))
}

fn dispatch_item(inner: &Arc<QueueInner>, id: u64, raw: String, send_timeout: Duration) {
    if send_timeout.is_zero() {
        let outcome = inner.sink.write_request(raw.as_bytes()).map(|()| String::new());
        finish_item(inner, id, outcome);
        return;
    }

    let (inner_tx, inner_rx) = oneshot::channel::<()>();
    {
        let mut guard = inner.state.lock().unwrap();
        match guard.items.iter_mut().find(|r| r.id == id) {
            Some(req) => {
                req.inner_tx = Some(inner_tx);
                req.dispatched_at = Some(Instant::now());
            }
            None => return,
        }
    }

    let timer_inner = inner.clone();
    let send_timer = Timer::arm(send_timeout, move || {
        finish_item(&timer_inner, id, Err(GcError::SendTimeout));
        let _ = timer_inner.kick_tx.send(());
    });
    {
        let mut guard = inner.state.lock().unwrap();
        match guard.items.iter_mut().find(|r| r.id == id) {
            Some(req) => req.send_timer = Some(send_timer),
            None => {
                send_timer.cancel();
                return;
            }
        }
    }

    if let Err(e) = inner.sink.write_request(raw.as_bytes()) {
        finish_item(inner, id, Err(e));
        return;
    }

    // At most one request in flight: this blocks the dispatcher thread
    // until the item resolves, times out, or is otherwise finished.
    if inner_rx.recv_timeout(send_timeout).is_err() {
        finish_item(inner, id, Err(GcError::SendTimeout));
    }
}

fn finish_item(inner: &Arc<QueueInner>, id: u64, outcome: Result<String, GcError>) -> bool {
    let mut guard = inner.state.lock().unwrap();
    let Some(idx) = guard.items.iter().position(|r| r.id == id) else {
        return false;
    };
    let mut item = guard.items.remove(idx).unwrap();
    drop(guard);

    if let Some(t) = item.queue_timer.take() {
        t.cancel();
    }
    if let Some(t) = item.send_timer.take() {
        t.cancel();
    }
    if let Some(t) = item.retry_timer.take() {
        t.cancel();
    }
    item.inner_tx.take();
    if let Some(tx) = item.outer_tx.take() {
        let _ = tx.send(outcome);
    }
    true
}

fn find_busy_target(items: &VecDeque<Request>, connector: Option<Connector>, id: Option<u32>) -> Option<u64> {
    match connector {
        Some(c) => {
            let prefix = format!("sendir,{c},");
            let candidates: Vec<&Request> = items.iter().filter(|r| r.raw.starts_with(&prefix)).collect();
            if let Some(busy_id) = id {
                if let Some(r) = candidates.iter().find(|r| r.ir_id != Some(busy_id)) {
                    return Some(r.id);
                }
            }
            candidates.first().map(|r| r.id)
        }
        None => {
            let candidates: Vec<&Request> = items.iter().filter(|r| r.raw.starts_with("sendir,")).collect();
            candidates.get(1).map(|r| r.id)
        }
    }
}

fn looks_like_version(line: &str) -> bool {
    let parts: Vec<&str> = line.split('-').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn parse_sendir_id(raw: &str) -> Option<u32> {
    let rest = raw.trim_end_matches('\r').strip_prefix("sendir,")?;
    let mut parts = rest.splitn(3, ',');
    let _connector = parts.next()?;
    parts.next()?.parse().ok()
}

fn log_safe_prefix(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('\r');
    trimmed.splitn(4, ',').take(3).collect::<Vec<_>>().join(",")
}

fn command_connector_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches('\r');
    let mut parts = trimmed.splitn(3, ',');
    let command = parts.next()?;
    match parts.next() {
        Some(connector) if !connector.is_empty() => Some(format!("{command},{connector}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::BuiltinCodes;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        writes: StdMutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { writes: StdMutex::new(Vec::new()) })
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl WireSink for RecordingSink {
        fn write_request(&self, bytes: &[u8]) -> Result<(), GcError> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn queue_with(sink: Arc<RecordingSink>) -> Queue {
        Queue::new(sink, Arc::new(BuiltinCodes::new()))
    }

    fn opts(send_ms: u64, queue_ms: u64, priority: bool) -> PushOptions {
        PushOptions {
            send_timeout: Duration::from_millis(send_ms),
            queue_timeout: Duration::from_millis(queue_ms),
            priority,
        }
    }

    #[test]
    fn version_probe_resolves_from_a_single_reply() {
        let sink = RecordingSink::new();
        let q = queue_with(sink.clone());
        let rx = q.push("getversion\r".to_string(), opts(1000, 1000, false));
        thread::sleep(Duration::from_millis(50));
        q.handle_response("710-1005-05");
        let result = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(result.unwrap(), "710-1005-05");
        assert_eq!(sink.writes(), vec![b"getversion\r".to_vec()]);
    }

    #[test]
    fn resolves_busy_retry_with_identical_bytes() {
        let sink = RecordingSink::new();
        let q = queue_with(sink.clone());
        q.set_retry_interval(Duration::from_millis(50));
        let rx = q.push("sendir,1:1,1,38000,1,1,100,50\r".to_string(), opts(2000, 1000, false));
        thread::sleep(Duration::from_millis(50));
        q.handle_response("busyIR,1:1,1");
        thread::sleep(Duration::from_millis(200));
        assert_eq!(sink.writes().len(), 2);
        assert_eq!(sink.writes()[0], sink.writes()[1]);
        q.handle_response("completeir,1:1,1");
        let result = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(result.unwrap(), "completeir,1:1,1");
    }

    #[test]
    fn busy_retry_aborts_once_send_timeout_budget_is_exhausted() {
        let sink = RecordingSink::new();
        let q = queue_with(sink.clone());
        q.set_retry_interval(Duration::from_millis(99));
        let rx = q.push("sendir,1:1,1,38000,1,1,100,50\r".to_string(), opts(150, 1000, false));
        thread::sleep(Duration::from_millis(80));
        q.handle_response("busyIR,1:1,1");
        let result = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        match result {
            Err(GcError::BusyIr { .. }) => {}
            other => panic!("expected BusyIr, got {other:?}"),
        }
        thread::sleep(Duration::from_millis(150));
        assert_eq!(sink.writes().len(), 1, "no re-send once budget is exhausted");
    }

    #[test]
    fn device_error_rejects_oldest_pending_request_first() {
        let sink = RecordingSink::new();
        let q = queue_with(sink);
        q.pause();
        let rx_a = q.push("getstate,1:1\r".to_string(), opts(2000, 2000, false));
        let rx_b = q.push("get_IR,1:2\r".to_string(), opts(2000, 2000, false));
        q.resume();
        thread::sleep(Duration::from_millis(50));
        q.handle_response("ERR_1:1,014");
        let result_a = rx_a.recv_timeout(Duration::from_millis(500)).unwrap();
        match result_a {
            Err(GcError::Response(e)) => {
                assert_eq!(e.code, "014");
                assert_eq!(e.message, "Blaster command sent to non-blaster connector.");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err(), "B must still be pending");
    }

    #[test]
    fn priority_insertion_dispatches_before_earlier_requests() {
        let sink = RecordingSink::new();
        let q = queue_with(sink.clone());
        q.pause();
        let rx_devices = q.push("getdevices\r".to_string(), opts(2000, 2000, false));
        let rx_stop = q.push("stopir,1:1\r".to_string(), opts(2000, 2000, true));
        q.resume();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.writes()[0], b"stopir,1:1\r".to_vec());
        q.handle_response("stopir,1:1");
        let stop_result = rx_stop.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(stop_result.unwrap(), "stopir,1:1");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.writes()[1], b"getdevices\r".to_vec());
        q.handle_response("device,1,1 SERIAL\nendlistdevices");
        let devices_result = rx_devices.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(devices_result.unwrap().starts_with("device,"));
    }

    #[test]
    fn stop_ack_resolves_in_flight_sendir() {
        let sink = RecordingSink::new();
        let q = queue_with(sink);
        let rx = q.push("sendir,1:1,7,38000,1,1,100,50\r".to_string(), opts(2000, 2000, false));
        thread::sleep(Duration::from_millis(50));
        q.handle_response("stopir,1:1");
        let result = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(result.unwrap(), "stopir,1:1");
        // A late completeir for the stopped id is unmatched and dropped.
        q.handle_response("completeir,1:1,7");
    }

    #[test]
    fn clear_rejects_every_pending_item() {
        let sink = RecordingSink::new();
        let q = queue_with(sink);
        q.pause();
        let rx_a = q.push("getversion\r".to_string(), opts(2000, 2000, false));
        let rx_b = q.push("getdevices\r".to_string(), opts(2000, 2000, false));
        q.clear();
        assert!(matches!(
            rx_a.recv_timeout(Duration::from_millis(200)).unwrap(),
            Err(GcError::QueueCleared)
        ));
        assert!(matches!(
            rx_b.recv_timeout(Duration::from_millis(200)).unwrap(),
            Err(GcError::QueueCleared)
        ));
        assert!(q.is_empty());
    }

    #[test]
    fn queue_timeout_rejects_unsent_item() {
        let sink = RecordingSink::new();
        let q = queue_with(sink);
        q.pause();
        let rx = q.push("getversion\r".to_string(), opts(2000, 30, false));
        let result = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(matches!(result, Err(GcError::QueueTimeout)));
    }

    #[test]
    fn duplicate_sendir_collapses_with_repeatir() {
        let sink = RecordingSink::new();
        let q = queue_with(sink);
        q.pause();
        let raw = "sendir,1:1,1,38000,1,1,100,50\r".to_string();
        let rx_first = q.push(raw.clone(), opts(2000, 2000, false));
        let rx_second = q.push(raw, opts(2000, 2000, false));
        let first_result = rx_first.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(first_result.unwrap(), "repeatir");
        assert_eq!(q.len(), 1);
        q.resume();
        assert!(rx_second.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
