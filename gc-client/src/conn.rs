//! Connection supervisor: owns the TCP stream, drives the
//! connection state machine, and coordinates the transfer queue's
//! pause/resume lifecycle around connects, drops, and reconnects.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{ConnectionError, GcError};
use crate::error_codes::HumanReadable;
use crate::frame::FrameSplitter;
use crate::options::{Options, OptionsUpdate};
use crate::queue::{Queue, WireSink};

/// The connection supervisor's externally-visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Stopped,
    Opening,
    Opened,
    Closing,
    Closed,
    Reopening,
    Failed,
}

/// Published on the facade's event stream.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    State(StateKind),
    Connect,
    Close,
    Error(Arc<GcError>),
}

enum ConnState {
    Stopped,
    Opening,
    Opened(TcpStream),
    Closing,
    Closed,
    Reopening,
    Failed,
}

impl ConnState {
    fn kind(&self) -> StateKind {
        match self {
            ConnState::Stopped => StateKind::Stopped,
            ConnState::Opening => StateKind::Opening,
            ConnState::Opened(_) => StateKind::Opened,
            ConnState::Closing => StateKind::Closing,
            ConnState::Closed => StateKind::Closed,
            ConnState::Reopening => StateKind::Reopening,
            ConnState::Failed => StateKind::Failed,
        }
    }
}

/// Writes outbound bytes to whichever stream is currently open. The
/// transfer queue only ever sees this seam, never the supervisor itself.
struct StreamSink {
    state: Arc<RwLock<ConnState>>,
    options: Arc<Mutex<Options>>,
}

impl WireSink for StreamSink {
    fn write_request(&self, bytes: &[u8]) -> Result<(), GcError> {
        let guard = self.state.read().unwrap();
        match &*guard {
            ConnState::Opened(stream) => {
                let mut writable: &TcpStream = stream;
                writable.write_all(bytes).map_err(|e| {
                    let (host, port) = self.peer();
                    GcError::Connection(ConnectionError::connection_lost(host, port).with_cause(e))
                })
            }
            _ => {
                let (host, port) = self.peer();
                Err(GcError::Connection(ConnectionError::connection_lost(host, port)))
            }
        }
    }
}

impl StreamSink {
    fn peer(&self) -> (String, u16) {
        let o = self.options.lock().unwrap();
        (o.host.clone(), o.port)
    }
}

/// Owns the TCP stream and the connection state machine. Share via
/// `Arc<Supervisor>`; `start`/`stop` spawn and tear down background
/// threads keyed to a generation counter so a superseded reconnect loop
/// recognises it has been overtaken and exits quietly.
pub struct Supervisor {
    state: Arc<RwLock<ConnState>>,
    options: Arc<Mutex<Options>>,
    queue: Arc<Queue>,
    listeners: Mutex<Vec<Sender<ConnectionEvent>>>,
    generation: AtomicU64,
}

impl Supervisor {
    pub fn new(options: Options, codes: Arc<dyn HumanReadable>) -> Arc<Self> {
        let state = Arc::new(RwLock::new(ConnState::Stopped));
        let retry_interval = options.retry_interval;
        let options = Arc::new(Mutex::new(options));
        let sink: Arc<dyn WireSink> = Arc::new(StreamSink {
            state: state.clone(),
            options: options.clone(),
        });
        let queue = Arc::new(Queue::new(sink, codes));
        queue.set_retry_interval(retry_interval);
        Arc::new(Self {
            state,
            options,
            queue,
            listeners: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn state(&self) -> StateKind {
        self.state.read().unwrap().kind()
    }

    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.lock().unwrap().push(tx);
        rx
    }

    pub fn set_options(&self, update: OptionsUpdate) {
        let mut o = self.options.lock().unwrap();
        o.apply(update);
        self.queue.set_retry_interval(o.retry_interval);
    }

    pub fn options_snapshot(&self) -> Options {
        self.options.lock().unwrap().clone()
    }

    /// Begin connecting from `stopped` or `closed`, spawning a new
    /// generation of the connect/reconnect loop.
    pub fn start(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sup = self.clone();
        thread::Builder::new()
            .name("gc-client-supervisor".into())
            .spawn(move || sup.run(generation))
            .expect("failed to spawn supervisor thread");
    }

    /// `stop()`: destroy the stream, clear the queue, settle in `closed`.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnState::Closing);
        {
            let guard = self.state.read().unwrap();
            if let ConnState::Opened(stream) = &*guard {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        self.queue.clear();
        self.set_state(ConnState::Closed);
        self.emit(ConnectionEvent::Close);
    }

    fn set_state(&self, new: ConnState) {
        let kind = new.kind();
        *self.state.write().unwrap() = new;
        self.emit(ConnectionEvent::State(kind));
    }

    fn emit(&self, event: ConnectionEvent) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn run(self: Arc<Self>, generation: u64) {
        let mut attempt: u32 = 0;
        loop {
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            self.set_state(ConnState::Opening);
            let (host, port, connection_timeout, backoff, tcp_keep_alive, tcp_keep_alive_delay) = {
                let o = self.options.lock().unwrap();
                (
                    o.host.clone(),
                    o.port,
                    o.connection_timeout,
                    o.backoff(),
                    o.tcp_keep_alive,
                    o.tcp_keep_alive_initial_delay,
                )
            };
            attempt += 1;

            match connect_once(&host, port, connection_timeout, tcp_keep_alive, tcp_keep_alive_delay) {
                Ok(stream) => {
                    if self.generation.load(Ordering::SeqCst) != generation {
                        let _ = stream.shutdown(Shutdown::Both);
                        return;
                    }
                    let rx_stream = match stream.try_clone() {
                        Ok(s) => s,
                        Err(e) => {
                            self.emit(ConnectionEvent::Error(Arc::new(GcError::Connection(
                                ConnectionError::connection_lost(host, port).with_cause(e),
                            ))));
                            self.set_state(ConnState::Failed);
                            return;
                        }
                    };
                    info!("connected to {host}:{port}");
                    self.set_state(ConnState::Opened(stream));
                    self.queue.resume();
                    self.emit(ConnectionEvent::Connect);
                    let rx_self = self.clone();
                    thread::Builder::new()
                        .name("gc-client-rx".into())
                        .spawn(move || rx_self.rx_loop(rx_stream, generation))
                        .expect("failed to spawn rx thread");
                    return;
                }
                Err(e) => {
                    warn!("connect attempt {attempt} to {host}:{port} failed: {e}");
                    self.emit(ConnectionEvent::Error(Arc::new(GcError::Connection(e))));
                    match backoff.next_delay(attempt) {
                        Some(delay) => {
                            self.set_state(ConnState::Reopening);
                            thread::sleep(delay);
                            continue;
                        }
                        None => {
                            self.set_state(ConnState::Failed);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn rx_loop(self: Arc<Self>, mut stream: TcpStream, generation: u64) {
        let mut framer = FrameSplitter::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    self.on_disconnect(generation, None);
                    return;
                }
                Ok(n) => {
                    for line in framer.feed(&buf[..n]) {
                        self.queue.handle_response(&line);
                    }
                }
                Err(e) => {
                    self.on_disconnect(generation, Some(e));
                    return;
                }
            }
        }
    }

    /// Handle a TCP error or close observed while `opened`.
    fn on_disconnect(self: &Arc<Self>, generation: u64, cause: Option<io::Error>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let (host, port, reconnect, reconnect_delay) = {
            let o = self.options.lock().unwrap();
            (o.host.clone(), o.port, o.reconnect, o.reconnect_delay)
        };
        debug!("connection to {host}:{port} dropped: {cause:?}");
        self.queue.pause();
        let err = match cause {
            Some(e) => ConnectionError::connection_lost(host, port).with_cause(e),
            None => ConnectionError::connection_lost(host, port),
        };
        self.emit(ConnectionEvent::Close);
        self.emit(ConnectionEvent::Error(Arc::new(GcError::Connection(err))));

        if reconnect {
            self.set_state(ConnState::Opening);
            let sup = self.clone();
            thread::Builder::new()
                .name("gc-client-reconnect".into())
                .spawn(move || {
                    thread::sleep(reconnect_delay);
                    sup.run(generation);
                })
                .expect("failed to spawn reconnect thread");
        } else {
            self.set_state(ConnState::Closed);
        }
    }
}

fn connect_once(
    host: &str,
    port: u16,
    timeout: Duration,
    keep_alive: bool,
    keep_alive_delay: Duration,
) -> Result<TcpStream, ConnectionError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConnectionError::timed_out(host, port).with_cause(e))?
        .next()
        .ok_or_else(|| ConnectionError::timed_out(host, port))?;

    let stream =
        TcpStream::connect_timeout(&addr, timeout).map_err(|e| ConnectionError::timed_out(host, port).with_cause(e))?;

    if keep_alive {
        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new().with_time(keep_alive_delay);
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            warn!("failed to configure TCP keep-alive: {e}");
        }
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::BuiltinCodes;
    use crate::queue::PushOptions;
    use std::net::TcpListener;

    fn test_options(port: u16) -> Options {
        let mut o = Options::new("127.0.0.1", port);
        o.connection_timeout = Duration::from_millis(500);
        o.queue_timeout = Duration::from_secs(2);
        o.send_timeout = Duration::from_secs(2);
        o.reconnect = false;
        o
    }

    #[test]
    fn connects_and_resolves_a_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"getversion\r");
            stream.write_all(b"710-1005-05\r").unwrap();
        });

        let sup = Supervisor::new(test_options(port), Arc::new(BuiltinCodes::new()));
        let events = sup.subscribe();
        sup.start();

        let rx = sup.queue().push(
            "getversion\r".to_string(),
            PushOptions {
                send_timeout: Duration::from_secs(2),
                queue_timeout: Duration::from_secs(2),
                priority: false,
            },
        );
        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result.unwrap(), "710-1005-05");

        let mut saw_connect = false;
        while let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
            if matches!(event, ConnectionEvent::Connect) {
                saw_connect = true;
            }
        }
        assert!(saw_connect);
        assert_eq!(sup.state(), StateKind::Opened);
    }

    #[test]
    fn stop_clears_pending_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let _ = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(5));
        });

        let sup = Supervisor::new(test_options(port), Arc::new(BuiltinCodes::new()));
        sup.start();
        thread::sleep(Duration::from_millis(200));

        let rx = sup.queue().push(
            "getdevices\r".to_string(),
            PushOptions {
                send_timeout: Duration::from_secs(5),
                queue_timeout: Duration::from_secs(5),
                priority: false,
            },
        );
        sup.stop();
        let result = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(matches!(result, Err(GcError::QueueCleared)));
        assert_eq!(sup.state(), StateKind::Closed);
    }

    #[test]
    fn connect_failure_without_reconnect_reaches_failed() {
        // Nothing listens on this port.
        let sup = Supervisor::new(test_options(1), Arc::new(BuiltinCodes::new()));
        sup.set_options(OptionsUpdate {
            backoff_fail_after: Some(1),
            backoff_initial_delay: Some(Duration::from_millis(10)),
            backoff_max_delay: Some(Duration::from_millis(20)),
            connection_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        sup.start();
        thread::sleep(Duration::from_millis(500));
        assert_eq!(sup.state(), StateKind::Failed);
    }
}
