//! Connection to a document server.
//!
//! # Overview
//!
//! A [`Client`] owns one TCP connection and one background receive thread.
//! Queries are written from the calling thread; responses are read,
//! reassembled and correlated on the receive thread, then handed back to the
//! application when it calls [`Client::process`].
//!
//! # Delivery Modes
//!
//! - **Correlated** (default): each query occupies a slot in a fixed ring and
//!   carries its own [`QueryCallback`]. Responses are delivered in submission
//!   order. When a response arrives for a later query, every earlier query
//!   still waiting is resolved with a synthesized lost response
//!   ([`Message::lost`]).
//! - **Streaming**: selected by [`ClientOptions::on_stream`]. Responses go
//!   onto a [`CompletionQueue`] in arrival order and one shared callback
//!   receives them all.
//!
//! # Key Components
//!
//! - [`ring`]: the pending-query ring for correlated mode.
//! - [`queue`]: the completion queue for streaming mode.
//! - [`wake`]: the wake channel blocked drainers sleep on.
//!
//! # Example
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use opo::{Client, ClientOptions};
//!
//! let client = Client::connect("localhost", 6363, ClientOptions::default()).unwrap();
//!
//! let mut b = client.builder();
//! b.push_object(None).unwrap();
//! b.push_string(Some("select"), "$ref").unwrap();
//! let mut query = b.take().unwrap();
//!
//! client
//!     .query(
//!         &mut query,
//!         Some(Box::new(|id: u64, response: opo::Message| {
//!             println!("{id}: {:?}", opo::wire::json::from_message(&response, None));
//!         })),
//!     )
//!     .unwrap();
//! client.process(1, Duration::from_secs(2));
//! ```
pub mod queue;
mod receiver;
pub mod ring;
pub mod wake;

use std::{
    fmt,
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};

use crate::{
    dict::Dictionary,
    error::{ErrorKind, OpoError, Result},
    wire::{Builder, Message},
};

pub use queue::CompletionQueue;
pub use ring::QueryCallback;

use queue::{BACKOFF, remaining};
use ring::Ring;

/// Connection status updates: connected flag, error kind if any, message.
pub type StatusCallback = Arc<dyn Fn(bool, Option<ErrorKind>, &str) + Send + Sync>;

/// Shared response callback for streaming mode.
pub type StreamCallback = Arc<dyn Fn(u64, Message) + Send + Sync>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_PENDING_MAX: usize = 4096;

const CONNECT_DEADLINE: Duration = Duration::from_secs(2);
const CONNECT_RETRY: Duration = Duration::from_millis(1);

/// Socket read timeout; bounds how long the receive thread takes to notice a
/// close.
const READ_POLL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ClientOptions {
    timeout: Duration,
    pending_max: usize,
    blocking: bool,
    status: Option<StatusCallback>,
    stream: Option<StreamCallback>,
    words: Option<Vec<String>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            pending_max: DEFAULT_PENDING_MAX,
            blocking: true,
            status: None,
            stream: None,
            words: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("timeout", &self.timeout)
            .field("pending_max", &self.pending_max)
            .field("blocking", &self.blocking)
            .field("status", &self.status.is_some())
            .field("stream", &self.stream.is_some())
            .field("words", &self.words)
            .finish()
    }
}

impl ClientOptions {
    /// How long a query waits for room when too many are pending. Zero
    /// fails immediately with [`OpoError::Busy`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ring size in correlated mode, pending limit in streaming mode.
    pub fn pending_max(mut self, pending_max: usize) -> Self {
        self.pending_max = pending_max.max(1);
        self
    }

    /// Whether [`Client::process`] sleeps on a wake channel (`true`) or polls.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn on_status<F>(mut self, status: F) -> Self
    where
        F: Fn(bool, Option<ErrorKind>, &str) + Send + Sync + 'static,
    {
        self.status = Some(Arc::new(status));
        self
    }

    /// Switches the connection to streaming mode.
    pub fn on_stream<F>(mut self, stream: F) -> Self
    where
        F: Fn(u64, Message) + Send + Sync + 'static,
    {
        self.stream = Some(Arc::new(stream));
        self
    }

    /// Words for the connection's [`Dictionary`].
    pub fn words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.words = Some(words.into_iter().map(Into::into).collect());
        self
    }
}

pub(crate) enum Mode {
    Correlated(Ring),
    Streaming {
        queue: CompletionQueue,
        pending: AtomicUsize,
        callback: StreamCallback,
    },
}

/// State shared with the receive thread.
pub(crate) struct Shared {
    active: AtomicBool,
    pub(crate) mode: Mode,
    status: Option<StatusCallback>,
}

impl Shared {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Logs a connection event and forwards it to the status callback.
    pub(crate) fn report(&self, connected: bool, kind: Option<ErrorKind>, message: &str) {
        match kind {
            None => info!("{message}"),
            Some(kind) => warn!("{kind}: {message}"),
        }
        if let Some(status) = &self.status {
            status(connected, kind, message);
        }
    }

    fn pending(&self) -> usize {
        match &self.mode {
            Mode::Correlated(ring) => ring.pending(),
            Mode::Streaming { pending, .. } => pending.load(Ordering::Acquire),
        }
    }

    fn ready(&self) -> usize {
        match &self.mode {
            Mode::Correlated(ring) => ring.ready(),
            Mode::Streaming { queue, .. } => queue.len(),
        }
    }

    /// Queries sent but not yet answered.
    pub(crate) fn outstanding(&self) -> usize {
        match &self.mode {
            Mode::Correlated(ring) => ring.pending(),
            Mode::Streaming { .. } => self.pending().saturating_sub(self.ready()),
        }
    }
}

#[derive(Debug)]
struct Writer {
    stream: TcpStream,
    /// Next ring sequence number in correlated mode.
    tail: u64,
}

pub struct Client {
    shared: Arc<Shared>,
    writer: Mutex<Writer>,
    next_id: AtomicU64,
    timeout: Duration,
    pending_max: usize,
    blocking: bool,
    dict: Option<Arc<Dictionary>>,
    peer: String,
    receiver: Option<JoinHandle<()>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer)
            .field("pending", &self.pending_count())
            .field("ready", &self.ready_count())
            .finish()
    }
}

impl Client {
    /// Connects to `host:port` and starts the receive thread.
    ///
    /// # Errors
    ///
    /// - [`OpoError::Overflow`] if the dictionary words do not fit.
    /// - [`OpoError::Network`] if no address accepts a connection within two
    ///   seconds.
    /// - [`OpoError::Thread`] if the receive thread cannot be started.
    pub fn connect(host: &str, port: u16, options: ClientOptions) -> Result<Self> {
        let dict = match &options.words {
            Some(words) => Some(Arc::new(Dictionary::new(words)?)),
            None => None,
        };

        let peer = format!("{host}:{port}");
        let stream = open(host, port)?;
        let network = |source: io::Error| OpoError::Network {
            context: format!("configuring connection to {peer}"),
            source,
        };
        stream.set_nodelay(true).map_err(network)?;
        stream.set_read_timeout(Some(READ_POLL)).map_err(network)?;
        let reader = stream.try_clone().map_err(network)?;

        let pending_max = options.pending_max.max(1);
        let mode = match options.stream {
            Some(callback) => Mode::Streaming {
                queue: CompletionQueue::new(pending_max),
                pending: AtomicUsize::new(0),
                callback,
            },
            None => Mode::Correlated(Ring::new(pending_max)),
        };
        let shared = Arc::new(Shared {
            active: AtomicBool::new(true),
            mode,
            status: options.status,
        });

        let receiver = thread::Builder::new()
            .name("opo-receiver".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || receiver::run(shared, reader)
            })
            .map_err(OpoError::Thread)?;

        shared.report(true, None, &format!("connected to {peer}"));

        Ok(Self {
            shared,
            writer: Mutex::new(Writer { stream, tail: 0 }),
            next_id: AtomicU64::new(1),
            timeout: options.timeout,
            pending_max,
            blocking: options.blocking,
            dict,
            peer,
            receiver: Some(receiver),
        })
    }

    /// Stamps `msg` with a fresh correlation id and sends it. Returns the id.
    ///
    /// In correlated mode `callback` runs from [`process`](Self::process)
    /// with the response. In streaming mode it is ignored and the shared
    /// stream callback receives the response instead.
    ///
    /// # Errors
    ///
    /// - [`OpoError::Busy`] if no room frees up within the client timeout.
    /// - [`OpoError::Write`] if the socket write fails.
    pub fn query(&self, msg: &mut Message, callback: Option<QueryCallback>) -> Result<u64> {
        self.query_with_timeout(msg, callback, self.timeout)
    }

    /// [`query`](Self::query) with a per-call wait budget.
    pub fn query_with_timeout(
        &self,
        msg: &mut Message,
        callback: Option<QueryCallback>,
        timeout: Duration,
    ) -> Result<u64> {
        match &self.shared.mode {
            Mode::Correlated(ring) => {
                let mut writer = self.writer.lock().map_err(|_| OpoError::Lock("writer"))?;
                let seq = writer.tail;
                if !ring.wait_free(seq, timeout) {
                    return Err(OpoError::Busy(format!(
                        "{} queries pending, none answered within {timeout:?}",
                        ring.pending()
                    )));
                }

                let id = self.next_id();
                ring.submit(seq, id, callback);
                writer.tail = seq + 1;
                msg.set_id(id);
                writer.stream.write_all(msg.as_bytes()).map_err(OpoError::Write)?;
                trace!("query {id} sent, {} bytes", msg.len());
                Ok(id)
            }
            Mode::Streaming { pending, .. } => {
                if callback.is_some() {
                    debug!("per-query callback ignored in streaming mode");
                }
                let waiting = pending.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                if waiting > self.pending_max && !self.wait_pending(pending, timeout) {
                    pending.fetch_sub(1, Ordering::AcqRel);
                    return Err(OpoError::Busy(format!(
                        "more than {} queries pending after {timeout:?}",
                        self.pending_max
                    )));
                }

                let mut writer = match self.writer.lock() {
                    Ok(writer) => writer,
                    Err(_) => {
                        pending.fetch_sub(1, Ordering::AcqRel);
                        return Err(OpoError::Lock("writer"));
                    }
                };
                let id = self.next_id();
                msg.set_id(id);
                if let Err(e) = writer.stream.write_all(msg.as_bytes()) {
                    pending.fetch_sub(1, Ordering::AcqRel);
                    return Err(OpoError::Write(e));
                }
                trace!("query {id} sent, {} bytes", msg.len());
                Ok(id)
            }
        }
    }

    fn wait_pending(&self, pending: &AtomicUsize, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if pending.load(Ordering::Acquire) <= self.pending_max {
                return true;
            }
            let Some(remaining) = remaining(deadline) else {
                return false;
            };
            thread::sleep(BACKOFF.min(remaining));
        }
    }

    fn next_id(&self) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Hands completed responses to their callbacks.
    ///
    /// Drains up to `max` completions (`0` for no limit), waiting up to
    /// `wait` for each; a zero `wait` never blocks. Returns how many were
    /// handed over, counting correlated queries sent without a callback.
    pub fn process(&self, max: usize, wait: Duration) -> usize {
        let mut count = 0;
        while max == 0 || count < max {
            match &self.shared.mode {
                Mode::Correlated(ring) => {
                    let Some(done) = ring.take(wait, self.blocking) else {
                        break;
                    };
                    if let Some(callback) = done.callback {
                        callback(done.id, done.response);
                    }
                    ring.release(done.seq);
                }
                Mode::Streaming {
                    queue,
                    pending,
                    callback,
                } => {
                    let next = if self.blocking {
                        queue.pop_blocking(wait)
                    } else {
                        queue.pop(wait)
                    };
                    let Some(msg) = next else {
                        break;
                    };
                    let id = msg.id();
                    callback(id, msg);
                    if pending
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
                        .is_err()
                    {
                        debug!("response {id} arrived with no query pending");
                    }
                }
            }
            count += 1;
        }
        count
    }

    /// Queries sent and not yet answered. In streaming mode this also counts
    /// responses not yet processed.
    pub fn pending_count(&self) -> usize {
        self.shared.pending()
    }

    /// Responses waiting for [`process`](Self::process).
    pub fn ready_count(&self) -> usize {
        self.shared.ready()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.shared.mode, Mode::Streaming { .. })
    }

    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        self.dict.as_ref()
    }

    /// A builder that uses this connection's dictionary.
    pub fn builder(&self) -> Builder {
        let mut b = Builder::new();
        b.set_dictionary(self.dict.clone());
        b
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Closes the connection and waits for the receive thread to exit.
    /// Queries still pending are abandoned.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        self.shared.active.store(false, Ordering::Release);
        if let Mode::Streaming { queue, .. } = &self.shared.mode {
            queue.close();
        }

        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.stream.shutdown(Shutdown::Both) {
            debug!("socket shutdown for {}: {e}", self.peer);
        }
        drop(writer);

        if receiver.join().is_err() {
            warn!("receive thread for {} panicked", self.peer);
        }
        self.shared.report(false, None, "connection closed");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tries every resolved address until one connects or the connect deadline
/// passes.
fn open(host: &str, port: u16) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| OpoError::Network {
            context: format!("resolving {host}:{port}"),
            source,
        })?
        .collect();

    let deadline = Instant::now() + CONNECT_DEADLINE;
    let mut last = None;
    loop {
        for addr in &addrs {
            let budget = deadline
                .saturating_duration_since(Instant::now())
                .max(CONNECT_RETRY);
            match TcpStream::connect_timeout(addr, budget) {
                Ok(stream) => {
                    debug!("connected to {addr}");
                    return Ok(stream);
                }
                Err(e) => {
                    trace!("connect to {addr} failed: {e}");
                    last = Some(e);
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(OpoError::Network {
                context: format!("connecting to {host}:{port}"),
                source: last.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved")
                }),
            });
        }
        thread::sleep(CONNECT_RETRY);
    }
}
