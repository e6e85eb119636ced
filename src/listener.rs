//! The server side: accepts connections and dispatches named calls.
//!
//! A [`Listener`] owns the dispatch table, a bounded worker pool and the
//! listening transport. In threaded mode a background acceptor drives
//! the accept/dispatch cycle; with `max_workers == 0` the embedder
//! drives it by calling [`Listener::update`].

use std::{
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde_json::Value;

use crate::{
    codec::Codec,
    connection::{self, Connection, ConnectionFactory, POLL_INTERVAL, default_connection},
    envelope,
    error::Error,
    registry::Registry,
};

/// How long one run of the threaded accept/dispatch cycle lasts before
/// the acceptor rechecks the running flag.
const ACCEPT_SLICE: Duration = Duration::from_secs(1);

/// How often `stop` rechecks the live worker count.
const STOP_POLL: Duration = Duration::from_millis(50);

/// How long a served connection is held open after its reply goes out,
/// so an eager close cannot truncate bytes still in flight.
const REPLY_LINGER: Duration = Duration::from_millis(500);

/// State shared between the listener handle, the acceptor and workers.
struct Shared {
    running: AtomicBool,
    workers: AtomicU32,
    max_workers: AtomicU32,
    timeout_ms: AtomicU64,
    status: Mutex<Result<(), Error>>,
    conn: Mutex<Option<Box<dyn Connection>>>,
    registry: RwLock<Registry>,
    codec: Mutex<Codec>,
}

/// Serves registered functions to remote callers.
///
/// Configure while stopped (every setter refuses with
/// [`Error::AlreadyRunning`] once running), then [`start`](Self::start).
/// A stopped listener keeps its table and hooks and can be started
/// again.
pub struct Listener {
    shared: Arc<Shared>,
    factory: Option<ConnectionFactory>,
    acceptor: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                workers: AtomicU32::new(0),
                max_workers: AtomicU32::new(0),
                timeout_ms: AtomicU64::new(1_000),
                status: Mutex::new(Err(Error::Net)),
                conn: Mutex::new(None),
                registry: RwLock::new(Registry::default()),
                codec: Mutex::new(Codec::default()),
            }),
            factory: None,
            acceptor: None,
        }
    }

    fn guard_stopped(&self) -> Result<(), Error> {
        if self.shared.running.load(Ordering::SeqCst) {
            Err(Error::AlreadyRunning)
        } else {
            Ok(())
        }
    }

    /// Binds `name` to `handler`. A name that is already bound keeps its
    /// existing handler and the call reports [`Error::Collision`].
    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<(), Error>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.guard_stopped()?;
        self.shared
            .registry
            .write()
            .unwrap()
            .bind(name, Box::new(handler))
    }

    /// Installs the handler invoked for names with no binding of their
    /// own. Without one, unmatched requests are dropped without a reply.
    pub fn set_default_handler<F>(&mut self, handler: F) -> Result<(), Error>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.guard_stopped()?;
        self.shared
            .registry
            .write()
            .unwrap()
            .set_fallback(Box::new(handler));
        Ok(())
    }

    /// Replaces the serialization hooks. Both peers of an exchange must
    /// agree on them.
    pub fn set_codec(&mut self, codec: Codec) -> Result<(), Error> {
        self.guard_stopped()?;
        *self.shared.codec.lock().unwrap() = codec;
        Ok(())
    }

    /// Replaces how the listening transport is built on `start`.
    pub fn set_connection_factory<F>(&mut self, factory: F) -> Result<(), Error>
    where
        F: Fn() -> Box<dyn Connection> + Send + Sync + 'static,
    {
        self.guard_stopped()?;
        self.factory = Some(Box::new(factory));
        Ok(())
    }

    /// Binds `port` and begins serving.
    ///
    /// With `max_workers >= 1` a background acceptor thread runs the
    /// accept/dispatch cycle and spawns up to `max_workers` worker
    /// threads, one per accepted connection; connections past the budget
    /// are serviced inline by the acceptor itself. With
    /// `max_workers == 0` nothing runs until [`update`](Self::update)
    /// is called.
    ///
    /// `request_timeout` bounds how long a serviced connection may take
    /// to deliver its request frame.
    pub fn start(
        &mut self,
        port: u16,
        max_workers: u32,
        backlog: u32,
        request_timeout: Duration,
    ) -> Result<(), Error> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let mut conn = match &self.factory {
            Some(factory) => factory(),
            None => default_connection()?,
        };
        if let Err(err) = conn.setup(port) {
            warn!("port setup failed: {err}");
            return Err(Error::Net);
        }
        if let Err(err) = conn.listen(backlog) {
            warn!("listen failed: {err}");
            let _ = conn.stop();
            return Err(Error::Net);
        }
        if let Some(bound) = conn.local_port() {
            info!("listening on port {bound}");
        }

        self.shared.max_workers.store(max_workers, Ordering::SeqCst);
        self.shared.timeout_ms.store(
            u64::try_from(request_timeout.as_millis()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );
        *self.shared.conn.lock().unwrap() = Some(conn);
        self.shared.running.store(true, Ordering::SeqCst);

        if max_workers >= 1 {
            *self.shared.status.lock().unwrap() = Ok(());
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name("farcall-acceptor".into())
                .spawn(move || acceptor_main(shared));
            match spawned {
                Ok(handle) => self.acceptor = Some(handle),
                Err(err) => {
                    warn!("acceptor spawn failed: {err}");
                    self.shared.running.store(false, Ordering::SeqCst);
                    if let Some(mut conn) = self.shared.conn.lock().unwrap().take() {
                        let _ = conn.stop();
                    }
                    return Err(Error::Net);
                }
            }
        }
        Ok(())
    }

    /// Drives or inspects progress.
    ///
    /// With `max_workers == 0` this runs the accept/dispatch cycle on
    /// the calling thread for up to `timeout` and returns that run's
    /// outcome. In threaded mode it does no work and reports the last
    /// status the background acceptor observed, which may be stale.
    /// A stopped listener reports [`Error::Net`].
    pub fn update(&self, timeout: Duration) -> Result<(), Error> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(Error::Net);
        }
        if self.shared.max_workers.load(Ordering::SeqCst) == 0 {
            accept_cycle(&self.shared, timeout)
        } else {
            *self.shared.status.lock().unwrap()
        }
    }

    /// Stops serving. Blocks until the acceptor and every worker have
    /// exited, then closes the listening transport; no background thread
    /// touches it afterwards.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping listener");
        if let Some(acceptor) = self.acceptor.take() {
            // The acceptor finishes its current slice first.
            if acceptor.join().is_err() {
                warn!("acceptor thread panicked");
            }
        }
        while self.shared.workers.load(Ordering::SeqCst) > 0 {
            thread::sleep(STOP_POLL);
        }
        if let Some(mut conn) = self.shared.conn.lock().unwrap().take() {
            let _ = conn.stop();
        }
        info!("listener stopped");
    }

    /// The port the listening transport is bound to, while running.
    pub fn local_port(&self) -> Option<u16> {
        self.shared
            .conn
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|conn| conn.local_port())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decrements the live worker count when a worker exits, panic included.
struct WorkerGuard(Arc<Shared>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.workers.fetch_sub(1, Ordering::SeqCst);
    }
}

fn acceptor_main(shared: Arc<Shared>) {
    debug!("acceptor up");
    while shared.running.load(Ordering::SeqCst) {
        match accept_cycle(&shared, ACCEPT_SLICE) {
            Ok(()) => {}
            Err(Error::Net) => {
                *shared.status.lock().unwrap() = Err(Error::Net);
                warn!("acceptor exiting on transport failure");
                break;
            }
            // A failed inline request does not take the acceptor down.
            Err(err) => debug!("inline request failed: {err}"),
        }
    }
    debug!("acceptor down");
}

/// One bounded run of the accept/dispatch loop.
fn accept_cycle(shared: &Arc<Shared>, slice: Duration) -> Result<(), Error> {
    let started = Instant::now();
    loop {
        if started.elapsed() > slice {
            return Ok(());
        }
        let accepted = {
            let mut slot = shared.conn.lock().unwrap();
            let Some(conn) = slot.as_mut() else {
                // Shut down from under us between iterations.
                return Ok(());
            };
            match conn.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("accept failed: {err}");
                    return Err(Error::Net);
                }
            }
        };
        if let Some(peer) = accepted {
            dispatch_peer(shared, peer)?;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Hands an accepted connection to a worker thread while the budget
/// allows, otherwise services it on the calling thread.
fn dispatch_peer(shared: &Arc<Shared>, mut peer: Box<dyn Connection>) -> Result<(), Error> {
    let max_workers = shared.max_workers.load(Ordering::SeqCst);
    if shared.workers.load(Ordering::SeqCst) < max_workers {
        shared.workers.fetch_add(1, Ordering::SeqCst);
        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("farcall-worker".into())
            .spawn(move || {
                let _live = WorkerGuard(Arc::clone(&worker_shared));
                if let Err(err) = request_cycle(&worker_shared, peer.as_mut()) {
                    debug!("request failed: {err}");
                }
                let _ = peer.stop();
            });
        match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                shared.workers.fetch_sub(1, Ordering::SeqCst);
                warn!("worker spawn failed: {err}");
                Err(Error::Net)
            }
        }
    } else {
        // Intentional backpressure: accepting stalls while this
        // connection is serviced in line.
        let outcome = request_cycle(shared, peer.as_mut());
        let _ = peer.stop();
        outcome
    }
}

/// Serves one connection: one request frame in, at most one reply out.
fn request_cycle(shared: &Shared, conn: &mut dyn Connection) -> Result<(), Error> {
    let timeout = Duration::from_millis(shared.timeout_ms.load(Ordering::SeqCst));
    let payload = connection::wait_frame(conn, timeout)?;

    let codec = *shared.codec.lock().unwrap();
    let text = (codec.deserialize)(&payload).ok_or(Error::BadString)?;
    let (name, args) = envelope::split(&text)?;
    debug!("dispatching {name:?}");

    let result = {
        let registry = shared.registry.read().unwrap();
        match registry.dispatch(&name, &args) {
            Some(result) => result,
            None => {
                // No binding and no fallback: drop the request without a
                // reply and let the caller run out its own clock.
                debug!("no handler for {name:?}");
                return Ok(());
            }
        }
    };

    let mut outcome = Ok(());
    let reply = match serde_json::to_string(&result) {
        Ok(reply) => reply,
        Err(_) => {
            outcome = Err(Error::BadReturn);
            String::from("{}")
        }
    };
    let bytes = match (codec.serialize)(&reply) {
        Some(bytes) => bytes,
        None => {
            outcome = Err(Error::BadReturn);
            vec![0u8]
        }
    };
    if let Err(err) = conn.send(&bytes) {
        warn!("reply send failed: {err}");
        return Err(Error::Net);
    }

    // Give the peer time to drain the reply before the connection drops.
    thread::sleep(REPLY_LINGER);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{collections::VecDeque, io};

    struct FakeConn {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl FakeConn {
        fn with_request(text: &str) -> Self {
            Self {
                inbox: VecDeque::from([text.as_bytes().to_vec()]),
                sent: Vec::new(),
            }
        }
    }

    impl Connection for FakeConn {
        fn setup(&mut self, _port: u16) -> io::Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn connect(&mut self, _address: &str, _port: u16) -> io::Result<()> {
            Ok(())
        }
        fn listen(&mut self, _backlog: u32) -> io::Result<()> {
            Ok(())
        }
        fn accept(&mut self) -> io::Result<Option<Box<dyn Connection>>> {
            Ok(None)
        }
        fn send(&mut self, payload: &[u8]) -> io::Result<()> {
            self.sent.push(payload.to_vec());
            Ok(())
        }
        fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.inbox.pop_front())
        }
    }

    fn quick_timeout(listener: &Listener) {
        listener.shared.timeout_ms.store(30, Ordering::SeqCst);
    }

    #[test]
    fn cycle_invokes_the_handler_and_replies() {
        let mut listener = Listener::new();
        listener
            .register("double", |args| json!(args["n"].as_i64().unwrap() * 2))
            .unwrap();

        let mut conn = FakeConn::with_request(r#"{"name":"double","args":{"n":21}}"#);
        request_cycle(&listener.shared, &mut conn).unwrap();
        assert_eq!(conn.sent, vec![b"42".to_vec()]);
    }

    #[test]
    fn cycle_stays_silent_for_unknown_names() {
        let listener = Listener::new();
        let mut conn = FakeConn::with_request(r#"{"name":"ghost","args":null}"#);
        request_cycle(&listener.shared, &mut conn).unwrap();
        assert!(conn.sent.is_empty());
    }

    #[test]
    fn cycle_rejects_a_garbled_envelope() {
        let listener = Listener::new();
        let mut conn = FakeConn::with_request("not an envelope");
        let err = request_cycle(&listener.shared, &mut conn).unwrap_err();
        assert_eq!(err, Error::BadJson);
        assert!(conn.sent.is_empty());
    }

    #[test]
    fn cycle_times_out_without_a_request() {
        let listener = Listener::new();
        quick_timeout(&listener);
        let mut conn = FakeConn {
            inbox: VecDeque::new(),
            sent: Vec::new(),
        };
        let err = request_cycle(&listener.shared, &mut conn).unwrap_err();
        assert_eq!(err, Error::Timeout);
    }

    #[test]
    fn cycle_reports_a_rejected_decode() {
        let mut listener = Listener::new();
        listener
            .set_codec(Codec {
                serialize: crate::codec::identity_serialize,
                deserialize: |_| None,
            })
            .unwrap();
        let mut conn = FakeConn::with_request(r#"{"name":"f","args":1}"#);
        let err = request_cycle(&listener.shared, &mut conn).unwrap_err();
        assert_eq!(err, Error::BadString);
    }

    #[test]
    fn cycle_falls_back_to_a_zero_byte_on_encode_failure() {
        let mut listener = Listener::new();
        listener.register("f", |_| json!(1)).unwrap();
        listener
            .set_codec(Codec {
                serialize: |_| None,
                deserialize: crate::codec::identity_deserialize,
            })
            .unwrap();
        let mut conn = FakeConn::with_request(r#"{"name":"f","args":null}"#);
        let err = request_cycle(&listener.shared, &mut conn).unwrap_err();
        assert_eq!(err, Error::BadReturn);
        assert_eq!(conn.sent, vec![vec![0u8]]);
    }

    #[test]
    fn mutations_refused_while_running() {
        let mut listener = Listener::new();
        listener.shared.running.store(true, Ordering::SeqCst);

        let err = listener.register("f", |_| json!(null)).unwrap_err();
        assert_eq!(err, Error::AlreadyRunning);
        let err = listener.set_default_handler(|_| json!(null)).unwrap_err();
        assert_eq!(err, Error::AlreadyRunning);
        let err = listener.set_codec(Codec::default()).unwrap_err();
        assert_eq!(err, Error::AlreadyRunning);
        let err = listener
            .set_connection_factory(|| {
                Box::new(FakeConn {
                    inbox: VecDeque::new(),
                    sent: Vec::new(),
                })
            })
            .unwrap_err();
        assert_eq!(err, Error::AlreadyRunning);
    }

    #[test]
    fn update_on_a_stopped_listener_is_a_transport_error() {
        let listener = Listener::new();
        assert_eq!(
            listener.update(Duration::from_millis(1)).unwrap_err(),
            Error::Net
        );
    }
}
