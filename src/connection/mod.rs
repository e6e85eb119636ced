//! Transport abstraction for framed byte streams.
//!
//! # Overview
//!
//! Everything above this module speaks in whole payloads; everything
//! below it is a byte stream. A [`Connection`] carries both halves of
//! that bargain: it frames outgoing payloads with a two byte length
//! prefix and hands incoming bytes back only as complete frames.
//!
//! The listener and request machinery hold connections strictly as
//! `Box<dyn Connection>` built through a [`ConnectionFactory`], so an
//! embedder can swap the stock TCP transport for an in-memory pipe, a
//! serial line, or a test double without touching the call machinery.
//!
//! # Key Components
//!
//! - [`Connection`]: the framed stream capability itself.
//! - [`ConnectionFactory`]: how listeners and requests mint fresh
//!   connections.
//! - [`TcpConnection`]: the stock transport, behind the `tcp` feature.
//! - [`frame`]: the length prefix layout, for custom transports that
//!   want to stay wire compatible.

pub mod frame;

#[cfg(feature = "tcp")]
mod tcp;

#[cfg(feature = "tcp")]
pub use tcp::TcpConnection;

use std::{
    io, thread,
    time::{Duration, Instant},
};

use crate::error::Error;

/// How long a waiter sleeps between polls of a quiet connection.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A framed, connection-oriented byte stream.
///
/// Every method is non-blocking in spirit: `accept` and `recv` report
/// "nothing yet" as `Ok(None)` rather than parking the caller, and the
/// machinery above supplies its own polling cadence. Errors mean the
/// endpoint is no longer usable for that operation, not that the caller
/// should retry.
pub trait Connection: Send {
    /// Claims a local port for a later [`listen`](Connection::listen).
    ///
    /// Must be called on a fresh endpoint. The claim is released by
    /// [`stop`](Connection::stop).
    fn setup(&mut self, port: u16) -> io::Result<()>;

    /// Tears the endpoint down and returns it to its fresh state.
    ///
    /// Safe to call at any point in the lifecycle, including twice.
    fn stop(&mut self) -> io::Result<()>;

    /// Opens an outbound stream to a listening peer.
    fn connect(&mut self, address: &str, port: u16) -> io::Result<()>;

    /// Starts accepting inbound streams on the port given to
    /// [`setup`](Connection::setup). `backlog` is a hint for the queue
    /// of not-yet-accepted peers; a transport may ignore it.
    fn listen(&mut self, backlog: u32) -> io::Result<()>;

    /// Takes one waiting inbound stream, or `Ok(None)` if nobody is
    /// knocking right now.
    fn accept(&mut self) -> io::Result<Option<Box<dyn Connection>>>;

    /// Frames `payload` and queues it for the peer.
    ///
    /// Fails without writing anything when the payload exceeds
    /// [`frame::MAX_PAYLOAD`].
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Takes one complete inbound frame, or `Ok(None)` if no frame has
    /// fully arrived yet.
    fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// The local port actually bound, once there is one. Lets callers
    /// bind port zero and discover the kernel's pick.
    fn local_port(&self) -> Option<u16> {
        None
    }
}

/// Mints fresh transport endpoints for listeners and requests.
pub type ConnectionFactory = Box<dyn Fn() -> Box<dyn Connection> + Send + Sync>;

/// Builds the stock transport, or reports that this build has none.
pub fn default_connection() -> Result<Box<dyn Connection>, Error> {
    #[cfg(feature = "tcp")]
    {
        Ok(Box::new(TcpConnection::new()))
    }
    #[cfg(not(feature = "tcp"))]
    {
        Err(Error::NoTransport)
    }
}

/// Polls `conn` until a frame lands or `timeout` runs out.
///
/// Always makes at least one attempt, so a zero timeout still drains a
/// frame that already arrived.
pub(crate) fn wait_frame(conn: &mut dyn Connection, timeout: Duration) -> Result<Vec<u8>, Error> {
    let start = Instant::now();
    loop {
        match conn.recv() {
            Ok(Some(payload)) => return Ok(payload),
            Ok(None) => {}
            Err(_) => return Err(Error::Net),
        }
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
