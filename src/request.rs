//! The client side: one named call per send.
//!
//! A [`Request`] connects, ships one `{name, args}` envelope, and either
//! waits for the bare JSON reply or hands the wait to a detached thread
//! that throws the reply away.

use std::{thread, time::Duration};

use log::debug;
use serde_json::Value;

use crate::{
    codec::Codec,
    connection::{self, Connection, ConnectionFactory, default_connection},
    envelope,
    error::Error,
};

/// Calls named functions on a remote [`Listener`](crate::Listener).
///
/// Reusable: a waited call keeps its connection for the next send, while
/// a fire-and-forget call gives its connection to the detached waiter
/// and the next send builds a fresh one.
pub struct Request {
    connection: Option<Box<dyn Connection>>,
    factory: Option<ConnectionFactory>,
    codec: Codec,
    result: Value,
}

impl Request {
    pub fn new() -> Self {
        Self {
            connection: None,
            factory: None,
            codec: Codec::default(),
            result: Value::Null,
        }
    }

    /// Replaces the serialization hooks. Both peers of an exchange must
    /// agree on them.
    pub fn set_codec(&mut self, codec: Codec) {
        self.codec = codec;
    }

    /// Replaces how outbound transports are built.
    pub fn set_connection_factory<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Connection> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
    }

    /// The value returned by the last successful waited call.
    ///
    /// A failed or fire-and-forget call leaves the previous value in
    /// place; check what [`send`](Self::send) returned before trusting
    /// it.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Calls `name` with `args` on the listener at `address:port`.
    ///
    /// The connect and the framed request send always happen on the
    /// calling thread and report their own failures. With
    /// `wait_for_result` the call then blocks for the reply, up to
    /// `timeout`, and stores it in [`result`](Self::result). Without it
    /// the call returns as soon as the request is handed off and a
    /// detached thread waits out the reply and discards it; nothing
    /// downstream of the send is ever surfaced.
    pub fn send(
        &mut self,
        address: &str,
        port: u16,
        name: &str,
        args: &Value,
        wait_for_result: bool,
        timeout: Duration,
    ) -> Result<(), Error> {
        let text =
            serde_json::to_string(&envelope::build(name, args)).map_err(|_| Error::BadJson)?;
        let bytes = (self.codec.serialize)(&text).ok_or(Error::BadString)?;

        let mut conn = match self.connection.take() {
            Some(conn) => conn,
            None => match &self.factory {
                Some(factory) => factory(),
                None => default_connection()?,
            },
        };

        if let Err(err) = open_and_send(conn.as_mut(), address, port, &bytes) {
            self.connection = Some(conn);
            return Err(err);
        }

        if wait_for_result {
            let outcome = await_reply(conn.as_mut(), &self.codec, timeout);
            self.connection = Some(conn);
            self.result = outcome?;
            Ok(())
        } else {
            let codec = self.codec;
            let spawned = thread::Builder::new()
                .name("farcall-waiter".into())
                .spawn(move || {
                    // Whatever comes back is thrown away, errors and all.
                    if let Err(err) = await_reply(conn.as_mut(), &codec, timeout) {
                        debug!("detached wait ended: {err}");
                    }
                });
            match spawned {
                Ok(_) => Ok(()),
                Err(err) => {
                    debug!("waiter spawn failed: {err}");
                    Err(Error::Net)
                }
            }
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens the outbound stream and ships the request frame. The
/// connection is closed on any failure.
fn open_and_send(
    conn: &mut dyn Connection,
    address: &str,
    port: u16,
    bytes: &[u8],
) -> Result<(), Error> {
    if let Err(err) = conn.setup(0) {
        debug!("local setup failed: {err}");
        let _ = conn.stop();
        return Err(Error::Net);
    }
    if let Err(err) = conn.connect(address, port) {
        debug!("connect to {address}:{port} failed: {err}");
        let _ = conn.stop();
        return Err(Error::Net);
    }
    if let Err(err) = conn.send(bytes) {
        debug!("request send failed: {err}");
        let _ = conn.stop();
        return Err(Error::Net);
    }
    Ok(())
}

/// Waits out the reply frame, closes the connection, then decodes.
fn await_reply(
    conn: &mut dyn Connection,
    codec: &Codec,
    timeout: Duration,
) -> Result<Value, Error> {
    let reply = match connection::wait_frame(conn, timeout) {
        Ok(reply) => reply,
        Err(err) => {
            let _ = conn.stop();
            return Err(err);
        }
    };
    let _ = conn.stop();

    let text = (codec.deserialize)(&reply).ok_or(Error::BadReturn)?;
    serde_json::from_str(&text).map_err(|_| Error::BadReturn)
}
