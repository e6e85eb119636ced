//! Stock TCP transport.
//!
//! A [`TcpConnection`] walks one endpoint through its lifecycle: fresh,
//! port claimed by `setup`, then either listening or connected, and back
//! to fresh on `stop`. The claim from `setup` is realized lazily: a
//! later `listen` binds it, while `connect` opens an outbound stream
//! (an ephemeral local port, the only claim requests ever make).
//!
//! `recv` is non-blocking until the first byte of a frame shows up, then
//! reads the whole frame blocking. A peer that goes away cleanly before
//! sending anything reads as idle, not as an error: whoever is waiting
//! on that connection runs out their own clock instead. A peer that dies
//! mid frame is a hard error.

use std::{
    io::{self, Write},
    net::{Ipv4Addr, TcpListener, TcpStream},
};

use log::{debug, trace};

use super::{Connection, frame};

#[derive(Debug, Default)]
enum Endpoint {
    #[default]
    Fresh,
    Bound {
        port: u16,
    },
    Listening(TcpListener),
    Connected(TcpStream),
}

/// TCP-backed [`Connection`], one per endpoint.
#[derive(Debug, Default)]
pub struct TcpConnection {
    endpoint: Endpoint,
}

impl TcpConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrap(stream: TcpStream) -> Self {
        Self {
            endpoint: Endpoint::Connected(stream),
        }
    }
}

fn out_of_order(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{op}: endpoint not ready"))
}

impl Connection for TcpConnection {
    fn setup(&mut self, port: u16) -> io::Result<()> {
        match self.endpoint {
            Endpoint::Fresh => {
                self.endpoint = Endpoint::Bound { port };
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "endpoint already set up",
            )),
        }
    }

    fn stop(&mut self) -> io::Result<()> {
        // Dropping the socket closes it.
        self.endpoint = Endpoint::Fresh;
        Ok(())
    }

    fn connect(&mut self, address: &str, port: u16) -> io::Result<()> {
        match self.endpoint {
            Endpoint::Bound { .. } => {
                let stream = TcpStream::connect((address, port))?;
                debug!("connected to {address}:{port}");
                self.endpoint = Endpoint::Connected(stream);
                Ok(())
            }
            _ => Err(out_of_order("connect")),
        }
    }

    fn listen(&mut self, _backlog: u32) -> io::Result<()> {
        // The standard library picks its own backlog.
        match self.endpoint {
            Endpoint::Bound { port } => {
                let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
                listener.set_nonblocking(true)?;
                debug!("listening on port {}", listener.local_addr()?.port());
                self.endpoint = Endpoint::Listening(listener);
                Ok(())
            }
            _ => Err(out_of_order("listen")),
        }
    }

    fn accept(&mut self) -> io::Result<Option<Box<dyn Connection>>> {
        let Endpoint::Listening(listener) = &self.endpoint else {
            return Err(out_of_order("accept"));
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                // Accepted sockets do not inherit the listener's
                // non-blocking mode on every platform.
                stream.set_nonblocking(false)?;
                trace!("accepted peer {peer}");
                Ok(Some(Box::new(TcpConnection::wrap(stream))))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(None),
            // A queued peer that hung up is not a listener failure.
            Err(err) if err.kind() == io::ErrorKind::ConnectionAborted => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        match &mut self.endpoint {
            Endpoint::Connected(stream) => {
                let framed = frame::encode(payload)?;
                stream.write_all(&framed)
            }
            _ => Err(out_of_order("send")),
        }
    }

    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Endpoint::Connected(stream) = &mut self.endpoint else {
            return Err(out_of_order("recv"));
        };
        stream.set_nonblocking(true)?;
        let mut probe = [0u8; 1];
        let probed = stream.peek(&mut probe);
        stream.set_nonblocking(false)?;
        match probed {
            // Clean close before any frame: idle, the waiter's own
            // deadline decides when to give up.
            Ok(0) => Ok(None),
            // First byte of a frame has arrived; block for the rest.
            Ok(_) => frame::read_frame(stream).map(Some),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn local_port(&self) -> Option<u16> {
        match &self.endpoint {
            Endpoint::Listening(listener) => listener.local_addr().ok().map(|a| a.port()),
            Endpoint::Connected(stream) => stream.local_addr().ok().map(|a| a.port()),
            Endpoint::Fresh | Endpoint::Bound { .. } => None,
        }
    }
}
