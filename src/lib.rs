//! Network transparent function calls over framed byte streams.
//!
//! A [`Listener`] binds names to handlers and serves them; a
//! [`Request`] calls one by name with JSON args, waiting for the reply
//! or firing and forgetting. Transports implement [`Connection`]; a TCP
//! backend ships behind the default `tcp` feature.

pub mod codec;
pub mod connection;
mod envelope;
pub mod error;
pub mod listener;
pub mod registry;
pub mod request;

pub use codec::{Codec, DeserializeFn, SerializeFn};
pub use connection::{Connection, ConnectionFactory, default_connection};
pub use error::Error;
pub use listener::Listener;
pub use registry::Handler;
pub use request::Request;

#[cfg(feature = "tcp")]
pub use connection::TcpConnection;
