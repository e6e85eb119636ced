//! Pluggable text serialization hooks.
//!
//! Every envelope crosses the wire as text run through a pair of hooks:
//! one turns rendered text into the raw bytes that get framed, the other
//! turns received bytes back into text. The default pair is an identity
//! copy. Installing a matching custom pair on both ends of an exchange
//! layers compression or scrambling underneath the protocol without
//! touching it; mismatched pairs produce garbage text that then fails
//! JSON parsing on arrival.

use crate::connection::frame;

/// Turns envelope text into the bytes that go inside a frame.
/// `None` when the text cannot be encoded.
pub type SerializeFn = fn(&str) -> Option<Vec<u8>>;

/// Turns received frame bytes back into envelope text.
/// `None` when the bytes cannot be decoded.
pub type DeserializeFn = fn(&[u8]) -> Option<String>;

/// A matched pair of serialization hooks.
///
/// Plain function pointers: they are `Copy` and cross thread boundaries
/// freely, so detached workers and waiters carry them without shared
/// state.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    pub serialize: SerializeFn,
    pub deserialize: DeserializeFn,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            serialize: identity_serialize,
            deserialize: identity_deserialize,
        }
    }
}

/// Default hook: the text's raw bytes, unchanged. Fails when the text
/// cannot fit in a single frame.
pub fn identity_serialize(text: &str) -> Option<Vec<u8>> {
    if text.len() > frame::MAX_PAYLOAD {
        return None;
    }
    Some(text.as_bytes().to_vec())
}

/// Default hook: bytes read back as UTF-8 text, lossily. Never fails.
pub fn identity_deserialize(bytes: &[u8]) -> Option<String> {
    Some(String::from_utf8_lossy(bytes).into_owned())
}
