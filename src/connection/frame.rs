//! Length-prefixed frame layout.
//!
//! Every payload crosses the stream as a two byte big endian length
//! followed by exactly that many bytes. The prefix caps a frame at
//! 65535 payload bytes. Oversized payloads are rejected before anything
//! is written, so a failed send never leaves a half frame behind for the
//! peer to choke on.

use std::io::{self, Read};

/// Bytes in the length prefix.
pub const PREFIX_SIZE: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Lays out `payload` as one contiguous frame, prefix included.
///
/// A single buffer keeps the prefix and payload in one write on the
/// caller's side, so a reader never observes the length without the
/// bytes it promises trailing right behind it in the send queue.
pub fn encode(payload: &[u8]) -> io::Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds frame limit")
    })?;
    let mut framed = Vec::with_capacity(PREFIX_SIZE + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Reads one whole frame, blocking until the promised bytes arrive.
///
/// A stream that ends mid frame yields `UnexpectedEof`.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;
    let len = u16::from_be_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}
