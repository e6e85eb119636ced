use thiserror::Error;

/// Outcome reported by every fallible operation in the crate.
///
/// The set is closed: callers match on it to decide whether a call
/// collided, timed out, or died on the wire. Variants carry no payload so
/// the listener can cache the last background status as a plain `Copy`
/// value read from other threads.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A function with that name is already bound; the existing binding
    /// was kept and the new one discarded.
    #[error("a function with that name is already registered")]
    Collision,

    /// Configuration was attempted while the listener is running.
    #[error("listener has already been started")]
    AlreadyRunning,

    /// The underlying transport failed (bind, connect, accept, send or
    /// recv).
    #[error("network transport failure")]
    Net,

    /// No complete frame arrived within the allotted time.
    #[error("timed out waiting for data")]
    Timeout,

    /// Reserved for unreachable or unknown remote endpoints.
    #[error("no listener at that address")]
    BadAddress,

    /// A serialization hook refused to encode or decode a payload.
    #[error("serialization hook rejected the payload")]
    BadString,

    /// The envelope was malformed or missing required fields.
    #[error("malformed request envelope")]
    BadJson,

    /// The remote function ran but its result could not be rendered,
    /// encoded or parsed intact; a fallback reply was still attempted.
    #[error("function result was lost in transit")]
    BadReturn,

    /// No transport implementation is available in this build and none
    /// was injected.
    #[error("no default transport is available in this build")]
    NoTransport,
}
