//! Crate-wide error type.
//!
//! The teacher hand-rolls its `MyError` wrapper rather than reaching for
//! `thiserror`/`anyhow`; this crate follows the same convention, but widens
//! it into a small closed set of variants so callers can match on the kind
//! that actually matters (fatal startup vs. "already exists" vs. transient).

use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum Error {
    /// Ethereum JSON-RPC call failed or returned an unexpected shape.
    Rpc(BoxError),
    /// Stream broker operation failed (append, read, ack, group management).
    Stream(BoxError),
    /// Relational store operation failed.
    Store(BoxError),
    /// A stream message payload could not be parsed (malformed hex, missing
    /// field, wrong type).
    MalformedMessage(String),
    /// Configuration is missing or invalid.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Rpc(e) => write!(f, "rpc error: {e}"),
            Error::Stream(e) => write!(f, "stream error: {e}"),
            Error::Store(e) => write!(f, "store error: {e}"),
            Error::MalformedMessage(msg) => write!(f, "malformed message: {msg}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Rpc(e) | Error::Stream(e) | Error::Store(e) => Some(e.as_ref()),
            Error::MalformedMessage(_) | Error::Config(_) => None,
        }
    }
}

impl Error {
    pub fn rpc(e: impl Into<BoxError>) -> Self {
        Error::Rpc(e.into())
    }

    pub fn stream(e: impl Into<BoxError>) -> Self {
        Error::Stream(e.into())
    }

    pub fn store(e: impl Into<BoxError>) -> Self {
        Error::Store(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
