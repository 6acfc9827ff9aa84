//! Crate-wide error kinds.
//!
//! Kraken hand-rolls its error enum rather than reaching for `thiserror`:
//! every variant needs a distinct, hand-written `Display` message anyway,
//! and the gRPC boundary needs a `tonic::Status` conversion that a derive
//! macro wouldn't save us from writing.

use std::fmt;

/// A Kraken core operation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No node or value exists at the given id/url.
    NotFound(String),
    /// `Create` was attempted on an id that already exists.
    AlreadyExists(String),
    /// A value's kind doesn't match the addressed field's kind.
    TypeMismatch { url: String, expected: &'static str },
    /// A write was attempted while the store is frozen.
    Frozen,
    /// `ServiceInit` referenced a service id with no registered record.
    UnknownService(String),
    /// Malformed URL or a required payload was missing.
    InvalidArgument(String),
    /// A mutation-path query found no path between Dsc and Cfg.
    NoPath(String),
    /// The underlying stream/channel closed or a send failed.
    Transport(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(what) => write!(f, "not found: {}", what),
            Error::AlreadyExists(id) => write!(f, "already exists: {}", id),
            Error::TypeMismatch { url, expected } => {
                write!(f, "type mismatch at '{}': expected {}", url, expected)
            }
            Error::Frozen => write!(f, "store is frozen"),
            Error::UnknownService(id) => write!(f, "unknown service: {}", id),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::NoPath(url) => write!(f, "no mutation path for {}", url),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        let code = match &e {
            Error::NotFound(_) => tonic::Code::NotFound,
            Error::AlreadyExists(_) => tonic::Code::AlreadyExists,
            Error::TypeMismatch { .. } => tonic::Code::InvalidArgument,
            Error::Frozen => tonic::Code::FailedPrecondition,
            Error::UnknownService(_) => tonic::Code::NotFound,
            Error::InvalidArgument(_) => tonic::Code::InvalidArgument,
            Error::NoPath(_) => tonic::Code::FailedPrecondition,
            Error::Transport(_) => tonic::Code::Unavailable,
        };
        tonic::Status::new(code, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
