//! Typed failure classification.
//!
//! Retryability is decided on a small closed set of failure kinds assigned where the error is
//! first produced (HTTP status, `io::ErrorKind`, driver code) instead of by inspecting error
//! messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Closed set of failure categories the retry profiles reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation or a downstream hop timed out.
    Timeout,
    /// Connection reset, refused, aborted or closed mid-flight.
    Connection,
    /// Name resolution or routing failure.
    Network,
    /// Upstream asked us to slow down (HTTP 429).
    RateLimited,
    /// Upstream failed on its side (HTTP 5xx).
    Server,
    /// Database deadlock or serialization conflict.
    Deadlock,
    /// Resource temporarily busy or locked.
    Busy,
    /// Response body could not be decoded, possibly truncated.
    Decode,
    /// Request rejected by the upstream (HTTP 4xx other than 408/429).
    Client,
    /// Input failed validation; retrying cannot help.
    Validation,
    NotFound,
    PermissionDenied,
    /// Anything the producer could not place.
    Unknown,
}

impl FailureKind {
    /// Classify an HTTP status code. Codes below 400 are not failures and map to `Unknown`.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => FailureKind::Timeout,
            429 => FailureKind::RateLimited,
            404 | 410 => FailureKind::NotFound,
            401 | 403 => FailureKind::PermissionDenied,
            422 => FailureKind::Validation,
            400..=499 => FailureKind::Client,
            500..=599 => FailureKind::Server,
            _ => FailureKind::Unknown,
        }
    }

    /// Failures no amount of retrying will fix.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            FailureKind::Client
                | FailureKind::Validation
                | FailureKind::NotFound
                | FailureKind::PermissionDenied
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::Network => "network",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Server => "server",
            FailureKind::Deadlock => "deadlock",
            FailureKind::Busy => "busy",
            FailureKind::Decode => "decode",
            FailureKind::Client => "client",
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not_found",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know which [`FailureKind`] they belong to.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for FailureKind {
    fn failure_kind(&self) -> FailureKind {
        *self
    }
}

impl Classify for io::Error {
    fn failure_kind(&self) -> FailureKind {
        match self.kind() {
            io::ErrorKind::TimedOut => FailureKind::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => FailureKind::Connection,
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::AddrInUse => FailureKind::Network,
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => FailureKind::Busy,
            io::ErrorKind::NotFound => FailureKind::NotFound,
            io::ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => FailureKind::Validation,
            _ => FailureKind::Unknown,
        }
    }
}

impl Classify for http::StatusCode {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::from_status(self.as_u16())
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn failure_kind(&self) -> FailureKind {
        (**self).failure_kind()
    }
}
