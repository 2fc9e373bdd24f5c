//! Error types surfaced by the retry executor and circuit breakers.
use std::fmt;
use std::time::Duration;

/// Outcome of a guarded call that did not produce a value.
///
/// `Inner` carries the operation's own error exactly as it was returned on the final attempt, so
/// callers can match on it. `CircuitOpen` is synthesized before any attempt is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError<E> {
    /// The breaker for `key` is open; the operation was not invoked.
    CircuitOpen { key: String, failure_count: u32, retry_after: Duration },
    /// The underlying operation failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { key, failure_count, retry_after } => write!(
                f,
                "circuit breaker open for '{}' ({} failures, retry in {:?})",
                key, failure_count, retry_after
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

impl<E> From<E> for ResilienceError<E> {
    fn from(e: E) -> Self {
        ResilienceError::Inner(e)
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error wraps an operation error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Breaker key and remaining cooldown, if the circuit was open.
    pub fn circuit_open_details(&self) -> Option<(&str, Duration)> {
        match self {
            Self::CircuitOpen { key, retry_after, .. } => Some((key.as_str(), *retry_after)),
            _ => None,
        }
    }

    /// Transform the inner error, keeping circuit-open rejections as they are.
    pub fn map_inner<F, T>(self, f: F) -> ResilienceError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::Inner(e) => ResilienceError::Inner(f(e)),
            Self::CircuitOpen { key, failure_count, retry_after } => {
                ResilienceError::CircuitOpen { key, failure_count, retry_after }
            }
        }
    }
}
