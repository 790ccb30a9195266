//! Remote object store trait and structured error types.
//!
//! The RemoteStore trait abstracts over the flat-file bucket so the sync
//! engine can run against the real S3 endpoint or an in-memory store in tests.
//! Absence of an object is a regular value (`None`), never an error.

use chrono::NaiveDate;
use thiserror::Error;

use crate::asset::AssetClass;

/// Result of a metadata (HEAD) request for an object that exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    /// Opaque content identifier (ETag); changes iff the bytes changed.
    pub content_id: String,
    pub size: Option<u64>,
}

/// Result of a GET request for an object that exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub bytes: Vec<u8>,
    /// Identifier of the bytes actually served by this GET.
    pub content_id: String,
}

/// Structured error types for remote operations.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by remote (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("HTTP {status} for {key}")]
    Http { status: u16, key: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("hard stop: remote has failed repeatedly (circuit breaker tripped)")]
    CircuitBreakerTripped,
}

impl RemoteError {
    /// Worth retrying at the client boundary.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) | RemoteError::RateLimited { .. } => {
                true
            }
            RemoteError::Http { status, .. } => *status >= 500,
            RemoteError::Authentication(_)
            | RemoteError::InvalidResponse(_)
            | RemoteError::InvalidEndpoint(_)
            | RemoteError::CircuitBreakerTripped => false,
        }
    }
}

/// Read-only view of the remote flat-file store.
///
/// Implementations enforce their own request timeouts and retry transient
/// errors; whatever they return is final for the calling unit of work.
pub trait RemoteStore: Send + Sync {
    /// Human-readable name of this store.
    fn name(&self) -> &str;

    /// Content identifier of the file for (`class`, `date`), or `None` if there is none.
    fn head(&self, class: AssetClass, date: NaiveDate) -> Result<Option<RemoteHead>, RemoteError>;

    /// Bytes of the file for (`class`, `date`), or `None` if there is none.
    fn get(&self, class: AssetClass, date: NaiveDate)
        -> Result<Option<RemoteObject>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::Timeout("30s".into()).is_transient());
        assert!(RemoteError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(RemoteError::Http {
            status: 503,
            key: "k".into()
        }
        .is_transient());
        assert!(!RemoteError::Http {
            status: 400,
            key: "k".into()
        }
        .is_transient());
        assert!(!RemoteError::Authentication("bad key".into()).is_transient());
        assert!(!RemoteError::CircuitBreakerTripped.is_transient());
    }
}
