//! Pool abstraction for borrowing and returning ephemeral test hosts.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

mod duffy;

pub use duffy::DuffyPool;

/// Parameters describing the host to borrow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolRequest {
    /// Operating system release (for example `7`).
    pub version: String,
    /// CPU architecture (for example `x86_64`).
    pub arch: String,
}

/// Credential issued with a loan; required to give the host back.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a raw token string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host lent by the pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostLease {
    /// Hostname reachable over SSH.
    pub hostname: String,
    /// Token needed to release the host.
    pub token: SessionToken,
}

/// One active loan as reported by the pool inventory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InventoryEntry {
    /// First column of the inventory row, usually the hostname. Empty when
    /// the row has nothing there.
    pub hostname: String,
    /// Token of the session holding it.
    pub token: SessionToken,
}

/// Errors raised by pool clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PoolError {
    /// Raised when the pool has no host to lend.
    #[error("pool exhausted: {message}")]
    Exhausted {
        /// Explanation returned by the pool, if any.
        message: String,
    },
    /// Raised when the HTTP request could not be completed.
    #[error("pool request to {endpoint} failed: {message}")]
    Transport {
        /// API endpoint that was called.
        endpoint: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the pool answers with a non-success HTTP status.
    #[error("pool request to {endpoint} returned status {status}: {body}")]
    Status {
        /// API endpoint that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Raised when the response body does not have the expected shape.
    #[error("failed to parse {endpoint} response: {message}")]
    Parse {
        /// API endpoint that was called.
        endpoint: String,
        /// Parser error message.
        message: String,
    },
}

/// Future returned by pool operations.
pub type PoolFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by pool clients. Each call is one round
/// trip to the pool service.
pub trait Pool {
    /// Client specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Borrows a host matching `request`.
    fn acquire<'a>(&'a self, request: &'a PoolRequest)
    -> PoolFuture<'a, HostLease, Self::Error>;

    /// Returns the host held under `token` to the pool.
    fn release<'a>(&'a self, token: &'a SessionToken) -> PoolFuture<'a, (), Self::Error>;

    /// Lists every active loan visible to this API key.
    fn list_active(&self) -> PoolFuture<'_, Vec<InventoryEntry>, Self::Error>;
}
