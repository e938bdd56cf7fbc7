//! Error types for connection pool operations

/// Errors returned by [`ConnectionPool`](super::ConnectionPool) and
/// [`PooledConnection`](super::PooledConnection).
///
/// `E` is the error type of the pool's connection factory. Factory failures
/// are surfaced unchanged in [`PoolError::Factory`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError<E> {
    #[error("connection pool is closed")]
    Closed,

    #[error("timed out waiting for a pooled connection")]
    Timeout,

    #[error("pooled connection was already released")]
    AlreadyReleased,

    #[error("returned a connection to a full pool")]
    Full,

    #[error("failed to create connection: {0}")]
    Factory(#[source] E),
}

impl<E> PoolError<E> {
    /// Whether the pool has been shut down and will never serve again
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed)
    }

    /// Whether a retry of the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Timeout | PoolError::Factory(_))
    }
}
