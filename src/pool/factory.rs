//! Connection and factory traits consumed by the pool
//!
//! The pool never speaks a wire protocol itself. It is handed a
//! [`ConnectionFactory`] that dials one raw client connection at a time, and
//! only ever calls [`Connection::close`] on what it gets back.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A raw client connection owned by the pool while it sits in a slot
pub trait Connection: Send + 'static {
    /// Error reported when closing the connection fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Close the underlying connection.
    ///
    /// Consumes the handle, so the pool closes each connection at most once.
    fn close(self) -> Result<(), Self::Error>;
}

/// Creates raw connections for the pool
///
/// Must be safe to call concurrently; the pool dials without holding any
/// pool-wide lock, so up to `capacity` dials may be in flight at once.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced by this factory
    type Connection: Connection;

    /// Error returned when a dial fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Dial a new connection.
    ///
    /// `cancel` is the acquiring caller's cancellation context. Factories
    /// should abort a slow dial once it fires and report that as an error.
    async fn connect(&self, cancel: &CancellationToken) -> Result<Self::Connection, Self::Error>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for std::sync::Arc<T> {
    type Connection = T::Connection;
    type Error = T::Error;

    async fn connect(&self, cancel: &CancellationToken) -> Result<Self::Connection, Self::Error> {
        (**self).connect(cancel).await
    }
}

/// Factory backed by a closure, see [`factory_fn`]
#[derive(Clone)]
pub struct FactoryFn<F> {
    f: F,
}

/// Build a [`ConnectionFactory`] from an async closure.
///
/// ```ignore
/// let factory = factory_fn(|_cancel| async move { dial("10.0.0.1:7000").await });
/// ```
pub fn factory_fn<F, Fut, C, E>(f: F) -> FactoryFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, E>> + Send + 'static,
    C: Connection,
    E: std::error::Error + Send + Sync + 'static,
{
    FactoryFn { f }
}

#[async_trait]
impl<F, Fut, C, E> ConnectionFactory for FactoryFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, E>> + Send + 'static,
    C: Connection,
    E: std::error::Error + Send + Sync + 'static,
{
    type Connection = C;
    type Error = E;

    async fn connect(&self, cancel: &CancellationToken) -> Result<C, E> {
        (self.f)(cancel.clone()).await
    }
}
