//! Bounded connection pool for a single target
//!
//! This module provides the pool itself:
//! - A fixed number of slots, each holding a live connection or a placeholder
//! - Lazy dialling when a drawn slot is empty
//! - Idle eviction on access and lifetime rotation on release
//! - Explicit health marking by callers
//! - One-shot, idempotent shutdown
//!
//! There is no background task. All creation and eviction work runs inside
//! the caller's `acquire`/`release`.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::PoolError;
use super::factory::{Connection, ConnectionFactory};
use super::slot::{LiveSlot, Slot, SlotQueue};

type PoolResult<T, F> = Result<T, PoolError<<F as ConnectionFactory>::Error>>;

/// Configuration for connection pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections, checked out and parked together
    pub capacity: usize,

    /// Number of connections dialled eagerly when the pool is built
    pub initial: usize,

    /// Parked connections idle for at least this long are replaced on their
    /// next checkout. Zero disables idle eviction.
    pub idle_timeout: Duration,

    /// Connections at least this old are closed instead of requeued when
    /// released. Zero disables lifetime rotation.
    pub max_life: Duration,

    /// Wait bound used by [`ConnectionPool::get`]; `None` waits indefinitely
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Create a configuration with the given initial and maximum size
    pub fn new(initial: usize, capacity: usize) -> Self {
        Self {
            capacity,
            initial,
            ..Self::default()
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_life(mut self, max_life: Duration) -> Self {
        self.max_life = max_life;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Capacity is at least one and the initial count never exceeds it
    fn normalized(mut self) -> Self {
        self.capacity = self.capacity.max(1);
        self.initial = self.initial.min(self.capacity);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            initial: 0,
            idle_timeout: Duration::from_secs(90),
            max_life: Duration::ZERO,
            acquire_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Statistics for a connection pool
///
/// Counters are best-effort and play no part in the pool's correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of slots, zero once the pool is closed
    pub capacity: usize,

    /// Slots currently parked in the pool (live or placeholder)
    pub available: usize,

    /// Connections dialled, including warm-up
    pub total_created: u64,

    /// Checkouts served by an already open connection
    pub total_reused: u64,

    /// Connections closed at checkout for exceeding the idle timeout
    pub idle_evicted: u64,

    /// Connections closed at release for exceeding their maximum life
    pub lifetime_rotated: u64,

    /// Connections closed at release after being marked unhealthy
    pub unhealthy_discarded: u64,

    /// Failed dial attempts
    pub failed_attempts: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    idle_evicted: AtomicU64,
    lifetime_rotated: AtomicU64,
    unhealthy_discarded: AtomicU64,
    failed_attempts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    slots: SlotQueue<F::Connection>,
    idle_timeout: Duration,
    max_life: Duration,
    acquire_timeout: Option<Duration>,
    /// Guards the open -> closed transition. Releases hold the read side
    /// across their push so that `close` never misses a requeued slot.
    closed: RwLock<bool>,
    counters: Counters,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    fn idle_expired(&self, live: &LiveSlot<F::Connection>, now: Instant) -> bool {
        !self.idle_timeout.is_zero() && now.duration_since(live.last_used_at) >= self.idle_timeout
    }

    fn life_expired(&self, created_at: Instant, now: Instant) -> bool {
        !self.max_life.is_zero() && now.duration_since(created_at) >= self.max_life
    }

    /// Put a placeholder back for a slot whose connection is gone
    fn restore_placeholder(&self) {
        let closed = self.closed.read();
        if *closed {
            return;
        }
        if self.slots.push(Slot::Empty).is_err() {
            warn!(
                capacity = self.slots.capacity(),
                "Slot queue full while restoring a placeholder"
            );
        }
    }
}

impl<F: ConnectionFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        for conn in self.slots.drain().filter_map(Slot::into_conn) {
            discard(conn, "pool dropped");
        }
    }
}

fn discard<C: Connection>(conn: C, reason: &'static str) {
    match conn.close() {
        Ok(()) => debug!(reason, "Closed connection"),
        Err(e) => debug!(reason, error = %e, "Failed to close connection"),
    }
}

/// Why a released connection is closed instead of requeued
#[derive(Debug, Clone, Copy)]
enum Retire {
    MaxLife,
    Unhealthy,
}

/// Slot drawn by an in-progress checkout. Dropping it armed puts a
/// placeholder back, so a failed or cancelled checkout never shrinks the pool.
struct DrawnSlot<'a, F: ConnectionFactory> {
    inner: &'a PoolInner<F>,
    armed: bool,
}

impl<F: ConnectionFactory> DrawnSlot<'_, F> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<F: ConnectionFactory> Drop for DrawnSlot<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.restore_placeholder();
        }
    }
}

/// A bounded pool of connections to one target
///
/// Cloning is cheap and every clone refers to the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool, dialling `config.initial` connections up front.
    ///
    /// The first dial failure aborts construction; connections opened before
    /// it are closed again.
    pub async fn new(factory: F, config: PoolConfig) -> PoolResult<Self, F> {
        Self::with_cancel(factory, config, &CancellationToken::new()).await
    }

    /// Like [`ConnectionPool::new`], handing `cancel` to the warm-up dials
    pub async fn with_cancel(
        factory: F,
        config: PoolConfig,
        cancel: &CancellationToken,
    ) -> PoolResult<Self, F> {
        let config = config.normalized();
        let inner = PoolInner {
            factory,
            slots: SlotQueue::new(config.capacity),
            idle_timeout: config.idle_timeout,
            max_life: config.max_life,
            acquire_timeout: config.acquire_timeout,
            closed: RwLock::new(false),
            counters: Counters::default(),
        };

        for _ in 0..config.initial {
            let conn = match inner.factory.connect(cancel).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to warm up connection pool");
                    // Dropping `inner` closes whatever was dialled so far.
                    return Err(PoolError::Factory(e));
                }
            };
            let now = Instant::now();
            Counters::bump(&inner.counters.created);
            inner
                .slots
                .push(Slot::Live(LiveSlot {
                    conn,
                    created_at: now,
                    last_used_at: now,
                }))
                .map_err(|_| PoolError::Full)?;
        }
        for _ in config.initial..config.capacity {
            inner.slots.push(Slot::Empty).map_err(|_| PoolError::Full)?;
        }

        info!(
            capacity = config.capacity,
            initial = config.initial,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            max_life_ms = config.max_life.as_millis() as u64,
            "Connection pool ready"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Check out a connection, waiting until a slot is free or `cancel` fires.
    ///
    /// Reuses a parked connection when one is drawn; otherwise dials a new one
    /// through the factory with the same `cancel` token. A connection that sat
    /// idle past the idle timeout is closed and replaced transparently.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Closed`] if the pool is closed
    /// - [`PoolError::Timeout`] if `cancel` fires before a slot is drawn
    /// - [`PoolError::Factory`] if dialling fails; the slot is kept
    pub async fn acquire(&self, cancel: &CancellationToken) -> PoolResult<PooledConnection<F>, F> {
        let inner = &*self.inner;
        if inner.is_closed() {
            return Err(PoolError::Closed);
        }

        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PoolError::Timeout),
            slot = inner.slots.pop() => slot.ok_or(PoolError::Closed)?,
        };
        let drawn = DrawnSlot { inner, armed: true };

        if inner.is_closed() {
            // Raced with `close`, which no longer sees this slot.
            drawn.disarm();
            if let Some(conn) = slot.into_conn() {
                discard(conn, "pool closed");
            }
            return Err(PoolError::Closed);
        }

        let now = Instant::now();
        let reusable = match slot {
            Slot::Live(live) if inner.idle_expired(&live, now) => {
                Counters::bump(&inner.counters.idle_evicted);
                debug!(
                    idle_ms = now.duration_since(live.last_used_at).as_millis() as u64,
                    "Evicting idle connection"
                );
                discard(live.conn, "idle timeout");
                None
            }
            Slot::Live(live) => Some(live),
            Slot::Empty => None,
        };

        let (conn, created_at) = match reusable {
            Some(live) => {
                Counters::bump(&inner.counters.reused);
                debug!(
                    age_ms = now.duration_since(live.created_at).as_millis() as u64,
                    "Reusing connection"
                );
                (live.conn, live.created_at)
            }
            None => match inner.factory.connect(cancel).await {
                Ok(conn) => {
                    Counters::bump(&inner.counters.created);
                    debug!(
                        total_created = inner.counters.created.load(Ordering::Relaxed),
                        "Created new connection"
                    );
                    (conn, Instant::now())
                }
                Err(e) => {
                    Counters::bump(&inner.counters.failed_attempts);
                    debug!(error = %e, "Failed to create connection");
                    // `drawn` puts the placeholder back.
                    return Err(PoolError::Factory(e));
                }
            },
        };
        drawn.disarm();

        Ok(PooledConnection {
            conn: Some(conn),
            created_at,
            last_used_at: Instant::now(),
            unhealthy: false,
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Check out a connection, giving up after `timeout`.
    ///
    /// The deadline also cancels an in-flight dial, provided the factory
    /// honours its cancellation token.
    pub async fn acquire_within(&self, timeout: Duration) -> PoolResult<PooledConnection<F>, F> {
        let cancel = CancellationToken::new();
        let acquire = self.acquire(&cancel);
        tokio::pin!(acquire);

        tokio::select! {
            result = &mut acquire => return result,
            () = tokio::time::sleep(timeout) => cancel.cancel(),
        }
        // The expired deadline now reaches the checkout through `cancel`.
        acquire.await
    }

    /// Check out a connection using the configured acquire timeout
    pub async fn get(&self) -> PoolResult<PooledConnection<F>, F> {
        match self.inner.acquire_timeout {
            Some(timeout) => self.acquire_within(timeout).await,
            None => self.acquire(&CancellationToken::new()).await,
        }
    }

    /// Return a checked-out connection; same as [`PooledConnection::release`]
    pub fn release(&self, conn: &mut PooledConnection<F>) -> PoolResult<(), F> {
        conn.release()
    }

    /// Flag a checked-out connection so its release discards it
    pub fn mark_unhealthy(&self, conn: &mut PooledConnection<F>) {
        conn.mark_unhealthy();
    }

    /// Shut the pool down.
    ///
    /// Closes every parked connection and makes all further checkouts fail
    /// with [`PoolError::Closed`]. Connections currently checked out are left
    /// to their holders. Calling this again is a no-op.
    pub fn close(&self) {
        {
            let mut closed = self.inner.closed.write();
            if *closed {
                return;
            }
            *closed = true;
            self.inner.slots.close();
        }

        let mut closed_connections = 0usize;
        for conn in self.inner.slots.drain().filter_map(Slot::into_conn) {
            discard(conn, "pool closed");
            closed_connections += 1;
        }

        info!(
            capacity = self.inner.slots.capacity(),
            closed_connections, "Connection pool closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of slots, or zero once closed
    pub fn capacity(&self) -> usize {
        if self.is_closed() {
            0
        } else {
            self.inner.slots.capacity()
        }
    }

    /// Number of slots not checked out, or zero once closed
    pub fn available(&self) -> usize {
        if self.is_closed() {
            0
        } else {
            self.inner.slots.len()
        }
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            capacity: self.capacity(),
            available: self.available(),
            total_created: counters.created.load(Ordering::Relaxed),
            total_reused: counters.reused.load(Ordering::Relaxed),
            idle_evicted: counters.idle_evicted.load(Ordering::Relaxed),
            lifetime_rotated: counters.lifetime_rotated.load(Ordering::Relaxed),
            unhealthy_discarded: counters.unhealthy_discarded.load(Ordering::Relaxed),
            failed_attempts: counters.failed_attempts.load(Ordering::Relaxed),
        }
    }
}

/// A connection checked out from a [`ConnectionPool`]
///
/// Dereferences to the raw connection. Hand it back with
/// [`release`](PooledConnection::release); a wrapper dropped without being
/// released is released implicitly, and its connection is closed if the pool
/// can no longer take it.
///
/// Dereferencing a released wrapper panics. Code that may touch the wrapper
/// after a release should go through [`get_ref`](PooledConnection::get_ref)
/// or [`get_mut`](PooledConnection::get_mut), which return `None` instead.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    created_at: Instant,
    last_used_at: Instant,
    unhealthy: bool,
    /// Only routes the release; never keeps the pool alive.
    pool: Weak<PoolInner<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Flag the connection so that its release closes it instead of
    /// requeueing it
    pub fn mark_unhealthy(&mut self) {
        self.unhealthy = true;
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy
    }

    /// Whether the connection was already handed back
    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// When the underlying connection was dialled
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the connection was handed out
    ///
    /// Reset on every checkout, unlike [`created_at`](Self::created_at).
    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn get_ref(&self) -> Option<&F::Connection> {
        self.conn.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut F::Connection> {
        self.conn.as_mut()
    }

    /// Hand the connection back to its pool.
    ///
    /// Connections past the pool's maximum life are marked unhealthy here.
    /// Unhealthy connections are closed and their slot becomes a placeholder;
    /// healthy ones are parked for reuse. Never blocks.
    ///
    /// # Errors
    ///
    /// - [`PoolError::AlreadyReleased`] on a second call
    /// - [`PoolError::Closed`] if the pool is closed or gone; the connection
    ///   stays in this wrapper, see [`into_inner`](PooledConnection::into_inner)
    /// - [`PoolError::Full`] if the pool has no room, which means its slot
    ///   accounting was violated; the connection stays in this wrapper
    pub fn release(&mut self) -> PoolResult<(), F> {
        let conn = self.conn.take().ok_or(PoolError::AlreadyReleased)?;
        let Some(pool) = self.pool.upgrade() else {
            self.conn = Some(conn);
            return Err(PoolError::Closed);
        };

        let closed = pool.closed.read();
        if *closed {
            self.conn = Some(conn);
            return Err(PoolError::Closed);
        }

        let now = Instant::now();
        let retire_reason = if pool.life_expired(self.created_at, now) {
            Some(Retire::MaxLife)
        } else if self.unhealthy {
            Some(Retire::Unhealthy)
        } else {
            None
        };

        let (slot, retired) = match retire_reason {
            Some(_) => (Slot::Empty, Some(conn)),
            None => (
                Slot::Live(LiveSlot {
                    conn,
                    created_at: self.created_at,
                    last_used_at: now,
                }),
                None,
            ),
        };

        if let Err(slot) = pool.slots.push(slot) {
            drop(closed);
            warn!(
                capacity = pool.slots.capacity(),
                "Released connection into a full pool"
            );
            self.conn = slot.into_conn().or(retired);
            return Err(PoolError::Full);
        }
        drop(closed);

        if let (Some(conn), Some(reason)) = (retired, retire_reason) {
            let (counter, label) = match reason {
                Retire::MaxLife => {
                    self.unhealthy = true;
                    (&pool.counters.lifetime_rotated, "max life")
                }
                Retire::Unhealthy => (&pool.counters.unhealthy_discarded, "unhealthy"),
            };
            Counters::bump(counter);
            discard(conn, label);
        }
        Ok(())
    }

    /// Take the raw connection out of the pool for good.
    ///
    /// If the pool is still open, a placeholder takes over the slot so the
    /// pool keeps its capacity. Returns `None` if already released.
    pub fn into_inner(mut self) -> Option<F::Connection> {
        let conn = self.conn.take()?;
        if let Some(pool) = self.pool.upgrade() {
            pool.restore_placeholder();
        }
        Some(conn)
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    /// # Panics
    ///
    /// Panics if the connection was already released.
    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("pooled connection used after release")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("pooled connection used after release")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if self.conn.is_none() {
            return;
        }
        if let Err(e) = self.release() {
            debug!(error = %e, "Connection could not be returned to the pool");
            if let Some(conn) = self.conn.take() {
                discard(conn, "orphaned");
            }
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.is_released())
            .field("unhealthy", &self.unhealthy)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::factory::factory_fn;
    use std::convert::Infallible;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    struct CountedConn(Arc<AtomicUsize>);

    impl Connection for CountedConn {
        type Error = Infallible;

        fn close(self) -> Result<(), Infallible> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_release_keeps_connection_and_counters() {
        let closes = Arc::new(AtomicUsize::new(0));
        let factory = {
            let closes = Arc::clone(&closes);
            factory_fn(move |_cancel| {
                let closes = Arc::clone(&closes);
                async move { Ok::<_, io::Error>(CountedConn(closes)) }
            })
        };
        let config = PoolConfig::new(0, 1)
            .with_idle_timeout(Duration::ZERO)
            .with_max_life(Duration::from_millis(100))
            .with_acquire_timeout(None);
        let pool = ConnectionPool::new(factory, config).await.unwrap();

        let mut conn = pool.acquire(&CancellationToken::new()).await.unwrap();
        // Break the slot accounting so the release finds no room.
        pool.inner.restore_placeholder();
        assert_eq!(pool.available(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(conn.release(), Err(PoolError::Full)));
        assert!(!conn.is_released());
        assert!(!conn.is_unhealthy());
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        let stats = pool.stats();
        assert_eq!(stats.lifetime_rotated, 0);
        assert_eq!(stats.unhealthy_discarded, 0);

        assert!(conn.into_inner().is_some());
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.initial, 0);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert!(config.max_life.is_zero());
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_pool_config_normalization() {
        let config = PoolConfig::new(5, 0).normalized();
        assert_eq!(config.capacity, 1);
        assert_eq!(config.initial, 1);

        let config = PoolConfig::new(8, 4).normalized();
        assert_eq!(config.capacity, 4);
        assert_eq!(config.initial, 4);

        let config = PoolConfig::new(2, 6)
            .with_idle_timeout(Duration::ZERO)
            .with_max_life(Duration::from_secs(60))
            .normalized();
        assert_eq!(config.capacity, 6);
        assert_eq!(config.initial, 2);
        assert!(config.idle_timeout.is_zero());
        assert_eq!(config.max_life, Duration::from_secs(60));
    }
}
