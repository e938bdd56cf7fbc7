//! Connection pooling module
//!
//! This module provides:
//! - A bounded pool of client connections to a single target
//! - Lazy dialling through a caller-supplied factory
//! - Idle eviction, lifetime rotation and explicit health marking
//! - Graceful, idempotent shutdown

pub mod connection;
pub mod error;
pub mod factory;
mod slot;

pub use connection::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use error::PoolError;
pub use factory::{factory_fn, Connection, ConnectionFactory, FactoryFn};
