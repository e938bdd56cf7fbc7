//! connpool - bounded pool of reusable network client connections

pub mod cli;
pub mod config;
pub mod core;
pub mod net;
pub mod pool;

pub use crate::core::Core;
pub use config::Config;
pub use pool::{ConnectionPool, PoolConfig, PoolError, PooledConnection};
