use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::net::TcpConnector;
use crate::pool::ConnectionPool;

/// Pool of TCP connections to the configured target
pub type TcpPool = ConnectionPool<TcpConnector>;

/// Shared state for the CLI commands
///
/// Clones share the same connection pool.
#[derive(Clone)]
pub struct Core {
    pub config: Arc<Config>,
    pub connector: TcpConnector,
    pub pool: TcpPool,
}

impl Core {
    /// Build the connector and pool described by `config`.
    ///
    /// Fails if warming up the initial connections fails.
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let connector = TcpConnector::new(config.target.address.clone())
            .with_connect_timeout(config.target.connect_timeout())
            .with_keepalive(config.target.keepalive);

        let pool = ConnectionPool::new(connector.clone(), config.pool_config())
            .await
            .context(format!(
                "Failed to warm up connection pool for {}",
                config.target.address
            ))?;

        info!(
            address = %config.target.address,
            capacity = pool.capacity(),
            "Core initialized"
        );

        Ok(Self {
            config,
            connector,
            pool,
        })
    }

    /// Close the pool and every parked connection
    pub fn shutdown(&self) {
        self.pool.close();
    }
}
