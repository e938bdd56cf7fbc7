//! TCP connection factory
//!
//! Dials plain TCP client connections for the pool, with a connect timeout,
//! keep-alive and no-delay set on every socket.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pool::{Connection, ConnectionFactory};

/// Dials TCP connections to one target address
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
    keepalive: bool,
}

impl TcpConnector {
    /// Create a connector for `address` (`host:port`)
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
            keepalive: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn dial(&self) -> io::Result<TcpConnection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.address),
                )
            })??;

        let socket = SockRef::from(&stream);
        socket.set_nodelay(true)?;
        if self.keepalive {
            socket.set_keepalive(true)?;
        }

        let peer = stream.peer_addr()?;
        debug!(address = %self.address, peer = %peer, "Dialled TCP connection");

        Ok(TcpConnection { stream, peer })
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnector {
    type Connection = TcpConnection;
    type Error = io::Error;

    async fn connect(&self, cancel: &CancellationToken) -> io::Result<TcpConnection> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                format!("connect to {} cancelled", self.address),
            )),
            result = self.dial() => result,
        }
    }
}

/// A pooled TCP client connection
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl Connection for TcpConnection {
    type Error = io::Error;

    fn close(self) -> io::Result<()> {
        match SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer already went away.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let connector = TcpConnector::new(addr.to_string());
        assert_eq!(connector.address(), addr.to_string());
        let mut conn = connector.connect(&CancellationToken::new()).await.unwrap();
        assert_eq!(conn.peer_addr(), addr);

        conn.stream_mut().write_all(b"hello").await.unwrap();
        conn.close().unwrap();

        assert_eq!(server.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_cancelled_connect() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let connector = TcpConnector::new("127.0.0.1:9");
        let err = connector.connect(&cancel).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(addr.to_string())
            .with_connect_timeout(Duration::from_secs(2));
        assert!(connector.connect(&CancellationToken::new()).await.is_err());
    }
}
