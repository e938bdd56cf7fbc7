//! TCP echo server
//!
//! A minimal target for exercising the pool locally: every byte received on
//! a connection is written straight back.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Bind `listen` and echo on every accepted connection until `shutdown` fires
pub async fn run_echo_server(listen: &str, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .context(format!("Invalid listen address: {}", listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("Echo server listening on {}", listener.local_addr()?);
    serve(listener, shutdown).await;
    Ok(())
}

/// Accept loop over an already bound listener
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) {
    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Echo server shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = echo(stream) => match result {
                    Ok(bytes) => debug!(peer = %remote_addr, bytes, "Connection finished"),
                    Err(e) => debug!(peer = %remote_addr, error = %e, "Connection failed"),
                },
            }
        });
    }
}

async fn echo(mut stream: TcpStream) -> std::io::Result<u64> {
    let (mut reader, mut writer) = stream.split();
    tokio::io::copy(&mut reader, &mut writer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, shutdown.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_listen_address() {
        let result = run_echo_server("not-an-address", CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
