//! Byte-stream transport.
//!
//! The driver talks to anything that is `AsyncRead + AsyncWrite`: a TCP
//! stream, a TLS stream produced by a [`TlsConnector`], or an in-memory
//! duplex pipe in tests.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use super::config::PgConfig;
use crate::error::{Error, PgResult};

/// Any bidirectional async byte stream.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Socket for T {}

pub type BoxSocket = Box<dyn Socket>;

pub type UpgradeFuture<'a> = Pin<Box<dyn Future<Output = io::Result<BoxSocket>> + Send + 'a>>;

/// Wraps a plaintext socket in an encrypted channel after the server has
/// accepted an SSLRequest.
pub trait TlsConnector: Send + Sync {
    fn upgrade<'a>(&'a self, host: &'a str, socket: BoxSocket) -> UpgradeFuture<'a>;
}

/// Open a TCP connection to `config.host:config.port`.
pub async fn connect_tcp(config: &PgConfig) -> PgResult<BoxSocket> {
    let addr = format!("{}:{}", config.host, config.port);
    let connect = TcpStream::connect(&addr);

    let stream = match config.connect_timeout {
        Some(timeout) => with_timeout(timeout, connect).await?,
        None => connect.await,
    }
    .map_err(|e| Error::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

    // Set TCP options
    stream.set_nodelay(true)?;
    debug!(%addr, "tcp connection established");
    Ok(Box::new(stream))
}

async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> PgResult<F::Output> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let config = PgConfig::new("u").port(port);
        let mut socket = connect_tcp(&config).await.unwrap();
        socket.write_all(b"ping").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = PgConfig::new("u").port(port);
        assert!(matches!(
            connect_tcp(&config).await,
            Err(Error::Connection(_))
        ));
    }
}
