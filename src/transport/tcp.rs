//! TCP transport for SMB over port 445 (direct hosting)

use super::SmbTransport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const READ_CHUNK: usize = 8192;

/// TCP transport bound to one server endpoint
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            stream: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl SmbTransport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        // Any stale stream is discarded before dialing again
        if let Some(mut old) = self.stream.take() {
            let _ = old.shutdown().await;
        }
        debug!(host = %self.host, port = self.port, "connecting");
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::ConnectionClosed)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<BytesMut> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::ConnectionClosed)?;
        let mut chunk = vec![0u8; READ_CHUNK];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        let mut buf = BytesMut::with_capacity(n);
        buf.put_slice(&chunk[..n]);
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn abort(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_send_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", addr.port());
        assert!(!transport.is_connected());
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.send(b"ping").await.unwrap();
        let received = transport.receive().await.unwrap();
        assert_eq!(&received[..], b"ping");

        transport.abort().await;
        assert!(!transport.is_connected());
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_connect_fails() {
        let mut transport = TcpTransport::new("127.0.0.1", 1);
        assert!(matches!(
            transport.send(b"x").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_receive_on_closed_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut transport = TcpTransport::new("127.0.0.1", addr.port());
        transport.connect().await.unwrap();
        server.await.unwrap();
        assert!(matches!(
            transport.receive().await,
            Err(Error::ConnectionClosed)
        ));
    }
}
