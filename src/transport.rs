use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Byte stream a Connection runs over
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed transport stream
pub type BoxedIo = Box<dyn AsyncIo>;

/// Transport trait for opening byte streams
///
/// This trait abstracts the socket layer so a Client can run over plain TCP
/// or over an in-memory transport in tests. TLS is layered on top by the
/// engine and is not the transport's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a stream to `endpoint`
    async fn connect(&self, endpoint: SocketAddr) -> io::Result<BoxedIo>;

    /// Get the transport name/type
    fn name(&self) -> &str;
}

/// Transport configuration
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// TCP nodelay
    pub tcp_nodelay: bool,
    /// IP time-to-live for outgoing packets
    pub ttl: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            ttl: None,
        }
    }
}

/// Default TCP transport
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TransportConfig,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Get the transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: SocketAddr) -> io::Result<BoxedIo> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(self.config.tcp_nodelay)?;
        if let Some(ttl) = self.config.ttl {
            stream.set_ttl(ttl)?;
        }
        Ok(Box::new(stream))
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

/// Transport builder for creating a TCP transport
pub struct TransportBuilder {
    config: TransportConfig,
}

impl TransportBuilder {
    /// Create a new transport builder
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Set TCP nodelay
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.config.tcp_nodelay = nodelay;
        self
    }

    /// Set the IP time-to-live
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.config.ttl = Some(ttl);
        self
    }

    /// Build the transport
    pub fn build(self) -> TcpTransport {
        TcpTransport::new(self.config)
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_transport_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let transport = TcpTransport::default();
        assert_eq!(transport.name(), "tcp");

        let mut stream = transport.connect(addr).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpTransport::default().connect(addr).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_transport_builder() {
        let transport = TransportBuilder::new().tcp_nodelay(false).ttl(32).build();
        assert!(!transport.config().tcp_nodelay);
        assert_eq!(transport.config().ttl, Some(32));
    }
}
