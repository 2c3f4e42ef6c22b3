use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{ConnectFailure, Error, Result};
use crate::options::{ProgressCallback, TransferDirection};
use crate::tls::tls_wrap;
use crate::transport::{BoxedIo, Transport};

/// Transport stream, optionally TLS-wrapped
pub enum Stream {
    Plain(BoxedIo),
    Tls(Box<TlsStream<BoxedIo>>),
}

impl Stream {
    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(io) => Pin::new(io).poll_read(cx, buf),
            Stream::Tls(io) => Pin::new(io).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(io) => Pin::new(io).poll_write(cx, buf),
            Stream::Tls(io) => Pin::new(io).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(io) => Pin::new(io).poll_flush(cx),
            Stream::Tls(io) => Pin::new(io).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(io) => Pin::new(io).poll_shutdown(cx),
            Stream::Tls(io) => Pin::new(io).poll_shutdown(cx),
        }
    }
}

/// One endpoint-bound transport owned by a single Transaction hop
///
/// `write` and `read` are the only data operations. Each completed chunk
/// reports the running total for its direction to the progress callback.
/// Dropping a Connection releases the transport; `close` does the same with
/// an orderly shutdown and may be called any number of times.
pub struct Connection {
    stream: Option<Stream>,
    endpoint: SocketAddr,
    progress: Option<ProgressCallback>,
    written: u64,
    read: u64,
}

impl Connection {
    /// Connect to `endpoint`, running a TLS handshake for `host` when `tls` is given
    pub async fn open(
        transport: &dyn Transport,
        endpoint: SocketAddr,
        tls: Option<(&TlsConnector, &str)>,
    ) -> std::result::Result<Self, ConnectFailure> {
        let io = transport
            .connect(endpoint)
            .await
            .map_err(ConnectFailure::from_io)?;
        let stream = match tls {
            Some((connector, host)) => Stream::Tls(Box::new(tls_wrap(connector, host, io).await?)),
            None => Stream::Plain(io),
        };
        Ok(Self::from_stream(stream, endpoint))
    }

    /// Wrap an already established stream
    pub fn from_stream(stream: Stream, endpoint: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            endpoint,
            progress: None,
            written: 0,
            read: 0,
        }
    }

    /// Report transfer progress to `progress`
    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_tls(&self) -> bool {
        self.stream.as_ref().map(Stream::is_tls).unwrap_or(false)
    }

    /// Bytes written so far on this connection
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Bytes read so far on this connection
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Write all of `bytes`
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let stream = self.stream_mut()?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        self.written += bytes.len() as u64;
        self.report(TransferDirection::BytesWritten, self.written);
        Ok(bytes.len())
    }

    /// Read into `buf`; `0` means the peer closed the stream
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stream_mut()?.read(buf).await?;
        if n > 0 {
            self.read += n as u64;
            self.report(TransferDirection::BytesRead, self.read);
        }
        Ok(n)
    }

    /// Run a TLS handshake over the current plain stream
    pub async fn upgrade(&mut self, connector: &TlsConnector, host: &str) -> Result<()> {
        match self.stream.take() {
            Some(Stream::Plain(io)) => {
                let tls = tls_wrap(connector, host, io)
                    .await
                    .map_err(|cause| Error::connection(self.endpoint, cause))?;
                self.stream = Some(Stream::Tls(Box::new(tls)));
                Ok(())
            }
            Some(tls @ Stream::Tls(_)) => {
                self.stream = Some(tls);
                Err(Error::tls("connection is already TLS-wrapped"))
            }
            None => Err(closed()),
        }
    }

    /// Release the transport
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::trace!(endpoint = %self.endpoint, error = %e, "shutdown failed");
            }
            tracing::trace!(endpoint = %self.endpoint, "connection closed");
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Stream> {
        self.stream.as_mut().ok_or_else(closed)
    }

    fn report(&self, direction: TransferDirection, total: u64) {
        if let Some(progress) = &self.progress {
            progress(direction, total);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .field("tls", &self.is_tls())
            .field("written", &self.written)
            .field("read", &self.read)
            .finish()
    }
}

fn closed() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::NotConnected, "connection is closed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn endpoint() -> SocketAddr {
        "127.0.0.1:80".parse().unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read_report_running_totals() {
        let mock = tokio_test::io::Builder::new()
            .write(b"GET / HTTP/1.1\r\n")
            .write(b"\r\n")
            .read(b"HTTP/1.1 ")
            .read(b"200 OK\r\n\r\n")
            .build();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(move |direction, total| {
            sink.lock().unwrap().push((direction, total));
        });

        let mut connection = Connection::from_stream(Stream::Plain(Box::new(mock)), endpoint())
            .with_progress(Some(progress));
        connection.write(b"GET / HTTP/1.1\r\n").await.unwrap();
        connection.write(b"\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(connection.read(&mut buf).await.unwrap(), 9);
        assert_eq!(connection.read(&mut buf).await.unwrap(), 10);
        assert_eq!(connection.read(&mut buf).await.unwrap(), 0);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (TransferDirection::BytesWritten, 16),
                (TransferDirection::BytesWritten, 18),
                (TransferDirection::BytesRead, 9),
                (TransferDirection::BytesRead, 19),
            ]
        );
        assert_eq!(connection.bytes_written(), 18);
        assert_eq!(connection.bytes_read(), 19);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _server) = tokio::io::duplex(64);
        let mut connection = Connection::from_stream(Stream::Plain(Box::new(client)), endpoint());
        assert!(connection.is_open());
        assert!(!connection.is_tls());

        connection.close().await;
        connection.close().await;
        assert!(!connection.is_open());

        let err = connection.write(b"late").await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::NotConnected));
    }

    #[tokio::test]
    async fn test_peer_sees_eof_after_close() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut connection = Connection::from_stream(Stream::Plain(Box::new(client)), endpoint());
        connection.write(b"hello").await.unwrap();
        connection.close().await;

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
    }
}
