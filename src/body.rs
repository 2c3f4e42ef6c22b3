use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Pull-based producer of request body bytes
///
/// The engine polls `read` while writing the request; an empty chunk means the
/// source is exhausted. Sources are shared behind an `Arc` so a redirect can
/// replay the same body after a successful [`rewind`](ByteSource::rewind).
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Produce at most `max_len` bytes
    async fn read(&self, max_len: usize) -> io::Result<Vec<u8>>;

    /// Total number of bytes the source will produce, when known up front
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Reset to the first byte; `false` when the source cannot be replayed
    async fn rewind(&self) -> bool {
        false
    }

    /// Whether `read` has produced bytes since creation or the last rewind
    fn is_consumed(&self) -> bool {
        false
    }
}

/// In-memory body
pub struct BytesSource {
    data: Vec<u8>,
    position: Mutex<usize>,
}

impl BytesSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: Mutex::new(0),
        }
    }

    /// Get the full contents regardless of the read position
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[async_trait]
impl ByteSource for BytesSource {
    async fn read(&self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut position = self
            .position
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "body cursor poisoned"))?;
        let start = (*position).min(self.data.len());
        let end = start.saturating_add(max_len).min(self.data.len());
        *position = end;
        Ok(self.data[start..end].to_vec())
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_consumed(&self) -> bool {
        self.position.lock().map(|p| *p > 0).unwrap_or(true)
    }

    async fn rewind(&self) -> bool {
        match self.position.lock() {
            Ok(mut position) => {
                *position = 0;
                true
            }
            Err(_) => false,
        }
    }
}

impl From<String> for BytesSource {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

impl From<&str> for BytesSource {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for BytesSource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for BytesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BytesSource({} bytes)", self.data.len())
    }
}

/// Body read from any async reader, e.g. a `tokio::fs::File`
///
/// Readers are consumed once and cannot be rewound.
pub struct ReaderSource<R> {
    reader: tokio::sync::Mutex<R>,
    length: Option<u64>,
    consumed: AtomicBool,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Send + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: tokio::sync::Mutex::new(reader),
            length: None,
            consumed: AtomicBool::new(false),
        }
    }

    /// Declare the exact number of bytes the reader will yield
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}

#[async_trait]
impl<R> ByteSource for ReaderSource<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read(&self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        let mut buf = vec![0u8; max_len];
        let n = reader.read(&mut buf).await?;
        if n > 0 {
            self.consumed.store(true, Ordering::SeqCst);
        }
        buf.truncate(n);
        Ok(buf)
    }

    fn size_hint(&self) -> Option<u64> {
        self.length
    }

    fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }
}

type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send>>;

/// Body produced by a stream of chunks
///
/// Chunks longer than the requested `max_len` are split across reads.
pub struct StreamSource {
    inner: tokio::sync::Mutex<StreamState>,
    consumed: AtomicBool,
}

struct StreamState {
    stream: ChunkStream,
    pending: Vec<u8>,
}

impl StreamSource {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            inner: tokio::sync::Mutex::new(StreamState {
                stream: Box::pin(stream),
                pending: Vec::new(),
            }),
            consumed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ByteSource for StreamSource {
    async fn read(&self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut state = self.inner.lock().await;
        while state.pending.is_empty() {
            match state.stream.next().await {
                Some(chunk) => state.pending = chunk?,
                None => return Ok(Vec::new()),
            }
        }
        let take = max_len.min(state.pending.len());
        let rest = state.pending.split_off(take);
        self.consumed.store(true, Ordering::SeqCst);
        Ok(std::mem::replace(&mut state.pending, rest))
    }

    fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }
}

/// Drain a source completely
pub async fn read_to_end(source: &dyn ByteSource, chunk_size: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let chunk = source.read(chunk_size).await?;
        if chunk.is_empty() {
            return Ok(out);
        }
        out.extend_from_slice(&chunk);
    }
}
