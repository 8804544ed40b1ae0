//! Download streaming: turning a resolved artifact into response bytes
//!
//! The streamer only meets the external web layer at the sink boundary.
//! Once the first byte has gone out, headers are committed: any later
//! failure is terminal for that response, logged, and never remapped to
//! a different status code.

use crate::error::{RelayError, Result};
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Where a resolved artifact's bytes live
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// Persisted on the local filesystem (hosted artifacts, proxy cache
    /// hits)
    File { path: PathBuf, len: u64 },
    /// Held in memory (bytes just fetched from an upstream)
    Memory(Bytes),
}

impl ArtifactSource {
    pub fn len(&self) -> u64 {
        match self {
            ArtifactSource::File { len, .. } => *len,
            ArtifactSource::Memory(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the full content into memory. Intended for tests and small
    /// artifacts; streaming callers use [`DownloadStreamer`].
    pub async fn read_all(&self) -> Result<Bytes> {
        match self {
            ArtifactSource::Memory(bytes) => Ok(bytes.clone()),
            ArtifactSource::File { path, .. } => {
                let content = tokio::fs::read(path).await?;
                Ok(Bytes::from(content))
            }
        }
    }
}

/// Acknowledgement of a completed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAck {
    pub bytes_written: u64,
}

/// Streams artifact bytes into a response sink in bounded chunks
pub struct DownloadStreamer {
    chunk_size: usize,
}

impl DownloadStreamer {
    pub fn new() -> Self {
        DownloadStreamer {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        DownloadStreamer {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Stream a resolved artifact into the sink
    ///
    /// Failures before the first byte surface as ordinary errors and may
    /// still become a status code upstream. Failures after the first
    /// byte return `StreamAborted`; the caller closes the connection in
    /// an error state and must not send a different status.
    pub async fn stream<W>(&self, source: &ArtifactSource, sink: &mut W) -> Result<StreamAck>
    where
        W: AsyncWrite + Unpin,
    {
        match source {
            ArtifactSource::Memory(bytes) => self.stream_bytes(bytes, sink).await,
            ArtifactSource::File { path, .. } => {
                // An open failure happens before any byte is written and
                // is still reportable as a status.
                let file = File::open(path).await.map_err(|e| {
                    warn!(path = %path.display(), "Failed to open artifact for streaming: {}", e);
                    RelayError::IoError(format!("open {}: {}", path.display(), e))
                })?;
                self.stream_reader(file, sink).await
            }
        }
    }

    async fn stream_bytes<W>(&self, bytes: &Bytes, sink: &mut W) -> Result<StreamAck>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written: u64 = 0;
        for chunk in bytes.chunks(self.chunk_size) {
            write_counted(sink, chunk, &mut written)
                .await
                .map_err(|e| self.abort(written, e))?;
        }
        sink.flush().await.map_err(|e| self.abort(written, e))?;
        debug!(bytes_written = written, "Stream complete");
        Ok(StreamAck {
            bytes_written: written,
        })
    }

    async fn stream_reader<R, W>(&self, mut reader: R, sink: &mut W) -> Result<StreamAck>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| self.abort(written, e))?;
            if n == 0 {
                break;
            }
            write_counted(sink, &buf[..n], &mut written)
                .await
                .map_err(|e| self.abort(written, e))?;
        }
        sink.flush().await.map_err(|e| self.abort(written, e))?;
        debug!(bytes_written = written, "Stream complete");
        Ok(StreamAck {
            bytes_written: written,
        })
    }

    fn abort(&self, bytes_written: u64, err: std::io::Error) -> RelayError {
        if bytes_written > 0 {
            // Headers already committed; log and terminate.
            warn!(bytes_written, "Stream aborted mid-response: {}", err);
            RelayError::StreamAborted {
                bytes_written,
                reason: err.to_string(),
            }
        } else {
            RelayError::IoError(err.to_string())
        }
    }
}

/// Write a chunk, counting every byte the sink actually accepted
///
/// A sink may take part of a chunk and then fail (a client socket
/// closing mid-write does exactly this). Counting per partial write
/// keeps the committed-byte tally exact, so `abort` classifies such a
/// failure as terminal rather than as a fresh error.
async fn write_counted<W>(
    sink: &mut W,
    mut chunk: &[u8],
    written: &mut u64,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !chunk.is_empty() {
        let n = sink.write(chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "sink accepted no bytes",
            ));
        }
        *written += n as u64;
        chunk = &chunk[n..];
    }
    Ok(())
}

impl Default for DownloadStreamer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Sink that accepts `limit` bytes and then fails every write
    struct FailingSink {
        accepted: Vec<u8>,
        limit: usize,
    }

    impl AsyncWrite for FailingSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.accepted.len() >= self.limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "client disconnected",
                )));
            }
            let take = buf.len().min(self.limit - self.accepted.len());
            self.accepted.extend_from_slice(&buf[..take]);
            Poll::Ready(Ok(take))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_stream_memory_source() {
        let source = ArtifactSource::Memory(Bytes::from_static(b"artifact bytes"));
        let mut sink = Vec::new();
        let ack = DownloadStreamer::new()
            .stream(&source, &mut sink)
            .await
            .unwrap();
        assert_eq!(ack.bytes_written, 14);
        assert_eq!(sink, b"artifact bytes");
    }

    #[tokio::test]
    async fn test_stream_chunks_preserve_order() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let source = ArtifactSource::Memory(Bytes::from(payload.clone()));
        let mut sink = Vec::new();
        let ack = DownloadStreamer::with_chunk_size(17)
            .stream(&source, &mut sink)
            .await
            .unwrap();
        assert_eq!(ack.bytes_written, payload.len() as u64);
        assert_eq!(sink, payload);
    }

    #[tokio::test]
    async fn test_failure_after_first_byte_is_terminal() {
        let source = ArtifactSource::Memory(Bytes::from(vec![7u8; 1024]));
        let mut sink = FailingSink {
            accepted: Vec::new(),
            limit: 100,
        };
        let err = DownloadStreamer::with_chunk_size(64)
            .stream(&source, &mut sink)
            .await
            .unwrap_err();
        match err {
            RelayError::StreamAborted { bytes_written, .. } => {
                assert_eq!(bytes_written, 100);
            }
            other => panic!("expected StreamAborted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_first_chunk_failure_is_terminal() {
        // The sink takes 10 bytes of the first 64-byte chunk, then the
        // client goes away. Those 10 bytes are committed, so the failure
        // must classify as terminal with the exact count.
        let source = ArtifactSource::Memory(Bytes::from(vec![7u8; 1024]));
        let mut sink = FailingSink {
            accepted: Vec::new(),
            limit: 10,
        };
        let err = DownloadStreamer::with_chunk_size(64)
            .stream(&source, &mut sink)
            .await
            .unwrap_err();
        match err {
            RelayError::StreamAborted { bytes_written, .. } => {
                assert_eq!(bytes_written, 10);
            }
            other => panic!("expected StreamAborted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_before_first_byte_is_not_aborted() {
        let source = ArtifactSource::Memory(Bytes::from(vec![7u8; 16]));
        let mut sink = FailingSink {
            accepted: Vec::new(),
            limit: 0,
        };
        let err = DownloadStreamer::new()
            .stream(&source, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::IoError(_)));
    }
}
