use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Outcome of a line-channel operation that did not complete normally.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection closed by peer")]
    Eof,
    #[error("operation timed out")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Split a stream into the two halves of a line-framed channel.
pub fn split(stream: UnixStream) -> (LineReader, LineWriter) {
    let (read, write) = stream.into_split();
    (LineReader::new(read), LineWriter::new(write))
}

/// Reads newline-terminated messages with a per-operation deadline.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
}

impl LineReader {
    pub fn new(half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(half),
        }
    }

    /// Read one line, without the trailing newline. A deadline of 0 means
    /// no timeout.
    pub async fn read_line(&mut self, deadline_ms: u64) -> Result<String, ChannelError> {
        let mut line = String::new();
        let n = with_deadline(deadline_ms, self.inner.read_line(&mut line)).await?;
        if n == 0 {
            return Err(ChannelError::Eof);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }
}

/// Writes already newline-terminated buffers with a per-operation deadline.
pub struct LineWriter {
    inner: OwnedWriteHalf,
}

impl LineWriter {
    pub fn new(half: OwnedWriteHalf) -> Self {
        Self { inner: half }
    }

    /// Write an already terminated buffer. A deadline of 0 means no timeout.
    pub async fn write_all(&mut self, buf: &str, deadline_ms: u64) -> Result<(), ChannelError> {
        with_deadline(deadline_ms, async {
            self.inner.write_all(buf.as_bytes()).await?;
            self.inner.flush().await
        })
        .await
    }

    /// Half-close the write side to unblock the peer without tearing down
    /// the read side.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

async fn with_deadline<F, T>(deadline_ms: u64, op: F) -> Result<T, ChannelError>
where
    F: Future<Output = io::Result<T>>,
{
    if deadline_ms == 0 {
        return op.await.map_err(ChannelError::Io);
    }

    match tokio::time::timeout(Duration::from_millis(deadline_ms), op).await {
        Ok(result) => result.map_err(ChannelError::Io),
        Err(_) => Err(ChannelError::Timeout),
    }
}
