//! Newline framing over a byte stream.
//!
//! A line is everything up to a `\n`. The delimiter (and a `\r` right before
//! it) is stripped on read and a single `\n` is appended on write. Every
//! write is flushed before returning, since each exchange is a strict
//! request-then-response turn.

use bytes::{BufMut, BytesMut};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::SessionError;

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Default upper bound on a single line, delimiter excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Line reader/writer bound to one connection.
pub struct LineFramer<R, W> {
    reader: R,
    writer: W,
    buffer: BytesMut,
    max_line_length: usize,
    io_timeout: Option<Duration>,
}

impl LineFramer<OwnedReadHalf, OwnedWriteHalf> {
    /// Frame both directions of a TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

impl<R, W> LineFramer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            io_timeout: None,
        }
    }

    /// Deadline applied to each read and each write. `None` waits forever.
    pub fn with_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Read the next line.
    ///
    /// Returns `EndOfStream` if the peer closes before a delimiter arrives;
    /// any partial line is dropped. Bytes past the delimiter stay buffered.
    pub async fn read_line(&mut self) -> Result<String, SessionError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.ends_with(b"\r") {
                    line.truncate(pos - 1);
                }
                if line.len() > self.max_line_length {
                    return Err(self.too_long());
                }
                return String::from_utf8(line.to_vec()).map_err(|_| {
                    SessionError::MalformedRequest("line is not valid UTF-8".to_string())
                });
            }

            // No delimiter yet; everything buffered belongs to one line, except
            // a trailing `\r` that may be the first half of `\r\n`
            let pending = self.buffer.len() - usize::from(self.buffer.ends_with(b"\r"));
            if pending > self.max_line_length {
                return Err(self.too_long());
            }

            self.buffer.reserve(BUFFER_SIZE);
            let n = with_deadline(self.io_timeout, self.reader.read_buf(&mut self.buffer)).await?;
            if n == 0 {
                self.buffer.clear();
                return Err(SessionError::EndOfStream);
            }
        }
    }

    /// Write `text` followed by `\n`, then flush.
    pub async fn write_line(&mut self, text: &str) -> Result<(), SessionError> {
        let mut out = BytesMut::with_capacity(text.len() + 1);
        out.extend_from_slice(text.as_bytes());
        out.put_u8(b'\n');

        let writer = &mut self.writer;
        with_deadline(self.io_timeout, async move {
            writer.write_all(&out).await?;
            writer.flush().await
        })
        .await
    }

    /// Close the write direction so the peer sees end of stream.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        with_deadline(self.io_timeout, self.writer.shutdown()).await
    }

    fn too_long(&mut self) -> SessionError {
        self.buffer.clear();
        SessionError::MalformedRequest(format!(
            "line exceeds {} bytes",
            self.max_line_length
        ))
    }
}

/// Run an I/O future under an optional deadline.
async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Timeout),
        },
        None => Ok(fut.await?),
    }
}
