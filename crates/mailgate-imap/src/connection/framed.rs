//! Line framing for the IMAP connection.
//!
//! The responses a login check reads are single CRLF-terminated lines.
//! Literals only travel client to server, so none are reassembled here.

#![allow(clippy::missing_errors_doc)]

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Maximum line length; a backend sending more is misbehaving.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Framed connection: buffered line reads, flushed command writes.
pub struct FramedStream<S> {
    reader: BufReader<S>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
        }
    }

    /// Reads a single CRLF-terminated line (CRLF included).
    ///
    /// A bare LF does not end a line, and a CRLF split across two reads is
    /// still recognized.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            let (take, at_lf) = buf
                .iter()
                .position(|&b| b == b'\n')
                .map_or((buf.len(), false), |pos| (pos + 1, true));
            line.extend_from_slice(&buf[..take]);
            self.reader.consume(take);

            if at_lf && line.ends_with(b"\r\n") {
                return Ok(line);
            }
            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Reads lines until the tagged completion for `tag` arrives.
    ///
    /// Returns every line read, the tagged one last.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            let is_tagged = line
                .strip_prefix(tag.as_bytes())
                .is_some_and(|rest| rest.first() == Some(&b' '));

            lines.push(line);

            if is_tagged {
                return Ok(lines);
            }
        }
    }

    /// Waits for the continuation request that allows literal data.
    ///
    /// Returns `None` on `+`. If the server completes the command instead,
    /// the lines read so far are returned, the tagged one last.
    pub async fn read_continuation(&mut self, tag: &str) -> Result<Option<Vec<Vec<u8>>>> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            if line.starts_with(b"+") {
                return Ok(None);
            }

            let is_tagged = line
                .strip_prefix(tag.as_bytes())
                .is_some_and(|rest| rest.first() == Some(&b' '));

            lines.push(line);

            if is_tagged {
                return Ok(Some(lines));
            }
        }
    }

    /// Writes a command and flushes.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Buffered, unread data is dropped. Only call this at a point where the
    /// server must be silent (right after the STARTTLS completion).
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_crlf_split_across_reads() {
        let mock = Builder::new()
            .read(b"* OK ready\r")
            .read(b"\nA0001 OK done\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), b"* OK ready\r\n");
        assert_eq!(framed.read_line().await.unwrap(), b"A0001 OK done\r\n");
    }

    #[tokio::test]
    async fn test_bare_lf_does_not_end_line() {
        let mock = Builder::new().read(b"* OK two\nparts\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), b"* OK two\nparts\r\n");
    }

    #[tokio::test]
    async fn test_read_line_across_reads() {
        let mock = Builder::new().read(b"* OK re").read(b"ady\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_until_tagged() {
        let mock = Builder::new()
            .read(b"* CAPABILITY IMAP4rev2\r\n")
            .read(b"A00011 OK not ours\r\n")
            .read(b"A0001 OK Success\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let lines = framed.read_until_tagged("A0001").await.unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], b"A0001 OK Success\r\n");
    }

    #[tokio::test]
    async fn test_eof_is_error() {
        let mock = Builder::new().read(b"* OK partial").build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_line().await.unwrap_err();
        assert!(err.to_string().contains("connection closed"));
    }

    #[tokio::test]
    async fn test_line_length_limit() {
        let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_line().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }

    #[tokio::test]
    async fn test_read_continuation() {
        let mock = Builder::new()
            .read(b"* OK still here\r\n")
            .read(b"+ Ready for literal\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        assert!(framed.read_continuation("A0001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_continuation_refused() {
        let mock = Builder::new().read(b"A0001 BAD no literals\r\n").build();
        let mut framed = FramedStream::new(mock);

        let lines = framed.read_continuation("A0001").await.unwrap().unwrap();
        assert_eq!(lines, vec![b"A0001 BAD no literals\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"A0001 LOGOUT\r\n").build();
        let mut framed = FramedStream::new(mock);

        framed.write_command(b"A0001 LOGOUT\r\n").await.unwrap();
    }
}
