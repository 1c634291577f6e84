//! Framed I/O for the IMAP protocol.
//!
//! Responses are CRLF-terminated lines that may embed `{n}` literals. A
//! "response" here is one logical line with all of its literals inlined.

#![allow(clippy::missing_errors_doc)]

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size. Larger messages are refused rather than buffered.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Buffered IMAP connection.
pub struct FramedStream<S> {
    reader: BufReader<S>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
        }
    }

    /// Reads one complete response, inlining any literals it announces.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();

        loop {
            let line = self.read_line().await?;
            response.extend_from_slice(&line);

            let Some(literal_len) = parse_literal_length(&line) else {
                break;
            };
            if literal_len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {literal_len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }

            let start = response.len();
            response.resize(start + literal_len, 0);
            self.reader.read_exact(&mut response[start..]).await?;
        }

        trace!(len = response.len(), "read IMAP response");
        Ok(response)
    }

    /// Reads responses until the tagged completion for `tag` arrives.
    ///
    /// The tagged line is the last element of the returned list.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut responses = Vec::new();

        loop {
            let response = self.read_response().await?;
            let done = is_tagged(&response, tag);
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            // A CR at the end of one buffer and LF at the start of the next
            // is still a line end.
            let split_crlf = line.last() == Some(&b'\r') && buf[0] == b'\n';
            if split_crlf {
                line.push(b'\n');
                self.reader.consume(1);
                break;
            }

            if let Some(pos) = find_crlf(buf) {
                line.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }

        Ok(line)
    }

    /// Writes a complete command line and flushes it.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn is_tagged(response: &[u8], tag: &str) -> bool {
    response
        .strip_prefix(tag.as_bytes())
        .is_some_and(|rest| rest.first() == Some(&b' '))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a literal announcement (`{123}` or `{123+}`) at the end of a line.
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;

    std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"BODY[] {123}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"BODY[] {123+}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"no literal\r\n"), None);
        assert_eq!(parse_literal_length(b"incomplete {123"), None);
        assert_eq!(parse_literal_length(b"wrong {abc}\r\n"), None);
    }

    #[test]
    fn test_is_tagged() {
        assert!(is_tagged(b"A0001 OK done\r\n", "A0001"));
        assert!(!is_tagged(b"A00010 OK done\r\n", "A0001"));
        assert!(!is_tagged(b"* OK ready\r\n", "A0001"));
    }

    #[tokio::test]
    async fn test_read_with_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (UID 7 BODY[] {5}\r\n")
            .read(b"hello)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 1 FETCH (UID 7 BODY[] {5}\r\nhello)\r\n");
    }

    #[tokio::test]
    async fn test_literal_containing_crlf() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[] {6}\r\na\r\n\r\nb)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert!(response.ends_with(b"a\r\n\r\nb)\r\n"));
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads() {
        let mock = Builder::new().read(b"* OK ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_until_tagged() {
        let mock = Builder::new()
            .read(b"* 3 EXISTS\r\n")
            .read(b"* OK [UIDVALIDITY 1] ok\r\n")
            .read(b"A0001 OK [READ-WRITE] SELECT completed\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let responses = framed.read_until_tagged("A0001").await.unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[2], b"A0001 OK [READ-WRITE] SELECT completed\r\n");
    }

    #[tokio::test]
    async fn test_literal_size_validation() {
        let header = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_eof_is_error() {
        let mock = Builder::new().read(b"* OK partial").build();
        let mut framed = FramedStream::new(mock);

        assert!(matches!(framed.read_response().await, Err(Error::Io(_))));
    }
}
