//! MIME message structure and handling.

use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::header::{Headers, split_head_body};
use chrono::{DateTime, Utc};
use std::fmt;

/// Nesting limit for multipart bodies. Deeper parts are kept as opaque leaves.
const MAX_DEPTH: usize = 16;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// MIME entity: headers, raw body and, for multiparts, its children.
#[derive(Debug, Clone, Default)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (raw, still transfer-encoded).
    pub body: Vec<u8>,
    /// Child parts of a multipart entity.
    pub parts: Vec<Part>,
}

impl Part {
    /// Creates a new leaf part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            parts: Vec::new(),
        }
    }

    /// Parses a raw entity, recursing into multipart bodies.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self::parse_at_depth(raw, 0)
    }

    fn parse_at_depth(raw: &[u8], depth: usize) -> Self {
        let (head, body) = split_head_body(raw);
        let mut part = Self::new(Headers::parse(head), body.to_vec());

        let content_type = part.content_type();
        if content_type.is_multipart()
            && depth < MAX_DEPTH
            && let Some(boundary) = content_type.boundary()
        {
            part.parts = split_multipart(body, boundary)
                .into_iter()
                .map(|child| Self::parse_at_depth(child, depth + 1))
                .collect();
        }

        part
    }

    /// Gets the content type, falling back to `text/plain` when the header
    /// is missing or malformed.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|value| ContentType::parse(value).ok())
            .unwrap_or_else(ContentType::text_plain)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Gets the content disposition, if the header is present.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Returns the file name from the disposition or the content type.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        let from_disposition = self
            .disposition()
            .and_then(|d| d.filename().map(str::to_string));
        from_disposition
            .or_else(|| self.content_type().name().map(str::to_string))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// Undecodable Base64 yields the raw body.
    #[must_use]
    pub fn decode_body(&self) -> Vec<u8> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => {
                decode_base64(&String::from_utf8_lossy(&self.body))
                    .unwrap_or_else(|_| self.body.clone())
            }
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            _ => self.body.clone(),
        }
    }

    /// Gets the decoded body as text in the declared charset.
    #[must_use]
    pub fn body_text(&self) -> String {
        let content_type = self.content_type();
        decode_charset(&self.decode_body(), content_type.charset())
    }

    /// Returns true if this part has child parts.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Collects the leaf parts in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Self>) {
        if self.parts.is_empty() {
            out.push(self);
        } else {
            for part in &self.parts {
                part.collect_leaves(out);
            }
        }
    }
}

/// MIME message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Top-level entity; its headers are the message headers.
    pub root: Part,
}

impl Message {
    /// Parses a raw RFC 5322 message. Never fails.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            root: Part::parse(raw),
        }
    }

    /// Message headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Gets the decoded Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.root.headers.get_decoded("subject")
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.root.headers.get("message-id").map(str::trim)
    }

    /// Gets the Date header parsed as RFC 2822.
    #[must_use]
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.root.headers.get("date").and_then(parse_date)
    }

    /// Collects the leaf parts in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Part> {
        self.root.leaves()
    }
}

/// Parses an RFC 2822 date, tolerating a trailing `(Zone)` comment.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = match value.rfind('(') {
        Some(pos) if value.ends_with(')') => value[..pos].trim_end(),
        _ => value,
    };
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Splits a multipart body on its boundary lines.
///
/// A missing closing delimiter keeps the last part. The line break before
/// each delimiter belongs to the delimiter.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let close = format!("--{boundary}--");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = trim_line_end(&body[pos..line_end]);
        let is_close = line == close.as_bytes();

        if is_close || line == delimiter.as_bytes() {
            if let Some(s) = start {
                parts.push(strip_trailing_newline(&body[s..pos]));
            }
            if is_close {
                return parts;
            }
            start = Some(line_end);
        }
        pos = line_end;
    }

    if let Some(s) = start
        && s < body.len()
    {
        parts.push(strip_trailing_newline(&body[s..]));
    }

    parts
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

fn strip_trailing_newline(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}
