//! MIME header handling.

use crate::encoding::{decode_charset, decode_rfc2047};
use std::fmt;

/// Collection of email headers.
///
/// Keeps headers in their original order; names are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        self.entries.push((name, value.into()));
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header, in message order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Gets the first value with RFC 2047 encoded words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Returns true if the header is present at least once.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parses a raw header block.
    ///
    /// Continuation lines are unfolded into the preceding header. Lines
    /// without a colon (such as an mbox `From ` separator) are ignored.
    /// Non-UTF-8 bytes are read as Windows-1252.
    #[must_use]
    pub fn parse(block: &[u8]) -> Self {
        let text = decode_charset(block, None);
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value.trim().to_string());
            }

            if let Some((name, value)) = line.split_once(':')
                && !name.is_empty()
                && !name.contains(char::is_whitespace)
            {
                current = Some((name.to_string(), value.trim().to_string()));
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value.trim().to_string());
        }

        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            // Capitalize header name (e.g., "content-type" -> "Content-Type")
            let capitalized = name
                .split('-')
                .map(|part| {
                    let mut chars = part.chars();
                    chars.next().map_or_else(String::new, |first| {
                        first.to_uppercase().collect::<String>() + chars.as_str()
                    })
                })
                .collect::<Vec<_>>()
                .join("-");

            writeln!(f, "{capitalized}: {value}")?;
        }

        Ok(())
    }
}

/// Splits a raw message into its header block and body.
///
/// The separator is the first empty line (CRLF or bare LF). A message
/// without a separator is all headers.
#[must_use]
pub fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(rest) = raw.strip_prefix(b"\r\n") {
        return (&[], rest);
    }
    if let Some(rest) = raw.strip_prefix(b"\n") {
        return (&[], rest);
    }

    let crlf = find(raw, b"\r\n\r\n");
    let lf = find(raw, b"\n\n");

    match (crlf, lf) {
        (Some(a), Some(b)) if b < a => (&raw[..b], &raw[b + 2..]),
        (Some(a), _) => (&raw[..a], &raw[a + 4..]),
        (None, Some(b)) => (&raw[..b], &raw[b + 2..]),
        (None, None) => (raw, &[]),
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
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

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
    }

    #[test]
    fn test_headers_keep_order() {
        let mut headers = Headers::new();
        headers.add("Received", "from a");
        headers.add("Received", "from b");
        assert_eq!(headers.get_all("received"), vec!["from a", "from b"]);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n"
        );

        let headers = Headers::parse(text.as_bytes());
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
    }

    #[test]
    fn test_headers_parse_skips_mbox_separator() {
        let text = "From someone@example.com Mon Jan  1 00:00:00 2024\nSubject: Hi\n";
        let headers = Headers::parse(text.as_bytes());
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("subject"), Some("Hi"));
    }

    #[test]
    fn test_get_decoded() {
        let mut headers = Headers::new();
        headers.add("Subject", "=?utf-8?B?SMOpbGxv?=");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo"));
    }

    #[test]
    fn test_headers_display() {
        let mut headers = Headers::new();
        headers.add("from", "sender@example.com");
        headers.add("content-type", "text/plain");

        let s = headers.to_string();
        assert!(s.contains("From: sender@example.com"));
        assert!(s.contains("Content-Type: text/plain"));
    }

    #[test]
    fn test_split_head_body() {
        let (head, body) = split_head_body(b"Subject: a\r\n\r\nbody\r\n");
        assert_eq!(head, b"Subject: a");
        assert_eq!(body, b"body\r\n");

        let (head, body) = split_head_body(b"Subject: a\n\nbody");
        assert_eq!(head, b"Subject: a");
        assert_eq!(body, b"body");

        let (head, body) = split_head_body(b"Subject: only headers");
        assert_eq!(head, b"Subject: only headers");
        assert!(body.is_empty());
    }
}
