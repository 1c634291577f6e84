//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable, RFC 2047 header words and charset
//! conversion. Decoders used on inbound mail are lenient: malformed input
//! is passed through rather than rejected.

use crate::error::{Error, Result};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::fmt::Write as _;

/// Base64 engine that accepts missing padding and trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data.
///
/// Characters outside the Base64 alphabet (line breaks, stray spaces) are
/// skipped, and padding is optional.
///
/// # Errors
///
/// Returns an error if the remaining input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
        .collect();
    LENIENT.decode(cleaned).map_err(Into::into)
}

/// Maximum line length for Quoted-Printable encoding.
const MAX_LINE_LENGTH: usize = 76;

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks in the input are kept as CRLF hard breaks.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::new();

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            result.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        let bytes = line.as_bytes();
        let mut line_length = 0;

        for (pos, byte) in bytes.iter().enumerate() {
            if line_length >= MAX_LINE_LENGTH - 3 {
                result.push_str("=\r\n");
                line_length = 0;
            }

            let is_last = pos + 1 == bytes.len();
            match byte {
                b'!'..=b'<' | b'>'..=b'~' => {
                    result.push(char::from(*byte));
                    line_length += 1;
                }
                // Trailing whitespace would be stripped in transit
                b' ' | b'\t' if !is_last => {
                    result.push(char::from(*byte));
                    line_length += 1;
                }
                _ => {
                    let _ = write!(result, "={byte:02X}");
                    line_length += 3;
                }
            }
        }
    }

    result
}

/// Decodes Quoted-Printable data (RFC 2045) into raw bytes.
///
/// Invalid escape sequences are kept verbatim.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break, possibly with trailing whitespace before it
        let mut j = i + 1;
        while j < data.len() && (data[j] == b' ' || data[j] == b'\t') {
            j += 1;
        }
        if data.get(j) == Some(&b'\r') && data.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if data.get(j) == Some(&b'\n') {
            i = j + 1;
            continue;
        }

        match (data.get(i + 1), data.get(i + 2)) {
            (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                result.push((hex_value(hi) << 4) | hex_value(lo));
                i += 3;
            }
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

const fn hex_value(byte: u8) -> u8 {
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        b'A'..=b'F' => byte - b'A' + 10,
        _ => 0,
    }
}

/// Converts bytes in the given charset to a string.
///
/// Unknown or missing charsets fall back to UTF-8 when the bytes are valid
/// UTF-8 and to Windows-1252 (a superset of Latin-1) otherwise.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    match encoding {
        Some(encoding) if encoding != UTF_8 => {
            let (text, _, _) = encoding.decode(bytes);
            text.into_owned()
        }
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                let (text, _, _) = WINDOWS_1252.decode(bytes);
                text.into_owned()
            }
        },
    }
}

/// Encodes a header value using RFC 2047 encoding.
///
/// Format: `=?charset?encoding?encoded-text?=`
///
/// # Errors
///
/// Returns an error if the charset is not supported.
pub fn encode_rfc2047(text: &str, charset: &str) -> Result<String> {
    // Only encode if necessary (contains non-ASCII)
    if text.chars().all(|c| c.is_ascii() && c != '=' && c != '?') {
        return Ok(text.to_string());
    }

    if !charset.eq_ignore_ascii_case("utf-8") {
        return Err(Error::InvalidEncoding(format!(
            "Unsupported header charset: {charset}"
        )));
    }

    let encoded = encode_base64(text.as_bytes());
    Ok(format!("=?{charset}?B?{encoded}?="))
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between two adjacent encoded words is dropped, as the RFC
/// requires. Words that fail to decode are left as they are.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut pending_space = String::new();
    let mut last_was_encoded = false;

    while !rest.is_empty() {
        let Some(start) = rest.find("=?") else {
            flush_plain(&mut result, &mut pending_space, rest);
            break;
        };

        let (plain, candidate) = rest.split_at(start);
        match decode_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                if !(last_was_encoded && plain.chars().all(char::is_whitespace)) {
                    flush_plain(&mut result, &mut pending_space, plain);
                }
                pending_space.clear();
                result.push_str(&decoded);
                last_was_encoded = true;
                rest = &candidate[consumed..];

                let whitespace_len = rest.len() - rest.trim_start().len();
                pending_space.push_str(&rest[..whitespace_len]);
                rest = &rest[whitespace_len..];
            }
            None => {
                flush_plain(&mut result, &mut pending_space, plain);
                result.push_str("=?");
                last_was_encoded = false;
                rest = &candidate[2..];
            }
        }
    }

    result
}

fn flush_plain(result: &mut String, pending_space: &mut String, plain: &str) {
    result.push_str(pending_space);
    pending_space.clear();
    result.push_str(plain);
}

/// Decodes a single encoded word at the start of `text`.
///
/// Returns the decoded text and the number of bytes consumed.
fn decode_encoded_word(text: &str) -> Option<(String, usize)> {
    let inner = text.strip_prefix("=?")?;
    let (raw_charset, inner) = inner.split_once('?')?;
    let (encoding, inner) = inner.split_once('?')?;
    let end = inner.find("?=")?;
    let payload = &inner[..end];

    if payload.contains(char::is_whitespace) {
        return None;
    }

    // RFC 2231 language suffix: charset*lang
    let charset = raw_charset.split('*').next().unwrap_or(raw_charset);

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(payload).ok()?,
        "Q" => decode_quoted_printable(payload.replace('_', " ").as_bytes()),
        _ => return None,
    };

    let consumed = 2 + raw_charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((decode_charset(&bytes, Some(charset)), consumed))
}
