//! Flattening a MIME tree into the fields the mail pipeline works with.

use crate::address::{Address, parse_address, parse_address_list};
use crate::bounce::{self, BounceInfo};
use crate::header::Headers;
use crate::html::html_to_text;
use crate::message::{Message, Part};
use chrono::{DateTime, Utc};

/// Subject prefixes used by out-of-office responders.
const AUTO_REPLY_SUBJECTS: &[&str] = &[
    "auto:",
    "autoreply",
    "auto-reply",
    "automatic reply",
    "automatische antwort",
    "abwesenheitsnotiz",
    "abwesend",
    "out of office",
    "out of the office",
    "réponse automatique",
];

/// Authentication results that count as a failed check.
const FAILED_RESULTS: &[&str] = &["fail", "softfail", "permerror"];

/// An attachment extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedAttachment {
    /// File name as sent, or a generated `attachment-N` name.
    pub name: String,
    /// Decoded size in bytes.
    pub size: usize,
    /// `type/subtype`, lowercased.
    pub content_type: String,
    /// Decoded content.
    pub data: Vec<u8>,
}

/// A failed sender authentication check.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AuthenticityCheck {
    /// `dkim`, `spf` or `dmarc`.
    pub method: String,
    /// Result keyword, e.g. `fail`.
    pub result: String,
    /// The raw clause the result was read from.
    pub details: String,
}

/// Structured view of an inbound email.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedEmail {
    /// Decoded subject, empty when missing.
    pub subject: String,
    /// `Message-ID` header as sent, empty when missing.
    pub message_id: String,
    /// Parsed `Date` header.
    pub date: Option<DateTime<Utc>>,
    /// Sender. Both fields are empty when `From` is missing.
    pub from: Address,
    /// `To` recipients.
    pub to: Vec<Address>,
    /// `Cc` recipients.
    pub cc: Vec<Address>,
    /// `Resent-To` recipients.
    pub resent_to: Vec<Address>,
    /// `Resent-Cc` recipients.
    pub resent_cc: Vec<Address>,
    /// `X-Original-To` addresses added by the receiving MTA.
    pub x_original_to: Vec<Address>,
    /// Plain text body. Derived from the HTML body when no text part exists.
    pub body: String,
    /// First HTML body, if any.
    pub html: Option<String>,
    /// Attachments in document order.
    pub attachments: Vec<ParsedAttachment>,
    /// Bounce detection result.
    pub bounce_info: BounceInfo,
    /// Whether the message is an automatic reply.
    pub is_auto_reply: bool,
    /// Failed DKIM, SPF or DMARC checks.
    pub fails_authenticity: Vec<AuthenticityCheck>,
}

impl ParsedEmail {
    /// Iterates over every recipient header in routing order.
    pub fn all_recipients(&self) -> impl Iterator<Item = &Address> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.resent_to)
            .chain(&self.resent_cc)
            .chain(&self.x_original_to)
    }

    /// Shorthand for `bounce_info.is_bounce`.
    #[must_use]
    pub const fn is_bounce(&self) -> bool {
        self.bounce_info.is_bounce
    }
}

/// Parses raw message bytes.
///
/// Never fails: malformed input degrades to empty or best-guess fields.
#[must_use]
pub fn parse_email(raw: &[u8]) -> ParsedEmail {
    let message = Message::parse(raw);
    let headers = message.headers();

    let subject = message.subject().unwrap_or_default();
    let from = headers
        .get("from")
        .and_then(parse_address)
        .unwrap_or_default();

    let mut email = ParsedEmail {
        message_id: message.message_id().unwrap_or_default().to_string(),
        date: message.date(),
        to: address_header(headers, "to"),
        cc: address_header(headers, "cc"),
        resent_to: address_header(headers, "resent-to"),
        resent_cc: address_header(headers, "resent-cc"),
        x_original_to: address_header(headers, "x-original-to"),
        is_auto_reply: is_auto_reply(headers, &subject),
        fails_authenticity: authenticity_failures(headers),
        bounce_info: bounce::detect(&message, &from, &subject),
        from,
        subject,
        ..ParsedEmail::default()
    };

    collect_content(&message, &mut email);
    email
}

fn address_header(headers: &Headers, name: &str) -> Vec<Address> {
    headers
        .get_all(name)
        .into_iter()
        .flat_map(parse_address_list)
        .collect()
}

fn collect_content(message: &Message, email: &mut ParsedEmail) {
    let mut text_parts: Vec<String> = Vec::new();

    for part in message.leaves() {
        let content_type = part.content_type();
        if content_type.is("message", "delivery-status") {
            continue;
        }

        if is_attachment(part) {
            let data = part.decode_body();
            let mime_type = content_type.mime_type();
            let name = part.filename().unwrap_or_else(|| {
                fallback_name(email.attachments.len() + 1, &mime_type)
            });
            email.attachments.push(ParsedAttachment {
                name,
                size: data.len(),
                content_type: mime_type,
                data,
            });
            continue;
        }

        if content_type.is("text", "html") {
            if email.html.is_none() {
                email.html = Some(part.body_text());
            }
        } else {
            text_parts.push(part.body_text());
        }
    }

    email.body = if text_parts.is_empty() {
        email.html.as_deref().map(html_to_text).unwrap_or_default()
    } else {
        text_parts.join("\n\n")
    };
}

fn is_attachment(part: &Part) -> bool {
    if part
        .disposition()
        .is_some_and(|disposition| disposition.is_attachment())
    {
        return true;
    }
    if part.filename().is_some() {
        return true;
    }
    let content_type = part.content_type();
    !(content_type.is_text() || content_type.is_multipart())
}

fn fallback_name(index: usize, mime_type: &str) -> String {
    let extension = match mime_type {
        "message/rfc822" => ".eml",
        "application/pdf" => ".pdf",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "text/plain" => ".txt",
        "text/html" => ".html",
        _ => "",
    };
    format!("attachment-{index}{extension}")
}

fn is_auto_reply(headers: &Headers, subject: &str) -> bool {
    if headers
        .get("auto-submitted")
        .is_some_and(|value| !value.trim().eq_ignore_ascii_case("no"))
    {
        return true;
    }
    if headers.contains("x-autoreply") || headers.contains("x-autorespond") {
        return true;
    }
    if headers
        .get("precedence")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("auto_reply"))
    {
        return true;
    }

    let subject = subject.trim().to_lowercase();
    AUTO_REPLY_SUBJECTS
        .iter()
        .any(|prefix| subject.starts_with(prefix))
}

fn authenticity_failures(headers: &Headers) -> Vec<AuthenticityCheck> {
    let mut failures: Vec<AuthenticityCheck> = Vec::new();

    for value in headers.get_all("authentication-results") {
        for clause in value.split(';').map(str::trim) {
            let Some((method, rest)) = clause.split_once('=') else {
                continue;
            };
            let method = method.trim().to_ascii_lowercase();
            if !matches!(method.as_str(), "dkim" | "spf" | "dmarc") {
                continue;
            }
            let result = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            push_failure(&mut failures, method, result, clause);
        }
    }

    for value in headers.get_all("received-spf") {
        let result = value
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        push_failure(&mut failures, "spf".to_string(), result, value.trim());
    }

    failures
}

fn push_failure(failures: &mut Vec<AuthenticityCheck>, method: String, result: String, details: &str) {
    if !FAILED_RESULTS.contains(&result.as_str()) {
        return;
    }
    if failures
        .iter()
        .any(|check| check.method == method && check.result == result)
    {
        return;
    }
    failures.push(AuthenticityCheck {
        method,
        result,
        details: details.to_string(),
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_simple_reply() {
        let email = parse_email(
            concat!(
                "From: \"Amt Musterstadt\" <Poststelle@Musterstadt.de>\r\n",
                "To: Anna <anna.k3v9x2m4pq@fragdenstaat.de>\r\n",
                "Cc: other@example.org\r\n",
                "X-Original-To: anna.k3v9x2m4pq@fragdenstaat.de\r\n",
                "Subject: AW: Ihre Anfrage\r\n",
                "Message-ID: <abc@musterstadt.de>\r\n",
                "Date: Tue, 2 Jan 2024 10:00:00 +0100\r\n",
                "\r\n",
                "Anbei die Unterlagen.\r\n"
            )
            .as_bytes(),
        );

        assert_eq!(email.from.email, "poststelle@musterstadt.de");
        assert_eq!(email.from.name, "Amt Musterstadt");
        assert_eq!(email.subject, "AW: Ihre Anfrage");
        assert_eq!(email.message_id, "<abc@musterstadt.de>");
        assert!(email.date.is_some());
        assert_eq!(email.all_recipients().count(), 3);
        assert_eq!(email.body.trim(), "Anbei die Unterlagen.");
        assert!(!email.is_auto_reply);
        assert!(!email.is_bounce());
        assert!(email.fails_authenticity.is_empty());
    }

    #[test]
    fn test_attachments_and_html() {
        let email = parse_email(
            concat!(
                "From: a@amt.de\r\n",
                "Content-Type: multipart/mixed; boundary=\"x\"\r\n",
                "\r\n",
                "--x\r\n",
                "Content-Type: text/html; charset=utf-8\r\n",
                "\r\n",
                "<p>Sehr geehrte Damen und Herren</p>\r\n",
                "--x\r\n",
                "Content-Type: application/pdf\r\n",
                "Content-Disposition: attachment; filename=\"Bescheid.pdf\"\r\n",
                "Content-Transfer-Encoding: base64\r\n",
                "\r\n",
                "JVBERi0xLjQ=\r\n",
                "--x\r\n",
                "Content-Type: message/rfc822\r\n",
                "\r\n",
                "Subject: forwarded\r\n",
                "\r\n",
                "inner\r\n",
                "--x--\r\n"
            )
            .as_bytes(),
        );

        assert_eq!(email.html.as_deref(), Some("<p>Sehr geehrte Damen und Herren</p>"));
        assert_eq!(email.body, "Sehr geehrte Damen und Herren");
        assert_eq!(email.attachments.len(), 2);
        assert_eq!(email.attachments[0].name, "Bescheid.pdf");
        assert_eq!(email.attachments[0].data, b"%PDF-1.4");
        assert_eq!(email.attachments[0].size, 8);
        assert_eq!(email.attachments[1].name, "attachment-2.eml");
        assert_eq!(email.attachments[1].content_type, "message/rfc822");
    }

    #[test]
    fn test_auto_reply_detection() {
        let by_header = parse_email(b"Auto-Submitted: auto-replied\r\nSubject: Re\r\n\r\nx");
        assert!(by_header.is_auto_reply);

        let explicit_no = parse_email(b"Auto-Submitted: no\r\nSubject: Re\r\n\r\nx");
        assert!(!explicit_no.is_auto_reply);

        let by_subject = parse_email(b"Subject: Abwesenheitsnotiz: Ihre Anfrage\r\n\r\nx");
        assert!(by_subject.is_auto_reply);
    }

    #[test]
    fn test_authenticity_failures() {
        let email = parse_email(
            concat!(
                "Authentication-Results: mx.fragdenstaat.de; dkim=fail (bad signature) header.d=amt.de;\r\n",
                " spf=pass smtp.mailfrom=amt.de; dmarc=fail header.from=amt.de\r\n",
                "Received-SPF: softfail (domain does not designate sender)\r\n",
                "\r\n",
                "x"
            )
            .as_bytes(),
        );

        let methods: Vec<_> = email
            .fails_authenticity
            .iter()
            .map(|c| (c.method.as_str(), c.result.as_str()))
            .collect();
        assert_eq!(
            methods,
            vec![("dkim", "fail"), ("dmarc", "fail"), ("spf", "softfail")]
        );
    }

    #[test]
    fn test_garbage_degrades() {
        let email = parse_email(b"\xff\xfe\x00garbage without headers");
        assert!(email.subject.is_empty());
        assert!(email.from.email.is_empty());
        assert!(email.date.is_none());
    }

    proptest! {
        #[test]
        fn parse_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let _ = parse_email(&raw);
        }

        #[test]
        fn parse_never_panics_on_mime_like_input(
            boundary in "[a-z0-9]{1,10}",
            body in "[ -~\r\n]{0,400}",
        ) {
            let raw = format!(
                "Content-Type: multipart/mixed; boundary={boundary}\r\n\r\n--{boundary}\r\n{body}\r\n--{boundary}--"
            );
            let _ = parse_email(raw.as_bytes());
        }
    }
}
