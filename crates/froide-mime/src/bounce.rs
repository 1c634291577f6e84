//! Delivery status notification (bounce) detection.

use crate::address::Address;
use crate::message::{Message, Part};

/// Subject fragments used by mail servers for failure notices.
const FAILURE_SUBJECTS: &[&str] = &[
    "undeliverable",
    "undelivered",
    "delivery status notification",
    "delivery failure",
    "delivery has failed",
    "failure notice",
    "returned mail",
    "mail delivery failed",
    "mail delivery system",
    "unzustellbar",
    "nicht zugestellt",
    "unzustellbare",
];

/// Bounce severity derived from the DSN status code class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BounceType {
    /// Permanent failure (`5.x.x`).
    Hard,
    /// Transient failure (`4.x.x`).
    Soft,
}

/// What the parser learnt about a possible bounce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BounceInfo {
    /// Whether the message is a delivery failure notification.
    pub is_bounce: bool,
    /// Severity, when a status code was found.
    pub bounce_type: Option<BounceType>,
    /// DSN `Status` field, e.g. `5.1.1`.
    pub status: Option<String>,
    /// DSN `Diagnostic-Code` field without the type prefix.
    pub diagnostic_code: Option<String>,
    /// DSN `Final-Recipient` address.
    pub final_recipient: Option<String>,
}

pub(crate) fn detect(message: &Message, from: &Address, subject: &str) -> BounceInfo {
    let root_type = message.root.content_type();
    let is_report = root_type.is("multipart", "report")
        && root_type
            .parameters
            .get("report-type")
            .is_some_and(|kind| kind.eq_ignore_ascii_case("delivery-status"));

    let status_part = message
        .leaves()
        .into_iter()
        .find(|part| part.content_type().is("message", "delivery-status"));

    let local = from.local_part();
    let from_daemon = local.eq_ignore_ascii_case("mailer-daemon")
        || local.eq_ignore_ascii_case("postmaster");
    let subject = subject.to_lowercase();
    let failure_subject = FAILURE_SUBJECTS.iter().any(|s| subject.contains(s));

    let is_bounce = is_report || status_part.is_some() || (from_daemon && failure_subject);
    if !is_bounce {
        return BounceInfo::default();
    }

    let report_text = status_part.map_or_else(
        || {
            message
                .leaves()
                .into_iter()
                .filter(|part| part.content_type().is_text())
                .map(Part::body_text)
                .collect::<Vec<_>>()
                .join("\n")
        },
        Part::body_text,
    );

    let mut info = BounceInfo {
        is_bounce,
        ..BounceInfo::default()
    };
    read_report_fields(&report_text, &mut info);
    info.bounce_type = classify(info.status.as_deref(), info.diagnostic_code.as_deref());
    info
}

fn read_report_fields(text: &str, info: &mut BounceInfo) {
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "status" if info.status.is_none() => {
                info.status = value.split_whitespace().next().map(str::to_string);
            }
            "diagnostic-code" if info.diagnostic_code.is_none() => {
                let code = value.split_once(';').map_or(value, |(_, code)| code.trim());
                info.diagnostic_code = Some(code.to_string());
            }
            "final-recipient" if info.final_recipient.is_none() => {
                let address = value.split_once(';').map_or(value, |(_, a)| a.trim());
                info.final_recipient = Some(
                    address
                        .trim_matches(|c| c == '<' || c == '>')
                        .to_lowercase(),
                );
            }
            _ => {}
        }
    }
}

fn classify(status: Option<&str>, diagnostic: Option<&str>) -> Option<BounceType> {
    let class = status
        .and_then(|s| s.chars().next())
        .or_else(|| diagnostic.and_then(|d| d.trim_start().chars().next()))?;
    match class {
        '5' => Some(BounceType::Hard),
        '4' => Some(BounceType::Soft),
        _ => None,
    }
}
