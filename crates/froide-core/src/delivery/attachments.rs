//! Attachment file names and conversion eligibility.

use std::collections::HashSet;

use crate::message::Redactor;

const CONVERTIBLE_TYPES: &[&str] = &[
    "application/msword",
    "application/rtf",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/tiff",
    "text/rtf",
];

const CONVERTIBLE_EXTENSIONS: &[&str] = &[
    "doc", "docx", "rtf", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "jpg", "jpeg",
    "png", "gif", "tif", "tiff",
];

/// Returns true if an attachment should get a PDF rendition.
#[must_use]
pub fn is_convertible(content_type: &str, name: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    if CONVERTIBLE_TYPES.contains(&content_type.as_str()) {
        return true;
    }
    // Mailers often send office files as application/octet-stream.
    content_type == "application/octet-stream"
        && extension(name).is_some_and(|ext| {
            CONVERTIBLE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn extension(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && !ext.contains(' '))
}

/// Produces unique, redacted, length-capped names for one message's
/// attachments.
#[derive(Debug)]
pub struct AttachmentNamer<'a> {
    redactor: &'a Redactor,
    max_len: usize,
    used: HashSet<String>,
}

impl<'a> AttachmentNamer<'a> {
    /// Creates a namer for one message.
    #[must_use]
    pub fn new(redactor: &'a Redactor, max_len: usize) -> Self {
        Self {
            redactor,
            max_len: max_len.max(16),
            used: HashSet::new(),
        }
    }

    /// Returns the stored name for an attachment called `raw`.
    pub fn name(&mut self, raw: &str) -> String {
        let cleaned = sanitize(&self.redactor.redact(raw));
        let cleaned = if cleaned.is_empty() {
            "attachment".to_string()
        } else {
            cleaned
        };

        let (stem, ext) = split_extension(&cleaned);
        let mut candidate = truncate(stem, ext, "", self.max_len);
        let mut counter = 1;
        while self.used.contains(&candidate.to_lowercase()) {
            candidate = truncate(stem, ext, &format!("_{counter}"), self.max_len);
            counter += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }
}

/// Drops path components and characters that are unsafe in file names.
fn sanitize(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect();
    cleaned.trim().trim_start_matches('.').trim().to_string()
}

fn split_extension(name: &str) -> (&str, &str) {
    match extension(name) {
        Some(ext) if name.len() > ext.len() + 1 => name.split_at(name.len() - ext.len() - 1),
        _ => (name, ""),
    }
}

/// Joins `stem + suffix + ext`, shortening the stem to fit `max_len` chars.
fn truncate(stem: &str, ext: &str, suffix: &str, max_len: usize) -> String {
    let reserved = ext.chars().count() + suffix.chars().count();
    let keep = max_len.saturating_sub(reserved).max(1);
    let stem: String = stem.chars().take(keep).collect();
    format!("{stem}{suffix}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let redactor = Redactor::default();
        let mut namer = AttachmentNamer::new(&redactor, 250);
        assert_eq!(namer.name("bescheid.pdf"), "bescheid.pdf");
        assert_eq!(namer.name("Bescheid.pdf"), "Bescheid_1.pdf");
        assert_eq!(namer.name("bescheid.pdf"), "bescheid_2.pdf");
        assert_eq!(namer.name("notes"), "notes");
        assert_eq!(namer.name("notes"), "notes_1");
    }

    #[test]
    fn test_sanitize_and_empty() {
        let redactor = Redactor::default();
        let mut namer = AttachmentNamer::new(&redactor, 250);
        assert_eq!(namer.name("C:\\Users\\amt\\akte.docx"), "akte.docx");
        assert_eq!(namer.name("../../etc/passwd"), "passwd");
        assert_eq!(namer.name("  "), "attachment");
        assert_eq!(namer.name("a\u{0}b?.txt"), "a_b_.txt");
    }

    #[test]
    fn test_length_cap_keeps_extension() {
        let redactor = Redactor::default();
        let mut namer = AttachmentNamer::new(&redactor, 20);
        let long = format!("{}.pdf", "ä".repeat(40));
        let name = namer.name(&long);
        assert_eq!(name.chars().count(), 20);
        assert!(name.ends_with(".pdf"));

        let second = namer.name(&long);
        assert_eq!(second.chars().count(), 20);
        assert!(second.ends_with("_1.pdf"));
    }

    #[test]
    fn test_convertible() {
        assert!(is_convertible("application/msword", "x.doc"));
        assert!(is_convertible("IMAGE/JPEG", "scan"));
        assert!(is_convertible("application/octet-stream", "Antwort.DOCX"));
        assert!(!is_convertible("application/octet-stream", "archive.zip"));
        assert!(!is_convertible("application/pdf", "bescheid.pdf"));
    }
}
