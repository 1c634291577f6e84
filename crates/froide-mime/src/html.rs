//! Plain-text fallback for HTML-only mail.

use htmd::HtmlToMarkdown;

/// Converts an HTML body to readable text (Markdown).
///
/// `<style>`, `<script>` and `<head>` contents are dropped. Conversion
/// failures yield an empty string; the raw HTML stays on the message.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["head", "style", "script"])
        .build();
    converter
        .convert(html)
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}
