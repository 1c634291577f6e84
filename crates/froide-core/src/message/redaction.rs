//! Best-effort removal of requester details from message text.

use regex::{NoExpand, Regex, RegexBuilder};

use crate::request::FoiRequest;

/// Replacement for the requester's name.
pub const NAME_PLACEHOLDER: &str = "<<Name>>";
/// Replacement for the requester's addresses.
pub const EMAIL_PLACEHOLDER: &str = "<<E-Mail-Adresse>>";

/// Redacts the requester's name and addresses from text.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    rules: Vec<(Regex, &'static str)>,
}

impl Redactor {
    /// Builds the redaction rules for a request's owner.
    #[must_use]
    pub fn for_request(request: &FoiRequest) -> Self {
        let mut rules = Vec::new();

        for address in [&request.secret_address, &request.owner_email] {
            if let Some(rule) = literal_rule(address, false) {
                rules.push((rule, EMAIL_PLACEHOLDER));
            }
        }

        // Full name first so "Anna Müller" becomes one placeholder, not two.
        let name = request.owner_name.trim();
        if let Some(rule) = literal_rule(name, true) {
            rules.push((rule, NAME_PLACEHOLDER));
        }
        for part in name.split_whitespace().filter(|p| p.chars().count() >= 3) {
            if let Some(rule) = literal_rule(part, true) {
                rules.push((rule, NAME_PLACEHOLDER));
            }
        }

        Self { rules }
    }

    /// Returns `text` with every rule applied in order.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (rule, placeholder) in &self.rules {
            result = rule.replace_all(&result, NoExpand(placeholder)).into_owned();
        }
        result
    }

    /// Returns true if there is nothing to redact.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn literal_rule(literal: &str, whole_word: bool) -> Option<Regex> {
    let literal = literal.trim();
    if literal.is_empty() {
        return None;
    }
    let escaped = regex::escape(literal);
    let pattern = if whole_word {
        format!(r"\b{escaped}\b")
    } else {
        escaped
    };
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::request::{RequestId, RequestStatus};

    fn request() -> FoiRequest {
        FoiRequest {
            id: RequestId::new(1),
            title: "Akten".into(),
            slug: "akten".into(),
            secret_address: "anna.k3j5h6g7f8@foi.example".into(),
            closed: false,
            public_body_id: None,
            same_as: None,
            campaign: None,
            owner_name: "Anna Müller".into(),
            owner_email: "anna@private.example".into(),
            status: RequestStatus::AwaitingResponse,
            is_public: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_redacts_name_and_addresses() {
        let redactor = Redactor::for_request(&request());
        let text = "Sehr geehrte Frau Müller,\nAntwort an ANNA.K3J5H6G7F8@foi.example.\nGruß an Anna Müller";
        assert_eq!(
            redactor.redact(text),
            "Sehr geehrte Frau <<Name>>,\nAntwort an <<E-Mail-Adresse>>.\nGruß an <<Name>>"
        );
    }

    #[test]
    fn test_short_parts_and_substrings_kept() {
        let mut request = request();
        request.owner_name = "Al Berg".into();
        let redactor = Redactor::for_request(&request);
        assert_eq!(redactor.redact("Al Bergmann und Al"), "Al Bergmann und Al");
        assert_eq!(redactor.redact("Herr Berg"), "Herr <<Name>>");
    }

    #[test]
    fn test_empty_owner() {
        let mut request = request();
        request.owner_name = String::new();
        request.owner_email = String::new();
        request.secret_address = String::new();
        assert!(Redactor::for_request(&request).is_empty());
    }
}
