//! Configurable content-hiding predicates.

use froide_mime::ParsedEmail;
use regex::RegexBuilder;

use crate::config::HideContentSettings;
use crate::{Error, Result};

/// A predicate that hides a message's content when it returns true.
pub type HidePredicate = Box<dyn Fn(&ParsedEmail) -> bool + Send + Sync>;

/// Ordered list of hide predicates, built once at startup.
#[derive(Default)]
pub struct ContentPolicy {
    predicates: Vec<HidePredicate>,
}

impl std::fmt::Debug for ContentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentPolicy")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl ContentPolicy {
    /// A policy that never hides anything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a predicate.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ParsedEmail) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Box::new(predicate));
        self
    }

    /// Builds the predicates described in the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a subject pattern is not a valid regex.
    pub fn from_settings(settings: &HideContentSettings) -> Result<Self> {
        let mut policy = Self::new();

        for pattern in &settings.subject_patterns {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Config(format!("invalid subject pattern {pattern:?}: {e}")))?;
            policy = policy.with_predicate(move |email| regex.is_match(&email.subject));
        }

        if !settings.sender_domains.is_empty() {
            let domains: Vec<String> = settings
                .sender_domains
                .iter()
                .map(|d| d.trim().to_lowercase())
                .collect();
            policy = policy.with_predicate(move |email| {
                email
                    .from
                    .domain()
                    .is_some_and(|domain| domains.iter().any(|d| d == domain))
            });
        }

        Ok(policy)
    }

    /// Evaluates the predicates in order, stopping at the first hit.
    #[must_use]
    pub fn should_hide(&self, email: &ParsedEmail) -> bool {
        self.predicates.iter().any(|predicate| predicate(email))
    }

    /// Number of predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns true if there are no predicates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use froide_mime::Address;

    use super::*;

    fn email(subject: &str, from: &str) -> ParsedEmail {
        ParsedEmail {
            subject: subject.to_string(),
            from: Address::new("", from),
            ..ParsedEmail::default()
        }
    }

    #[test]
    fn test_from_settings() {
        let policy = ContentPolicy::from_settings(&HideContentSettings {
            subject_patterns: vec![r"^\[vertraulich\]".into()],
            sender_domains: vec!["Whistle.example".into()],
        })
        .unwrap();
        assert_eq!(policy.len(), 2);

        assert!(policy.should_hide(&email("[VERTRAULICH] Akte", "a@amt.example")));
        assert!(policy.should_hide(&email("Akte", "tip@whistle.example")));
        assert!(!policy.should_hide(&email("Akte", "a@amt.example")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ContentPolicy::from_settings(&HideContentSettings {
            subject_patterns: vec!["(".into()],
            sender_domains: Vec::new(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = ContentPolicy::new()
            .with_predicate(|_| true)
            .with_predicate(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            });

        assert!(policy.should_hide(&ParsedEmail::default()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!ContentPolicy::new().should_hide(&ParsedEmail::default()));
    }
}
