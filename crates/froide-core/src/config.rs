//! Pipeline configuration.
//!
//! The configuration is a JSON document loaded once at startup and passed
//! explicitly to every component that needs it:
//!
//! ```json
//! {
//!   "foi_domains": ["fragdenstaat.de", "anfrage.fragdenstaat.de"],
//!   "mailbox_address": "mail@fragdenstaat.de",
//!   "fixed_from_address": false,
//!   "site_url": "https://fragdenstaat.de",
//!   "database_path": "/var/lib/froide/mail.db",
//!   "imap": {
//!     "host": "imap.example.org",
//!     "username": "mail@fragdenstaat.de",
//!     "password": "secret"
//!   }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Connection security for the IMAP mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImapSecurity {
    /// Implicit TLS.
    #[default]
    Tls,
    /// Plain TCP (local test servers only).
    None,
}

impl From<ImapSecurity> for froide_imap::Security {
    fn from(value: ImapSecurity) -> Self {
        match value {
            ImapSecurity::Tls => Self::Tls,
            ImapSecurity::None => Self::None,
        }
    }
}

/// IMAP mailbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Security mode.
    #[serde(default)]
    pub security: ImapSecurity,
    /// Username for LOGIN.
    pub username: String,
    /// Password for LOGIN.
    pub password: String,
    /// Mailbox to drain.
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

const fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

/// Connection security for outbound SMTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS.
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    #[default]
    StartTls,
    /// No encryption.
    None,
}

/// Outbound SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Security mode.
    #[serde(default)]
    pub security: SmtpSecurity,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: String,
}

const fn default_smtp_port() -> u16 {
    587
}

/// Rules that hide inbound message content from public view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HideContentSettings {
    /// Regular expressions matched against the subject.
    #[serde(default)]
    pub subject_patterns: Vec<String>,
    /// Sender domains whose mail is always hidden.
    #[serde(default)]
    pub sender_domains: Vec<String>,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Domains that receive FOI mail. The first one is canonical.
    pub foi_domains: Vec<String>,
    /// Address of the shared mailbox account.
    pub mailbox_address: String,
    /// Whether all requests send from `mailbox_address` instead of their
    /// own secret address.
    #[serde(default)]
    pub fixed_from_address: bool,
    /// Public base URL, used for `X-Froide-Message-Id`.
    pub site_url: String,
    /// Path to the `SQLite` database.
    pub database_path: String,
    /// Inbound mailbox.
    pub imap: ImapSettings,
    /// Outbound relay. Sending is disabled when absent.
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
    /// Content hiding rules.
    #[serde(default)]
    pub hide_content: HideContentSettings,
    /// Maximum attachment filename length in characters.
    #[serde(default = "default_attachment_name_max_len")]
    pub attachment_name_max_len: usize,
}

const fn default_attachment_name_max_len() -> usize {
    250
}

impl MailConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        for domain in &mut config.foi_domains {
            *domain = domain.trim().to_lowercase();
        }
        config.mailbox_address = config.mailbox_address.trim().to_lowercase();
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.foi_domains.is_empty() {
            return Err(Error::Config("foi_domains must not be empty".into()));
        }
        if let Some(bad) = self
            .foi_domains
            .iter()
            .find(|d| d.is_empty() || d.contains('@'))
        {
            return Err(Error::Config(format!("invalid FOI domain: {bad:?}")));
        }
        if !self.mailbox_address.contains('@') {
            return Err(Error::Config(format!(
                "invalid mailbox address: {:?}",
                self.mailbox_address
            )));
        }
        if self.site_url.is_empty() {
            return Err(Error::Config("site_url must not be empty".into()));
        }
        if self.imap.host.is_empty() {
            return Err(Error::Config("imap.host must not be empty".into()));
        }
        if self.attachment_name_max_len < 16 {
            return Err(Error::Config(
                "attachment_name_max_len must be at least 16".into(),
            ));
        }
        Ok(())
    }

    /// The canonical FOI domain.
    #[must_use]
    pub fn primary_domain(&self) -> &str {
        self.foi_domains.first().map_or("", String::as_str)
    }

    /// Returns true if `address` belongs to one of the FOI domains.
    #[must_use]
    pub fn is_foi_address(&self, address: &str) -> bool {
        address
            .rsplit_once('@')
            .is_some_and(|(_, domain)| self.foi_domains.iter().any(|d| d.eq_ignore_ascii_case(domain)))
    }

    /// Rewrites an FOI address onto the canonical domain.
    ///
    /// Returns `None` for addresses outside the FOI domains.
    #[must_use]
    pub fn normalize_address(&self, address: &str) -> Option<String> {
        if !self.is_foi_address(address) {
            return None;
        }
        let (local, _) = address.rsplit_once('@')?;
        Some(format!("{}@{}", local.to_lowercase(), self.primary_domain()))
    }

    /// Returns a configuration suitable for tests and local experiments.
    #[must_use]
    pub fn for_domains(domains: &[&str]) -> Self {
        let primary = domains.first().copied().unwrap_or("localhost");
        Self {
            foi_domains: domains.iter().map(|d| d.to_lowercase()).collect(),
            mailbox_address: format!("mail@{primary}"),
            fixed_from_address: false,
            site_url: format!("https://{primary}"),
            database_path: ":memory:".to_string(),
            imap: ImapSettings {
                host: "localhost".to_string(),
                port: default_imap_port(),
                security: ImapSecurity::default(),
                username: String::new(),
                password: String::new(),
                mailbox: default_mailbox(),
            },
            smtp: None,
            hide_content: HideContentSettings::default(),
            attachment_name_max_len: default_attachment_name_max_len(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "foi_domains": ["FragDenStaat.de", "anfrage.example"],
        "mailbox_address": "Mail@fragdenstaat.de",
        "site_url": "https://fragdenstaat.de",
        "database_path": "mail.db",
        "imap": {"host": "imap.example", "username": "u", "password": "p"}
    }"#;

    #[test]
    fn test_defaults_applied() {
        let config = MailConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.primary_domain(), "fragdenstaat.de");
        assert_eq!(config.mailbox_address, "mail@fragdenstaat.de");
        assert_eq!(config.imap.port, 993);
        assert_eq!(config.imap.mailbox, "INBOX");
        assert_eq!(config.imap.security, ImapSecurity::Tls);
        assert_eq!(config.attachment_name_max_len, 250);
        assert!(!config.fixed_from_address);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_normalize_address() {
        let config = MailConfig::from_json(MINIMAL).unwrap();
        assert_eq!(
            config.normalize_address("Anna.x7@Anfrage.example").as_deref(),
            Some("anna.x7@fragdenstaat.de")
        );
        assert_eq!(config.normalize_address("someone@other.example"), None);
        assert_eq!(config.normalize_address("no-at-sign"), None);
    }

    #[test]
    fn test_empty_domains_rejected() {
        let json = MINIMAL.replace(r#"["FragDenStaat.de", "anfrage.example"]"#, "[]");
        let err = MailConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_security_names() {
        let json = MINIMAL.replace(
            r#""password": "p"}"#,
            r#""password": "p", "security": "none"}, "smtp": {"host": "smtp.example", "security": "starttls", "username": "u", "password": "p"}"#,
        );
        let config = MailConfig::from_json(&json).unwrap();
        assert_eq!(config.imap.security, ImapSecurity::None);
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.security, SmtpSecurity::StartTls);
        assert_eq!(smtp.port, 587);
    }
}
