//! Deferred message data models.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::ids::id_type;
use crate::request::RequestId;

id_type!(
    /// Unique identifier for a deferred message.
    DeferredId
);

/// An inbound mail that could not be routed and waits for an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredMessage {
    /// Row id.
    pub id: DeferredId,
    /// The recipient address that failed to resolve, as written in the mail.
    pub recipient: String,
    /// Sender address.
    pub sender: String,
    /// Raw mail, base64.
    pub mail: String,
    /// `None` until an operator classified it.
    pub spam: Option<bool>,
    /// Redelivered to `request_id`.
    pub delivered: bool,
    /// Request the mail was eventually delivered to.
    pub request_id: Option<RequestId>,
    /// Best guess at routing time. Informational only.
    pub hint_request_id: Option<RequestId>,
    /// When the mail was quarantined.
    pub timestamp: DateTime<Utc>,
}

impl DeferredMessage {
    /// Decodes the stored raw mail.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored mail is not valid base64.
    pub fn raw_bytes(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(self.mail.as_bytes())?)
    }

    /// Returns true if an operator flagged this mail as spam.
    #[must_use]
    pub const fn is_spam(&self) -> bool {
        matches!(self.spam, Some(true))
    }
}

/// Fields for quarantining a mail.
#[derive(Debug, Clone)]
pub struct NewDeferred {
    /// Recipient that failed to resolve.
    pub recipient: String,
    /// Sender address.
    pub sender: String,
    /// Raw mail bytes.
    pub raw: Vec<u8>,
    /// Best-guess request.
    pub hint_request_id: Option<RequestId>,
}

impl NewDeferred {
    /// Creates a quarantine record without a hint.
    #[must_use]
    pub fn new(recipient: impl Into<String>, sender: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            recipient: recipient.into(),
            sender: sender.into().to_lowercase(),
            raw: raw.to_vec(),
            hint_request_id: None,
        }
    }

    /// Attaches a best-guess request.
    #[must_use]
    pub const fn with_hint(mut self, hint: Option<RequestId>) -> Self {
        self.hint_request_id = hint;
        self
    }

    pub(crate) fn encoded_mail(&self) -> String {
        STANDARD.encode(&self.raw)
    }
}
