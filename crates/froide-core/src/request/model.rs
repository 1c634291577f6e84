//! Request data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::id_type;
use crate::publicbody::PublicBodyId;

id_type!(
    /// Unique identifier for an FOI request.
    RequestId
);

/// Where a request stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Waiting for the requester to confirm the request.
    AwaitingUserConfirmation,
    /// No public body has been chosen yet.
    PublicBodyNeeded,
    /// Sent, waiting for the authority to reply.
    #[default]
    AwaitingResponse,
    /// A new message arrived and needs human triage.
    AwaitingClassification,
    /// No activity for a long time.
    Asleep,
    /// The request is finished.
    Resolved,
}

impl RequestStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "awaiting_user_confirmation" => Self::AwaitingUserConfirmation,
            "publicbody_needed" => Self::PublicBodyNeeded,
            "awaiting_classification" => Self::AwaitingClassification,
            "asleep" => Self::Asleep,
            "resolved" => Self::Resolved,
            _ => Self::AwaitingResponse,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingUserConfirmation => "awaiting_user_confirmation",
            Self::PublicBodyNeeded => "publicbody_needed",
            Self::AwaitingResponse => "awaiting_response",
            Self::AwaitingClassification => "awaiting_classification",
            Self::Asleep => "asleep",
            Self::Resolved => "resolved",
        }
    }
}

/// One FOI conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoiRequest {
    /// Row id.
    pub id: RequestId,
    /// Title shown on the request page.
    pub title: String,
    /// URL slug.
    pub slug: String,
    /// Per-request reply address. Unique and never reused.
    pub secret_address: String,
    /// Closed requests accept no further inbound mail.
    pub closed: bool,
    /// Authority the request is addressed to.
    pub public_body_id: Option<PublicBodyId>,
    /// Request this one duplicates.
    pub same_as: Option<RequestId>,
    /// Campaign tag.
    pub campaign: Option<String>,
    /// Requester display name.
    pub owner_name: String,
    /// Requester login email.
    pub owner_email: String,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Whether content may be published. Attachments of non-public
    /// requests are not approvable by default.
    pub is_public: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification. Touched whenever the message list changes.
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a request.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    /// Title shown on the request page.
    pub title: String,
    /// Authority the request is addressed to.
    pub public_body_id: Option<PublicBodyId>,
    /// Requester display name.
    pub owner_name: String,
    /// Requester login email.
    pub owner_email: String,
    /// Explicit secret address. A fresh one is generated when `None`.
    pub secret_address: Option<String>,
    /// Whether content may be published.
    pub is_public: bool,
    /// Campaign tag.
    pub campaign: Option<String>,
}

impl NewRequest {
    /// Creates a public request with the given title and owner.
    #[must_use]
    pub fn new(title: impl Into<String>, owner_name: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            owner_name: owner_name.into(),
            is_public: true,
            ..Self::default()
        }
    }

    /// Sets the public body.
    #[must_use]
    pub const fn with_public_body(mut self, id: PublicBodyId) -> Self {
        self.public_body_id = Some(id);
        self
    }

    /// Sets an explicit secret address.
    #[must_use]
    pub fn with_secret_address(mut self, address: impl Into<String>) -> Self {
        self.secret_address = Some(address.into());
        self
    }
}

/// Lowercase ASCII slug with `-` separators.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        let mapped = match c {
            'ä' | 'Ä' => "ae",
            'ö' | 'Ö' => "oe",
            'ü' | 'Ü' => "ue",
            'ß' => "ss",
            _ => "",
        };
        if !mapped.is_empty() {
            slug.push_str(mapped);
        } else if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
