//! Message data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::id_type;
use crate::publicbody::PublicBodyId;
use crate::request::RequestId;

id_type!(
    /// Unique identifier for a message.
    MessageId
);

id_type!(
    /// Unique identifier for an attachment.
    AttachmentId
);

id_type!(
    /// Unique identifier for a problem report.
    ProblemReportId
);

/// How a message reached (or left) the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageKind {
    /// Electronic mail.
    #[default]
    Email,
    /// Postal letter.
    Post,
    /// Fax.
    Fax,
    /// File uploaded by the requester.
    Upload,
    /// Phone call note.
    Phone,
    /// Visit note.
    Visit,
    /// Imported from another system.
    Import,
}

impl MessageKind {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "post" => Self::Post,
            "fax" => Self::Fax,
            "upload" => Self::Upload,
            "phone" => Self::Phone,
            "visit" => Self::Visit,
            "import" => Self::Import,
            _ => Self::Email,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Post => "post",
            Self::Fax => "fax",
            Self::Upload => "upload",
            Self::Phone => "phone",
            Self::Visit => "visit",
            Self::Import => "import",
        }
    }
}

/// Well-known message tags.
pub mod tags {
    /// The message is a bounce notification.
    pub const BOUNCE: &str = "bounce";
    /// The outbound message was bounced.
    pub const BOUNCED: &str = "bounced";
    /// The message is an automatic reply.
    pub const AUTO_REPLY: &str = "auto-reply";
}

/// One inbound or outbound communication on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoiMessage {
    /// Row id.
    pub id: MessageId,
    /// Owning request.
    pub request_id: RequestId,
    /// Inbound (`true`) or outbound.
    pub is_response: bool,
    /// Channel.
    pub kind: MessageKind,
    /// Sender address.
    pub sender_email: String,
    /// Sender display name.
    pub sender_name: String,
    /// Public body the sender writes for.
    pub sender_public_body_id: Option<PublicBodyId>,
    /// Recipient address.
    pub recipient_email: String,
    /// Recipient display name.
    pub recipient_name: String,
    /// Public body the message is addressed to.
    pub recipient_public_body_id: Option<PublicBodyId>,
    /// External Message-ID, empty if unknown.
    pub email_message_id: String,
    /// Subject line.
    pub subject: String,
    /// Position on the request timeline.
    pub timestamp: DateTime<Utc>,
    /// Content hidden from public view.
    pub content_hidden: bool,
    /// For bounces, the outbound message that bounced.
    pub original_id: Option<MessageId>,
    /// Plain text body.
    pub plaintext: String,
    /// Cached redacted body, `None` until first read.
    pub plaintext_redacted: Option<String>,
    /// HTML body, if the mail had one.
    pub html: Option<String>,
    /// Outbound: handed to the transport.
    pub sent: bool,
    /// Never publish this message.
    pub not_publishable: bool,
}

/// Fields for creating a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning request.
    pub request_id: RequestId,
    /// Inbound (`true`) or outbound.
    pub is_response: bool,
    /// Channel.
    pub kind: MessageKind,
    /// Sender address.
    pub sender_email: String,
    /// Sender display name.
    pub sender_name: String,
    /// Public body the sender writes for.
    pub sender_public_body_id: Option<PublicBodyId>,
    /// Recipient address.
    pub recipient_email: String,
    /// Recipient display name.
    pub recipient_name: String,
    /// Public body the message is addressed to.
    pub recipient_public_body_id: Option<PublicBodyId>,
    /// External Message-ID.
    pub email_message_id: String,
    /// Subject line.
    pub subject: String,
    /// Position on the request timeline. Defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
    /// Content hidden from public view.
    pub content_hidden: bool,
    /// Plain text body.
    pub plaintext: String,
    /// HTML body.
    pub html: Option<String>,
    /// Outbound: handed to the transport.
    pub sent: bool,
}

impl NewMessage {
    fn empty(request_id: RequestId, is_response: bool) -> Self {
        Self {
            request_id,
            is_response,
            kind: MessageKind::Email,
            sender_email: String::new(),
            sender_name: String::new(),
            sender_public_body_id: None,
            recipient_email: String::new(),
            recipient_name: String::new(),
            recipient_public_body_id: None,
            email_message_id: String::new(),
            subject: String::new(),
            timestamp: None,
            content_hidden: false,
            plaintext: String::new(),
            html: None,
            sent: is_response,
        }
    }

    /// An outbound email from the requester to a public body.
    #[must_use]
    pub fn outbound(request_id: RequestId, recipient_email: impl Into<String>) -> Self {
        Self {
            recipient_email: recipient_email.into().to_lowercase(),
            ..Self::empty(request_id, false)
        }
    }

    /// An inbound email on a request.
    #[must_use]
    pub fn inbound(request_id: RequestId, sender_email: impl Into<String>) -> Self {
        Self {
            sender_email: sender_email.into().to_lowercase(),
            ..Self::empty(request_id, true)
        }
    }

    /// Sets the timeline position.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoiAttachment {
    /// Row id.
    pub id: AttachmentId,
    /// Owning message.
    pub message_id: MessageId,
    /// Redacted, unique file name.
    pub name: String,
    /// Size in bytes.
    pub size: i64,
    /// MIME type.
    pub filetype: String,
    /// File content.
    pub data: Vec<u8>,
    /// Whether staff may approve it for publication.
    pub can_approve: bool,
    /// Approved for publication.
    pub approved: bool,
    /// Replaced by a converted PDF.
    pub is_converted: bool,
}

/// Fields for creating an attachment.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    /// Owning message.
    pub message_id: MessageId,
    /// File name.
    pub name: String,
    /// MIME type.
    pub filetype: String,
    /// File content.
    pub data: Vec<u8>,
    /// Whether staff may approve it for publication.
    pub can_approve: bool,
}

/// Kind of problem flagged on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemKind {
    /// Mail to the public body bounced.
    BouncePublicBody,
    /// Anything else.
    Other,
}

impl ProblemKind {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "bounce_publicbody" => Self::BouncePublicBody,
            _ => Self::Other,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BouncePublicBody => "bounce_publicbody",
            Self::Other => "other",
        }
    }
}

/// A problem flagged for staff attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemReport {
    /// Row id.
    pub id: ProblemReportId,
    /// Message the problem concerns.
    pub message_id: MessageId,
    /// Problem kind.
    pub kind: ProblemKind,
    /// Free-text description.
    pub description: String,
    /// When it was reported.
    pub created_at: DateTime<Utc>,
    /// Whether staff resolved it.
    pub resolved: bool,
}
