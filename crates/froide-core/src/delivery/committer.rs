//! Turns a routed mail into a message on a request timeline.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use froide_mime::ParsedEmail;
use tracing::{debug, info};

use super::attachments::{AttachmentNamer, is_convertible};
use super::notify::{Notifier, Task, TaskDispatcher};
use super::policy::ContentPolicy;
use crate::Result;
use crate::config::MailConfig;
use crate::db::Database;
use crate::message::{
    FoiMessage, MessageKind, MessageRepository, NewAttachment, NewMessage, ProblemKind, Redactor,
    tags,
};
use crate::publicbody::{PublicBody, PublicBodyRepository};
use crate::request::{FoiRequest, RequestRepository, RequestStatus};

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new message was created.
    Committed(FoiMessage),
    /// The request already has this mail.
    Duplicate,
}

/// Writes inbound mail to requests.
pub struct Committer {
    config: Arc<MailConfig>,
    requests: RequestRepository,
    messages: MessageRepository,
    public_bodies: PublicBodyRepository,
    policy: Arc<ContentPolicy>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl std::fmt::Debug for Committer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Committer {
    /// Creates a committer.
    #[must_use]
    pub fn new(
        db: &Database,
        config: Arc<MailConfig>,
        policy: Arc<ContentPolicy>,
        notifier: Arc<dyn Notifier>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            config,
            requests: db.requests(),
            messages: db.messages(),
            public_bodies: db.public_bodies(),
            policy,
            notifier,
            dispatcher,
        }
    }

    /// Commits `email` to `request`.
    ///
    /// Idempotent per Message-ID: a mail the request already has is
    /// reported as [`CommitOutcome::Duplicate`] and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails.
    pub async fn commit(
        &self,
        email: &ParsedEmail,
        request: &FoiRequest,
        public_body: Option<&PublicBody>,
    ) -> Result<CommitOutcome> {
        if self
            .messages
            .exists_with_email_message_id(request.id, &email.message_id)
            .await?
        {
            debug!(request_id = %request.id, message_id = %email.message_id, "duplicate mail");
            return Ok(CommitOutcome::Duplicate);
        }

        let is_bounce = email.is_bounce();
        let content_hidden = is_bounce
            || email.is_auto_reply
            || self.is_mediator_reply(request, public_body).await?
            || self.policy.should_hide(email);

        let (recipient_name, recipient_email) = self.recipient_display(email, request);
        let new = NewMessage {
            request_id: request.id,
            is_response: true,
            kind: MessageKind::Email,
            sender_email: email.from.email.clone(),
            sender_name: email.from.name.clone(),
            sender_public_body_id: public_body.map(|body| body.id),
            recipient_email,
            recipient_name,
            recipient_public_body_id: None,
            email_message_id: email.message_id.clone(),
            subject: email.subject.clone(),
            timestamp: Some(self.timestamp(email, request).await?),
            content_hidden,
            plaintext: email.body.clone(),
            html: email.html.clone(),
            sent: true,
        };

        // Lost a race against a concurrent commit of the same mail.
        let Some(message) = self.messages.create(&new).await? else {
            debug!(request_id = %request.id, message_id = %email.message_id, "duplicate mail");
            return Ok(CommitOutcome::Duplicate);
        };

        if is_bounce {
            return self.commit_bounce(email, request, message).await;
        }

        if email.is_auto_reply {
            self.messages.add_tag(message.id, tags::AUTO_REPLY).await?;
        }
        self.store_attachments(email, request, &message).await?;

        self.requests
            .set_status(request.id, RequestStatus::AwaitingClassification)
            .await?;
        let mut request = request.clone();
        request.status = RequestStatus::AwaitingClassification;

        info!(
            request_id = %request.id,
            message_id = %message.id,
            sender = %message.sender_email,
            content_hidden,
            "committed message"
        );
        self.notifier.on_message_committed(&request, &message);
        Ok(CommitOutcome::Committed(message))
    }

    async fn commit_bounce(
        &self,
        email: &ParsedEmail,
        request: &FoiRequest,
        message: FoiMessage,
    ) -> Result<CommitOutcome> {
        self.messages.add_tag(message.id, tags::BOUNCE).await?;

        let haystack = bounce_text(email);
        let outbound = self.messages.outbound_recent_first(request.id).await?;
        let original = outbound.into_iter().find(|candidate| {
            !candidate.recipient_email.is_empty()
                && haystack.contains(&candidate.recipient_email.to_lowercase())
        });

        let mut message = message;
        if let Some(original) = &original {
            self.messages.set_original(message.id, Some(original.id)).await?;
            self.messages.add_tag(original.id, tags::BOUNCED).await?;
            let description = format!(
                "Mail to {} bounced: {}",
                original.recipient_email,
                email
                    .bounce_info
                    .diagnostic_code
                    .as_deref()
                    .or(email.bounce_info.status.as_deref())
                    .unwrap_or("no diagnostic")
            );
            self.messages
                .create_problem_report(original.id, ProblemKind::BouncePublicBody, &description)
                .await?;
            message.original_id = Some(original.id);
        }

        self.store_attachments(email, request, &message).await?;
        self.requests.touch(request.id).await?;

        info!(
            request_id = %request.id,
            message_id = %message.id,
            original = ?original.map(|o| o.id.0),
            "committed bounce"
        );
        Ok(CommitOutcome::Committed(message))
    }

    /// The mediator rule: replies from the jurisdiction's FOI mediator are
    /// hidden unless the request was addressed to the mediator itself.
    async fn is_mediator_reply(
        &self,
        request: &FoiRequest,
        public_body: Option<&PublicBody>,
    ) -> Result<bool> {
        let Some(body) = public_body else {
            return Ok(false);
        };
        if request.public_body_id == Some(body.id) {
            return Ok(false);
        }
        self.public_bodies.is_mediator(body).await
    }

    fn recipient_display(&self, email: &ParsedEmail, request: &FoiRequest) -> (String, String) {
        let secret = request.secret_address.to_lowercase();
        let direct = email.all_recipients().any(|address| {
            address.email == secret
                || self.config.normalize_address(&address.email).as_deref() == Some(secret.as_str())
        });
        if direct {
            return (request.owner_name.clone(), request.secret_address.clone());
        }
        email
            .to
            .first()
            .map(|address| (address.name.clone(), address.email.clone()))
            .unwrap_or_default()
    }

    /// The mail's date, but never at or before the request's first outbound
    /// message.
    async fn timestamp(
        &self,
        email: &ParsedEmail,
        request: &FoiRequest,
    ) -> Result<chrono::DateTime<Utc>> {
        let timestamp = email.date.unwrap_or_else(Utc::now);
        match self.messages.first_outbound(request.id).await? {
            Some(first) if timestamp <= first.timestamp => {
                Ok(first.timestamp + TimeDelta::seconds(1))
            }
            _ => Ok(timestamp),
        }
    }

    async fn store_attachments(
        &self,
        email: &ParsedEmail,
        request: &FoiRequest,
        message: &FoiMessage,
    ) -> Result<()> {
        if email.attachments.is_empty() {
            return Ok(());
        }
        let redactor = Redactor::for_request(request);
        let mut namer = AttachmentNamer::new(&redactor, self.config.attachment_name_max_len);

        for attachment in &email.attachments {
            let stored = self
                .messages
                .create_attachment(&NewAttachment {
                    message_id: message.id,
                    name: namer.name(&attachment.name),
                    filetype: attachment.content_type.clone(),
                    data: attachment.data.clone(),
                    can_approve: request.is_public,
                })
                .await?;
            self.notifier.on_attachment_uploaded(message, &stored);
            if is_convertible(&stored.filetype, &stored.name) {
                self.dispatcher.dispatch(Task::ConvertAttachment(stored.id));
            }
        }
        Ok(())
    }
}

/// Lowercased text a bounce quotes the original envelope in: the body plus
/// any textual or forwarded-message attachments.
fn bounce_text(email: &ParsedEmail) -> String {
    let mut text = email.body.to_lowercase();
    for attachment in &email.attachments {
        let content_type = attachment.content_type.to_ascii_lowercase();
        if content_type.starts_with("text/") || content_type.starts_with("message/") {
            text.push('\n');
            text.push_str(&String::from_utf8_lossy(&attachment.data).to_lowercase());
        }
    }
    text
}
