//! Message repository.
//!
//! Messages own their tags, attachments and problem reports, so all four
//! tables are handled here.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::{
    AttachmentId, FoiAttachment, FoiMessage, MessageId, MessageKind, NewAttachment, NewMessage,
    ProblemKind, ProblemReport, ProblemReportId,
};
use super::redaction::Redactor;
use crate::publicbody::PublicBodyId;
use crate::request::RequestId;
use crate::{Error, Result};

const COLUMNS: &str = "id, request_id, is_response, kind, sender_email, sender_name, \
                       sender_public_body_id, recipient_email, recipient_name, \
                       recipient_public_body_id, email_message_id, subject, timestamp, \
                       content_hidden, original_id, plaintext, plaintext_redacted, html, sent, \
                       not_publishable";

/// Repository for messages and everything hanging off them.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    /// Creates a repository over an initialized pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a message.
    ///
    /// Returns `None` if the request already has a message with the same
    /// non-empty `email_message_id`. The unique index decides, so two
    /// concurrent inserts of the same mail yield exactly one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails for any other reason.
    pub async fn create(&self, new: &NewMessage) -> Result<Option<FoiMessage>> {
        let timestamp = new.timestamp.unwrap_or_else(Utc::now);
        let result = sqlx::query(
            r"
            INSERT INTO messages (request_id, is_response, kind, sender_email, sender_name,
                                  sender_public_body_id, recipient_email, recipient_name,
                                  recipient_public_body_id, email_message_id, subject, timestamp,
                                  content_hidden, plaintext, html, sent)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(new.request_id.0)
        .bind(new.is_response)
        .bind(new.kind.as_str())
        .bind(&new.sender_email)
        .bind(&new.sender_name)
        .bind(new.sender_public_body_id.map(|id| id.0))
        .bind(&new.recipient_email)
        .bind(&new.recipient_name)
        .bind(new.recipient_public_body_id.map(|id| id.0))
        .bind(&new.email_message_id)
        .bind(&new.subject)
        .bind(timestamp)
        .bind(new.content_hidden)
        .bind(&new.plaintext)
        .bind(&new.html)
        .bind(new.sent)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let id = MessageId::new(result.last_insert_rowid());
        self.get(id).await?.ok_or(Error::MessageNotFound(id)).map(Some)
    }

    /// Gets a message by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: MessageId) -> Result<Option<FoiMessage>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| row_to_message(&r)))
    }

    /// Returns true if `request` already has a message with this Message-ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn exists_with_email_message_id(
        &self,
        request: RequestId,
        email_message_id: &str,
    ) -> Result<bool> {
        if email_message_id.is_empty() {
            return Ok(false);
        }
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE request_id = ? AND email_message_id = ?",
        )
        .bind(request.0)
        .bind(email_message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Lists a request's messages in timeline order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_for_request(&self, request: RequestId) -> Result<Vec<FoiMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM messages WHERE request_id = ? ORDER BY timestamp, id"
        ))
        .bind(request.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    /// The request's earliest outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn first_outbound(&self, request: RequestId) -> Result<Option<FoiMessage>> {
        let row = sqlx::query(&format!(
            r"
            SELECT {COLUMNS} FROM messages
            WHERE request_id = ? AND is_response = 0
            ORDER BY timestamp, id
            LIMIT 1
            "
        ))
        .bind(request.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_message(&r)))
    }

    /// The request's outbound messages, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn outbound_recent_first(&self, request: RequestId) -> Result<Vec<FoiMessage>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS} FROM messages
            WHERE request_id = ? AND is_response = 0
            ORDER BY timestamp DESC, id DESC
            "
        ))
        .bind(request.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    /// Links a bounce to the outbound message it bounced.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_original(&self, id: MessageId, original: Option<MessageId>) -> Result<()> {
        sqlx::query("UPDATE messages SET original_id = ? WHERE id = ?")
            .bind(original.map(|m| m.0))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replaces the plain text body and drops the redaction cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_plaintext(&self, id: MessageId, plaintext: &str) -> Result<()> {
        sqlx::query("UPDATE messages SET plaintext = ?, plaintext_redacted = NULL WHERE id = ?")
            .bind(plaintext)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the redacted body, computing and caching it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageNotFound`] for an unknown id, or an error if
    /// the database operation fails.
    pub async fn redacted_plaintext(&self, id: MessageId, redactor: &Redactor) -> Result<String> {
        let row = sqlx::query("SELECT plaintext, plaintext_redacted FROM messages WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::MessageNotFound(id))?;

        if let Some(cached) = row.get::<Option<String>, _>("plaintext_redacted") {
            return Ok(cached);
        }

        let redacted = redactor.redact(row.get("plaintext"));
        sqlx::query("UPDATE messages SET plaintext_redacted = ? WHERE id = ?")
            .bind(&redacted)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(redacted)
    }

    /// Sets the outbound `sent` flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_sent(&self, id: MessageId, sent: bool) -> Result<()> {
        sqlx::query("UPDATE messages SET sent = ? WHERE id = ?")
            .bind(sent)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Adds a tag. Adding an existing tag is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn add_tag(&self, id: MessageId, tag: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO message_tags (message_id, tag) VALUES (?, ?)")
            .bind(id.0)
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Lists a message's tags alphabetically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn tags(&self, id: MessageId) -> Result<Vec<String>> {
        let tags = sqlx::query_scalar(
            "SELECT tag FROM message_tags WHERE message_id = ? ORDER BY tag",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    /// Stores an attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create_attachment(&self, new: &NewAttachment) -> Result<FoiAttachment> {
        let size = i64::try_from(new.data.len()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r"
            INSERT INTO attachments (message_id, name, size, filetype, data, can_approve)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(new.message_id.0)
        .bind(&new.name)
        .bind(size)
        .bind(&new.filetype)
        .bind(&new.data)
        .bind(new.can_approve)
        .execute(&self.pool)
        .await?;

        Ok(FoiAttachment {
            id: AttachmentId::new(result.last_insert_rowid()),
            message_id: new.message_id,
            name: new.name.clone(),
            size,
            filetype: new.filetype.clone(),
            data: new.data.clone(),
            can_approve: new.can_approve,
            approved: false,
            is_converted: false,
        })
    }

    /// Lists a message's attachments in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn attachments(&self, id: MessageId) -> Result<Vec<FoiAttachment>> {
        let rows = sqlx::query(
            r"
            SELECT id, message_id, name, size, filetype, data, can_approve, approved, is_converted
            FROM attachments WHERE message_id = ? ORDER BY id
            ",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| FoiAttachment {
                id: AttachmentId::new(r.get("id")),
                message_id: MessageId::new(r.get("message_id")),
                name: r.get("name"),
                size: r.get("size"),
                filetype: r.get("filetype"),
                data: r.get("data"),
                can_approve: r.get("can_approve"),
                approved: r.get("approved"),
                is_converted: r.get("is_converted"),
            })
            .collect())
    }

    /// Opens a problem report on a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create_problem_report(
        &self,
        id: MessageId,
        kind: ProblemKind,
        description: &str,
    ) -> Result<ProblemReport> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO problem_reports (message_id, kind, description, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(kind.as_str())
        .bind(description)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(ProblemReport {
            id: ProblemReportId::new(result.last_insert_rowid()),
            message_id: id,
            kind,
            description: description.to_string(),
            created_at,
            resolved: false,
        })
    }

    /// Lists problem reports on a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn problem_reports(&self, id: MessageId) -> Result<Vec<ProblemReport>> {
        let rows = sqlx::query(
            r"
            SELECT id, message_id, kind, description, created_at, resolved
            FROM problem_reports WHERE message_id = ? ORDER BY id
            ",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ProblemReport {
                id: ProblemReportId::new(r.get("id")),
                message_id: MessageId::new(r.get("message_id")),
                kind: ProblemKind::parse(r.get("kind")),
                description: r.get("description"),
                created_at: r.get("created_at"),
                resolved: r.get("resolved"),
            })
            .collect())
    }
}

fn row_to_message(row: &SqliteRow) -> FoiMessage {
    FoiMessage {
        id: MessageId::new(row.get("id")),
        request_id: RequestId::new(row.get("request_id")),
        is_response: row.get("is_response"),
        kind: MessageKind::parse(row.get("kind")),
        sender_email: row.get("sender_email"),
        sender_name: row.get("sender_name"),
        sender_public_body_id: row
            .get::<Option<i64>, _>("sender_public_body_id")
            .map(PublicBodyId::new),
        recipient_email: row.get("recipient_email"),
        recipient_name: row.get("recipient_name"),
        recipient_public_body_id: row
            .get::<Option<i64>, _>("recipient_public_body_id")
            .map(PublicBodyId::new),
        email_message_id: row.get("email_message_id"),
        subject: row.get("subject"),
        timestamp: row.get("timestamp"),
        content_hidden: row.get("content_hidden"),
        original_id: row.get::<Option<i64>, _>("original_id").map(MessageId::new),
        plaintext: row.get("plaintext"),
        plaintext_redacted: row.get("plaintext_redacted"),
        html: row.get("html"),
        sent: row.get("sent"),
        not_publishable: row.get("not_publishable"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::message::tags;
    use crate::request::{FoiRequest, NewRequest};

    async fn setup() -> (Database, FoiRequest) {
        let db = Database::in_memory().await.unwrap();
        let request = db
            .requests()
            .create(&NewRequest::new("Akten", "Anna Müller"), "foi.example")
            .await
            .unwrap();
        (db, request)
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_rejected() {
        let (db, request) = setup().await;
        let repo = db.messages();
        let mut new = NewMessage::inbound(request.id, "amt@example.org");
        new.email_message_id = "<abc@example.org>".into();

        assert!(repo.create(&new).await.unwrap().is_some());
        assert!(repo.create(&new).await.unwrap().is_none());
        assert!(
            repo.exists_with_email_message_id(request.id, "<abc@example.org>")
                .await
                .unwrap()
        );
        assert_eq!(repo.list_for_request(request.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_message_id_never_collides() {
        let (db, request) = setup().await;
        let repo = db.messages();
        let new = NewMessage::inbound(request.id, "amt@example.org");

        assert!(repo.create(&new).await.unwrap().is_some());
        assert!(repo.create(&new).await.unwrap().is_some());
        assert!(!repo.exists_with_email_message_id(request.id, "").await.unwrap());
    }

    #[tokio::test]
    async fn test_outbound_ordering() {
        let (db, request) = setup().await;
        let repo = db.messages();
        let t0 = Utc::now() - chrono::Duration::days(3);

        let first = repo
            .create(&NewMessage::outbound(request.id, "a@amt.example").at(t0))
            .await
            .unwrap()
            .unwrap();
        let second = repo
            .create(&NewMessage::outbound(request.id, "b@amt.example").at(t0 + chrono::Duration::days(1)))
            .await
            .unwrap()
            .unwrap();
        repo.create(&NewMessage::inbound(request.id, "a@amt.example").at(t0 - chrono::Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(repo.first_outbound(request.id).await.unwrap().unwrap().id, first.id);
        let recent: Vec<_> = repo
            .outbound_recent_first(request.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(recent, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_redaction_cache_is_lazy_and_invalidated() {
        let (db, request) = setup().await;
        let repo = db.messages();
        let mut new = NewMessage::inbound(request.id, "amt@example.org");
        new.plaintext = "Sehr geehrte Frau Müller".into();
        let message = repo.create(&new).await.unwrap().unwrap();
        assert_eq!(message.plaintext_redacted, None);

        let redactor = Redactor::for_request(&request);
        let redacted = repo.redacted_plaintext(message.id, &redactor).await.unwrap();
        assert_eq!(redacted, "Sehr geehrte Frau <<Name>>");
        let cached = repo.get(message.id).await.unwrap().unwrap();
        assert_eq!(cached.plaintext_redacted.as_deref(), Some("Sehr geehrte Frau <<Name>>"));

        repo.set_plaintext(message.id, "Hallo Anna").await.unwrap();
        let reset = repo.get(message.id).await.unwrap().unwrap();
        assert_eq!(reset.plaintext_redacted, None);
        assert_eq!(
            repo.redacted_plaintext(message.id, &redactor).await.unwrap(),
            "Hallo <<Name>>"
        );
    }

    #[tokio::test]
    async fn test_tags_attachments_reports() {
        let (db, request) = setup().await;
        let repo = db.messages();
        let message = repo
            .create(&NewMessage::inbound(request.id, "amt@example.org"))
            .await
            .unwrap()
            .unwrap();

        repo.add_tag(message.id, tags::BOUNCE).await.unwrap();
        repo.add_tag(message.id, tags::BOUNCE).await.unwrap();
        repo.add_tag(message.id, tags::AUTO_REPLY).await.unwrap();
        assert_eq!(repo.tags(message.id).await.unwrap(), vec!["auto-reply", "bounce"]);

        let attachment = repo
            .create_attachment(&NewAttachment {
                message_id: message.id,
                name: "bescheid.pdf".into(),
                filetype: "application/pdf".into(),
                data: b"%PDF-1.4".to_vec(),
                can_approve: false,
            })
            .await
            .unwrap();
        assert_eq!(attachment.size, 8);
        assert_eq!(repo.attachments(message.id).await.unwrap(), vec![attachment]);

        repo.create_problem_report(message.id, ProblemKind::BouncePublicBody, "bounced")
            .await
            .unwrap();
        let reports = repo.problem_reports(message.id).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ProblemKind::BouncePublicBody);
        assert!(!reports[0].resolved);
    }
}
