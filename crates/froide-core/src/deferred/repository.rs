//! Deferred message repository.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::{DeferredId, DeferredMessage, NewDeferred};
use crate::request::RequestId;
use crate::{Error, Result};

const COLUMNS: &str =
    "id, recipient, sender, mail, spam, delivered, request_id, hint_request_id, timestamp";

/// Repository for quarantined mail.
#[derive(Debug, Clone)]
pub struct DeferredRepository {
    pool: SqlitePool,
}

impl DeferredRepository {
    /// Creates a repository over an initialized pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Quarantines a mail.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create(&self, new: &NewDeferred) -> Result<DeferredMessage> {
        let result = sqlx::query(
            r"
            INSERT INTO deferred_messages (recipient, sender, mail, hint_request_id, timestamp)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(&new.recipient)
        .bind(&new.sender)
        .bind(new.encoded_mail())
        .bind(new.hint_request_id.map(|id| id.0))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = DeferredId::new(result.last_insert_rowid());
        self.get(id).await?.ok_or(Error::DeferredNotFound(id))
    }

    /// Gets a deferred message by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: DeferredId) -> Result<Option<DeferredMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM deferred_messages WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_deferred(&r)))
    }

    /// Lists mail waiting for an operator: not delivered and not spam.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_undelivered(&self) -> Result<Vec<DeferredMessage>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS} FROM deferred_messages
            WHERE delivered = 0 AND (spam IS NULL OR spam = 0)
            ORDER BY timestamp, id
            "
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_deferred).collect())
    }

    /// Distinct requests earlier non-spam mail to `recipient` was delivered to.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn requests_for_recipient(&self, recipient: &str) -> Result<Vec<RequestId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r"
            SELECT DISTINCT request_id FROM deferred_messages
            WHERE recipient = ? AND request_id IS NOT NULL AND spam = 0
            ORDER BY request_id
            ",
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(RequestId::new).collect())
    }

    /// Returns true if any mail from `sender` was flagged as spam.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn has_spam_sender(&self, sender: &str) -> Result<bool> {
        if sender.is_empty() {
            return Ok(false);
        }
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM deferred_messages WHERE sender = ? AND spam = 1",
        )
        .bind(sender.to_lowercase())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Deletes unclassified, undelivered mail from `sender`.
    ///
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn purge_unclassified_from_sender(&self, sender: &str) -> Result<u64> {
        if sender.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM deferred_messages WHERE sender = ? AND spam IS NULL AND delivered = 0",
        )
        .bind(sender.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Records a redelivery: sets the request, `delivered` and `spam = false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeferredNotFound`] for an unknown id, or an error if
    /// the database operation fails.
    pub async fn mark_delivered(&self, id: DeferredId, request: RequestId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE deferred_messages SET request_id = ?, delivered = 1, spam = 0 WHERE id = ?",
        )
        .bind(request.0)
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::DeferredNotFound(id));
        }
        Ok(())
    }

    /// Flags a mail as spam. Its sender is dropped from then on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeferredNotFound`] for an unknown id, or an error if
    /// the database operation fails.
    pub async fn mark_spam(&self, id: DeferredId) -> Result<()> {
        self.set_spam(id, true).await
    }

    /// Flags a mail as not spam.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeferredNotFound`] for an unknown id, or an error if
    /// the database operation fails.
    pub async fn mark_not_spam(&self, id: DeferredId) -> Result<()> {
        self.set_spam(id, false).await
    }

    async fn set_spam(&self, id: DeferredId, spam: bool) -> Result<()> {
        let result = sqlx::query("UPDATE deferred_messages SET spam = ? WHERE id = ?")
            .bind(spam)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::DeferredNotFound(id));
        }
        Ok(())
    }

    /// Total number of rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM deferred_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_deferred(row: &SqliteRow) -> DeferredMessage {
    DeferredMessage {
        id: DeferredId::new(row.get("id")),
        recipient: row.get("recipient"),
        sender: row.get("sender"),
        mail: row.get("mail"),
        spam: row.get("spam"),
        delivered: row.get("delivered"),
        request_id: row.get::<Option<i64>, _>("request_id").map(RequestId::new),
        hint_request_id: row
            .get::<Option<i64>, _>("hint_request_id")
            .map(RequestId::new),
        timestamp: row.get("timestamp"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::request::NewRequest;

    #[tokio::test]
    async fn test_create_round_trips_raw_bytes() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.deferred();
        let raw = b"From: a@b.example\r\n\r\n\xff\x00binary";

        let deferred = repo
            .create(&NewDeferred::new("Unknown@FOI.example", "A@B.example", raw))
            .await
            .unwrap();

        assert_eq!(deferred.raw_bytes().unwrap(), raw);
        assert_eq!(deferred.recipient, "Unknown@FOI.example");
        assert_eq!(deferred.sender, "a@b.example");
        assert_eq!(deferred.spam, None);
        assert!(!deferred.delivered);
        assert_eq!(deferred.request_id, None);
        assert_eq!(repo.list_undelivered().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recipient_history() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.deferred();
        let requests = db.requests();
        let first = requests
            .create(&NewRequest::new("A", "Anna"), "foi.example")
            .await
            .unwrap();
        let second = requests
            .create(&NewRequest::new("B", "Ben"), "foi.example")
            .await
            .unwrap();

        for _ in 0..2 {
            let row = repo
                .create(&NewDeferred::new("bad@foi.example", "x@y.example", b"m"))
                .await
                .unwrap();
            repo.mark_delivered(row.id, first.id).await.unwrap();
        }
        // Undelivered rows do not count.
        repo.create(&NewDeferred::new("bad@foi.example", "x@y.example", b"m"))
            .await
            .unwrap();
        assert_eq!(
            repo.requests_for_recipient("bad@foi.example").await.unwrap(),
            vec![first.id]
        );

        let row = repo
            .create(&NewDeferred::new("bad@foi.example", "x@y.example", b"m"))
            .await
            .unwrap();
        repo.mark_delivered(row.id, second.id).await.unwrap();
        assert_eq!(
            repo.requests_for_recipient("bad@foi.example").await.unwrap(),
            vec![first.id, second.id]
        );
        assert!(repo.requests_for_recipient("other@foi.example").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spam_flags_and_purge() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.deferred();

        let flagged = repo
            .create(&NewDeferred::new("a@foi.example", "spam@bad.example", b"1"))
            .await
            .unwrap();
        repo.create(&NewDeferred::new("b@foi.example", "spam@bad.example", b"2"))
            .await
            .unwrap();
        assert!(!repo.has_spam_sender("spam@bad.example").await.unwrap());

        repo.mark_spam(flagged.id).await.unwrap();
        assert!(repo.has_spam_sender("SPAM@bad.example").await.unwrap());
        assert_eq!(repo.list_undelivered().await.unwrap().len(), 1);

        assert_eq!(repo.purge_unclassified_from_sender("spam@bad.example").await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);

        repo.mark_not_spam(flagged.id).await.unwrap();
        assert!(!repo.has_spam_sender("spam@bad.example").await.unwrap());
        assert!(matches!(
            repo.mark_spam(DeferredId::new(999)).await,
            Err(Error::DeferredNotFound(_))
        ));
    }
}
