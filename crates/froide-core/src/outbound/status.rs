//! Delivery state of outbound messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use crate::Result;
use crate::message::MessageId;

/// Where an outbound message is on its way to the recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Nothing known yet.
    #[default]
    Unknown,
    /// Handed to the transport.
    Sending,
    /// The transport is retrying.
    Deferred,
    /// Accepted by the recipient's server.
    Sent,
    /// Confirmed delivered to the mailbox.
    Received,
    /// Read receipt arrived.
    Read,
    /// Rejected by the recipient's server.
    Bounced,
    /// Gave up after retrying.
    Expired,
    /// The transport refused the message.
    Failed,
}

impl DeliveryState {
    /// Parses the stored representation. Unknown values map to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "sending" => Self::Sending,
            "deferred" => Self::Deferred,
            "sent" => Self::Sent,
            "received" => Self::Received,
            "read" => Self::Read,
            "bounced" => Self::Bounced,
            "expired" => Self::Expired,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Sending => "sending",
            Self::Deferred => "deferred",
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Read => "read",
            Self::Bounced => "bounced",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    /// Sent, or one of its refinements.
    #[must_use]
    pub const fn is_sent(self) -> bool {
        matches!(self, Self::Sent | Self::Received | Self::Read)
    }

    /// Delivery definitively failed.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Bounced | Self::Expired | Self::Failed)
    }

    /// Still on its way.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Deferred | Self::Sending)
    }

    /// No further transport report can move the message back to pending.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.is_sent() || self.is_failed()
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery bookkeeping for one outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// The outbound message.
    pub message_id: MessageId,
    /// Current state.
    pub status: DeliveryState,
    /// Number of resends.
    pub retry_count: i64,
    /// Transport log lines, newest last.
    pub log: String,
    /// Time of the last change.
    pub last_update: DateTime<Utc>,
}

/// Repository for delivery statuses.
#[derive(Debug, Clone)]
pub struct DeliveryStatusRepository {
    pool: SqlitePool,
}

impl DeliveryStatusRepository {
    /// Creates a repository over an initialized pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Gets the status of a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, message: MessageId) -> Result<Option<DeliveryStatus>> {
        let row = sqlx::query(
            r"
            SELECT message_id, status, retry_count, log, last_update
            FROM delivery_statuses WHERE message_id = ?
            ",
        )
        .bind(message.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_status(&r)))
    }

    /// Returns the status of a message, creating an `unknown` one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn ensure(&self, message: MessageId) -> Result<DeliveryStatus> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO delivery_statuses (message_id, last_update)
            VALUES (?, ?)
            ",
        )
        .bind(message.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r"
            SELECT message_id, status, retry_count, log, last_update
            FROM delivery_statuses WHERE message_id = ?
            ",
        )
        .bind(message.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_status(&row))
    }

    /// Moves a message to `state`, appending `log_line` to its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_state(
        &self,
        message: MessageId,
        state: DeliveryState,
        log_line: &str,
    ) -> Result<DeliveryStatus> {
        self.ensure(message).await?;
        sqlx::query(
            r"
            UPDATE delivery_statuses
            SET status = ?,
                log = CASE WHEN ? = '' THEN log
                           WHEN log = '' THEN ?
                           ELSE log || char(10) || ? END,
                last_update = ?
            WHERE message_id = ?
            ",
        )
        .bind(state.as_str())
        .bind(log_line)
        .bind(log_line)
        .bind(log_line)
        .bind(Utc::now())
        .bind(message.0)
        .execute(&self.pool)
        .await?;

        self.ensure(message).await
    }

    /// Bumps the retry counter and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn increment_retry(&self, message: MessageId) -> Result<i64> {
        self.ensure(message).await?;
        sqlx::query(
            "UPDATE delivery_statuses SET retry_count = retry_count + 1, last_update = ? WHERE message_id = ?",
        )
        .bind(Utc::now())
        .bind(message.0)
        .execute(&self.pool)
        .await?;

        Ok(self.ensure(message).await?.retry_count)
    }
}

fn row_to_status(row: &SqliteRow) -> DeliveryStatus {
    let status: String = row.get("status");
    DeliveryStatus {
        message_id: MessageId::new(row.get("message_id")),
        status: DeliveryState::parse(&status),
        retry_count: row.get("retry_count"),
        log: row.get("log"),
        last_update: row.get("last_update"),
    }
}
