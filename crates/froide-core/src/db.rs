//! Shared `SQLite` database and schema.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::Result;
use crate::deferred::DeferredRepository;
use crate::message::MessageRepository;
use crate::outbound::DeliveryStatusRepository;
use crate::publicbody::PublicBodyRepository;
use crate::request::RequestRepository;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS jurisdictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        mediator_id INTEGER
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS public_bodies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL DEFAULT '',
        jurisdiction_id INTEGER REFERENCES jurisdictions(id) ON DELETE SET NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_public_bodies_email
    ON public_bodies(email)
    ",
    r"
    CREATE TABLE IF NOT EXISTS requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        secret_address TEXT NOT NULL UNIQUE,
        closed INTEGER NOT NULL DEFAULT 0,
        public_body_id INTEGER REFERENCES public_bodies(id) ON DELETE SET NULL,
        same_as INTEGER REFERENCES requests(id) ON DELETE SET NULL,
        campaign TEXT,
        owner_name TEXT NOT NULL DEFAULT '',
        owner_email TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'awaiting_response',
        is_public INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id INTEGER NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
        is_response INTEGER NOT NULL,
        kind TEXT NOT NULL DEFAULT 'email',
        sender_email TEXT NOT NULL DEFAULT '',
        sender_name TEXT NOT NULL DEFAULT '',
        sender_public_body_id INTEGER REFERENCES public_bodies(id) ON DELETE SET NULL,
        recipient_email TEXT NOT NULL DEFAULT '',
        recipient_name TEXT NOT NULL DEFAULT '',
        recipient_public_body_id INTEGER REFERENCES public_bodies(id) ON DELETE SET NULL,
        email_message_id TEXT NOT NULL DEFAULT '',
        subject TEXT NOT NULL DEFAULT '',
        timestamp TEXT NOT NULL,
        content_hidden INTEGER NOT NULL DEFAULT 0,
        original_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
        plaintext TEXT NOT NULL DEFAULT '',
        plaintext_redacted TEXT,
        html TEXT,
        sent INTEGER NOT NULL DEFAULT 1,
        not_publishable INTEGER NOT NULL DEFAULT 0
    )
    ",
    // One message per Message-ID and request; this is where concurrent
    // commits of the same mail serialize.
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_request_email_message_id
    ON messages(request_id, email_message_id) WHERE email_message_id != ''
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_messages_request_timestamp
    ON messages(request_id, timestamp)
    ",
    r"
    CREATE TABLE IF NOT EXISTS message_tags (
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        tag TEXT NOT NULL,
        UNIQUE(message_id, tag)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        size INTEGER NOT NULL,
        filetype TEXT NOT NULL DEFAULT '',
        data BLOB NOT NULL,
        can_approve INTEGER NOT NULL DEFAULT 1,
        approved INTEGER NOT NULL DEFAULT 0,
        is_converted INTEGER NOT NULL DEFAULT 0
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS problem_reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS deferred_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recipient TEXT NOT NULL DEFAULT '',
        sender TEXT NOT NULL DEFAULT '',
        mail TEXT NOT NULL,
        spam INTEGER,
        delivered INTEGER NOT NULL DEFAULT 0,
        request_id INTEGER REFERENCES requests(id) ON DELETE SET NULL,
        hint_request_id INTEGER REFERENCES requests(id) ON DELETE SET NULL,
        timestamp TEXT NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_deferred_messages_recipient
    ON deferred_messages(recipient)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_deferred_messages_sender
    ON deferred_messages(sender)
    ",
    r"
    CREATE TABLE IF NOT EXISTS delivery_statuses (
        message_id INTEGER PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'unknown',
        retry_count INTEGER NOT NULL DEFAULT 0,
        log TEXT NOT NULL DEFAULT '',
        last_update TEXT NOT NULL
    )
    ",
];

/// Handle to the pipeline database.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (and creates if needed) the database at `database_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn open(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never expires, or the data goes with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Request repository.
    #[must_use]
    pub fn requests(&self) -> RequestRepository {
        RequestRepository::new(self.pool.clone())
    }

    /// Message, attachment, tag and problem report repository.
    #[must_use]
    pub fn messages(&self) -> MessageRepository {
        MessageRepository::new(self.pool.clone())
    }

    /// Public body and jurisdiction repository.
    #[must_use]
    pub fn public_bodies(&self) -> PublicBodyRepository {
        PublicBodyRepository::new(self.pool.clone())
    }

    /// Deferred message repository.
    #[must_use]
    pub fn deferred(&self) -> DeferredRepository {
        DeferredRepository::new(self.pool.clone())
    }

    /// Outbound delivery status repository.
    #[must_use]
    pub fn delivery_statuses(&self) -> DeliveryStatusRepository {
        DeliveryStatusRepository::new(self.pool.clone())
    }
}
