//! Public body repository.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use super::model::{Jurisdiction, JurisdictionId, PublicBody, PublicBodyId};
use crate::Result;
use crate::request::FoiRequest;

/// Repository for public bodies and jurisdictions.
#[derive(Debug, Clone)]
pub struct PublicBodyRepository {
    pool: SqlitePool,
}

impl PublicBodyRepository {
    /// Creates a repository over an initialized pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a public body.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        jurisdiction_id: Option<JurisdictionId>,
    ) -> Result<PublicBody> {
        let email = email.trim().to_lowercase();
        let result = sqlx::query(
            "INSERT INTO public_bodies (name, email, jurisdiction_id) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(&email)
        .bind(jurisdiction_id.map(|id| id.0))
        .execute(&self.pool)
        .await?;

        Ok(PublicBody {
            id: PublicBodyId::new(result.last_insert_rowid()),
            name: name.to_string(),
            email,
            jurisdiction_id,
        })
    }

    /// Gets a public body by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: PublicBodyId) -> Result<Option<PublicBody>> {
        let row = sqlx::query(
            "SELECT id, name, email, jurisdiction_id FROM public_bodies WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_public_body(&r)))
    }

    /// Finds public bodies whose contact address is exactly `email`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_email(&self, email: &str) -> Result<Vec<PublicBody>> {
        let rows = sqlx::query(
            "SELECT id, name, email, jurisdiction_id FROM public_bodies WHERE email = ? ORDER BY id",
        )
        .bind(email.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_public_body).collect())
    }

    /// Creates a jurisdiction without a mediator.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create_jurisdiction(&self, name: &str) -> Result<Jurisdiction> {
        let result = sqlx::query("INSERT INTO jurisdictions (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(Jurisdiction {
            id: JurisdictionId::new(result.last_insert_rowid()),
            name: name.to_string(),
            mediator_id: None,
        })
    }

    /// Sets or clears the mediator of a jurisdiction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_mediator(
        &self,
        jurisdiction: JurisdictionId,
        mediator: Option<PublicBodyId>,
    ) -> Result<()> {
        sqlx::query("UPDATE jurisdictions SET mediator_id = ? WHERE id = ?")
            .bind(mediator.map(|id| id.0))
            .bind(jurisdiction.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Gets a jurisdiction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_jurisdiction(&self, id: JurisdictionId) -> Result<Option<Jurisdiction>> {
        let row = sqlx::query("SELECT id, name, mediator_id FROM jurisdictions WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Jurisdiction {
            id: JurisdictionId::new(r.get("id")),
            name: r.get("name"),
            mediator_id: r.get::<Option<i64>, _>("mediator_id").map(PublicBodyId::new),
        }))
    }

    /// Returns true if `body` is the mediator of its own jurisdiction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_mediator(&self, body: &PublicBody) -> Result<bool> {
        let Some(jurisdiction_id) = body.jurisdiction_id else {
            return Ok(false);
        };
        Ok(self
            .get_jurisdiction(jurisdiction_id)
            .await?
            .is_some_and(|j| j.mediator_id == Some(body.id)))
    }

    /// Works out which public body `sender` writes for in the context of
    /// `request`.
    ///
    /// Tried in order, first hit wins:
    ///
    /// 1. the request's own public body, if its address is the sender
    /// 2. the single public body registered under the sender address
    /// 3. the single public body earlier mail from this sender on the same
    ///    request was attributed to
    /// 4. the request's public body, if its address shares the sender domain
    /// 5. with `include_deferred`, the single public body behind the requests
    ///    that quarantined mail from this sender was redelivered to
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub async fn resolve_for_sender(
        &self,
        sender: &str,
        request: &FoiRequest,
        include_deferred: bool,
    ) -> Result<Option<PublicBody>> {
        let sender = sender.trim().to_lowercase();
        if sender.is_empty() {
            return Ok(None);
        }

        let request_body = match request.public_body_id {
            Some(id) => self.get(id).await?,
            None => None,
        };
        if let Some(body) = &request_body
            && body.email == sender
        {
            return Ok(request_body);
        }

        let mut by_email = self.find_by_email(&sender).await?;
        if by_email.len() == 1 {
            return Ok(by_email.pop());
        }

        let previous: Vec<i64> = sqlx::query_scalar(
            r"
            SELECT DISTINCT sender_public_body_id FROM messages
            WHERE request_id = ? AND sender_email = ? AND sender_public_body_id IS NOT NULL
            ",
        )
        .bind(request.id.0)
        .bind(&sender)
        .fetch_all(&self.pool)
        .await?;
        if let [id] = previous.as_slice() {
            return self.get(PublicBodyId::new(*id)).await;
        }

        let sender_domain = sender.rsplit_once('@').map(|(_, domain)| domain);
        if let Some(body) = &request_body
            && body.email_domain().is_some()
            && body.email_domain() == sender_domain
        {
            debug!(sender = %sender, public_body = %body.id, "sender matched by domain");
            return Ok(request_body);
        }

        if include_deferred {
            let deferred: Vec<i64> = sqlx::query_scalar(
                r"
                SELECT DISTINCT r.public_body_id
                FROM deferred_messages d JOIN requests r ON r.id = d.request_id
                WHERE d.sender = ? AND d.spam = 0 AND r.public_body_id IS NOT NULL
                ",
            )
            .bind(&sender)
            .fetch_all(&self.pool)
            .await?;
            if let [id] = deferred.as_slice() {
                debug!(sender = %sender, public_body = id, "sender matched by deferred history");
                return self.get(PublicBodyId::new(*id)).await;
            }
        }

        Ok(None)
    }
}

fn row_to_public_body(row: &SqliteRow) -> PublicBody {
    PublicBody {
        id: PublicBodyId::new(row.get("id")),
        name: row.get("name"),
        email: row.get("email"),
        jurisdiction_id: row
            .get::<Option<i64>, _>("jurisdiction_id")
            .map(JurisdictionId::new),
    }
}
