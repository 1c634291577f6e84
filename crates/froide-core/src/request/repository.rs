//! Request repository.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::codec::generate_secret_address;
use super::model::{FoiRequest, NewRequest, RequestId, RequestStatus, slugify};
use crate::publicbody::PublicBodyId;
use crate::{Error, Result};

const COLUMNS: &str = "id, title, slug, secret_address, closed, public_body_id, same_as, \
                       campaign, owner_name, owner_email, status, is_public, created_at, updated_at";

/// Repository for FOI requests.
#[derive(Debug, Clone)]
pub struct RequestRepository {
    pool: SqlitePool,
}

impl RequestRepository {
    /// Creates a repository over an initialized pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a request.
    ///
    /// Without an explicit secret address, a fresh one on `domain` is
    /// generated and checked for uniqueness.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create(&self, new: &NewRequest, domain: &str) -> Result<FoiRequest> {
        let secret_address = match &new.secret_address {
            Some(address) => address.trim().to_lowercase(),
            None => loop {
                let candidate = generate_secret_address(&new.owner_name, domain);
                if self.get_by_secret_address(&candidate).await?.is_none() {
                    break candidate;
                }
            },
        };
        let now = Utc::now();

        let result = sqlx::query(
            r"
            INSERT INTO requests (title, slug, secret_address, public_body_id, campaign,
                                  owner_name, owner_email, status, is_public, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&new.title)
        .bind(slugify(&new.title))
        .bind(&secret_address)
        .bind(new.public_body_id.map(|id| id.0))
        .bind(&new.campaign)
        .bind(&new.owner_name)
        .bind(&new.owner_email)
        .bind(RequestStatus::AwaitingResponse.as_str())
        .bind(new.is_public)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = RequestId::new(result.last_insert_rowid());
        self.get(id).await?.ok_or(Error::RequestNotFound(id))
    }

    /// Gets a request by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: RequestId) -> Result<Option<FoiRequest>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM requests WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| row_to_request(&r)))
    }

    /// Gets a request by its secret address (exact, lowercased).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_by_secret_address(&self, address: &str) -> Result<Option<FoiRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM requests WHERE secret_address = ?"
        ))
        .bind(address.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_request(&r)))
    }

    /// Sets the lifecycle status and touches the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_status(&self, id: RequestId, status: RequestStatus) -> Result<()> {
        sqlx::query("UPDATE requests SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Opens or closes a request for inbound mail.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_closed(&self, id: RequestId, closed: bool) -> Result<()> {
        sqlx::query("UPDATE requests SET closed = ?, updated_at = ? WHERE id = ?")
            .bind(closed)
            .bind(Utc::now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Marks `id` as a duplicate of `same_as`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn set_same_as(&self, id: RequestId, same_as: Option<RequestId>) -> Result<()> {
        sqlx::query("UPDATE requests SET same_as = ?, updated_at = ? WHERE id = ?")
            .bind(same_as.map(|r| r.0))
            .bind(Utc::now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bumps `updated_at` so cached message lists are invalidated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn touch(&self, id: RequestId) -> Result<()> {
        sqlx::query("UPDATE requests SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_request(row: &SqliteRow) -> FoiRequest {
    FoiRequest {
        id: RequestId::new(row.get("id")),
        title: row.get("title"),
        slug: row.get("slug"),
        secret_address: row.get("secret_address"),
        closed: row.get("closed"),
        public_body_id: row
            .get::<Option<i64>, _>("public_body_id")
            .map(PublicBodyId::new),
        same_as: row.get::<Option<i64>, _>("same_as").map(RequestId::new),
        campaign: row.get("campaign"),
        owner_name: row.get("owner_name"),
        owner_email: row.get("owner_email"),
        status: RequestStatus::parse(row.get("status")),
        is_public: row.get("is_public"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
