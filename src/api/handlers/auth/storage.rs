//! Persistence for refresh credentials and user accounts.
//!
//! Flow Overview:
//! 1) Issuance inserts a row and prunes the owner's rows beyond the retention bound.
//! 2) Refresh finds candidates by the non-secret lookup key, then verifies the slow hash.
//! 3) Rotation deletes the redeemed row and inserts its replacement in one transaction;
//!    the `DELETE` is the compare-and-delete point for concurrent redemptions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use thiserror::Error;
use tracing::Instrument;

use super::utils::is_unique_violation;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("username already taken")]
    UsernameTaken,
}

/// A refresh credential about to be stored.
#[derive(Clone, Debug)]
pub struct NewRefreshCredential {
    pub owner_id: i64,
    pub lookup_key: String,
    pub secret_hash: String,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A stored refresh credential. The plaintext is never part of it.
#[derive(Clone, Debug)]
pub struct StoredRefreshCredential {
    pub owner_id: i64,
    pub lookup_key: String,
    pub secret_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RefreshStore: Send + Sync {
    /// Store a credential, keeping only the `retention` most recent rows of its owner.
    async fn insert(&self, credential: NewRefreshCredential, retention: usize)
    -> Result<(), StoreError>;

    /// All rows (expired or not) sharing a lookup key.
    async fn find_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Vec<StoredRefreshCredential>, StoreError>;

    /// Non-expired rows of one owner.
    async fn find_by_owner(&self, owner_id: i64)
    -> Result<Vec<StoredRefreshCredential>, StoreError>;

    /// Atomically delete `old_secret_hash` and insert `replacement`.
    ///
    /// Returns `false`, storing nothing, when the old row was already gone.
    async fn rotate(
        &self,
        old_secret_hash: &str,
        replacement: NewRefreshCredential,
        retention: usize,
    ) -> Result<bool, StoreError>;

    async fn delete_by_hash(&self, secret_hash: &str) -> Result<bool, StoreError>;

    async fn delete_all_by_owner(&self, owner_id: i64) -> Result<u64, StoreError>;

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError>;

    /// # Errors
    /// Returns `StoreError::UsernameTaken` on a duplicate username.
    async fn create(&self, username: &str, password_hash: &str) -> Result<UserRecord, StoreError>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), StoreError>;
}

fn refresh_from_row(row: &PgRow) -> StoredRefreshCredential {
    StoredRefreshCredential {
        owner_id: row.get("owner_id"),
        lookup_key: row.get("lookup_key"),
        secret_hash: row.get("secret_hash"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// PostgreSQL-backed stores.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_and_prune(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        credential: &NewRefreshCredential,
        retention: usize,
    ) -> Result<(), sqlx::Error> {
        let query = r"
            INSERT INTO refresh_tokens
                (owner_id, lookup_key, secret_hash, expires_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(credential.owner_id)
            .bind(&credential.lookup_key)
            .bind(&credential.secret_hash)
            .bind(credential.expires_at)
            .bind(credential.last_used_at)
            .execute(&mut **tx)
            .instrument(db_span("INSERT", query))
            .await?;

        // Keep the newest rows; `id` breaks ties between rows created in the same instant.
        let query = r"
            DELETE FROM refresh_tokens
            WHERE owner_id = $1
              AND id NOT IN (
                SELECT id FROM refresh_tokens
                WHERE owner_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
              )
        ";
        sqlx::query(query)
            .bind(credential.owner_id)
            .bind(i64::try_from(retention).unwrap_or(i64::MAX))
            .execute(&mut **tx)
            .instrument(db_span("DELETE", query))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl RefreshStore for PgStore {
    async fn insert(
        &self,
        credential: NewRefreshCredential,
        retention: usize,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_and_prune(&mut tx, &credential, retention).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Vec<StoredRefreshCredential>, StoreError> {
        let query = r"
            SELECT owner_id, lookup_key, secret_hash, expires_at, created_at, last_used_at
            FROM refresh_tokens
            WHERE lookup_key = $1
        ";
        let rows = sqlx::query(query)
            .bind(lookup_key)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(refresh_from_row).collect())
    }

    async fn find_by_owner(
        &self,
        owner_id: i64,
    ) -> Result<Vec<StoredRefreshCredential>, StoreError> {
        let query = r"
            SELECT owner_id, lookup_key, secret_hash, expires_at, created_at, last_used_at
            FROM refresh_tokens
            WHERE owner_id = $1 AND expires_at > NOW()
            ORDER BY created_at DESC, id DESC
        ";
        let rows = sqlx::query(query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(refresh_from_row).collect())
    }

    async fn rotate(
        &self,
        old_secret_hash: &str,
        replacement: NewRefreshCredential,
        retention: usize,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // A concurrent rotation of the same row blocks here on the row lock and
        // then sees zero affected rows once the winner commits.
        let query = "DELETE FROM refresh_tokens WHERE secret_hash = $1";
        let deleted = sqlx::query(query)
            .bind(old_secret_hash)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_and_prune(&mut tx, &replacement, retention).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_by_hash(&self, secret_hash: &str) -> Result<bool, StoreError> {
        let query = "DELETE FROM refresh_tokens WHERE secret_hash = $1";
        let result = sqlx::query(query)
            .bind(secret_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_by_owner(&self, owner_id: i64) -> Result<u64, StoreError> {
        let query = "DELETE FROM refresh_tokens WHERE owner_id = $1";
        let result = sqlx::query(query)
            .bind(owner_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM refresh_tokens WHERE expires_at <= $1";
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let query = "SELECT id, username, password_hash FROM users WHERE username = $1";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
        }))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let query = "SELECT id, username, password_hash FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
        }))
    }

    async fn create(&self, username: &str, password_hash: &str) -> Result<UserRecord, StoreError> {
        let query = r"
            INSERT INTO users (username, password_hash)
            VALUES ($1, $2)
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(username)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match row {
            Ok(row) => Ok(UserRecord {
                id: row.get("id"),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
            }),
            Err(err) if is_unique_violation(&err) => Err(StoreError::UsernameTaken),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(())
    }
}
