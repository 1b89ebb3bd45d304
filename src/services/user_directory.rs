use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::models::{UserCredentials, UserIdentity};
use crate::database::{ConnectionHandle, DatabaseError, PgDatabase};

/// Accounts in the master `users` table.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Stores a new account; a taken email is a [`DatabaseError::Conflict`].
    async fn create(&self, email: &str, password_hash: &str) -> Result<UserIdentity, DatabaseError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserIdentity>, DatabaseError>;

    /// Email lookup is case-insensitive.
    async fn find_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>, DatabaseError>;
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_handle(master: &ConnectionHandle) -> Result<Self, DatabaseError> {
        Ok(Self::new(PgDatabase::pool_of(master)?.clone()))
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn create(&self, email: &str, password_hash: &str) -> Result<UserIdentity, DatabaseError> {
        sqlx::query_as::<_, UserIdentity>(
            "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id, email",
        )
        .bind(email.trim())
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_insert(e, format!("user '{}'", email.trim())))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserIdentity>, DatabaseError> {
        let user = sqlx::query_as::<_, UserIdentity>("SELECT id, email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>, DatabaseError> {
        let user = sqlx::query_as::<_, UserCredentials>(
            "SELECT id, email, password_hash FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
