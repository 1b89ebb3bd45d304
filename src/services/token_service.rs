use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{ConfigError, TokenConfig};
use crate::database::models::{NewToken, TokenKind, TokenRecord, UserIdentity};
use crate::database::{ConnectionHandle, DatabaseError, PgDatabase};
use crate::services::user_directory::UserDirectory;

/// Verified content of an access or refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("No token provided")]
    Missing,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Refresh token has been revoked")]
    Revoked,

    #[error("User {0} no longer exists")]
    UserNotFound(i64),

    #[error("Failed to sign token: {0}")]
    Signing(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl TokenError {
    /// Stable label for logs. Clients see the same status for most kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Missing => "missing",
            TokenError::Expired => "expired",
            TokenError::Invalid(_) => "invalid",
            TokenError::Revoked => "revoked",
            TokenError::UserNotFound(_) => "user_not_found",
            TokenError::Signing(_) => "signing",
            TokenError::Store(_) => "store",
        }
    }

    /// Whether the failure is the caller's credentials rather than ours.
    pub fn is_unauthorized(&self) -> bool {
        !matches!(self, TokenError::Signing(_) | TokenError::Store(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenError::Store(e) if e.is_retryable())
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Result of exchanging a refresh token.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Persisted refresh tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: NewToken) -> Result<TokenRecord, DatabaseError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>, DatabaseError>;

    /// Marks every unrevoked token of `user_id` as revoked and returns how many changed.
    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, DatabaseError>;

    /// Revokes every token of `token.user_id` and stores `token` as one
    /// atomic step. Concurrent calls for the same user are serialized, so
    /// exactly one of them ends up holding the only unrevoked token.
    async fn replace_for_user(&self, token: NewToken) -> Result<(u64, TokenRecord), DatabaseError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

const TOKEN_COLUMNS: &str = "id, user_id, token, type, is_revoked, expires_at, created_at, updated_at";

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_handle(master: &ConnectionHandle) -> Result<Self, DatabaseError> {
        Ok(Self::new(PgDatabase::pool_of(master)?.clone()))
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: NewToken) -> Result<TokenRecord, DatabaseError> {
        let query = format!(
            r#"
            INSERT INTO tokens (user_id, token, type, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        );
        sqlx::query_as::<_, TokenRecord>(&query)
            .bind(token.user_id)
            .bind(&token.token)
            .bind(token.kind.as_str())
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::from_insert(e, format!("token for user {}", token.user_id)))
    }

    async fn replace_for_user(&self, token: NewToken) -> Result<(u64, TokenRecord), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        // Held until commit; a second login for the same user waits here.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(token.user_id)
            .execute(&mut *tx)
            .await?;

        let revoked = sqlx::query(
            "UPDATE tokens SET is_revoked = TRUE, updated_at = NOW() WHERE user_id = $1 AND is_revoked = FALSE",
        )
        .bind(token.user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let query = format!(
            r#"
            INSERT INTO tokens (user_id, token, type, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        );
        let record = sqlx::query_as::<_, TokenRecord>(&query)
            .bind(token.user_id)
            .bind(&token.token)
            .bind(token.kind.as_str())
            .bind(token.expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| DatabaseError::from_insert(e, format!("token for user {}", token.user_id)))?;

        tx.commit().await?;
        Ok((revoked, record))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>, DatabaseError> {
        let query = format!("SELECT {} FROM tokens WHERE token = $1", TOKEN_COLUMNS);
        let record = sqlx::query_as::<_, TokenRecord>(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE tokens SET is_revoked = TRUE, updated_at = NOW() WHERE user_id = $1 AND is_revoked = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues, verifies, refreshes and revokes session tokens.
///
/// Access tokens are stateless. Refresh tokens are persisted so they can be
/// revoked; a refresh is only honoured while its stored row is neither
/// revoked nor expired.
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    users: Arc<dyn UserDirectory>,
    algorithm: Algorithm,
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    leeway_secs: u64,
    prefix: String,
}

impl TokenService {
    pub fn new(
        config: &TokenConfig,
        store: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            store,
            users,
            algorithm: config.algorithm()?,
            access: SigningKeys::from_secret(&config.access_secret),
            refresh: SigningKeys::from_secret(&config.refresh_secret),
            access_ttl: to_chrono("JWT_ACCESS_TOKEN_EXPIRES_IN", config.access_ttl()?)?,
            refresh_ttl: to_chrono("JWT_REFRESH_TOKEN_EXPIRES_IN", config.refresh_ttl()?)?,
            leeway_secs: config.leeway_secs,
            prefix: config.token_prefix.clone(),
        })
    }

    /// Starts a new session for `user`. Every refresh token the user already
    /// holds is revoked in the same step that stores the new one, so only the
    /// newest login can refresh.
    pub async fn issue(&self, user: &UserIdentity, tenant: Option<&str>) -> Result<IssuedTokens, TokenError> {
        let now = Utc::now();
        let tenant = tenant.map(str::to_string);
        let access_claims = self.claims(user, tenant.clone(), now, self.access_ttl);
        let refresh_claims = self.claims(user, tenant, now, self.refresh_ttl);
        let access_token = self.sign(&access_claims, &self.access.encoding)?;
        let refresh_token = self.sign(&refresh_claims, &self.refresh.encoding)?;

        let refresh_expires_at = timestamp(refresh_claims.exp);
        let (revoked, _) = self
            .store
            .replace_for_user(NewToken {
                user_id: user.id,
                token: refresh_token.clone(),
                kind: TokenKind::Refresh,
                expires_at: refresh_expires_at,
            })
            .await?;
        if revoked > 0 {
            debug!("Revoked {} earlier refresh tokens for user {}", revoked, user.id);
        }

        info!("Issued session for user {}", user.id);
        Ok(IssuedTokens {
            access_token,
            access_expires_at: timestamp(access_claims.exp),
            refresh_token,
            refresh_expires_at,
        })
    }

    /// Checks the signature and expiry of an access token.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        self.decode(token, &self.access.decoding)
    }

    /// Strips the configured scheme prefix from an `Authorization` value.
    pub fn bearer_token<'a>(&self, header: Option<&'a str>) -> Result<&'a str, TokenError> {
        let value = header.map(str::trim).filter(|v| !v.is_empty()).ok_or(TokenError::Missing)?;
        let (scheme, token) = value
            .split_once(' ')
            .ok_or_else(|| TokenError::Invalid("expected '<scheme> <token>'".to_string()))?;
        if !scheme.eq_ignore_ascii_case(&self.prefix) {
            return Err(TokenError::Invalid(format!("unsupported scheme '{}'", scheme)));
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        Ok(token)
    }

    /// Exchanges a refresh token for a new access token carrying the same
    /// tenant claim.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedAccess, TokenError> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(TokenError::Missing);
        }
        let claims = self.decode(refresh_token, &self.refresh.decoding)?;

        let now = Utc::now();
        let record = self.store.find_by_token(refresh_token).await?;
        match record {
            None => return Err(TokenError::Invalid("refresh token is not on record".to_string())),
            Some(record) if record.is_revoked => return Err(TokenError::Revoked),
            Some(record) if record.is_expired(now) => return Err(TokenError::Expired),
            Some(record) if record.user_id != claims.user_id => {
                return Err(TokenError::Invalid("refresh token subject mismatch".to_string()))
            }
            Some(_) => {}
        }

        let user = self
            .users
            .find_by_id(claims.user_id)
            .await?
            .ok_or(TokenError::UserNotFound(claims.user_id))?;

        let access_claims = self.claims(&user, claims.tenant, now, self.access_ttl);
        let access_token = self.sign(&access_claims, &self.access.encoding)?;
        Ok(RefreshedAccess {
            access_token,
            expires_at: timestamp(access_claims.exp),
        })
    }

    pub async fn revoke_all(&self, user_id: i64) -> Result<u64, TokenError> {
        let count = self.store.revoke_all_for_user(user_id).await?;
        info!("Revoked {} refresh tokens for user {}", count, user_id);
        Ok(count)
    }

    /// Deletes refresh tokens past their expiry.
    pub async fn sweep_expired(&self) -> Result<u64, TokenError> {
        let count = self.store.delete_expired(Utc::now()).await?;
        if count > 0 {
            info!("Swept {} expired refresh tokens", count);
        }
        Ok(count)
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired().await {
                    error!("Refresh token sweep failed: {}", e);
                }
            }
        })
    }

    fn claims(
        &self,
        user: &UserIdentity,
        tenant: Option<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> TokenClaims {
        TokenClaims {
            user_id: user.id,
            email: user.email.clone(),
            tenant,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    fn sign(&self, claims: &TokenClaims, key: &EncodingKey) -> Result<String, TokenError> {
        encode(&Header::new(self.algorithm), claims, key).map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn decode(&self, token: &str, key: &DecodingKey) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway_secs;

        decode::<TokenClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }
}

fn to_chrono(key: &'static str, ttl: Duration) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::from_std(ttl).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
