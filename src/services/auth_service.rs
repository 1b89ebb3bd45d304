use bcrypt::{hash, verify};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::models::UserIdentity;
use crate::database::DatabaseError;
use crate::services::token_service::{IssuedTokens, TokenError, TokenService};
use crate::services::user_directory::UserDirectory;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email already exists: {0}")]
    EmailTaken(String),

    #[error("{0}")]
    Validation(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Email/password accounts on top of [`TokenService`].
pub struct AuthService {
    users: Arc<dyn UserDirectory>,
    tokens: Arc<TokenService>,
    hash_cost: u32,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserDirectory>, tokens: Arc<TokenService>) -> Self {
        Self::with_cost(users, tokens, bcrypt::DEFAULT_COST)
    }

    pub fn with_cost(users: Arc<dyn UserDirectory>, tokens: Arc<TokenService>, hash_cost: u32) -> Self {
        Self {
            users,
            tokens,
            hash_cost,
        }
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<UserIdentity, AuthError> {
        let email = validate_email(email)?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let password = password.to_owned();
        let cost = self.hash_cost;
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .map_err(|e| AuthError::Hashing(e.to_string()))?;

        let user = self.users.create(email, &password_hash).await.map_err(|e| match e {
            DatabaseError::Conflict(_) => AuthError::EmailTaken(email.to_string()),
            other => AuthError::Database(other),
        })?;
        info!("Registered user {}", user.id);
        Ok(user)
    }

    /// Checks the password and starts a fresh session, revoking older ones.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        tenant: Option<&str>,
    ) -> Result<(UserIdentity, IssuedTokens), AuthError> {
        let credentials = match self.users.find_credentials_by_email(email).await? {
            Some(credentials) => credentials,
            None => {
                warn!("Login rejected: unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let password = password.to_owned();
        let password_hash = credentials.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || verify(password, &password_hash))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .unwrap_or(false);
        if !valid {
            warn!("Login rejected for user {}: bad password", credentials.id);
            return Err(AuthError::InvalidCredentials);
        }

        let user = credentials.identity();
        let issued = self.tokens.issue(&user, tenant).await?;
        Ok((user, issued))
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }
}

fn validate_email(email: &str) -> Result<&str, AuthError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !email.contains(char::is_whitespace),
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AuthError::Validation("A valid email is required".to_string()))
    }
}
