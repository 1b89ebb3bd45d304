use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The part of a master `users` row that tokens carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserIdentity {
    pub id: i64,
    pub email: String,
}

/// Identity plus stored password hash, only loaded on the login path.
#[derive(Clone, FromRow)]
pub struct UserCredentials {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
}

impl UserCredentials {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            email: self.email.clone(),
        }
    }
}
