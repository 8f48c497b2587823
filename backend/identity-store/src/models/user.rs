use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account owning credentials. Managed elsewhere; read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub inactive: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            inactive: false,
            created_at: Utc::now(),
        }
    }
}

/// Single-use numeric code issued to a user. Only the SHA-256 of the code is kept.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserOtp {
    pub id: Uuid,
    pub user_id: Uuid,
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl UserOtp {
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        // A lifetime too large to represent never ends
        self.created_at
            .checked_add_signed(ttl)
            .map_or(false, |end| end < now)
    }
}
