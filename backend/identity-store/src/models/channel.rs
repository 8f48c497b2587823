use chrono::{DateTime, Utc};
use crypto_core::SigningAlgorithm;
use jsonwebtoken::jwk::Jwk;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Named group of signing keys for one (algorithm, use) pair
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub algorithm: String,
    pub key_use: String,
    pub validity_days: i32,
    pub created_at: DateTime<Utc>,
    /// Ordered by issue time, oldest first
    #[sqlx(skip)]
    pub secrets: Vec<Secret>,
}

impl Channel {
    pub fn signing_algorithm(&self) -> crypto_core::Result<SigningAlgorithm> {
        self.algorithm.parse()
    }

    /// Newest secret still valid at `now`
    pub fn active_secret(&self, now: DateTime<Utc>) -> Option<&Secret> {
        self.secrets
            .iter()
            .filter(|s| !s.is_expired_at(now))
            .max_by_key(|s| (s.issued_at, s.id))
    }

    /// Newest secret regardless of expiry
    pub fn newest_secret(&self) -> Option<&Secret> {
        self.secrets.iter().max_by_key(|s| (s.issued_at, s.id))
    }
}

/// One private key. Algorithm and use are copied from the owning channel.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Secret {
    pub id: i64,
    pub channel_id: i64,
    pub key_id: String,
    pub algorithm: String,
    pub key_use: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// PKCS#8 DER
    #[serde(skip)]
    pub key_material: Vec<u8>,
}

impl Secret {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn public_jwk(&self) -> crypto_core::Result<Jwk> {
        let algorithm: SigningAlgorithm = self.algorithm.parse()?;
        crypto_core::public_jwk(algorithm, &self.key_id, &self.key_use, &self.key_material)
    }
}

/// Channel row before the backend assigns an id
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: String,
    pub algorithm: SigningAlgorithm,
    pub key_use: String,
    pub validity_days: i32,
    pub created_at: DateTime<Utc>,
}

/// Secret row before the backend assigns an id
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub channel_id: i64,
    pub key_id: String,
    pub algorithm: String,
    pub key_use: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub key_material: Vec<u8>,
}

/// The three unique keys a channel can be found by
#[derive(Debug, Clone, Copy)]
pub enum ChannelLookup<'a> {
    Id(i64),
    Name(&'a str),
    AlgorithmUse(&'a str, &'a str),
}
