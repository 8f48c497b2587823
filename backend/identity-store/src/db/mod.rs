//! Persistence seams.
//!
//! Every repository call takes the transaction it runs in as `&mut Self::Tx`,
//! obtained from [`Transactional::begin`]. Dropping a transaction without
//! committing rolls it back, so a cancelled operation leaves no trace.
//!
//! Two backends implement the traits: [`PgStore`] over PostgreSQL and
//! [`MemoryStore`], an in-process copy used by tests and embedders.

mod channels;
mod credentials;
pub mod memory;
pub mod postgres;
mod tokens;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{
    Assertion, Channel, ChannelLookup, Credential, CredentialType, InvalidationMask, NewChannel,
    NewSecret, Secret, TokenKind, TokenRecord, User, UserOtp,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait Transactional: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx>;
    async fn commit(&self, tx: Self::Tx) -> Result<()>;
    async fn rollback(&self, tx: Self::Tx) -> Result<()>;
}

#[async_trait]
pub trait UserRepository: Transactional {
    async fn find_user(&self, tx: &mut Self::Tx, user_id: Uuid) -> Result<Option<User>>;
}

#[async_trait]
pub trait CredentialRepository: Transactional {
    /// Load a credential and hold its row lock until the transaction ends
    async fn find_credential_for_update(
        &self,
        tx: &mut Self::Tx,
        user_id: Uuid,
        cred_type: CredentialType,
    ) -> Result<Option<Credential>>;

    /// Insert or overwrite the row for (user_id, cred_type)
    async fn save_credential(&self, tx: &mut Self::Tx, credential: &Credential) -> Result<()>;

    async fn insert_user_otp(&self, tx: &mut Self::Tx, otp: &UserOtp) -> Result<()>;

    /// Unconsumed code for `user_id` with the given hash, locked
    async fn find_unconsumed_user_otp(
        &self,
        tx: &mut Self::Tx,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<Option<UserOtp>>;

    async fn consume_user_otp(
        &self,
        tx: &mut Self::Tx,
        otp_id: Uuid,
        consumed_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait ChannelRepository: Transactional {
    /// Fails with `Conflict` when the name or the (algorithm, use) pair is taken
    async fn insert_channel(&self, tx: &mut Self::Tx, channel: &NewChannel) -> Result<i64>;

    async fn insert_secret(&self, tx: &mut Self::Tx, secret: &NewSecret) -> Result<i64>;

    /// Channel with its secrets, oldest first
    async fn find_channel(
        &self,
        tx: &mut Self::Tx,
        lookup: ChannelLookup<'_>,
    ) -> Result<Option<Channel>>;

    /// Like `find_channel` by id, holding the channel row lock until the transaction ends
    async fn lock_channel(&self, tx: &mut Self::Tx, channel_id: i64) -> Result<Option<Channel>>;

    async fn list_channels(&self, tx: &mut Self::Tx) -> Result<Vec<Channel>>;

    /// Pull every expiry of the channel later than `retire_at` back to `retire_at`
    async fn retire_secrets(
        &self,
        tx: &mut Self::Tx,
        channel_id: i64,
        retire_at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn all_secrets(&self, tx: &mut Self::Tx) -> Result<Vec<Secret>>;

    /// Returns false when no such channel exists
    async fn delete_channel(&self, tx: &mut Self::Tx, channel_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait TokenRepository: Transactional {
    /// Replace the record for its request id. A signature owned by another
    /// request id fails with `Conflict`.
    async fn upsert_token(&self, tx: &mut Self::Tx, record: &TokenRecord) -> Result<()>;

    async fn find_token_by_signature(
        &self,
        tx: &mut Self::Tx,
        kind: TokenKind,
        signature: &str,
    ) -> Result<Option<TokenRecord>>;

    /// Returns false when no record exists for `request_id`
    async fn expire_token(
        &self,
        tx: &mut Self::Tx,
        request_id: &str,
        mask: InvalidationMask,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Store the assertion unless a live entry for its jti exists.
    /// Returns false on replay. An entry that lapsed before `now` is overwritten.
    async fn record_assertion(
        &self,
        tx: &mut Self::Tx,
        assertion: &Assertion,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete_expired_assertions(&self, tx: &mut Self::Tx, now: DateTime<Utc>)
        -> Result<u64>;
}
