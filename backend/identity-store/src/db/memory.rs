//! In-process backend.
//!
//! A transaction takes the store-wide lock and works on a private copy of the
//! tables; commit writes the copy back, dropping it discards the copy. This
//! serialises all transactions, which trivially gives the row-lock guarantees
//! the PostgreSQL backend gets from `SELECT ... FOR UPDATE`.

use super::{
    ChannelRepository, CredentialRepository, TokenRepository, Transactional, UserRepository,
};
use crate::error::{IdentityError, Result};
use crate::models::{
    Assertion, Channel, ChannelLookup, Credential, CredentialType, InvalidationMask, NewChannel,
    NewSecret, Secret, TokenKind, TokenRecord, User, UserOtp,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    credentials: HashMap<(Uuid, CredentialType), Credential>,
    user_otps: Vec<UserOtp>,
    channels: BTreeMap<i64, Channel>,
    secrets: BTreeMap<i64, Secret>,
    tokens: HashMap<String, TokenRecord>,
    assertions: HashMap<String, Assertion>,
    last_channel_id: i64,
    last_secret_id: i64,
}

impl Tables {
    fn with_secrets(&self, channel: &Channel) -> Channel {
        let mut channel = channel.clone();
        let mut secrets: Vec<Secret> = self
            .secrets
            .values()
            .filter(|s| s.channel_id == channel.id)
            .cloned()
            .collect();
        secrets.sort_by_key(|s| (s.issued_at, s.id));
        channel.secrets = secrets;
        channel
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user. Users are owned by another system; this is how
    /// they get here.
    pub async fn insert_user(&self, user: User) {
        let mut tables = self.tables.lock().await;
        tables.users.insert(user.id, user);
    }
}

#[async_trait]
impl Transactional for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        let MemoryTx { mut guard, working } = tx;
        *guard = working;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_user(&self, tx: &mut Self::Tx, user_id: Uuid) -> Result<Option<User>> {
        Ok(tx.working.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl CredentialRepository for MemoryStore {
    async fn find_credential_for_update(
        &self,
        tx: &mut Self::Tx,
        user_id: Uuid,
        cred_type: CredentialType,
    ) -> Result<Option<Credential>> {
        Ok(tx.working.credentials.get(&(user_id, cred_type)).cloned())
    }

    async fn save_credential(&self, tx: &mut Self::Tx, credential: &Credential) -> Result<()> {
        let key = (credential.user_id, credential.cred_type);
        let mut row = credential.clone();
        // Upsert keeps the original row id, as ON CONFLICT ... DO UPDATE does
        if let Some(existing) = tx.working.credentials.get(&key) {
            row.id = existing.id;
        }
        tx.working.credentials.insert(key, row);
        Ok(())
    }

    async fn insert_user_otp(&self, tx: &mut Self::Tx, otp: &UserOtp) -> Result<()> {
        tx.working.user_otps.push(otp.clone());
        Ok(())
    }

    async fn find_unconsumed_user_otp(
        &self,
        tx: &mut Self::Tx,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<Option<UserOtp>> {
        Ok(tx
            .working
            .user_otps
            .iter()
            .filter(|o| o.user_id == user_id && o.code_hash == code_hash && o.consumed_at.is_none())
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn consume_user_otp(
        &self,
        tx: &mut Self::Tx,
        otp_id: Uuid,
        consumed_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(otp) = tx.working.user_otps.iter_mut().find(|o| o.id == otp_id) {
            otp.consumed_at = Some(consumed_at);
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelRepository for MemoryStore {
    async fn insert_channel(&self, tx: &mut Self::Tx, channel: &NewChannel) -> Result<i64> {
        let algorithm = channel.algorithm.as_str();
        for existing in tx.working.channels.values() {
            if existing.name == channel.name {
                return Err(IdentityError::Conflict(format!(
                    "channel already exists (name {})",
                    channel.name
                )));
            }
            if existing.algorithm == algorithm && existing.key_use == channel.key_use {
                return Err(IdentityError::Conflict(format!(
                    "channel already exists ({}/{})",
                    algorithm, channel.key_use
                )));
            }
        }

        tx.working.last_channel_id += 1;
        let id = tx.working.last_channel_id;
        tx.working.channels.insert(
            id,
            Channel {
                id,
                name: channel.name.clone(),
                algorithm: algorithm.to_string(),
                key_use: channel.key_use.clone(),
                validity_days: channel.validity_days,
                created_at: channel.created_at,
                secrets: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn insert_secret(&self, tx: &mut Self::Tx, secret: &NewSecret) -> Result<i64> {
        if !tx.working.channels.contains_key(&secret.channel_id) {
            return Err(IdentityError::NotFound("channel"));
        }
        if tx.working.secrets.values().any(|s| s.key_id == secret.key_id) {
            return Err(IdentityError::Conflict(format!(
                "secret already exists (key id {})",
                secret.key_id
            )));
        }

        tx.working.last_secret_id += 1;
        let id = tx.working.last_secret_id;
        tx.working.secrets.insert(
            id,
            Secret {
                id,
                channel_id: secret.channel_id,
                key_id: secret.key_id.clone(),
                algorithm: secret.algorithm.clone(),
                key_use: secret.key_use.clone(),
                issued_at: secret.issued_at,
                expires_at: secret.expires_at,
                key_material: secret.key_material.clone(),
            },
        );
        Ok(id)
    }

    async fn find_channel(
        &self,
        tx: &mut Self::Tx,
        lookup: ChannelLookup<'_>,
    ) -> Result<Option<Channel>> {
        let tables = &tx.working;
        let channel = tables.channels.values().find(|c| match lookup {
            ChannelLookup::Id(id) => c.id == id,
            ChannelLookup::Name(name) => c.name == name,
            ChannelLookup::AlgorithmUse(algorithm, key_use) => {
                c.algorithm == algorithm && c.key_use == key_use
            }
        });
        Ok(channel.map(|c| tables.with_secrets(c)))
    }

    async fn lock_channel(&self, tx: &mut Self::Tx, channel_id: i64) -> Result<Option<Channel>> {
        self.find_channel(tx, ChannelLookup::Id(channel_id)).await
    }

    async fn list_channels(&self, tx: &mut Self::Tx) -> Result<Vec<Channel>> {
        let tables = &tx.working;
        Ok(tables
            .channels
            .values()
            .map(|c| tables.with_secrets(c))
            .collect())
    }

    async fn retire_secrets(
        &self,
        tx: &mut Self::Tx,
        channel_id: i64,
        retire_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut retired = 0;
        for secret in tx.working.secrets.values_mut() {
            if secret.channel_id == channel_id && secret.expires_at > retire_at {
                secret.expires_at = retire_at;
                retired += 1;
            }
        }
        Ok(retired)
    }

    async fn all_secrets(&self, tx: &mut Self::Tx) -> Result<Vec<Secret>> {
        let mut secrets: Vec<Secret> = tx.working.secrets.values().cloned().collect();
        secrets.sort_by_key(|s| (s.channel_id, s.issued_at, s.id));
        Ok(secrets)
    }

    async fn delete_channel(&self, tx: &mut Self::Tx, channel_id: i64) -> Result<bool> {
        if tx.working.channels.remove(&channel_id).is_none() {
            return Ok(false);
        }
        tx.working.secrets.retain(|_, s| s.channel_id != channel_id);
        Ok(true)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn upsert_token(&self, tx: &mut Self::Tx, record: &TokenRecord) -> Result<()> {
        for kind in TokenKind::ALL {
            let Some(signature) = record.pair(kind).signature.as_deref() else {
                continue;
            };
            let taken = tx.working.tokens.values().any(|other| {
                other.request_id != record.request_id
                    && other.pair(kind).signature.as_deref() == Some(signature)
            });
            if taken {
                return Err(IdentityError::Conflict(format!(
                    "token signature already exists ({})",
                    kind
                )));
            }
        }

        tx.working
            .tokens
            .insert(record.request_id.clone(), record.clone());
        Ok(())
    }

    async fn find_token_by_signature(
        &self,
        tx: &mut Self::Tx,
        kind: TokenKind,
        signature: &str,
    ) -> Result<Option<TokenRecord>> {
        Ok(tx
            .working
            .tokens
            .values()
            .find(|r| r.pair(kind).signature.as_deref() == Some(signature))
            .cloned())
    }

    async fn expire_token(
        &self,
        tx: &mut Self::Tx,
        request_id: &str,
        mask: InvalidationMask,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        match tx.working.tokens.get_mut(request_id) {
            Some(record) => {
                record.expire(mask, at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_assertion(
        &self,
        tx: &mut Self::Tx,
        assertion: &Assertion,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(existing) = tx.working.assertions.get(&assertion.jti) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        tx.working
            .assertions
            .insert(assertion.jti.clone(), assertion.clone());
        Ok(true)
    }

    async fn delete_expired_assertions(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let before = tx.working.assertions.len();
        tx.working.assertions.retain(|_, a| a.expires_at > now);
        Ok((before - tx.working.assertions.len()) as u64)
    }
}
