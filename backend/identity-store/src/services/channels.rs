//! Signing-Key Channel Manager
//!
//! A channel owns every key ever issued for one (algorithm, use) pair.
//! Rotation retires the live keys and issues a new one; retired keys stay in
//! the channel so signatures made with them can still be verified.

use super::{chrono_duration, with_deadline, SigningKeyLifecycle, SigningKeyLookup};
use crate::db::ChannelRepository;
use crate::error::{IdentityError, Result};
use crate::metrics;
use crate::models::{Channel, ChannelLookup, NewChannel, NewSecret, Secret};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crypto_core::SigningAlgorithm;
use jsonwebtoken::jwk::JwkSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ChannelManager<S> {
    store: S,
    rotation_overlap: chrono::Duration,
    timeout: Duration,
}

impl<S> ChannelManager<S>
where
    S: ChannelRepository,
{
    /// `rotation_overlap` is how long keys retired by a rotation remain valid
    pub fn new(store: S, rotation_overlap: Duration, timeout: Duration) -> Self {
        Self {
            store,
            rotation_overlap: chrono_duration(rotation_overlap),
            timeout,
        }
    }

    async fn find(&self, lookup: ChannelLookup<'_>) -> Result<Channel> {
        with_deadline(self.timeout, "get_channel", async {
            let mut tx = self.store.begin().await?;
            let channel = self.store.find_channel(&mut tx, lookup).await?;
            self.store.commit(tx).await?;
            channel.ok_or(IdentityError::NotFound("channel"))
        })
        .await
    }

}

/// Key generation is CPU bound (RSA 4096 takes seconds), keep it off the runtime
async fn generate_key(algorithm: SigningAlgorithm) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || crypto_core::generate_private_key(algorithm))
        .await
        .map_err(|e| IdentityError::Internal(format!("Key generation task failed: {}", e)))?
        .map_err(IdentityError::from)
}

/// Expiry of a key issued at `issued_at`. Unrepresentable instants are unsupported.
fn expiry(issued_at: DateTime<Utc>, validity_days: i32) -> Result<DateTime<Utc>> {
    chrono::Duration::try_hours(24 * i64::from(validity_days))
        .and_then(|validity| issued_at.checked_add_signed(validity))
        .ok_or_else(|| IdentityError::Unsupported(format!("validity of {} days", validity_days)))
}

fn new_secret(
    channel_id: i64,
    algorithm: SigningAlgorithm,
    key_use: &str,
    validity_days: i32,
    issued_at: DateTime<Utc>,
    key_material: Vec<u8>,
) -> Result<NewSecret> {
    Ok(NewSecret {
        channel_id,
        key_id: Uuid::new_v4().to_string(),
        algorithm: algorithm.as_str().to_string(),
        key_use: key_use.to_string(),
        issued_at,
        expires_at: expiry(issued_at, validity_days)?,
        key_material,
    })
}

#[async_trait]
impl<S> SigningKeyLifecycle for ChannelManager<S>
where
    S: ChannelRepository,
{
    async fn create_channel(
        &self,
        name: &str,
        algorithm: &str,
        key_use: &str,
        validity_days: u32,
    ) -> Result<i64> {
        let algorithm: SigningAlgorithm = algorithm.parse()?;
        let validity_days = i32::try_from(validity_days)
            .map_err(|_| IdentityError::Unsupported(format!("validity of {} days", validity_days)))?;
        expiry(Utc::now(), validity_days)?;
        let key_material = generate_key(algorithm).await?;

        with_deadline(self.timeout, "create_channel", async {
            let now = Utc::now();
            let mut tx = self.store.begin().await?;
            let channel_id = self
                .store
                .insert_channel(
                    &mut tx,
                    &NewChannel {
                        name: name.to_string(),
                        algorithm,
                        key_use: key_use.to_string(),
                        validity_days,
                        created_at: now,
                    },
                )
                .await?;
            let secret = new_secret(channel_id, algorithm, key_use, validity_days, now, key_material)?;
            self.store.insert_secret(&mut tx, &secret).await?;
            self.store.commit(tx).await?;

            info!(
                channel_id = channel_id,
                name = %name,
                algorithm = %algorithm,
                key_use = %key_use,
                key_id = %secret.key_id,
                "Signing key channel created"
            );
            Ok(channel_id)
        })
        .await
    }

    async fn renew_secret(&self, channel_id: i64) -> Result<()> {
        // A channel's algorithm and validity never change, so the key can be
        // made before taking the channel lock
        let channel = self.find(ChannelLookup::Id(channel_id)).await?;
        let algorithm = channel.signing_algorithm()?;
        expiry(Utc::now(), channel.validity_days)?;
        let key_material = generate_key(algorithm).await?;

        with_deadline(self.timeout, "renew_secret", async {
            let mut tx = self.store.begin().await?;
            let channel = match self.store.lock_channel(&mut tx, channel_id).await? {
                Some(channel) => channel,
                None => {
                    self.store.rollback(tx).await?;
                    return Err(IdentityError::NotFound("channel"));
                }
            };

            let now = Utc::now();
            // An overlap too large to represent keeps retired keys until the end of time
            let retire_at = now
                .checked_add_signed(self.rotation_overlap)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let retired = self
                .store
                .retire_secrets(&mut tx, channel_id, retire_at)
                .await?;
            let secret = new_secret(
                channel_id,
                algorithm,
                &channel.key_use,
                channel.validity_days,
                now,
                key_material,
            )?;
            self.store.insert_secret(&mut tx, &secret).await?;
            self.store.commit(tx).await?;

            metrics::record_rotation(algorithm.as_str());
            info!(
                channel_id = channel_id,
                name = %channel.name,
                retired = retired,
                key_id = %secret.key_id,
                expires_at = %secret.expires_at,
                "Signing key rotated"
            );
            Ok(())
        })
        .await
    }

    async fn get_channel(&self, channel_id: i64) -> Result<Channel> {
        self.find(ChannelLookup::Id(channel_id)).await
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Channel> {
        self.find(ChannelLookup::Name(name)).await
    }

    async fn get_channel_by_algo_use(&self, algorithm: &str, key_use: &str) -> Result<Channel> {
        self.find(ChannelLookup::AlgorithmUse(algorithm, key_use))
            .await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        with_deadline(self.timeout, "list_channels", async {
            let mut tx = self.store.begin().await?;
            let channels = self.store.list_channels(&mut tx).await?;
            self.store.commit(tx).await?;
            Ok(channels)
        })
        .await
    }

    async fn delete_channel(&self, channel_id: i64) -> Result<()> {
        with_deadline(self.timeout, "delete_channel", async {
            let mut tx = self.store.begin().await?;
            if !self.store.delete_channel(&mut tx, channel_id).await? {
                self.store.rollback(tx).await?;
                return Err(IdentityError::NotFound("channel"));
            }
            self.store.commit(tx).await?;
            info!(channel_id = channel_id, "Signing key channel deleted");
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl<S> SigningKeyLookup for ChannelManager<S>
where
    S: ChannelRepository,
{
    async fn get_all_secrets(&self) -> Result<JwkSet> {
        let secrets = with_deadline(self.timeout, "get_all_secrets", async {
            let mut tx = self.store.begin().await?;
            let secrets = self.store.all_secrets(&mut tx).await?;
            self.store.commit(tx).await?;
            Ok(secrets)
        })
        .await?;

        let keys = secrets
            .iter()
            .filter_map(|secret| match secret.public_jwk() {
                Ok(jwk) => Some(jwk),
                Err(e) => {
                    warn!(
                        key_id = %secret.key_id,
                        channel_id = secret.channel_id,
                        error = %e,
                        "Skipping unparseable signing key"
                    );
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(published = keys.len(), stored = secrets.len(), "Built public key set");
        Ok(JwkSet { keys })
    }

    async fn get_active_signing_key(&self, algorithm: &str, key_use: &str) -> Result<Secret> {
        let channel = self
            .find(ChannelLookup::AlgorithmUse(algorithm, key_use))
            .await?;

        match channel.active_secret(Utc::now()) {
            Some(secret) => Ok(secret.clone()),
            None if channel.secrets.is_empty() => Err(IdentityError::NotFound("signing key")),
            None => Err(IdentityError::Expired("signing key")),
        }
    }
}
