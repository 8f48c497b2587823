//! Business logic over the repositories.
//!
//! Consumers depend on the narrow capability traits below rather than on the
//! concrete services: the protocol engine only needs `CredentialValidator`,
//! `SigningKeyLookup` and `TokenProfileStore`; administration uses the rest.

pub mod channels;
pub mod lockout;
pub mod tokens;

pub use channels::ChannelManager;
pub use lockout::{CredentialVerifier, DefaultVerifier, LockoutPolicy, LockoutTracker};
pub use tokens::TokenStore;

use crate::error::{IdentityError, Result};
use crate::models::{
    Channel, CredentialType, InvalidationMask, ProfileLookup, RequestProfile, Secret, TokenKind,
    TokenSignature,
};
use crate::security::TotpEnrollment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

// ============================================================================
// Capabilities
// ============================================================================

#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// `Ok(())` when `presented` matches. A mismatch counts against the
    /// credential and fails with `Mismatch`, or `Blocked` once the attempt
    /// crosses the threshold.
    async fn validate_credential(
        &self,
        user_id: Uuid,
        cred_type: CredentialType,
        presented: &str,
    ) -> Result<()>;

    async fn validate_password(&self, user_id: Uuid, password: &str) -> Result<()> {
        self.validate_credential(user_id, CredentialType::Password, password)
            .await
    }

    async fn validate_totp(&self, user_id: Uuid, code: &str) -> Result<()> {
        self.validate_credential(user_id, CredentialType::Totp, code)
            .await
    }
}

#[async_trait]
pub trait CredentialProvisioner: Send + Sync {
    /// Store `value` verbatim as the (user, type) credential and clear its lockout
    async fn set_credential(
        &self,
        user_id: Uuid,
        cred_type: CredentialType,
        value: String,
    ) -> Result<()>;

    /// Hash `password` and store it as the password credential
    async fn set_password(&self, user_id: Uuid, password: &str) -> Result<()>;

    /// Enroll a fresh TOTP secret, replacing any previous one
    async fn generate_totp_secret(&self, user_id: Uuid, issuer: &str) -> Result<TotpEnrollment>;
}

#[async_trait]
pub trait OneTimeCodes: Send + Sync {
    /// Issue a numeric code of `length` digits. Only its hash is stored.
    async fn generate_user_otp(&self, user_id: Uuid, length: usize) -> Result<String>;

    /// Consume a previously issued code
    async fn validate_user_otp(&self, user_id: Uuid, code: &str) -> Result<()>;
}

#[async_trait]
pub trait SigningKeyLookup: Send + Sync {
    /// Public half of every stored key, expired ones included, so tokens signed
    /// before a rotation still verify
    async fn get_all_secrets(&self) -> Result<JwkSet>;

    /// Newest unexpired key of the (algorithm, use) channel
    async fn get_active_signing_key(&self, algorithm: &str, key_use: &str) -> Result<Secret>;
}

#[async_trait]
pub trait SigningKeyLifecycle: Send + Sync {
    async fn create_channel(
        &self,
        name: &str,
        algorithm: &str,
        key_use: &str,
        validity_days: u32,
    ) -> Result<i64>;

    async fn renew_secret(&self, channel_id: i64) -> Result<()>;

    async fn get_channel(&self, channel_id: i64) -> Result<Channel>;

    async fn get_channel_by_name(&self, name: &str) -> Result<Channel>;

    async fn get_channel_by_algo_use(&self, algorithm: &str, key_use: &str) -> Result<Channel>;

    async fn list_channels(&self) -> Result<Vec<Channel>>;

    async fn delete_channel(&self, channel_id: i64) -> Result<()>;
}

#[async_trait]
pub trait TokenProfileStore: Send + Sync {
    async fn store_token_profile(
        &self,
        request_id: &str,
        signatures: &[TokenSignature],
        profile: RequestProfile,
    ) -> Result<()>;

    async fn get_profile_by_signature(
        &self,
        kind: TokenKind,
        signature: &str,
    ) -> Result<ProfileLookup>;

    async fn get_profile_by_auth_code_signature(&self, signature: &str) -> Result<ProfileLookup> {
        self.get_profile_by_signature(TokenKind::AuthorizationCode, signature)
            .await
    }

    async fn get_profile_by_access_token_signature(
        &self,
        signature: &str,
    ) -> Result<ProfileLookup> {
        self.get_profile_by_signature(TokenKind::AccessToken, signature)
            .await
    }

    async fn get_profile_by_refresh_token_signature(
        &self,
        signature: &str,
    ) -> Result<ProfileLookup> {
        self.get_profile_by_signature(TokenKind::RefreshToken, signature)
            .await
    }

    async fn invalidate_with_request_id(
        &self,
        request_id: &str,
        mask: InvalidationMask,
    ) -> Result<()>;
}

#[async_trait]
pub trait AssertionReplayGuard: Send + Sync {
    /// Fails with `Conflict` when `jti` was already recorded and has not expired
    async fn record_assertion(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Drop entries whose expiry has passed; returns how many went
    async fn purge_expired_assertions(&self) -> Result<u64>;
}

// ============================================================================
// Helpers
// ============================================================================

/// Run `fut` under `limit`; an elapsed deadline drops the future, rolling back
/// any transaction it held
pub(crate) async fn with_deadline<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = operation,
                timeout_ms = limit.as_millis() as u64,
                "Operation deadline elapsed"
            );
            crate::metrics::record_timeout(operation);
            Err(IdentityError::Timeout)
        }
    }
}

/// std duration to chrono, saturating at chrono's range
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
