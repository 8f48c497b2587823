//! Credential Lockout Tracker
//!
//! Validates passwords and TOTP codes, counts failures per (user, credential
//! type) and blocks the credential once a failure pushes the count past the
//! policy maximum inside the tracking window. Replacing the credential value
//! is the only way back.

use super::{
    chrono_duration, with_deadline, CredentialProvisioner, CredentialValidator, OneTimeCodes,
};
use crate::config::LockoutSettings;
use crate::db::{CredentialRepository, UserRepository};
use crate::error::{IdentityError, Result};
use crate::metrics;
use crate::models::{Credential, CredentialType, User, UserOtp};
use crate::security::{self, totp, TotpEnrollment};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Compares a presented value with a stored credential value
#[cfg_attr(test, mockall::automock)]
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, cred_type: CredentialType, stored: &str, presented: &str) -> Result<bool>;

    fn hash_password(&self, password: &str) -> Result<String>;
}

/// Argon2 for passwords, RFC 6238 against the wall clock for TOTP
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVerifier;

impl CredentialVerifier for DefaultVerifier {
    fn verify(&self, cred_type: CredentialType, stored: &str, presented: &str) -> Result<bool> {
        match cred_type {
            CredentialType::Password => security::verify_password(presented, stored),
            CredentialType::Totp => {
                let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
                totp::verify_code(stored, presented, now)
            }
        }
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        security::hash_password(password)
    }
}

#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    pub max_invalid_attempts: u32,
    pub invalid_attempt_window: chrono::Duration,
    pub totp_secret_length: usize,
    pub user_otp_ttl: chrono::Duration,
}

impl From<&LockoutSettings> for LockoutPolicy {
    fn from(settings: &LockoutSettings) -> Self {
        Self {
            max_invalid_attempts: settings.max_invalid_attempts,
            invalid_attempt_window: chrono_duration(settings.invalid_attempt_window),
            totp_secret_length: settings.totp_secret_length,
            user_otp_ttl: chrono_duration(settings.user_otp_ttl),
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from(&LockoutSettings::default())
    }
}

pub struct LockoutTracker<S, V = DefaultVerifier> {
    store: S,
    verifier: V,
    policy: LockoutPolicy,
    timeout: Duration,
}

impl<S> LockoutTracker<S, DefaultVerifier>
where
    S: UserRepository + CredentialRepository,
{
    pub fn new(store: S, policy: LockoutPolicy, timeout: Duration) -> Self {
        Self::with_verifier(store, DefaultVerifier, policy, timeout)
    }
}

impl<S, V> LockoutTracker<S, V>
where
    S: UserRepository + CredentialRepository,
    V: CredentialVerifier,
{
    pub fn with_verifier(store: S, verifier: V, policy: LockoutPolicy, timeout: Duration) -> Self {
        Self {
            store,
            verifier,
            policy,
            timeout,
        }
    }

    async fn active_user(&self, tx: &mut S::Tx, user_id: Uuid) -> Result<User> {
        let user = self
            .store
            .find_user(tx, user_id)
            .await?
            .ok_or(IdentityError::NotFound("user"))?;
        if user.inactive {
            return Err(IdentityError::Inactive);
        }
        Ok(user)
    }

    /// Upsert the credential, clearing any lockout. Caller commits.
    async fn replace_credential(
        &self,
        tx: &mut S::Tx,
        user_id: Uuid,
        cred_type: CredentialType,
        value: String,
    ) -> Result<()> {
        let now = Utc::now();
        let credential = match self
            .store
            .find_credential_for_update(tx, user_id, cred_type)
            .await?
        {
            Some(mut existing) => {
                if existing.blocked {
                    info!(user_id = %user_id, cred_type = %cred_type, "Credential unblocked by replacement");
                }
                existing.replace_value(value, now);
                existing
            }
            None => Credential::new(user_id, cred_type, value, now),
        };
        self.store.save_credential(tx, &credential).await
    }

    /// Load the credential to compare against. Refusals leave nothing to write.
    async fn checkable_credential(
        &self,
        tx: &mut S::Tx,
        user_id: Uuid,
        cred_type: CredentialType,
    ) -> Result<Credential> {
        self.active_user(tx, user_id).await?;
        let credential = self
            .store
            .find_credential_for_update(tx, user_id, cred_type)
            .await?
            .ok_or(IdentityError::NotFound("credential"))?;
        if credential.blocked {
            return Err(IdentityError::Blocked);
        }
        Ok(credential)
    }

    async fn check(&self, user_id: Uuid, cred_type: CredentialType, presented: &str) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let checked = self
            .checkable_credential(&mut tx, user_id, cred_type)
            .await
            .and_then(|credential| {
                self.verifier
                    .verify(cred_type, &credential.value, presented)
                    .map(|matched| (credential, matched))
            });
        let (mut credential, matched) = match checked {
            Ok(found) => found,
            Err(e) => {
                self.store.rollback(tx).await?;
                return Err(e);
            }
        };

        if matched {
            self.store.commit(tx).await?;
            return Ok(());
        }

        let blocked = credential.increment_invalid_attempt(
            self.policy.max_invalid_attempts,
            self.policy.invalid_attempt_window,
            Utc::now(),
        );
        self.store.save_credential(&mut tx, &credential).await?;
        self.store.commit(tx).await?;

        if blocked {
            warn!(
                user_id = %user_id,
                cred_type = %cred_type,
                attempts = credential.invalid_attempt_count,
                "Credential blocked after repeated failures"
            );
            metrics::record_lockout(cred_type.as_str());
            Err(IdentityError::Blocked)
        } else {
            debug!(
                user_id = %user_id,
                cred_type = %cred_type,
                attempts = credential.invalid_attempt_count,
                "Credential mismatch"
            );
            Err(IdentityError::Mismatch)
        }
    }
}

fn outcome_label(result: &Result<()>) -> &'static str {
    match result {
        Ok(()) => "valid",
        Err(IdentityError::Mismatch) => "mismatch",
        Err(IdentityError::Blocked) => "blocked",
        Err(IdentityError::Inactive) => "inactive",
        Err(IdentityError::NotFound(_)) => "not_found",
        Err(IdentityError::Timeout) => "timeout",
        Err(_) => "error",
    }
}

#[async_trait]
impl<S, V> CredentialValidator for LockoutTracker<S, V>
where
    S: UserRepository + CredentialRepository,
    V: CredentialVerifier,
{
    async fn validate_credential(
        &self,
        user_id: Uuid,
        cred_type: CredentialType,
        presented: &str,
    ) -> Result<()> {
        let result = with_deadline(
            self.timeout,
            "validate_credential",
            self.check(user_id, cred_type, presented),
        )
        .await;
        metrics::record_validation(cred_type.as_str(), outcome_label(&result));
        result
    }
}

#[async_trait]
impl<S, V> CredentialProvisioner for LockoutTracker<S, V>
where
    S: UserRepository + CredentialRepository,
    V: CredentialVerifier,
{
    async fn set_credential(
        &self,
        user_id: Uuid,
        cred_type: CredentialType,
        value: String,
    ) -> Result<()> {
        with_deadline(self.timeout, "set_credential", async {
            let mut tx = self.store.begin().await?;
            self.active_user(&mut tx, user_id).await?;
            self.replace_credential(&mut tx, user_id, cred_type, value)
                .await?;
            self.store.commit(tx).await?;
            info!(user_id = %user_id, cred_type = %cred_type, "Credential replaced");
            Ok(())
        })
        .await
    }

    async fn set_password(&self, user_id: Uuid, password: &str) -> Result<()> {
        let hashed = self.verifier.hash_password(password)?;
        self.set_credential(user_id, CredentialType::Password, hashed)
            .await
    }

    async fn generate_totp_secret(&self, user_id: Uuid, issuer: &str) -> Result<TotpEnrollment> {
        with_deadline(self.timeout, "generate_totp_secret", async {
            let mut tx = self.store.begin().await?;
            let user = self.active_user(&mut tx, user_id).await?;

            let enrollment = totp::enroll(issuer, &user.username, self.policy.totp_secret_length)?;
            self.replace_credential(
                &mut tx,
                user_id,
                CredentialType::Totp,
                enrollment.secret.clone(),
            )
            .await?;
            self.store.commit(tx).await?;

            info!(user_id = %user_id, "TOTP secret enrolled");
            Ok(enrollment)
        })
        .await
    }
}

#[async_trait]
impl<S, V> OneTimeCodes for LockoutTracker<S, V>
where
    S: UserRepository + CredentialRepository,
    V: CredentialVerifier,
{
    async fn generate_user_otp(&self, user_id: Uuid, length: usize) -> Result<String> {
        if length == 0 {
            return Err(IdentityError::Unsupported(
                "one-time code length 0".to_string(),
            ));
        }

        with_deadline(self.timeout, "generate_user_otp", async {
            let mut tx = self.store.begin().await?;
            self.active_user(&mut tx, user_id).await?;

            let code = crypto_core::random::random_code(true, length);
            let otp = UserOtp {
                id: Uuid::new_v4(),
                user_id,
                code_hash: crypto_core::hash::sha256_hex(&code),
                created_at: Utc::now(),
                consumed_at: None,
            };
            self.store.insert_user_otp(&mut tx, &otp).await?;
            self.store.commit(tx).await?;

            debug!(user_id = %user_id, otp_id = %otp.id, "Issued one-time code");
            Ok(code)
        })
        .await
    }

    async fn validate_user_otp(&self, user_id: Uuid, code: &str) -> Result<()> {
        with_deadline(self.timeout, "validate_user_otp", async {
            let mut tx = self.store.begin().await?;
            let code_hash = crypto_core::hash::sha256_hex(code);

            let now = Utc::now();
            let otp = match self
                .store
                .find_unconsumed_user_otp(&mut tx, user_id, &code_hash)
                .await?
            {
                Some(otp) if !otp.is_expired(self.policy.user_otp_ttl, now) => otp,
                found => {
                    self.store.rollback(tx).await?;
                    return Err(match found {
                        Some(_) => IdentityError::Expired("one-time code"),
                        None => IdentityError::NotFound("one-time code"),
                    });
                }
            };

            self.store.consume_user_otp(&mut tx, otp.id, now).await?;
            self.store.commit(tx).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Transactional};
    use mockall::predicate::eq;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn policy(max: u32) -> LockoutPolicy {
        LockoutPolicy {
            max_invalid_attempts: max,
            ..LockoutPolicy::default()
        }
    }

    async fn seeded_store(inactive: bool) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let mut user = User::new("alice");
        user.inactive = inactive;
        let user_id = user.id;
        store.insert_user(user).await;
        (store, user_id)
    }

    async fn stored_credential(store: &MemoryStore, user_id: Uuid, cred_type: CredentialType) -> Credential {
        let mut tx = store.begin().await.unwrap();
        store
            .find_credential_for_update(&mut tx, user_id, cred_type)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_password_leaves_state_untouched() {
        let (store, user_id) = seeded_store(false).await;
        let mut verifier = MockCredentialVerifier::new();
        verifier
            .expect_verify()
            .with(eq(CredentialType::Password), eq("stored"), eq("secret"))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let tracker = LockoutTracker::with_verifier(store.clone(), verifier, policy(3), TIMEOUT);
        tracker
            .set_credential(user_id, CredentialType::Password, "stored".to_string())
            .await
            .unwrap();

        tracker.validate_password(user_id, "secret").await.unwrap();
        let credential = stored_credential(&store, user_id, CredentialType::Password).await;
        assert_eq!(credential.invalid_attempt_count, 0);
        assert!(credential.first_invalid_attempt.is_none());
    }

    #[tokio::test]
    async fn test_mismatch_then_block() {
        let (store, user_id) = seeded_store(false).await;
        let mut verifier = MockCredentialVerifier::new();
        // The blocked attempt never reaches the verifier
        verifier.expect_verify().times(3).returning(|_, _, _| Ok(false));

        let tracker = LockoutTracker::with_verifier(store.clone(), verifier, policy(2), TIMEOUT);
        tracker
            .set_credential(user_id, CredentialType::Password, "stored".to_string())
            .await
            .unwrap();

        for _ in 0..2 {
            let err = tracker.validate_password(user_id, "nope").await.unwrap_err();
            assert!(matches!(err, IdentityError::Mismatch));
        }
        let err = tracker.validate_password(user_id, "nope").await.unwrap_err();
        assert!(matches!(err, IdentityError::Blocked));
        let err = tracker.validate_password(user_id, "nope").await.unwrap_err();
        assert!(matches!(err, IdentityError::Blocked));

        let credential = stored_credential(&store, user_id, CredentialType::Password).await;
        assert!(credential.blocked);
        assert_eq!(credential.invalid_attempt_count, 3);
    }

    #[tokio::test]
    async fn test_refused_check_leaves_store_usable() {
        let (store, user_id) = seeded_store(false).await;
        let mut verifier = MockCredentialVerifier::new();
        verifier.expect_verify().times(1).returning(|_, _, _| Ok(false));

        let tracker = LockoutTracker::with_verifier(store.clone(), verifier, policy(0), TIMEOUT);
        tracker
            .set_credential(user_id, CredentialType::Password, "stored".to_string())
            .await
            .unwrap();

        let err = tracker.validate_password(user_id, "nope").await.unwrap_err();
        assert!(matches!(err, IdentityError::Blocked));
        let err = tracker.validate_password(user_id, "nope").await.unwrap_err();
        assert!(matches!(err, IdentityError::Blocked));
        let err = tracker.validate_totp(user_id, "000000").await.unwrap_err();
        assert!(err.is_not_found());

        // Replacing the value still gets the store after the refusals above
        tracker
            .set_credential(user_id, CredentialType::Password, "fresh".to_string())
            .await
            .unwrap();
        assert!(!stored_credential(&store, user_id, CredentialType::Password).await.blocked);
    }

    #[tokio::test]
    async fn test_verifier_error_does_not_count() {
        let (store, user_id) = seeded_store(false).await;
        let mut verifier = MockCredentialVerifier::new();
        verifier
            .expect_verify()
            .returning(|_, _, _| Err(IdentityError::Internal("bad hash".to_string())));

        let tracker = LockoutTracker::with_verifier(store.clone(), verifier, policy(0), TIMEOUT);
        tracker
            .set_credential(user_id, CredentialType::Password, "garbage".to_string())
            .await
            .unwrap();

        let err = tracker.validate_password(user_id, "x").await.unwrap_err();
        assert!(matches!(err, IdentityError::Internal(_)));
        let credential = stored_credential(&store, user_id, CredentialType::Password).await;
        assert!(!credential.blocked);
    }

    #[tokio::test]
    async fn test_set_password_uses_verifier_hash() {
        let (store, user_id) = seeded_store(false).await;
        let mut verifier = MockCredentialVerifier::new();
        verifier
            .expect_hash_password()
            .with(eq("hunter2"))
            .returning(|_| Ok("hashed:hunter2".to_string()));

        let tracker = LockoutTracker::with_verifier(store.clone(), verifier, policy(3), TIMEOUT);
        tracker.set_password(user_id, "hunter2").await.unwrap();

        let credential = stored_credential(&store, user_id, CredentialType::Password).await;
        assert_eq!(credential.value, "hashed:hunter2");
    }

    #[tokio::test]
    async fn test_inactive_user_rejected_before_lookup() {
        let (store, user_id) = seeded_store(true).await;
        let verifier = MockCredentialVerifier::new();
        let tracker = LockoutTracker::with_verifier(store, verifier, policy(3), TIMEOUT);

        let err = tracker.validate_password(user_id, "x").await.unwrap_err();
        assert!(matches!(err, IdentityError::Inactive));
        let err = tracker
            .set_credential(user_id, CredentialType::Password, "v".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Inactive));
    }

    #[tokio::test]
    async fn test_missing_user_and_credential() {
        let (store, user_id) = seeded_store(false).await;
        let tracker =
            LockoutTracker::with_verifier(store, MockCredentialVerifier::new(), policy(3), TIMEOUT);

        let err = tracker.validate_password(Uuid::new_v4(), "x").await.unwrap_err();
        assert!(matches!(err, IdentityError::NotFound("user")));
        let err = tracker.validate_totp(user_id, "123456").await.unwrap_err();
        assert!(matches!(err, IdentityError::NotFound("credential")));
    }

    #[tokio::test]
    async fn test_totp_enrollment_round_trip() {
        let (store, user_id) = seeded_store(false).await;
        let tracker = LockoutTracker::new(store.clone(), policy(3), TIMEOUT);

        let enrollment = tracker.generate_totp_secret(user_id, "Acme").await.unwrap();
        assert!(enrollment.provisioning_uri.contains("Acme:alice"));

        let credential = stored_credential(&store, user_id, CredentialType::Totp).await;
        assert_eq!(credential.value, enrollment.secret);

        let now = u64::try_from(Utc::now().timestamp()).unwrap();
        let code = totp::current_code(&enrollment.secret, now).unwrap();
        tracker.validate_totp(user_id, &code).await.unwrap();
    }

    #[tokio::test]
    async fn test_user_otp_is_single_use() {
        let (store, user_id) = seeded_store(false).await;
        let tracker =
            LockoutTracker::with_verifier(store, MockCredentialVerifier::new(), policy(3), TIMEOUT);

        let code = tracker.generate_user_otp(user_id, 6).await.unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        tracker.validate_user_otp(user_id, &code).await.unwrap();
        let err = tracker.validate_user_otp(user_id, &code).await.unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_user_otp_expires() {
        let (store, user_id) = seeded_store(false).await;
        let expired_policy = LockoutPolicy {
            user_otp_ttl: chrono::Duration::seconds(-1),
            ..policy(3)
        };
        let tracker = LockoutTracker::with_verifier(
            store,
            MockCredentialVerifier::new(),
            expired_policy,
            TIMEOUT,
        );

        let code = tracker.generate_user_otp(user_id, 8).await.unwrap();
        let err = tracker.validate_user_otp(user_id, &code).await.unwrap_err();
        assert!(matches!(err, IdentityError::Expired(_)));
    }

    #[tokio::test]
    async fn test_zero_length_otp_rejected() {
        let (store, user_id) = seeded_store(false).await;
        let tracker =
            LockoutTracker::with_verifier(store, MockCredentialVerifier::new(), policy(3), TIMEOUT);
        let err = tracker.generate_user_otp(user_id, 0).await.unwrap_err();
        assert!(matches!(err, IdentityError::Unsupported(_)));
    }
}
