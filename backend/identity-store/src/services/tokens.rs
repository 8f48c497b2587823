//! Token Record Store
//!
//! One record per authorization request. Each of the three token kinds can
//! be revoked on its own by moving its expiry into the past; records are
//! never deleted here.

use super::{with_deadline, AssertionReplayGuard, TokenProfileStore};
use crate::db::TokenRepository;
use crate::error::{IdentityError, Result};
use crate::metrics;
use crate::models::{
    Assertion, InvalidationMask, ProfileLookup, RequestProfile, TokenKind, TokenRecord,
    TokenSignature,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct TokenStore<S> {
    store: S,
    timeout: Duration,
}

impl<S> TokenStore<S>
where
    S: TokenRepository,
{
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn lookup(&self, kind: TokenKind, signature: &str) -> Result<ProfileLookup> {
        let mut tx = self.store.begin().await?;
        let record = self
            .store
            .find_token_by_signature(&mut tx, kind, signature)
            .await?;
        self.store.commit(tx).await?;

        let record = record.ok_or(IdentityError::NotFound(kind.noun()))?;

        if let Some(expires_at) = record.pair(kind).expires_at {
            if expires_at < Utc::now() {
                return Err(IdentityError::Expired(kind.noun()));
            }
        }

        Ok(ProfileLookup {
            request_id: record.request_id,
            profile: record.profile,
        })
    }
}

fn lookup_outcome(result: &Result<ProfileLookup>) -> &'static str {
    match result {
        Ok(_) => "found",
        Err(IdentityError::NotFound(_)) => "not_found",
        Err(IdentityError::Expired(_)) => "expired",
        Err(_) => "error",
    }
}

#[async_trait]
impl<S> TokenProfileStore for TokenStore<S>
where
    S: TokenRepository,
{
    async fn store_token_profile(
        &self,
        request_id: &str,
        signatures: &[TokenSignature],
        profile: RequestProfile,
    ) -> Result<()> {
        let record = TokenRecord::new(request_id, signatures, profile);

        with_deadline(self.timeout, "store_token_profile", async {
            let mut tx = self.store.begin().await?;
            self.store.upsert_token(&mut tx, &record).await?;
            self.store.commit(tx).await?;
            debug!(request_id = %request_id, signatures = signatures.len(), "Token profile stored");
            Ok(())
        })
        .await
    }

    async fn get_profile_by_signature(
        &self,
        kind: TokenKind,
        signature: &str,
    ) -> Result<ProfileLookup> {
        let result = with_deadline(
            self.timeout,
            "get_profile_by_signature",
            self.lookup(kind, signature),
        )
        .await;
        metrics::record_token_lookup(kind.as_str(), lookup_outcome(&result));
        result
    }

    async fn invalidate_with_request_id(
        &self,
        request_id: &str,
        mask: InvalidationMask,
    ) -> Result<()> {
        with_deadline(self.timeout, "invalidate_with_request_id", async {
            let at = Utc::now() - chrono::Duration::seconds(1);
            let mut tx = self.store.begin().await?;
            if !self.store.expire_token(&mut tx, request_id, mask, at).await? {
                self.store.rollback(tx).await?;
                return Err(IdentityError::NotFound("token record"));
            }
            self.store.commit(tx).await?;
            info!(request_id = %request_id, mask = mask.bits(), "Token record invalidated");
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl<S> AssertionReplayGuard for TokenStore<S>
where
    S: TokenRepository,
{
    async fn record_assertion(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()> {
        with_deadline(self.timeout, "record_assertion", async {
            let assertion = Assertion {
                jti: jti.to_string(),
                expires_at,
            };
            let mut tx = self.store.begin().await?;
            if !self
                .store
                .record_assertion(&mut tx, &assertion, Utc::now())
                .await?
            {
                self.store.rollback(tx).await?;
                warn!(jti = %jti, "Client assertion replayed");
                return Err(IdentityError::Conflict(format!("assertion {} already used", jti)));
            }
            self.store.commit(tx).await?;
            Ok(())
        })
        .await
    }

    async fn purge_expired_assertions(&self) -> Result<u64> {
        with_deadline(self.timeout, "purge_expired_assertions", async {
            let mut tx = self.store.begin().await?;
            let purged = self
                .store
                .delete_expired_assertions(&mut tx, Utc::now())
                .await?;
            self.store.commit(tx).await?;
            debug!(purged = purged, "Expired assertions purged");
            Ok(purged)
        })
        .await
    }
}
