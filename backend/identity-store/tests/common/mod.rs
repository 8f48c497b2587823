//! Shared fixtures for the integration tests
#![allow(dead_code)]

use identity_store::error::Result;
use identity_store::models::{CredentialType, User};
use identity_store::services::CredentialVerifier;
use identity_store::{ChannelManager, LockoutPolicy, LockoutTracker, MemoryStore, TokenStore};
use std::time::Duration;
use uuid::Uuid;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Stores values as given and compares them byte for byte
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainVerifier;

impl CredentialVerifier for PlainVerifier {
    fn verify(&self, _cred_type: CredentialType, stored: &str, presented: &str) -> Result<bool> {
        Ok(stored == presented)
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        Ok(password.to_string())
    }
}

/// Add an active user and return its id
pub async fn seed_user(store: &MemoryStore, username: &str) -> Uuid {
    let user = User::new(username);
    let id = user.id;
    store.insert_user(user).await;
    id
}

pub fn tracker(store: MemoryStore, policy: LockoutPolicy) -> LockoutTracker<MemoryStore, PlainVerifier> {
    LockoutTracker::with_verifier(store, PlainVerifier, policy, TIMEOUT)
}

pub fn channels(store: MemoryStore) -> ChannelManager<MemoryStore> {
    ChannelManager::new(store, Duration::ZERO, TIMEOUT)
}

pub fn tokens(store: MemoryStore) -> TokenStore<MemoryStore> {
    TokenStore::new(store, TIMEOUT)
}
