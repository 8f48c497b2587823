/// Identity Store Library
///
/// Security-state persistence for the identity provider.
///
/// ## Modules
///
/// - `config`: Environment configuration
/// - `db`: Repository traits with PostgreSQL and in-memory backends
/// - `error`: Error types
/// - `metrics`: Prometheus counters
/// - `models`: Users, credentials, signing-key channels, token records
/// - `security`: Password hashing and TOTP
/// - `services`: Lockout tracking, key rotation, token records
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod security;
pub mod services;

// Re-export commonly used types
pub use db::{MemoryStore, PgStore};
pub use error::{IdentityError, Result};
pub use services::{
    AssertionReplayGuard, ChannelManager, CredentialProvisioner, CredentialValidator,
    LockoutPolicy, LockoutTracker, OneTimeCodes, SigningKeyLifecycle, SigningKeyLookup,
    TokenProfileStore, TokenStore,
};
