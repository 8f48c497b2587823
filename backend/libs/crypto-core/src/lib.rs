//! Shared cryptographic primitives for the identity store.
//!
//! - `keys`: asymmetric signing key generation and JWK derivation
//! - `hash`: SHA-256 helpers for one-time secrets
//! - `random`: OS-backed random bytes and codes

pub mod hash;
pub mod keys;
pub mod random;

pub use keys::{generate_private_key, public_jwk, EcCurve, KeySpec, SigningAlgorithm};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("algorithm {0} is not supported")]
    UnsupportedAlgorithm(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
