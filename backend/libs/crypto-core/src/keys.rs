//! Signing key material for key channels
//!
//! Every channel algorithm maps to one fixed key shape:
//!
//! | algorithm | key         |
//! |-----------|-------------|
//! | RS256     | RSA 1024    |
//! | RS384     | RSA 2048    |
//! | RS512     | RSA 4096    |
//! | PS256     | EC P-256    |
//! | PS384     | EC P-384    |
//! | PS512     | EC P-521    |
//!
//! Private keys are persisted as PKCS#8 DER. The public half is derived on
//! demand and published as a JWK.
use crate::{CryptoError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk, KeyAlgorithm, PublicKeyUse, RSAKeyParameters, RSAKeyType,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use std::fmt;
use std::str::FromStr;

/// Algorithms a key channel can be created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

/// Shape of the private key generated for an algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    Rsa { bits: usize },
    Ec(EcCurve),
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::RS256 => "RS256",
            SigningAlgorithm::RS384 => "RS384",
            SigningAlgorithm::RS512 => "RS512",
            SigningAlgorithm::PS256 => "PS256",
            SigningAlgorithm::PS384 => "PS384",
            SigningAlgorithm::PS512 => "PS512",
        }
    }

    pub fn key_spec(&self) -> KeySpec {
        match self {
            SigningAlgorithm::RS256 => KeySpec::Rsa { bits: 1024 },
            SigningAlgorithm::RS384 => KeySpec::Rsa { bits: 2048 },
            SigningAlgorithm::RS512 => KeySpec::Rsa { bits: 4096 },
            SigningAlgorithm::PS256 => KeySpec::Ec(EcCurve::P256),
            SigningAlgorithm::PS384 => KeySpec::Ec(EcCurve::P384),
            SigningAlgorithm::PS512 => KeySpec::Ec(EcCurve::P521),
        }
    }

    fn jwk_algorithm(&self) -> KeyAlgorithm {
        match self {
            SigningAlgorithm::RS256 => KeyAlgorithm::RS256,
            SigningAlgorithm::RS384 => KeyAlgorithm::RS384,
            SigningAlgorithm::RS512 => KeyAlgorithm::RS512,
            SigningAlgorithm::PS256 => KeyAlgorithm::PS256,
            SigningAlgorithm::PS384 => KeyAlgorithm::PS384,
            SigningAlgorithm::PS512 => KeyAlgorithm::PS512,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RS256" => Ok(SigningAlgorithm::RS256),
            "RS384" => Ok(SigningAlgorithm::RS384),
            "RS512" => Ok(SigningAlgorithm::RS512),
            "PS256" => Ok(SigningAlgorithm::PS256),
            "PS384" => Ok(SigningAlgorithm::PS384),
            "PS512" => Ok(SigningAlgorithm::PS512),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Generate a fresh private key for `algorithm`, PKCS#8 DER encoded
pub fn generate_private_key(algorithm: SigningAlgorithm) -> Result<Vec<u8>> {
    let document = match algorithm.key_spec() {
        KeySpec::Rsa { bits } => RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?
            .to_pkcs8_der(),
        KeySpec::Ec(EcCurve::P256) => p256::SecretKey::random(&mut OsRng).to_pkcs8_der(),
        KeySpec::Ec(EcCurve::P384) => p384::SecretKey::random(&mut OsRng).to_pkcs8_der(),
        KeySpec::Ec(EcCurve::P521) => p521::SecretKey::random(&mut OsRng).to_pkcs8_der(),
    }
    .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    tracing::debug!(algorithm = %algorithm, "Generated signing key");
    Ok(document.as_bytes().to_vec())
}

// ============================================================================
// Publication
// ============================================================================

/// Derive the public JWK for a stored private key.
///
/// `key_use` is the channel's use tag (`sig`, `enc`, or anything else, which
/// is carried through verbatim).
pub fn public_jwk(
    algorithm: SigningAlgorithm,
    key_id: &str,
    key_use: &str,
    private_key_der: &[u8],
) -> Result<Jwk> {
    let parameters = match algorithm.key_spec() {
        KeySpec::Rsa { .. } => {
            let key = RsaPrivateKey::from_pkcs8_der(private_key_der)
                .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
            AlgorithmParameters::RSA(RSAKeyParameters {
                key_type: RSAKeyType::RSA,
                n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
            })
        }
        KeySpec::Ec(EcCurve::P256) => {
            let key = p256::SecretKey::from_pkcs8_der(private_key_der)
                .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
            let point = key.public_key().to_encoded_point(false);
            ec_parameters(EllipticCurve::P256, point.x(), point.y())?
        }
        KeySpec::Ec(EcCurve::P384) => {
            let key = p384::SecretKey::from_pkcs8_der(private_key_der)
                .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
            let point = key.public_key().to_encoded_point(false);
            ec_parameters(EllipticCurve::P384, point.x(), point.y())?
        }
        KeySpec::Ec(EcCurve::P521) => {
            let key = p521::SecretKey::from_pkcs8_der(private_key_der)
                .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
            let point = key.public_key().to_encoded_point(false);
            ec_parameters(EllipticCurve::P521, point.x(), point.y())?
        }
    };

    Ok(Jwk {
        common: CommonParameters {
            public_key_use: Some(public_key_use(key_use)),
            key_algorithm: Some(algorithm.jwk_algorithm()),
            key_id: Some(key_id.to_string()),
            ..Default::default()
        },
        algorithm: parameters,
    })
}

fn ec_parameters<B: AsRef<[u8]>>(
    curve: EllipticCurve,
    x: Option<&B>,
    y: Option<&B>,
) -> Result<AlgorithmParameters> {
    match (x, y) {
        (Some(x), Some(y)) => Ok(AlgorithmParameters::EllipticCurve(
            EllipticCurveKeyParameters {
                key_type: EllipticCurveKeyType::EC,
                curve,
                x: URL_SAFE_NO_PAD.encode(x.as_ref()),
                y: URL_SAFE_NO_PAD.encode(y.as_ref()),
            },
        )),
        _ => Err(CryptoError::InvalidKeyMaterial(
            "public point is the identity".to_string(),
        )),
    }
}

fn public_key_use(key_use: &str) -> PublicKeyUse {
    match key_use {
        "sig" => PublicKeyUse::Signature,
        "enc" => PublicKeyUse::Encryption,
        other => PublicKeyUse::Other(other.to_string()),
    }
}
