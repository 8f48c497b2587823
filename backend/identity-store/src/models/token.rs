use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

/// The three token kinds a record tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    AuthorizationCode,
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    pub const ALL: [TokenKind; 3] = [
        TokenKind::AuthorizationCode,
        TokenKind::AccessToken,
        TokenKind::RefreshToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::AuthorizationCode => "authorization_code",
            TokenKind::AccessToken => "access_token",
            TokenKind::RefreshToken => "refresh_token",
        }
    }

    /// Human form used in error messages
    pub fn noun(&self) -> &'static str {
        match self {
            TokenKind::AuthorizationCode => "authorization code",
            TokenKind::AccessToken => "access token",
            TokenKind::RefreshToken => "refresh token",
        }
    }

    /// Column prefix in the tokens table
    pub(crate) fn column(&self) -> &'static str {
        match self {
            TokenKind::AuthorizationCode => "ac",
            TokenKind::AccessToken => "at",
            TokenKind::RefreshToken => "rt",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            TokenKind::AuthorizationCode => 1,
            TokenKind::AccessToken => 2,
            TokenKind::RefreshToken => 4,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which expiries an invalidation moves to the past.
///
/// Wire values: authorization code = 1, access token = 2, refresh token = 4.
/// Unknown bits are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvalidationMask(u8);

impl InvalidationMask {
    pub const NONE: InvalidationMask = InvalidationMask(0);
    pub const AUTHORIZATION_CODE: InvalidationMask = InvalidationMask(1);
    pub const ACCESS_TOKEN: InvalidationMask = InvalidationMask(2);
    pub const REFRESH_TOKEN: InvalidationMask = InvalidationMask(4);
    pub const ALL: InvalidationMask = InvalidationMask(7);

    pub fn from_bits_truncate(bits: u8) -> Self {
        InvalidationMask(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, kind: TokenKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<TokenKind> for InvalidationMask {
    fn from(kind: TokenKind) -> Self {
        InvalidationMask(kind.bit())
    }
}

impl BitOr for InvalidationMask {
    type Output = InvalidationMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        InvalidationMask(self.0 | rhs.0)
    }
}

/// A signature issued for one token kind, with its optional expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSignature {
    pub kind: TokenKind,
    pub signature: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSignature {
    pub fn new(kind: TokenKind, signature: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            kind,
            signature: signature.into(),
            expires_at,
        }
    }
}

/// Attributes of the authorization request a token was issued for.
///
/// Stored as one flat JSON object of strings. Known attributes get typed
/// fields; anything else lands in `extensions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, String>,
}

impl RequestProfile {
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignaturePair {
    pub signature: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Everything stored for one authorization request.
/// Never deleted on invalidation; only the targeted expiry moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub request_id: String,
    pub authorization_code: SignaturePair,
    pub access_token: SignaturePair,
    pub refresh_token: SignaturePair,
    pub profile: RequestProfile,
}

impl TokenRecord {
    /// Build a record from issued signatures. Later entries of the same kind
    /// win; an empty signature string leaves the pair unset.
    pub fn new(request_id: impl Into<String>, signatures: &[TokenSignature], profile: RequestProfile) -> Self {
        let mut record = Self {
            request_id: request_id.into(),
            authorization_code: SignaturePair::default(),
            access_token: SignaturePair::default(),
            refresh_token: SignaturePair::default(),
            profile,
        };
        for entry in signatures {
            let pair = record.pair_mut(entry.kind);
            if entry.signature.is_empty() {
                *pair = SignaturePair::default();
            } else {
                *pair = SignaturePair {
                    signature: Some(entry.signature.clone()),
                    expires_at: entry.expires_at,
                };
            }
        }
        record
    }

    pub fn pair(&self, kind: TokenKind) -> &SignaturePair {
        match kind {
            TokenKind::AuthorizationCode => &self.authorization_code,
            TokenKind::AccessToken => &self.access_token,
            TokenKind::RefreshToken => &self.refresh_token,
        }
    }

    pub fn pair_mut(&mut self, kind: TokenKind) -> &mut SignaturePair {
        match kind {
            TokenKind::AuthorizationCode => &mut self.authorization_code,
            TokenKind::AccessToken => &mut self.access_token,
            TokenKind::RefreshToken => &mut self.refresh_token,
        }
    }

    /// Set every expiry selected by `mask` to `at`, leaving signatures alone
    pub fn expire(&mut self, mask: InvalidationMask, at: DateTime<Utc>) {
        for kind in TokenKind::ALL {
            if mask.contains(kind) {
                self.pair_mut(kind).expires_at = Some(at);
            }
        }
    }
}

/// Result of a signature lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLookup {
    pub request_id: String,
    pub profile: RequestProfile,
}

/// Client-assertion JWT id recorded to reject replays
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Assertion {
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}
