use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Credential kind, matching database credential_type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "credential_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Password,
    Totp,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Password => "password",
            CredentialType::Totp => "totp",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One secret a user authenticates with, plus its failed-attempt state.
///
/// `blocked` only ever goes from false to true inside
/// [`Credential::increment_invalid_attempt`], and back to false when the value
/// is replaced. A lapsed window resets the counter, never the flag.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cred_type: CredentialType,
    /// Argon2 PHC string for passwords, base32 shared secret for TOTP
    #[serde(skip_serializing)]
    pub value: String,
    pub first_invalid_attempt: Option<DateTime<Utc>>,
    pub invalid_attempt_count: i32,
    pub blocked: bool,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(user_id: Uuid, cred_type: CredentialType, value: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            cred_type,
            value,
            first_invalid_attempt: None,
            invalid_attempt_count: 0,
            blocked: false,
            updated_at: now,
        }
    }

    /// Count one failed attempt and return whether the credential is now blocked.
    ///
    /// The tracking window restarts lazily: a failure arriving after
    /// `first_invalid_attempt + window` starts a new epoch with a count of 1.
    /// With `max_allowed == 0` the first failure blocks.
    pub fn increment_invalid_attempt(
        &mut self,
        max_allowed: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        if self.blocked {
            return true;
        }

        let window_lapsed = match self.first_invalid_attempt {
            None => true,
            // A window too large to represent never lapses
            Some(first) => first
                .checked_add_signed(window)
                .map_or(false, |end| end < now),
        };

        if window_lapsed {
            self.first_invalid_attempt = Some(now);
            self.invalid_attempt_count = 1;
            if max_allowed == 0 {
                self.blocked = true;
            }
        } else {
            self.invalid_attempt_count = self.invalid_attempt_count.saturating_add(1);
            if i64::from(self.invalid_attempt_count) > i64::from(max_allowed) {
                self.blocked = true;
            }
        }

        self.updated_at = now;
        self.blocked
    }

    /// Install a new value and clear all lockout state
    pub fn replace_value(&mut self, value: String, now: DateTime<Utc>) {
        self.value = value;
        self.first_invalid_attempt = None;
        self.invalid_attempt_count = 0;
        self.blocked = false;
        self.updated_at = now;
    }
}
