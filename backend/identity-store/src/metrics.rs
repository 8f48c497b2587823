//! Prometheus metrics for the identity store
//!
//! Tracks credential validation outcomes, lockouts, key rotations and token lookups

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Credential validations by type and outcome (valid/mismatch/blocked/...)
static CREDENTIAL_VALIDATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_credential_validations_total",
        "Credential validations by credential type and outcome",
        &["cred_type", "outcome"]
    )
    .expect("failed to register identity_credential_validations_total")
});

/// Credentials that crossed the failed-attempt threshold
static CREDENTIAL_LOCKOUTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_credential_lockouts_total",
        "Credentials blocked after too many failed attempts",
        &["cred_type"]
    )
    .expect("failed to register identity_credential_lockouts_total")
});

static KEY_ROTATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_key_rotations_total",
        "Signing key rotations by algorithm",
        &["algorithm"]
    )
    .expect("failed to register identity_key_rotations_total")
});

static TOKEN_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_token_lookups_total",
        "Token profile lookups by token kind and outcome",
        &["kind", "outcome"]
    )
    .expect("failed to register identity_token_lookups_total")
});

static OPERATION_TIMEOUTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_operation_timeouts_total",
        "Store operations abandoned at their deadline",
        &["operation"]
    )
    .expect("failed to register identity_operation_timeouts_total")
});

pub fn record_validation(cred_type: &str, outcome: &str) {
    CREDENTIAL_VALIDATIONS_TOTAL
        .with_label_values(&[cred_type, outcome])
        .inc();
}

pub fn record_lockout(cred_type: &str) {
    CREDENTIAL_LOCKOUTS_TOTAL
        .with_label_values(&[cred_type])
        .inc();
}

pub fn record_rotation(algorithm: &str) {
    KEY_ROTATIONS_TOTAL.with_label_values(&[algorithm]).inc();
}

pub fn record_token_lookup(kind: &str, outcome: &str) {
    TOKEN_LOOKUPS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_timeout(operation: &str) {
    OPERATION_TIMEOUTS_TOTAL.with_label_values(&[operation]).inc();
}
