/// Credential lockout integration tests
/// Covers the block threshold, window expiry, unblocking by replacement,
/// and concurrent failures against one credential
mod common;

use chrono::Duration as ChronoDuration;
use common::{seed_user, tracker, TIMEOUT};
use identity_store::db::{CredentialRepository, Transactional};
use identity_store::models::CredentialType;
use identity_store::{
    CredentialProvisioner, CredentialValidator, IdentityError, LockoutPolicy, LockoutTracker,
    MemoryStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn policy(max: u32, window: ChronoDuration) -> LockoutPolicy {
    LockoutPolicy {
        max_invalid_attempts: max,
        invalid_attempt_window: window,
        ..LockoutPolicy::default()
    }
}

#[tokio::test]
async fn test_block_after_threshold() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "alice").await;
    let tracker = tracker(store, policy(3, ChronoDuration::minutes(15)));
    assert_ok!(tracker.set_password(user_id, "correct horse").await);

    for _ in 0..3 {
        let err = assert_err!(tracker.validate_password(user_id, "wrong").await);
        assert!(matches!(err, IdentityError::Mismatch));
    }

    let err = assert_err!(tracker.validate_password(user_id, "wrong").await);
    assert!(matches!(err, IdentityError::Blocked));

    // Correct value no longer helps
    let err = assert_err!(tracker.validate_password(user_id, "correct horse").await);
    assert!(matches!(err, IdentityError::Blocked));
}

#[tokio::test]
async fn test_zero_threshold_blocks_on_first_failure() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "alice").await;
    let tracker = tracker(store, policy(0, ChronoDuration::minutes(15)));
    assert_ok!(tracker.set_password(user_id, "pw").await);

    let err = assert_err!(tracker.validate_password(user_id, "nope").await);
    assert!(matches!(err, IdentityError::Blocked));
}

#[tokio::test]
async fn test_lapsed_window_restarts_count() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "alice").await;
    let tracker = tracker(store, policy(1, ChronoDuration::milliseconds(50)));
    assert_ok!(tracker.set_password(user_id, "pw").await);

    // Each failure lands after the previous window, so the count never passes 1
    for _ in 0..4 {
        let err = assert_err!(tracker.validate_password(user_id, "nope").await);
        assert!(matches!(err, IdentityError::Mismatch));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_ok!(tracker.validate_password(user_id, "pw").await);
}

#[tokio::test]
async fn test_replacement_unblocks() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "alice").await;
    let tracker = tracker(store, policy(1, ChronoDuration::minutes(15)));
    assert_ok!(tracker.set_password(user_id, "old").await);

    assert_err!(tracker.validate_password(user_id, "x").await);
    let err = assert_err!(tracker.validate_password(user_id, "x").await);
    assert!(matches!(err, IdentityError::Blocked));

    assert_ok!(
        tracker
            .set_credential(user_id, CredentialType::Password, "new".to_string())
            .await
    );
    assert_ok!(tracker.validate_password(user_id, "new").await);

    // The counter started over too
    let err = assert_err!(tracker.validate_password(user_id, "x").await);
    assert!(matches!(err, IdentityError::Mismatch));
}

#[tokio::test]
async fn test_password_and_totp_tracked_separately() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "alice").await;
    let tracker = tracker(store, policy(0, ChronoDuration::minutes(15)));
    assert_ok!(tracker.set_password(user_id, "pw").await);
    assert_ok!(
        tracker
            .set_credential(user_id, CredentialType::Totp, "123456".to_string())
            .await
    );

    let err = assert_err!(tracker.validate_totp(user_id, "000000").await);
    assert!(matches!(err, IdentityError::Blocked));
    assert_ok!(tracker.validate_password(user_id, "pw").await);
}

#[tokio::test]
async fn test_totp_reenrollment_unblocks() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "alice").await;
    let tracker = tracker(store, policy(0, ChronoDuration::minutes(15)));

    let first = assert_ok!(tracker.generate_totp_secret(user_id, "Acme").await);
    let err = assert_err!(tracker.validate_totp(user_id, "not-the-secret").await);
    assert!(matches!(err, IdentityError::Blocked));

    let second = assert_ok!(tracker.generate_totp_secret(user_id, "Acme").await);
    assert_ne!(first.secret, second.secret);
    assert!(second.qr_svg.contains("<svg"));

    // PlainVerifier compares against the stored secret itself
    assert_ok!(tracker.validate_totp(user_id, &second.secret).await);
}

#[tokio::test]
async fn test_argon2_password_round_trip() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "bob").await;
    let tracker = LockoutTracker::new(store, LockoutPolicy::default(), TIMEOUT);

    assert_ok!(tracker.set_password(user_id, "S3cure!passphrase").await);
    assert_ok!(tracker.validate_password(user_id, "S3cure!passphrase").await);

    let err = assert_err!(tracker.validate_password(user_id, "s3cure!passphrase").await);
    assert!(matches!(err, IdentityError::Mismatch));
}

#[tokio::test]
async fn test_unbounded_window_keeps_counting() {
    let store = MemoryStore::new();
    let user_id = seed_user(&store, "heidi").await;
    let tracker = tracker(store, policy(2, ChronoDuration::MAX));
    assert_ok!(tracker.set_password(user_id, "right").await);

    for _ in 0..2 {
        let err = assert_err!(tracker.validate_password(user_id, "wrong").await);
        assert!(matches!(err, IdentityError::Mismatch));
    }
    let err = assert_err!(tracker.validate_password(user_id, "wrong").await);
    assert!(matches!(err, IdentityError::Blocked));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_block_exactly_once() {
    const MAX: u32 = 3;
    const ATTEMPTS: usize = 8;

    let store = MemoryStore::new();
    let user_id = seed_user(&store, "ivan").await;
    let tracker = Arc::new(tracker(store.clone(), policy(MAX, ChronoDuration::minutes(15))));
    assert_ok!(tracker.set_password(user_id, "right").await);

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.validate_password(user_id, "wrong").await })
        })
        .collect();

    let mut mismatches = 0;
    let mut blocked = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Err(IdentityError::Mismatch) => mismatches += 1,
            Err(IdentityError::Blocked) => blocked += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(mismatches, MAX);
    assert_eq!(blocked, ATTEMPTS as u32 - MAX);

    // Refusals after the block do not count
    let mut tx = assert_ok!(store.begin().await);
    let credential = assert_ok!(
        store
            .find_credential_for_update(&mut tx, user_id, CredentialType::Password)
            .await
    )
    .unwrap();
    assert!(credential.blocked);
    assert_eq!(credential.invalid_attempt_count, (MAX + 1) as i32);
}
