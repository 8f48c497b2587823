/// Token record integration tests
/// Covers storage, per-kind lookups, selective invalidation and assertion replay
mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::tokens;
use identity_store::models::{InvalidationMask, RequestProfile, TokenKind, TokenSignature};
use identity_store::{AssertionReplayGuard, IdentityError, MemoryStore, TokenProfileStore};
use tokio_test::{assert_err, assert_ok};

fn full_signatures(expiry: chrono::DateTime<Utc>) -> Vec<TokenSignature> {
    vec![
        TokenSignature::new(TokenKind::AuthorizationCode, "ac-sig", Some(expiry)),
        TokenSignature::new(TokenKind::AccessToken, "at-sig", Some(expiry)),
        TokenSignature::new(TokenKind::RefreshToken, "rt-sig", Some(expiry)),
    ]
}

#[tokio::test]
async fn test_profile_round_trip_through_every_kind() {
    let store = tokens(MemoryStore::new());
    let profile: RequestProfile = serde_json::from_str(r#"{"key":"value"}"#).unwrap();
    let expiry = Utc::now() + ChronoDuration::hours(1);

    assert_ok!(
        store
            .store_token_profile("req-1", &full_signatures(expiry), profile.clone())
            .await
    );

    for found in [
        assert_ok!(store.get_profile_by_auth_code_signature("ac-sig").await),
        assert_ok!(store.get_profile_by_access_token_signature("at-sig").await),
        assert_ok!(store.get_profile_by_refresh_token_signature("rt-sig").await),
    ] {
        assert_eq!(found.request_id, "req-1");
        assert_eq!(found.profile, profile);
        assert_eq!(found.profile.extensions.get("key").map(String::as_str), Some("value"));
    }
}

#[tokio::test]
async fn test_signature_is_scoped_to_its_kind() {
    let store = tokens(MemoryStore::new());
    let expiry = Utc::now() + ChronoDuration::hours(1);
    assert_ok!(
        store
            .store_token_profile("req-1", &full_signatures(expiry), RequestProfile::default())
            .await
    );

    let err = assert_err!(store.get_profile_by_access_token_signature("ac-sig").await);
    assert!(matches!(err, IdentityError::NotFound(_)));
}

#[tokio::test]
async fn test_invalidate_single_kind() {
    let store = tokens(MemoryStore::new());
    let expiry = Utc::now() + ChronoDuration::hours(1);
    assert_ok!(
        store
            .store_token_profile("req-1", &full_signatures(expiry), RequestProfile::default())
            .await
    );

    assert_ok!(
        store
            .invalidate_with_request_id("req-1", InvalidationMask::AUTHORIZATION_CODE)
            .await
    );

    let err = assert_err!(store.get_profile_by_auth_code_signature("ac-sig").await);
    assert!(matches!(err, IdentityError::Expired(_)));
    assert_ok!(store.get_profile_by_access_token_signature("at-sig").await);
    assert_ok!(store.get_profile_by_refresh_token_signature("rt-sig").await);
}

#[tokio::test]
async fn test_invalidate_combined_mask() {
    let store = tokens(MemoryStore::new());
    let expiry = Utc::now() + ChronoDuration::hours(1);
    assert_ok!(
        store
            .store_token_profile("req-1", &full_signatures(expiry), RequestProfile::default())
            .await
    );

    let mask = InvalidationMask::from_bits_truncate(6);
    assert_ok!(store.invalidate_with_request_id("req-1", mask).await);

    assert_ok!(store.get_profile_by_auth_code_signature("ac-sig").await);
    assert!(matches!(
        assert_err!(store.get_profile_by_access_token_signature("at-sig").await),
        IdentityError::Expired(_)
    ));
    assert!(matches!(
        assert_err!(store.get_profile_by_refresh_token_signature("rt-sig").await),
        IdentityError::Expired(_)
    ));
}

#[tokio::test]
async fn test_missing_versus_expired() {
    let store = tokens(MemoryStore::new());
    let past = Utc::now() - ChronoDuration::minutes(1);
    assert_ok!(
        store
            .store_token_profile(
                "req-1",
                &[TokenSignature::new(TokenKind::RefreshToken, "old-rt", Some(past))],
                RequestProfile::default(),
            )
            .await
    );

    let err = assert_err!(store.get_profile_by_refresh_token_signature("never-issued").await);
    assert!(matches!(err, IdentityError::NotFound(_)));

    let err = assert_err!(store.get_profile_by_refresh_token_signature("old-rt").await);
    assert!(matches!(err, IdentityError::Expired(_)));
}

#[tokio::test]
async fn test_signature_reuse_across_requests_conflicts() {
    let store = tokens(MemoryStore::new());
    let expiry = Utc::now() + ChronoDuration::hours(1);
    assert_ok!(
        store
            .store_token_profile(
                "req-1",
                &[TokenSignature::new(TokenKind::AccessToken, "dup", Some(expiry))],
                RequestProfile::default(),
            )
            .await
    );

    let err = assert_err!(
        store
            .store_token_profile(
                "req-2",
                &[TokenSignature::new(TokenKind::AccessToken, "dup", Some(expiry))],
                RequestProfile::default(),
            )
            .await
    );
    assert!(matches!(err, IdentityError::Conflict(_)));

    // Original owner is untouched
    let found = assert_ok!(store.get_profile_by_access_token_signature("dup").await);
    assert_eq!(found.request_id, "req-1");
}

#[tokio::test]
async fn test_assertion_replay_window() {
    let store = tokens(MemoryStore::new());
    let live = Utc::now() + ChronoDuration::minutes(5);

    assert_ok!(store.record_assertion("jti-a", live).await);
    assert_ok!(store.record_assertion("jti-b", live).await);

    let err = assert_err!(store.record_assertion("jti-a", live).await);
    assert!(matches!(err, IdentityError::Conflict(_)));
    assert_eq!(assert_ok!(store.purge_expired_assertions().await), 0);
}
