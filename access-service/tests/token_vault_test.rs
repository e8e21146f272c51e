mod common;

use access_service::models::{GlobalRole, SiteGrant, SiteRole, TokenRecord};
use access_service::services::store::{ConsumeEffect, TokenRef};
use access_service::services::token_vault::TokenSubject;
use access_service::services::{AccessStore, ErrorKind, TokenPurpose, TokenVault};
use access_service::utils::Password;
use chrono::{Duration, Utc};
use common::TestApp;
use std::sync::Arc;
use uuid::Uuid;

fn vault(app: &TestApp) -> TokenVault {
    let store: Arc<dyn AccessStore> = app.store.clone();
    TokenVault::new(store)
}

fn invite_subject(email: &str) -> TokenSubject {
    TokenSubject::Invite {
        email: email.to_string(),
        username: "newbie".to_string(),
        invited_by: Uuid::new_v4(),
        sites: vec![SiteGrant::new(1, SiteRole::SiteUser)],
    }
}

#[tokio::test]
async fn issued_token_is_stored_only_as_digest() {
    let app = TestApp::new();
    let now = Utc::now();

    let (secret, record) = vault(&app)
        .issue(invite_subject("new@x.com"), Duration::hours(1), now)
        .await
        .unwrap();

    let invitation = record.into_invitation().unwrap();
    assert_ne!(invitation.token_digest, secret.expose());
    assert_eq!(invitation.token_digest, secret.digest());
    assert_eq!(invitation.expires_at, now + Duration::hours(1));

    let stored = app
        .store
        .find_invitation_by_digest(&secret.digest())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, invitation.id);
    assert!(app
        .store
        .find_invitation_by_digest(secret.expose())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn token_verifies_until_expiry_and_never_after() {
    let app = TestApp::new();
    let user = app.create_user("u@x.com", GlobalRole::User, &[]).await;
    let vault = vault(&app);
    let issued_at = Utc::now();
    let ttl = Duration::minutes(30);

    let (secret, _) = vault
        .issue(TokenSubject::Reset { user_id: user.id }, ttl, issued_at)
        .await
        .unwrap();

    for offset in [
        Duration::zero(),
        Duration::minutes(29),
        ttl - Duration::milliseconds(1),
    ] {
        assert!(vault
            .verify(TokenPurpose::Reset, secret.expose(), issued_at + offset)
            .await
            .is_ok());
    }

    for offset in [ttl, ttl + Duration::milliseconds(1), Duration::days(3)] {
        let err = vault
            .verify(TokenPurpose::Reset, secret.expose(), issued_at + offset)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOrExpired);
    }
}

#[tokio::test]
async fn consumed_token_is_dead_for_every_later_call() {
    let app = TestApp::new();
    let user = app.create_user("u@x.com", GlobalRole::User, &[]).await;
    let vault = vault(&app);
    let now = Utc::now();

    let (secret, record) = vault
        .issue(TokenSubject::Reset { user_id: user.id }, Duration::hours(1), now)
        .await
        .unwrap();
    let token_ref = record.token_ref();

    vault
        .consume(token_ref, ConsumeEffect::Nothing, now)
        .await
        .unwrap();

    let err = vault
        .verify(TokenPurpose::Reset, secret.expose(), now)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOrExpired);

    let err = vault
        .consume(token_ref, ConsumeEffect::Nothing, now)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOrExpired);

    let stored = app
        .store
        .find_password_reset_by_digest(&secret.digest())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.used_at.is_some());
}

#[tokio::test]
async fn purposes_do_not_cross() {
    let app = TestApp::new();
    let vault = vault(&app);
    let now = Utc::now();

    let (secret, _) = vault
        .issue(invite_subject("new@x.com"), Duration::hours(1), now)
        .await
        .unwrap();

    assert!(vault
        .verify(TokenPurpose::Invite, secret.expose(), now)
        .await
        .is_ok());
    let err = vault
        .verify(TokenPurpose::Reset, secret.expose(), now)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOrExpired);
}

#[tokio::test]
async fn unknown_and_malformed_tokens_share_one_error() {
    let app = TestApp::new();
    let vault = vault(&app);
    let now = Utc::now();

    let candidates = vec![
        String::new(),
        "not-a-token".to_string(),
        "z".repeat(64),
        "a".repeat(63),
        "a".repeat(64),
    ];
    for token in &candidates {
        let err = vault
            .verify(TokenPurpose::Invite, token, now)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOrExpired, "token {:?}", token);
    }
}

#[tokio::test]
async fn concurrent_redemptions_succeed_exactly_once() {
    let app = TestApp::new();
    let admin = app.global_admin("admin@x.com").await;
    let target = app.create_user("u@x.com", GlobalRole::User, &[]).await;
    let actor = app.actor(&admin).await;

    let issued = app
        .state
        .password_resets
        .create(&actor, target.id)
        .await
        .unwrap();
    let token = issued.token.expose().to_string();

    let resets = app.state.password_resets.clone();
    let mut handles = Vec::new();
    for i in 0..4 {
        let resets = resets.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            resets
                .redeem(&token, Password::new(format!("new-password-{}", i)))
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(user_id) => {
                assert_eq!(user_id, target.id);
                successes += 1;
            }
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidOrExpired),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn expired_record_reports_not_alive() {
    let app = TestApp::new();
    let user = app.create_user("u@x.com", GlobalRole::User, &[]).await;
    let issued_at = Utc::now() - Duration::hours(2);

    let (_, record) = vault(&app)
        .issue(
            TokenSubject::Reset { user_id: user.id },
            Duration::hours(1),
            issued_at,
        )
        .await
        .unwrap();

    let reset = record.into_password_reset().unwrap();
    assert!(!reset.is_alive());
    let outcome = vault(&app)
        .consume(
            TokenRef::PasswordReset(reset.id),
            ConsumeEffect::Nothing,
            Utc::now(),
        )
        .await;
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::InvalidOrExpired);
}
