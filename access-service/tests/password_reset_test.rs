mod common;

use access_service::models::{GlobalRole, SiteRole};
use access_service::services::{ErrorKind, MailDelivery};
use access_service::utils::Password;
use common::{token_from_url, TestApp, PUBLIC_BASE_URL, TEST_PASSWORD};
use std::time::Duration;
use uuid::Uuid;

fn password(p: &str) -> Password {
    Password::new(p.to_string())
}

#[tokio::test]
async fn reset_link_replaces_password_once() {
    let app = TestApp::new();
    let admin = app.global_admin("admin@x.com").await;
    let target = app
        .create_user("u@x.com", GlobalRole::User, &[(1, SiteRole::SiteUser)])
        .await;
    let actor = app.actor(&admin).await;

    let issued = app
        .state
        .password_resets
        .create(&actor, target.id)
        .await
        .unwrap();
    assert_eq!(issued.user_id, target.id);
    assert_eq!(issued.mail, MailDelivery::Sent);
    assert!(issued
        .reset_url
        .starts_with(&format!("{}/reset-password?token=", PUBLIC_BASE_URL)));
    assert_eq!(token_from_url(&issued.reset_url), issued.token.expose());

    let redeemed = app
        .state
        .password_resets
        .redeem(issued.token.expose(), password("fresh-password-1"))
        .await
        .unwrap();
    assert_eq!(redeemed, target.id);

    let err = app
        .state
        .users
        .authenticate("u@x.com", &password(TEST_PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    let user = app
        .state
        .users
        .authenticate("u@x.com", &password("fresh-password-1"))
        .await
        .unwrap();
    assert_eq!(user.id, target.id);

    let err = app
        .state
        .password_resets
        .redeem(issued.token.expose(), password("fresh-password-2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOrExpired);
    assert!(app
        .state
        .users
        .authenticate("u@x.com", &password("fresh-password-1"))
        .await
        .is_ok());
}

#[tokio::test]
async fn reset_mail_carries_the_link() {
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

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "u@x.com");
    assert!(sent[0].body.contains(&issued.reset_url));
}

#[tokio::test]
async fn mail_failure_does_not_undo_the_token() {
    let app = TestApp::new();
    let admin = app.global_admin("admin@x.com").await;
    let target = app.create_user("u@x.com", GlobalRole::User, &[]).await;
    let actor = app.actor(&admin).await;
    app.mailer.set_failing(true);

    let issued = app
        .state
        .password_resets
        .create(&actor, target.id)
        .await
        .unwrap();
    assert!(matches!(issued.mail, MailDelivery::Failed { .. }));
    assert!(app.mailer.sent().is_empty());

    app.state
        .password_resets
        .redeem(issued.token.expose(), password("fresh-password-1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn slow_mail_is_cut_off_by_timeout() {
    let app = TestApp::new();
    let admin = app.global_admin("admin@x.com").await;
    let target = app.create_user("u@x.com", GlobalRole::User, &[]).await;
    let actor = app.actor(&admin).await;
    app.mailer.set_delay(Some(Duration::from_secs(5)));

    let started = std::time::Instant::now();
    let issued = app
        .state
        .password_resets
        .create(&actor, target.id)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    match issued.mail {
        MailDelivery::Failed { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(app
        .state
        .password_resets
        .redeem(issued.token.expose(), password("fresh-password-1"))
        .await
        .is_ok());
}

#[tokio::test]
async fn site_admin_reset_scope() {
    let app = TestApp::new();
    let admin = app
        .create_user("sa@x.com", GlobalRole::User, &[(1, SiteRole::SiteAdmin)])
        .await;
    let member = app
        .create_user("m@x.com", GlobalRole::User, &[(1, SiteRole::SiteUser)])
        .await;
    let outsider = app
        .create_user("o@x.com", GlobalRole::User, &[(2, SiteRole::SiteUser)])
        .await;
    let global_member = app
        .create_user("g@x.com", GlobalRole::GlobalAdmin, &[(1, SiteRole::SiteUser)])
        .await;
    let peer = app
        .create_user("p@x.com", GlobalRole::User, &[(1, SiteRole::SiteAdmin)])
        .await;
    let wider_admin = app
        .create_user(
            "b@x.com",
            GlobalRole::User,
            &[(1, SiteRole::SiteAdmin), (2, SiteRole::SiteAdmin)],
        )
        .await;
    let admin_elsewhere = app
        .create_user(
            "e@x.com",
            GlobalRole::User,
            &[(1, SiteRole::SiteUser), (3, SiteRole::SiteAdmin)],
        )
        .await;
    let member_elsewhere = app
        .create_user(
            "w@x.com",
            GlobalRole::User,
            &[(1, SiteRole::SiteUser), (2, SiteRole::SiteUser)],
        )
        .await;
    let actor = app.actor(&admin).await;

    for allowed in [&member, &peer] {
        assert!(app
            .state
            .password_resets
            .create(&actor, allowed.id)
            .await
            .is_ok());
    }

    for wider in [&wider_admin, &admin_elsewhere, &member_elsewhere] {
        let err = app
            .state
            .password_resets
            .create(&actor, wider.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
    // Refused before any token is issued or mailed.
    assert!(app.mailer.sent().iter().all(|m| m.to != "b@x.com"));

    let err = app
        .state
        .password_resets
        .create(&actor, outsider.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = app
        .state
        .password_resets
        .create(&actor, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = app
        .state
        .password_resets
        .create(&actor, global_member.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn plain_user_cannot_issue_resets() {
    let app = TestApp::new();
    let user = app
        .create_user("u@x.com", GlobalRole::User, &[(1, SiteRole::SiteUser)])
        .await;
    let other = app
        .create_user("o@x.com", GlobalRole::User, &[(1, SiteRole::SiteUser)])
        .await;
    let actor = app.actor(&user).await;

    let err = app
        .state
        .password_resets
        .create(&actor, other.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn weak_or_bogus_redemptions_are_rejected() {
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

    let err = app
        .state
        .password_resets
        .redeem(issued.token.expose(), password("short"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);

    let err = app
        .state
        .password_resets
        .redeem(&"0".repeat(64), password("fresh-password-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOrExpired);

    // The rejected attempts above did not burn the token.
    assert!(app
        .state
        .password_resets
        .redeem(issued.token.expose(), password("fresh-password-1"))
        .await
        .is_ok());
}

#[tokio::test]
async fn deleted_user_token_dies_with_the_account() {
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

    app.state.users.delete_user(&actor, target.id).await.unwrap();

    let err = app
        .state
        .password_resets
        .redeem(issued.token.expose(), password("fresh-password-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOrExpired);
}
