//! Shared harness for access-service integration tests.
//!
//! Everything runs against the in-memory store, a recording mail sender, a
//! fixed site registry (sites 1 to 5) and a minimum-cost argon2 hasher.

#![allow(dead_code)]

use access_service::{
    build_router,
    config::{
        AccessConfig, DatabaseConfig, Environment, JwtConfig, SecurityConfig, SmtpConfig,
        TokenConfig,
    },
    models::{GlobalRole, SiteId, SiteMembership, SiteRole, User},
    services::{
        store::MembershipDiff, AccessStore, Actor, MemoryStore, MockMailSender,
        StaticSiteRegistry,
    },
    utils::{Argon2Hasher, Password, PasswordHasher},
    AppState,
};
use axum::Router;
use service_core::observability::LogFormat;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_PASSWORD: &str = "correct-horse-battery";
pub const PUBLIC_BASE_URL: &str = "https://labels.test";

pub fn test_config() -> AccessConfig {
    AccessConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "access-service-test".to_string(),
        log_level: "debug".to_string(),
        log_format: LogFormat::Pretty,
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/access_test".to_string(),
            max_connections: 5,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret: "test-secret-for-integration-tests-0001".to_string(),
            access_token_expiry_minutes: 15,
        },
        tokens: TokenConfig {
            public_base_url: PUBLIC_BASE_URL.to_string(),
            invitation_ttl_hours: 168,
            password_reset_ttl_minutes: 60,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: None,
            password: None,
            from: "noreply@labels.test".to_string(),
            timeout: Duration::from_millis(200),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        bootstrap: None,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub mailer: MockMailSender,
    pub hasher: Arc<Argon2Hasher>,
}

impl TestApp {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("access_service=debug")
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let mailer = MockMailSender::new();
        let hasher = Arc::new(Argon2Hasher::low_cost());
        let sites = Arc::new(StaticSiteRegistry::new(1..=5));

        let state = AppState::new(
            &test_config(),
            store.clone(),
            sites,
            hasher.clone(),
            Arc::new(mailer.clone()),
        );

        Self {
            state,
            store,
            mailer,
            hasher,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Inserts a user with [`TEST_PASSWORD`] and the given memberships.
    pub async fn create_user(
        &self,
        email: &str,
        role: GlobalRole,
        memberships: &[(i64, SiteRole)],
    ) -> User {
        let digest = self
            .hasher
            .hash(&Password::new(TEST_PASSWORD.to_string()))
            .await
            .expect("hash");
        let username = email.split('@').next().unwrap_or("user").to_string();
        let user = User::new(email, username, digest.into_string(), role);
        self.store.insert_user(&user).await.expect("insert user");

        if !memberships.is_empty() {
            let diff = MembershipDiff {
                upserts: memberships
                    .iter()
                    .map(|(site, role)| SiteMembership::new(SiteId(*site), user.id, *role))
                    .collect(),
                removals: Vec::new(),
            };
            self.store
                .apply_membership_diff(user.id, &diff)
                .await
                .expect("seed memberships");
        }
        user
    }

    pub async fn global_admin(&self, email: &str) -> User {
        self.create_user(email, GlobalRole::GlobalAdmin, &[]).await
    }

    /// Fresh actor for `user`, as the auth middleware would build it.
    pub async fn actor(&self, user: &User) -> Actor {
        let store: Arc<dyn AccessStore> = self.store.clone();
        Actor::load(&store, user.id)
            .await
            .expect("load actor")
            .expect("actor exists")
    }

    pub async fn memberships(&self, user: &User) -> Vec<SiteMembership> {
        self.store
            .memberships_for_user(user.id)
            .await
            .expect("memberships")
    }

    pub fn bearer(&self, user: &User) -> String {
        let token = self
            .state
            .jwt
            .generate_access_token(user.id)
            .expect("access token");
        format!("Bearer {}", token)
    }
}

/// Pulls the plaintext token out of a link ending in `token=...` or
/// `/invite/...`.
pub fn token_from_url(url: &str) -> String {
    url.rsplit(|c| c == '=' || c == '/')
        .next()
        .unwrap_or_default()
        .to_string()
}
