pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    http::{HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use service_core::middleware::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AccessConfig;
use crate::services::{
    AccessStore, InvitationManager, JwtService, MailSender, MembershipPolicy,
    PasswordResetManager, SiteRegistry, UserDirectory,
};
use crate::utils::PasswordHasher;

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub allowed_origins: Vec<String>,
    pub store: Arc<dyn AccessStore>,
    pub jwt: JwtService,
    pub invitations: InvitationManager,
    pub memberships: MembershipPolicy,
    pub password_resets: PasswordResetManager,
    pub users: UserDirectory,
}

impl AppState {
    pub fn new(
        config: &AccessConfig,
        store: Arc<dyn AccessStore>,
        sites: Arc<dyn SiteRegistry>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            service_name: config.service_name.clone(),
            allowed_origins: config.security.allowed_origins.clone(),
            jwt: JwtService::new(&config.jwt),
            invitations: InvitationManager::new(
                store.clone(),
                sites.clone(),
                hasher.clone(),
                config.tokens.invitation_ttl(),
                config.tokens.public_base_url.clone(),
            ),
            memberships: MembershipPolicy::new(store.clone(), sites),
            password_resets: PasswordResetManager::new(
                store.clone(),
                hasher.clone(),
                mailer,
                config.tokens.password_reset_ttl(),
                config.smtp.timeout,
                config.tokens.public_base_url.clone(),
            ),
            users: UserDirectory::new(store.clone(), hasher),
            store,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            service_core::axum::http::header::AUTHORIZATION,
            service_core::axum::http::header::CONTENT_TYPE,
        ])
}

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/invitations",
            post(handlers::invitations::create_invitation)
                .get(handlers::invitations::list_invitations),
        )
        .route(
            "/admin/invitations/:invitation_id",
            delete(handlers::invitations::cancel_invitation),
        )
        .route("/admin/users", get(handlers::users::list_users))
        .route("/admin/users/:user_id", delete(handlers::users::delete_user))
        .route(
            "/admin/users/:user_id/sites",
            put(handlers::users::update_site_memberships),
        )
        .route(
            "/admin/users/:user_id/role",
            put(handlers::users::update_global_role),
        )
        .route(
            "/admin/users/:user_id/password-reset",
            post(handlers::users::create_password_reset),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/auth/login", post(handlers::auth::login))
        .route(
            "/invite/:token",
            get(handlers::invitations::validate_invitation),
        )
        .route(
            "/invite/:token/accept",
            post(handlers::invitations::accept_invitation),
        )
        .route(
            "/password-reset/confirm",
            post(handlers::auth::confirm_password_reset),
        );

    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        .merge(admin_routes)
        .merge(public_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            // Token routes carry the secret in the path; log the route shape only.
            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                path = %redacted_path(request.uri().path()),
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(cors)
}

/// Replaces the token segment of `/invite/{token}` paths.
fn redacted_path(path: &str) -> String {
    match path.strip_prefix("/invite/") {
        Some(rest) => match rest.split_once('/') {
            Some((_, tail)) => format!("/invite/:token/{}", tail),
            None => "/invite/:token".to_string(),
        },
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_tokens_are_redacted_from_span_paths() {
        assert_eq!(redacted_path("/invite/abc123"), "/invite/:token");
        assert_eq!(
            redacted_path("/invite/abc123/accept"),
            "/invite/:token/accept"
        );
        assert_eq!(redacted_path("/admin/users"), "/admin/users");
    }
}
