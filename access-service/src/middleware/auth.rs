use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::services::Actor;
use crate::AppState;

fn unauthenticated(msg: &str) -> AppError {
    AppError::AuthError(anyhow::anyhow!(msg.to_string()))
}

/// Requires a valid bearer token and attaches the caller as an [`Actor`].
///
/// The actor's user row and memberships are read from the store on every
/// request; nothing about roles or sites is trusted from the token.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| unauthenticated("Missing or invalid Authorization header"))?;

    let claims = state
        .jwt
        .validate_access_token(token)
        .map_err(|_| unauthenticated("Invalid or expired token"))?;
    let user_id = claims
        .user_id()
        .map_err(|_| unauthenticated("Invalid or expired token"))?;

    let actor = Actor::load(&state.store, user_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| {
            tracing::warn!(user_id = %user_id, "Token presented for a deleted account");
            unauthenticated("Invalid or expired token")
        })?;

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// Extractor for the actor attached by [`auth_middleware`].
pub struct CurrentActor(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .cloned()
            .map(CurrentActor)
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Actor missing from request extensions"))
            })
    }
}
