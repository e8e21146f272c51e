use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::public::{ConfirmPasswordResetRequest, LoginRequest};
use crate::dtos::MessageResponse;
use crate::services::TokenResponse;
use crate::utils::{Password, ValidatedJson};
use crate::AppState;

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = state
        .users
        .authenticate(&req.email, &Password::new(req.password))
        .await?;

    let tokens = state.jwt.token_response(user.id)?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(tokens))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ConfirmPasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .password_resets
        .redeem(&req.token, Password::new(req.new_password))
        .await?;
    Ok(Json(MessageResponse::new("Password updated")))
}
