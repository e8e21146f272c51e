use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::admin::{
    PasswordResetLinkResponse, SiteMembershipsResponse, UpdateGlobalRoleRequest,
    UpdateSiteMembershipsRequest, UserListResponse,
};
use crate::middleware::CurrentActor;
use crate::models::UserResponse;
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn list_users(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<UserListResponse>, AppError> {
    let users = state.users.list_users(&actor).await?;
    Ok(Json(UserListResponse {
        users: users.into_iter().map(Into::into).collect(),
    }))
}

/// Replaces the target's memberships within the caller's sites.
pub async fn update_site_memberships(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateSiteMembershipsRequest>,
) -> Result<Json<SiteMembershipsResponse>, AppError> {
    let change = state
        .memberships
        .apply_membership_update(&actor, user_id, req.sites)
        .await?;
    Ok(Json(SiteMembershipsResponse::new(user_id, change)))
}

pub async fn update_global_role(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateGlobalRoleRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .users
        .update_global_role(&actor, user_id, req.global_role)
        .await?;
    Ok(Json(user.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.users.delete_user(&actor, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Always returns the link; mail delivery is reported in the body.
pub async fn create_password_reset(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(user_id): Path<Uuid>,
) -> Result<(StatusCode, Json<PasswordResetLinkResponse>), AppError> {
    let issued = state.password_resets.create(&actor, user_id).await?;
    Ok((StatusCode::CREATED, Json(issued.into())))
}
