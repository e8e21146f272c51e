//! Invitation endpoints.
//!
//! Admin routes create, list and cancel. The token routes are public: anyone
//! holding a live token may preview it and accept it once.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Duration;
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::admin::{CreateInvitationRequest, CreateInvitationResponse, InvitationListResponse};
use crate::dtos::public::{AcceptInvitationRequest, AcceptInvitationResponse, InvitationPreviewResponse};
use crate::middleware::CurrentActor;
use crate::services::NewInvitation;
use crate::utils::{Password, ValidatedJson};
use crate::AppState;

pub async fn create_invitation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ValidatedJson(req): ValidatedJson<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<CreateInvitationResponse>), AppError> {
    let created = state
        .invitations
        .create(
            &actor,
            NewInvitation {
                email: req.email,
                username: req.username,
                sites: req.sites,
                ttl: req.ttl_hours.map(Duration::hours),
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn list_invitations(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<InvitationListResponse>, AppError> {
    let invitations = state.invitations.list(&actor).await?;
    Ok(Json(InvitationListResponse {
        invitations: invitations.into_iter().map(Into::into).collect(),
    }))
}

pub async fn cancel_invitation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(invitation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.invitations.cancel(&actor, invitation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn validate_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<InvitationPreviewResponse>, AppError> {
    let preview = state.invitations.validate(&token).await?;
    Ok(Json(preview.into()))
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ValidatedJson(req): ValidatedJson<AcceptInvitationRequest>,
) -> Result<(StatusCode, Json<AcceptInvitationResponse>), AppError> {
    let accepted = state
        .invitations
        .accept(&token, Password::new(req.password))
        .await?;
    Ok((StatusCode::CREATED, Json(accepted.into())))
}
