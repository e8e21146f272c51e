use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{SiteGrant, SiteMembership, UserResponse};
use crate::services::{AcceptedInvitation, InvitationPreview};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct InvitationPreviewResponse {
    pub email: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
    pub sites: Vec<SiteGrant>,
}

impl From<InvitationPreview> for InvitationPreviewResponse {
    fn from(preview: InvitationPreview) -> Self {
        Self {
            email: preview.email,
            username: preview.username,
            expires_at: preview.expires_at,
            sites: preview.sites,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcceptInvitationRequest {
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptInvitationResponse {
    pub user: UserResponse,
    pub memberships: Vec<SiteMembership>,
}

impl From<AcceptedInvitation> for AcceptInvitationResponse {
    fn from(accepted: AcceptedInvitation) -> Self {
        Self {
            user: accepted.user.into(),
            memberships: accepted.memberships,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPasswordResetRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub new_password: String,
}
