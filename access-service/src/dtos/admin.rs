use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{GlobalRole, InvitationResponse, SiteGrant, SiteMembership, UserResponse};
use crate::services::{CreatedInvitation, IssuedReset, MailDelivery, MembershipChange, ScopedUser};

// ==================== Invitations ====================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 64, message = "Username must be 1-64 characters"))]
    pub username: String,

    #[serde(default)]
    pub sites: Vec<SiteGrant>,

    /// Overrides the configured invitation lifetime.
    #[validate(range(min = 1, max = 8760, message = "ttl_hours must be between 1 and 8760"))]
    pub ttl_hours: Option<i64>,
}

/// Returned once at creation; the token is not retrievable later.
#[derive(Debug, Serialize)]
pub struct CreateInvitationResponse {
    pub invitation: InvitationResponse,
    pub token: String,
    pub invite_url: String,
}

impl From<CreatedInvitation> for CreateInvitationResponse {
    fn from(created: CreatedInvitation) -> Self {
        Self {
            invitation: created.invitation.into(),
            token: created.token.into_string(),
            invite_url: created.invite_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvitationListResponse {
    pub invitations: Vec<InvitationResponse>,
}

// ==================== Users ====================

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSiteMembershipsRequest {
    #[validate(length(max = 1000, message = "Too many sites"))]
    pub sites: Vec<SiteGrant>,
}

#[derive(Debug, Serialize)]
pub struct SiteMembershipsResponse {
    pub user_id: Uuid,
    pub memberships: Vec<SiteMembership>,
    pub changed: usize,
}

impl SiteMembershipsResponse {
    pub fn new(user_id: Uuid, change: MembershipChange) -> Self {
        Self {
            user_id,
            changed: change.diff.upserts.len() + change.diff.removals.len(),
            memberships: change.memberships,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserWithMemberships {
    #[serde(flatten)]
    pub user: UserResponse,
    pub memberships: Vec<SiteMembership>,
}

impl From<ScopedUser> for UserWithMemberships {
    fn from(scoped: ScopedUser) -> Self {
        Self {
            user: scoped.user.into(),
            memberships: scoped.memberships,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserWithMemberships>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateGlobalRoleRequest {
    pub global_role: GlobalRole,
}

// ==================== Password resets ====================

#[derive(Debug, Serialize)]
pub struct PasswordResetLinkResponse {
    pub user_id: Uuid,
    pub reset_url: String,
    pub expires_at: DateTime<Utc>,
    pub mail: MailDelivery,
}

impl From<IssuedReset> for PasswordResetLinkResponse {
    fn from(issued: IssuedReset) -> Self {
        Self {
            user_id: issued.user_id,
            reset_url: issued.reset_url,
            expires_at: issued.expires_at,
            mail: issued.mail,
        }
    }
}
