//! Invitation model - pending accounts with pre-assigned site access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SiteGrant, TokenRecord};

/// Derived invitation state. `Expired` is never written; it follows from the
/// clock. Cancelled invitations are deleted, so they have no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationState {
    Pending,
    Accepted,
    Expired,
}

/// Invitation entity with its ordered site list.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub token_digest: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sites: Vec<SiteGrant>,
}

impl Invitation {
    pub fn state_at(&self, now: DateTime<Utc>) -> InvitationState {
        if self.used_at.is_some() {
            InvitationState::Accepted
        } else if now >= self.expires_at {
            InvitationState::Expired
        } else {
            InvitationState::Pending
        }
    }

    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == InvitationState::Pending
    }
}

impl TokenRecord for Invitation {
    fn token_digest(&self) -> &str {
        &self.token_digest
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn used_at(&self) -> Option<DateTime<Utc>> {
        self.used_at
    }
}

/// Invitation response for API. Never carries the token digest.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub invited_by: Uuid,
    pub state: InvitationState,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub sites: Vec<SiteGrant>,
}

impl From<Invitation> for InvitationResponse {
    fn from(i: Invitation) -> Self {
        let state = i.state_at(Utc::now());
        Self {
            id: i.id,
            email: i.email,
            username: i.username,
            invited_by: i.invited_by,
            state,
            expires_at: i.expires_at,
            created_at: i.created_at,
            sites: i.sites,
        }
    }
}
