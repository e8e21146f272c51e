//! Transactional store boundary.
//!
//! Every multi-row write (token consumption plus its gated effect, membership
//! diffs, user deletion) is a single method so implementations can commit it
//! all-or-nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    GlobalRole, Invitation, PasswordResetToken, SiteId, SiteMembership, User,
};

pub const USERS_EMAIL_KEY: &str = "users_email_key";
pub const INVITATIONS_PENDING_EMAIL_KEY: &str = "invitations_pending_email_key";
pub const INVITATIONS_TOKEN_DIGEST_KEY: &str = "invitations_token_digest_key";
pub const PASSWORD_RESET_TOKEN_DIGEST_KEY: &str = "password_reset_tokens_token_digest_key";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate key violates unique constraint \"{0}\"")]
    Duplicate(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Which token row a consumption targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRef {
    Invitation(Uuid),
    PasswordReset(Uuid),
}

/// Side effect committed together with a token consumption.
#[derive(Debug, Clone)]
pub enum ConsumeEffect {
    Nothing,
    CreateAccount {
        user: User,
        memberships: Vec<SiteMembership>,
    },
    SetPassword {
        user_id: Uuid,
        password_digest: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    /// Already used, expired, or gone. Nothing was written.
    Dead,
}

/// Membership writes for one user, applied in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// New rows and role changes, written as upserts on `(site_id, user_id)`.
    pub upserts: Vec<SiteMembership>,
    pub removals: Vec<SiteId>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // ==================== Users ====================

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Users holding at least one membership in `sites`.
    async fn list_users_in_sites(&self, sites: &BTreeSet<SiteId>) -> Result<Vec<User>, StoreError>;

    /// Returns `false` when the user does not exist.
    async fn update_global_role(
        &self,
        user_id: Uuid,
        role: GlobalRole,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Deletes the user with its memberships, reset tokens and the invitations
    /// it issued. Returns `false` when the user does not exist.
    async fn delete_user(&self, user_id: Uuid) -> Result<bool, StoreError>;

    // ==================== Memberships ====================

    async fn memberships_for_user(&self, user_id: Uuid) -> Result<Vec<SiteMembership>, StoreError>;

    async fn memberships_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<SiteMembership>, StoreError>;

    async fn apply_membership_diff(
        &self,
        user_id: Uuid,
        diff: &MembershipDiff,
    ) -> Result<(), StoreError>;

    // ==================== Invitations ====================

    /// Inserts the invitation and its sites. Expired, unused invitations for
    /// the same email are purged first in the same transaction.
    async fn insert_invitation(
        &self,
        invitation: &Invitation,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn find_invitation_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError>;

    async fn find_invitation_by_digest(
        &self,
        token_digest: &str,
    ) -> Result<Option<Invitation>, StoreError>;

    async fn find_pending_invitation_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError>;

    async fn list_pending_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, StoreError>;

    /// Deletes the invitation only while it is still pending.
    async fn delete_pending_invitation(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // ==================== Password resets ====================

    async fn insert_password_reset(&self, token: &PasswordResetToken) -> Result<(), StoreError>;

    async fn find_password_reset_by_digest(
        &self,
        token_digest: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError>;

    // ==================== Token consumption ====================

    /// Marks the token used (only if unused and unexpired at `now`) and applies
    /// `effect` in the same transaction. On `Dead` or on error nothing is
    /// written.
    async fn consume_token(
        &self,
        token: TokenRef,
        now: DateTime<Utc>,
        effect: ConsumeEffect,
    ) -> Result<ConsumeOutcome, StoreError>;
}
