//! Invitation lifecycle: create, list, cancel, validate, accept.
//!
//! `Pending` moves to `Accepted` by consumption, to `Expired` by the clock,
//! and cancellation deletes the row.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

use super::error::ServiceError;
use super::membership_policy::validate_request;
use super::scope::Actor;
use super::site_registry::SiteRegistry;
use super::store::{AccessStore, ConsumeEffect, TokenRef};
use super::token_vault::{TokenSecret, TokenSubject, TokenVault};
use crate::models::{
    normalize_email, GlobalRole, Invitation, SiteGrant, SiteId, SiteMembership, User,
};
use crate::utils::{validate_password, Password, PasswordHasher};

pub const MAX_USERNAME_LEN: usize = 64;

/// Input for [`InvitationManager::create`].
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub email: String,
    pub username: String,
    pub sites: Vec<SiteGrant>,
    /// Falls back to the configured default.
    pub ttl: Option<Duration>,
}

/// A freshly issued invitation. `token` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct CreatedInvitation {
    pub invitation: Invitation,
    pub token: TokenSecret,
    pub invite_url: String,
}

/// What a holder of a live invitation token may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationPreview {
    pub email: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
    pub sites: Vec<SiteGrant>,
}

#[derive(Debug, Clone)]
pub struct AcceptedInvitation {
    pub user: User,
    pub memberships: Vec<SiteMembership>,
}

fn validate_new_invitation(input: &NewInvitation) -> Result<(), ServiceError> {
    if !input.email.trim().validate_email() {
        return Err(ServiceError::validation("Invalid email address"));
    }

    let username_len = input.username.trim().chars().count();
    if username_len == 0 || username_len > MAX_USERNAME_LEN {
        return Err(ServiceError::validation(format!(
            "Username must be between 1 and {} characters",
            MAX_USERNAME_LEN
        )));
    }

    if let Some(ttl) = input.ttl {
        if ttl <= Duration::zero() {
            return Err(ServiceError::validation("Invitation TTL must be positive"));
        }
    }

    validate_request(&input.sites)
}

/// Public link for an invitation token.
pub fn invite_url(public_base_url: &str, token: &TokenSecret) -> String {
    format!(
        "{}/invite/{}",
        public_base_url.trim_end_matches('/'),
        token.expose()
    )
}

#[derive(Clone)]
pub struct InvitationManager {
    store: Arc<dyn AccessStore>,
    vault: TokenVault,
    sites: Arc<dyn SiteRegistry>,
    hasher: Arc<dyn PasswordHasher>,
    default_ttl: Duration,
    public_base_url: String,
}

impl InvitationManager {
    pub fn new(
        store: Arc<dyn AccessStore>,
        sites: Arc<dyn SiteRegistry>,
        hasher: Arc<dyn PasswordHasher>,
        default_ttl: Duration,
        public_base_url: String,
    ) -> Self {
        Self {
            vault: TokenVault::new(store.clone()),
            store,
            sites,
            hasher,
            default_ttl,
            public_base_url,
        }
    }

    #[tracing::instrument(skip(self, actor, input), fields(actor_id = %actor.id(), email = %input.email))]
    pub async fn create(
        &self,
        actor: &Actor,
        input: NewInvitation,
    ) -> Result<CreatedInvitation, ServiceError> {
        validate_new_invitation(&input)?;

        let scope = &actor.scope;
        scope.require_admin_scope()?;
        let site_ids: Vec<SiteId> = input.sites.iter().map(|g| g.site_id).collect();
        // A site admin cannot mint an account that lands outside every site
        // they administer.
        if !scope.is_global_admin && (site_ids.is_empty() || !scope.covers(&site_ids)) {
            return Err(ServiceError::OutOfScope);
        }

        let missing = self.sites.missing_sites(&site_ids).await?;
        if let Some(site) = missing.first() {
            return Err(ServiceError::validation(format!("Site {} does not exist", site)));
        }

        let email = normalize_email(&input.email);
        let now = Utc::now();

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::UserAlreadyExists);
        }
        if self
            .store
            .find_pending_invitation_by_email(&email, now)
            .await?
            .is_some()
        {
            return Err(ServiceError::InvitationAlreadyPending);
        }

        let subject = TokenSubject::Invite {
            email,
            username: input.username.trim().to_string(),
            invited_by: actor.id(),
            sites: input.sites,
        };
        let ttl = input.ttl.unwrap_or(self.default_ttl);
        let (token, record) = self.vault.issue(subject, ttl, now).await?;
        let invitation = record
            .into_invitation()
            .ok_or_else(|| anyhow::anyhow!("invite subject produced a non-invitation record"))?;

        tracing::info!(invitation_id = %invitation.id, "Invitation created");

        Ok(CreatedInvitation {
            invite_url: invite_url(&self.public_base_url, &token),
            invitation,
            token,
        })
    }

    /// Pending invitations visible to the actor. Site admins see those
    /// sharing at least one administered site; zero-site invitations are
    /// visible to global admins only.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Invitation>, ServiceError> {
        let scope = &actor.scope;
        scope.require_admin_scope()?;

        let pending = self.store.list_pending_invitations(Utc::now()).await?;
        Ok(pending
            .into_iter()
            .filter(|inv| scope.intersects(inv.sites.iter().map(|g| &g.site_id)))
            .collect())
    }

    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id()))]
    pub async fn cancel(&self, actor: &Actor, invitation_id: Uuid) -> Result<(), ServiceError> {
        let scope = &actor.scope;
        scope.require_admin_scope()?;

        let now = Utc::now();
        let invitation = self
            .store
            .find_invitation_by_id(invitation_id)
            .await?
            .filter(|inv| inv.is_pending_at(now))
            .filter(|inv| scope.intersects(inv.sites.iter().map(|g| &g.site_id)))
            .ok_or(ServiceError::NotFound)?;

        if !self.store.delete_pending_invitation(invitation.id, now).await? {
            return Err(ServiceError::NotFound);
        }

        tracing::info!(invitation_id = %invitation.id, "Invitation cancelled");
        Ok(())
    }

    /// Public. Dead and unknown tokens are indistinguishable.
    pub async fn validate(&self, token: &str) -> Result<InvitationPreview, ServiceError> {
        let invitation = self.vault.verify_invitation(token, Utc::now()).await?;
        Ok(InvitationPreview {
            email: invitation.email,
            username: invitation.username,
            expires_at: invitation.expires_at,
            sites: invitation.sites,
        })
    }

    /// Public. Creates the account and its memberships in the same
    /// transaction that consumes the token.
    #[tracing::instrument(skip(self, token, password))]
    pub async fn accept(
        &self,
        token: &str,
        password: Password,
    ) -> Result<AcceptedInvitation, ServiceError> {
        validate_password(password.as_str()).map_err(ServiceError::ValidationFailed)?;

        let invitation = self.vault.verify_invitation(token, Utc::now()).await?;

        if self
            .store
            .find_user_by_email(&invitation.email)
            .await?
            .is_some()
        {
            return Err(ServiceError::UserAlreadyExists);
        }

        let digest = self.hasher.hash(&password).await?;
        let user = User::new(
            &invitation.email,
            invitation.username.clone(),
            digest.into_string(),
            GlobalRole::User,
        );
        let memberships: Vec<SiteMembership> = invitation
            .sites
            .iter()
            .map(|g| SiteMembership::new(g.site_id, user.id, g.site_role))
            .collect();

        self.vault
            .consume(
                TokenRef::Invitation(invitation.id),
                ConsumeEffect::CreateAccount {
                    user: user.clone(),
                    memberships: memberships.clone(),
                },
                Utc::now(),
            )
            .await?;

        tracing::info!(
            invitation_id = %invitation.id,
            user_id = %user.id,
            "Invitation accepted"
        );

        Ok(AcceptedInvitation { user, memberships })
    }
}
