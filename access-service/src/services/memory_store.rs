//! In-memory [`AccessStore`] for tests and local runs.
//!
//! A single mutex guards all state, so every trait method is atomic. Unique
//! constraints and cascades mirror the Postgres schema, including the
//! constraint names reported in `StoreError::Duplicate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{
    AccessStore, ConsumeEffect, ConsumeOutcome, MembershipDiff, StoreError, TokenRef,
    INVITATIONS_PENDING_EMAIL_KEY, INVITATIONS_TOKEN_DIGEST_KEY, PASSWORD_RESET_TOKEN_DIGEST_KEY,
    USERS_EMAIL_KEY,
};
use crate::models::{
    normalize_email, GlobalRole, Invitation, PasswordResetToken, SiteId, SiteMembership,
    TokenRecord, User,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    memberships: BTreeMap<(Uuid, SiteId), SiteMembership>,
    invitations: HashMap<Uuid, Invitation>,
    resets: HashMap<Uuid, PasswordResetToken>,
}

impl State {
    fn email_taken(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.users.values().any(|u| normalize_email(&u.email) == email)
    }

    fn check_new_user(&self, user: &User) -> Result<(), StoreError> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate("users_pkey".to_string()));
        }
        if self.email_taken(&user.email) {
            return Err(StoreError::Duplicate(USERS_EMAIL_KEY.to_string()));
        }
        Ok(())
    }

    fn memberships_of(&self, user_id: Uuid) -> Vec<SiteMembership> {
        self.memberships
            .range((user_id, SiteId(i64::MIN))..=(user_id, SiteId(i64::MAX)))
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn upsert_membership(&mut self, membership: &SiteMembership) {
        self.memberships.insert(
            (membership.user_id, membership.site_id),
            membership.clone(),
        );
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| normalize_email(&u.email) == email)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.check_new_user(user)?;
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.lock()?.users.values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn list_users_in_sites(&self, sites: &BTreeSet<SiteId>) -> Result<Vec<User>, StoreError> {
        let state = self.lock()?;
        let members: BTreeSet<Uuid> = state
            .memberships
            .values()
            .filter(|m| sites.contains(&m.site_id))
            .map(|m| m.user_id)
            .collect();
        let mut users: Vec<User> = members
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn update_global_role(
        &self,
        user_id: Uuid,
        role: GlobalRole,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.users.get_mut(&user_id) {
            Some(user) => {
                user.global_role = role;
                user.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.users.remove(&user_id).is_none() {
            return Ok(false);
        }
        state.memberships.retain(|(uid, _), _| *uid != user_id);
        state.resets.retain(|_, r| r.user_id != user_id);
        state.invitations.retain(|_, i| i.invited_by != user_id);
        Ok(true)
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> Result<Vec<SiteMembership>, StoreError> {
        Ok(self.lock()?.memberships_of(user_id))
    }

    async fn memberships_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<SiteMembership>, StoreError> {
        let state = self.lock()?;
        Ok(user_ids
            .iter()
            .flat_map(|id| state.memberships_of(*id))
            .collect())
    }

    async fn apply_membership_diff(
        &self,
        user_id: Uuid,
        diff: &MembershipDiff,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::Corrupt(format!(
                "membership diff for unknown user {}",
                user_id
            )));
        }
        for membership in &diff.upserts {
            state.upsert_membership(membership);
        }
        for site in &diff.removals {
            state.memberships.remove(&(user_id, *site));
        }
        Ok(())
    }

    async fn insert_invitation(
        &self,
        invitation: &Invitation,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let email = normalize_email(&invitation.email);

        state.invitations.retain(|_, i| {
            !(normalize_email(&i.email) == email && i.used_at.is_none() && i.expires_at <= now)
        });

        if state
            .invitations
            .values()
            .any(|i| normalize_email(&i.email) == email && i.used_at.is_none())
        {
            return Err(StoreError::Duplicate(INVITATIONS_PENDING_EMAIL_KEY.to_string()));
        }
        if state
            .invitations
            .values()
            .any(|i| i.token_digest == invitation.token_digest)
        {
            return Err(StoreError::Duplicate(INVITATIONS_TOKEN_DIGEST_KEY.to_string()));
        }

        state.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn find_invitation_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        Ok(self.lock()?.invitations.get(&id).cloned())
    }

    async fn find_invitation_by_digest(
        &self,
        token_digest: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()?
            .invitations
            .values()
            .find(|i| i.token_digest == token_digest)
            .cloned())
    }

    async fn find_pending_invitation_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        let email = normalize_email(email);
        Ok(self
            .lock()?
            .invitations
            .values()
            .find(|i| normalize_email(&i.email) == email && i.is_pending_at(now))
            .cloned())
    }

    async fn list_pending_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, StoreError> {
        let mut pending: Vec<Invitation> = self
            .lock()?
            .invitations
            .values()
            .filter(|i| i.is_pending_at(now))
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn delete_pending_invitation(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let pending = state
            .invitations
            .get(&id)
            .map(|i| i.is_pending_at(now))
            .unwrap_or(false);
        if pending {
            state.invitations.remove(&id);
        }
        Ok(pending)
    }

    async fn insert_password_reset(&self, token: &PasswordResetToken) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state
            .resets
            .values()
            .any(|r| r.token_digest == token.token_digest)
        {
            return Err(StoreError::Duplicate(
                PASSWORD_RESET_TOKEN_DIGEST_KEY.to_string(),
            ));
        }
        state.resets.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_password_reset_by_digest(
        &self,
        token_digest: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        Ok(self
            .lock()?
            .resets
            .values()
            .find(|r| r.token_digest == token_digest)
            .cloned())
    }

    async fn consume_token(
        &self,
        token: TokenRef,
        now: DateTime<Utc>,
        effect: ConsumeEffect,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut state = self.lock()?;

        let alive = match token {
            TokenRef::Invitation(id) => state.invitations.get(&id).map(|i| i.is_alive_at(now)),
            TokenRef::PasswordReset(id) => state.resets.get(&id).map(|r| r.is_alive_at(now)),
        };
        if alive != Some(true) {
            return Ok(ConsumeOutcome::Dead);
        }

        // Validate the effect fully before writing anything.
        match &effect {
            ConsumeEffect::Nothing => {}
            ConsumeEffect::CreateAccount { user, .. } => state.check_new_user(user)?,
            ConsumeEffect::SetPassword { user_id, .. } => {
                if !state.users.contains_key(user_id) {
                    return Ok(ConsumeOutcome::Dead);
                }
            }
        }

        match token {
            TokenRef::Invitation(id) => {
                if let Some(invitation) = state.invitations.get_mut(&id) {
                    invitation.used_at = Some(now);
                }
            }
            TokenRef::PasswordReset(id) => {
                if let Some(reset) = state.resets.get_mut(&id) {
                    reset.used_at = Some(now);
                }
            }
        }

        match effect {
            ConsumeEffect::Nothing => {}
            ConsumeEffect::CreateAccount { user, memberships } => {
                state.users.insert(user.id, user);
                for membership in &memberships {
                    state.upsert_membership(membership);
                }
            }
            ConsumeEffect::SetPassword {
                user_id,
                password_digest,
            } => {
                if let Some(user) = state.users.get_mut(&user_id) {
                    user.password_digest = password_digest;
                    user.updated_at = now;
                }
            }
        }

        Ok(ConsumeOutcome::Consumed)
    }
}
