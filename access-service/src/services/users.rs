//! User directory: scoped listing, global role changes, deletion, login and
//! the startup admin bootstrap.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::error::ServiceError;
use super::scope::Actor;
use super::store::AccessStore;
use crate::models::{normalize_email, GlobalRole, SiteMembership, User};
use crate::utils::{validate_password, Password, PasswordHashString, PasswordHasher};

/// A user as seen by an admin, with the memberships that admin may see.
#[derive(Debug, Clone)]
pub struct ScopedUser {
    pub user: User,
    pub memberships: Vec<SiteMembership>,
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn AccessStore>,
    hasher: Arc<dyn PasswordHasher>,
    // Verified against when the email is unknown, so both failures cost one
    // argon2 verify.
    dummy_digest: Arc<OnceCell<PasswordHashString>>,
}

const DUMMY_PASSWORD: &str = "unknown-account-placeholder";

impl UserDirectory {
    pub fn new(store: Arc<dyn AccessStore>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            store,
            hasher,
            dummy_digest: Arc::new(OnceCell::new()),
        }
    }

    async fn dummy_digest(&self) -> Result<&PasswordHashString, ServiceError> {
        let digest = self
            .dummy_digest
            .get_or_try_init(|| async {
                self.hasher
                    .hash(&Password::new(DUMMY_PASSWORD.to_string()))
                    .await
            })
            .await?;
        Ok(digest)
    }

    /// Global admins see every user and membership. Site admins see users
    /// sharing at least one administered site, with memberships cut down to
    /// those sites.
    pub async fn list_users(&self, actor: &Actor) -> Result<Vec<ScopedUser>, ServiceError> {
        let scope = &actor.scope;
        scope.require_admin_scope()?;

        let users = if scope.is_global_admin {
            self.store.list_users().await?
        } else {
            self.store
                .list_users_in_sites(&scope.administered_sites)
                .await?
        };

        let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
        let mut by_user: HashMap<Uuid, Vec<SiteMembership>> = HashMap::new();
        for membership in self.store.memberships_for_users(&ids).await? {
            if scope.administers(membership.site_id) {
                by_user.entry(membership.user_id).or_default().push(membership);
            }
        }

        Ok(users
            .into_iter()
            .map(|user| {
                let memberships = by_user.remove(&user.id).unwrap_or_default();
                ScopedUser { user, memberships }
            })
            .collect())
    }

    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id()))]
    pub async fn update_global_role(
        &self,
        actor: &Actor,
        target_user_id: Uuid,
        role: GlobalRole,
    ) -> Result<User, ServiceError> {
        actor.scope.require_global_admin()?;
        if target_user_id == actor.id() {
            return Err(ServiceError::CannotModifySelf);
        }

        if !self
            .store
            .update_global_role(target_user_id, role, Utc::now())
            .await?
        {
            return Err(ServiceError::NotFound);
        }

        tracing::info!(target_user_id = %target_user_id, role = %role, "Global role updated");

        self.store
            .find_user_by_id(target_user_id)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id()))]
    pub async fn delete_user(&self, actor: &Actor, target_user_id: Uuid) -> Result<(), ServiceError> {
        actor.scope.require_global_admin()?;
        if target_user_id == actor.id() {
            return Err(ServiceError::CannotModifySelf);
        }

        if !self.store.delete_user(target_user_id).await? {
            return Err(ServiceError::NotFound);
        }

        tracing::info!(target_user_id = %target_user_id, "User deleted");
        Ok(())
    }

    /// Checks credentials. Unknown email and wrong password are the same
    /// error.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &Password) -> Result<User, ServiceError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            let digest = self.dummy_digest().await?;
            let _ = self.hasher.verify(password, digest).await?;
            return Err(ServiceError::InvalidCredentials);
        };

        let digest = PasswordHashString::new(user.password_digest.clone());
        if !self.hasher.verify(password, &digest).await? {
            tracing::info!(user_id = %user.id, "Login rejected");
            return Err(ServiceError::InvalidCredentials);
        }

        Ok(user)
    }

    /// Creates a global admin unless a user with `email` already exists.
    /// Returns whether an account was created.
    pub async fn ensure_bootstrap_admin(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<bool, ServiceError> {
        let email = normalize_email(email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Ok(false);
        }
        validate_password(password.as_str()).map_err(ServiceError::ValidationFailed)?;

        let digest = self.hasher.hash(password).await?;
        let username = email.split('@').next().unwrap_or("admin").to_string();
        let admin = User::new(&email, username, digest.into_string(), GlobalRole::GlobalAdmin);

        match self.store.insert_user(&admin).await {
            Ok(()) => {
                tracing::info!(user_id = %admin.id, "Bootstrap admin created");
                Ok(true)
            }
            // Another instance won the race.
            Err(e) => match ServiceError::from(e) {
                ServiceError::UserAlreadyExists => Ok(false),
                other => Err(other),
            },
        }
    }
}
