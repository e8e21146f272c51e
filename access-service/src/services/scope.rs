//! Actor classification.
//!
//! A [`Scope`] is derived per request from the actor's persisted user row and
//! memberships. It is never cached and never travels inside a token.

use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use super::store::AccessStore;
use crate::models::{SiteId, SiteMembership, User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub user_id: Uuid,
    pub is_global_admin: bool,
    /// Sites where the actor holds `SITE_ADMIN`. Not populated with every
    /// site for global admins; checks short-circuit on the flag instead.
    pub administered_sites: BTreeSet<SiteId>,
}

/// Derives the actor's scope. Memberships belonging to other users are
/// ignored.
pub fn resolve(actor: &User, memberships: &[SiteMembership]) -> Scope {
    let administered_sites = memberships
        .iter()
        .filter(|m| m.user_id == actor.id && m.is_admin())
        .map(|m| m.site_id)
        .collect();

    Scope {
        user_id: actor.id,
        is_global_admin: actor.is_global_admin(),
        administered_sites,
    }
}

impl Scope {
    pub fn administers(&self, site: SiteId) -> bool {
        self.is_global_admin || self.administered_sites.contains(&site)
    }

    /// True when every site is administered. Vacuously true for an empty set.
    pub fn covers<'a>(&self, sites: impl IntoIterator<Item = &'a SiteId>) -> bool {
        self.is_global_admin || sites.into_iter().all(|s| self.administered_sites.contains(s))
    }

    /// True when at least one site is administered. False for an empty set
    /// unless the actor is a global admin.
    pub fn intersects<'a>(&self, sites: impl IntoIterator<Item = &'a SiteId>) -> bool {
        self.is_global_admin || sites.into_iter().any(|s| self.administered_sites.contains(s))
    }

    /// Global admin, or admin of at least one site.
    pub fn has_admin_scope(&self) -> bool {
        self.is_global_admin || !self.administered_sites.is_empty()
    }

    pub fn require_admin_scope(&self) -> Result<(), ServiceError> {
        if self.has_admin_scope() {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized)
        }
    }

    pub fn require_global_admin(&self) -> Result<(), ServiceError> {
        if self.is_global_admin {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized)
        }
    }
}

/// An authenticated caller with its freshly resolved scope.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub scope: Scope,
}

impl Actor {
    pub fn new(user: User, memberships: &[SiteMembership]) -> Self {
        let scope = resolve(&user, memberships);
        Self { user, scope }
    }

    pub fn id(&self) -> Uuid {
        self.user.id
    }

    /// Reloads the actor from the store. A deleted account resolves to
    /// `None`.
    pub async fn load(store: &Arc<dyn AccessStore>, user_id: Uuid) -> Result<Option<Self>, ServiceError> {
        let Some(user) = store.find_user_by_id(user_id).await? else {
            return Ok(None);
        };
        let memberships = store.memberships_for_user(user_id).await?;
        Ok(Some(Self::new(user, &memberships)))
    }
}
