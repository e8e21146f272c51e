//! Validates and applies a requested membership list for one user.
//!
//! Rules are evaluated in a fixed order so the reported rejection is stable:
//! request validation, self-protection, admin scope, target existence,
//! no-removal, no-demotion, out-of-scope sites, site existence. Only then is a
//! diff computed and written in one transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use super::scope::{Actor, Scope};
use super::site_registry::SiteRegistry;
use super::store::{AccessStore, MembershipDiff};
use crate::models::{SiteGrant, SiteId, SiteMembership, SiteRole};

/// Result of an accepted update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub diff: MembershipDiff,
    /// The target's memberships after the update, limited to sites the actor
    /// administers.
    pub memberships: Vec<SiteMembership>,
}

/// Rejects a request that names the same site twice.
pub fn validate_request(requested: &[SiteGrant]) -> Result<(), ServiceError> {
    let mut seen = BTreeSet::new();
    for grant in requested {
        if !seen.insert(grant.site_id) {
            return Err(ServiceError::validation(format!(
                "Site {} is listed more than once",
                grant.site_id
            )));
        }
    }
    Ok(())
}

/// Site-admin rules over the target's current memberships. Global admins
/// pass unconditionally.
pub fn check_policy(
    scope: &Scope,
    current: &[SiteMembership],
    requested: &[SiteGrant],
) -> Result<(), ServiceError> {
    if scope.is_global_admin {
        return Ok(());
    }

    let requested_roles: BTreeMap<SiteId, SiteRole> =
        requested.iter().map(|g| (g.site_id, g.site_role)).collect();
    let in_scope_current: Vec<&SiteMembership> = current
        .iter()
        .filter(|m| scope.administers(m.site_id))
        .collect();

    if in_scope_current
        .iter()
        .any(|m| !requested_roles.contains_key(&m.site_id))
    {
        return Err(ServiceError::CannotRemoveSiteAccess);
    }

    if in_scope_current
        .iter()
        .filter(|m| m.is_admin())
        .any(|m| requested_roles.get(&m.site_id) != Some(&SiteRole::SiteAdmin))
    {
        return Err(ServiceError::CannotDemoteSiteAdmin);
    }

    if requested.iter().any(|g| !scope.administers(g.site_id)) {
        return Err(ServiceError::OutOfScope);
    }

    Ok(())
}

/// Inserts, role changes and deletions needed to move from `current` to
/// `requested`, touching only sites the actor administers.
pub fn compute_diff(
    scope: &Scope,
    target: Uuid,
    current: &[SiteMembership],
    requested: &[SiteGrant],
) -> MembershipDiff {
    let current_roles: BTreeMap<SiteId, SiteRole> =
        current.iter().map(|m| (m.site_id, m.site_role)).collect();
    let requested_sites: BTreeSet<SiteId> = requested.iter().map(|g| g.site_id).collect();

    let upserts = requested
        .iter()
        .filter(|g| scope.administers(g.site_id))
        .filter(|g| current_roles.get(&g.site_id) != Some(&g.site_role))
        .map(|g| SiteMembership::new(g.site_id, target, g.site_role))
        .collect();

    let removals = current
        .iter()
        .filter(|m| scope.administers(m.site_id) && !requested_sites.contains(&m.site_id))
        .map(|m| m.site_id)
        .collect();

    MembershipDiff { upserts, removals }
}

/// Memberships after `diff` is applied, ordered by site.
fn resulting_memberships(current: &[SiteMembership], diff: &MembershipDiff) -> Vec<SiteMembership> {
    let mut by_site: BTreeMap<SiteId, SiteMembership> =
        current.iter().map(|m| (m.site_id, m.clone())).collect();
    for site in &diff.removals {
        by_site.remove(site);
    }
    for membership in &diff.upserts {
        by_site.insert(membership.site_id, membership.clone());
    }
    by_site.into_values().collect()
}

#[derive(Clone)]
pub struct MembershipPolicy {
    store: Arc<dyn AccessStore>,
    sites: Arc<dyn SiteRegistry>,
}

impl MembershipPolicy {
    pub fn new(store: Arc<dyn AccessStore>, sites: Arc<dyn SiteRegistry>) -> Self {
        Self { store, sites }
    }

    #[tracing::instrument(skip(self, actor, requested), fields(actor_id = %actor.id()))]
    pub async fn apply_membership_update(
        &self,
        actor: &Actor,
        target_user_id: Uuid,
        requested: Vec<SiteGrant>,
    ) -> Result<MembershipChange, ServiceError> {
        validate_request(&requested)?;

        let scope = &actor.scope;
        if !scope.is_global_admin && target_user_id == actor.id() {
            return Err(ServiceError::CannotModifySelf);
        }
        scope.require_admin_scope()?;

        if self.store.find_user_by_id(target_user_id).await?.is_none() {
            return Err(ServiceError::NotFound);
        }
        let current = self.store.memberships_for_user(target_user_id).await?;

        check_policy(scope, &current, &requested)?;

        let requested_sites: Vec<SiteId> = requested.iter().map(|g| g.site_id).collect();
        let missing = self.sites.missing_sites(&requested_sites).await?;
        if let Some(site) = missing.first() {
            return Err(ServiceError::validation(format!("Site {} does not exist", site)));
        }

        let diff = compute_diff(scope, target_user_id, &current, &requested);
        if !diff.is_empty() {
            self.store.apply_membership_diff(target_user_id, &diff).await?;
        }

        tracing::info!(
            target_user_id = %target_user_id,
            upserts = diff.upserts.len(),
            removals = diff.removals.len(),
            "Site memberships updated"
        );

        let memberships = resulting_memberships(&current, &diff)
            .into_iter()
            .filter(|m| scope.administers(m.site_id))
            .collect();

        Ok(MembershipChange { diff, memberships })
    }
}
