//! Site identifiers and memberships.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::SiteRole;

/// Identifier of a site owned by the inventory side of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub i64);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SiteId {
    fn from(id: i64) -> Self {
        SiteId(id)
    }
}

/// A user's access to one site. Unique on `(site_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteMembership {
    pub site_id: SiteId,
    pub user_id: Uuid,
    pub site_role: SiteRole,
}

impl SiteMembership {
    pub fn new(site_id: SiteId, user_id: Uuid, site_role: SiteRole) -> Self {
        Self {
            site_id,
            user_id,
            site_role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.site_role == SiteRole::SiteAdmin
    }
}

/// A requested `(site, role)` pair, used both for membership updates and for
/// the sites carried by an invitation. The role defaults to `SITE_USER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteGrant {
    pub site_id: SiteId,
    #[serde(default)]
    pub site_role: SiteRole,
}

impl SiteGrant {
    pub fn new(site_id: impl Into<SiteId>, site_role: SiteRole) -> Self {
        Self {
            site_id: site_id.into(),
            site_role,
        }
    }
}
