use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::collections::BTreeSet;

use super::store::StoreError;
use crate::models::SiteId;

/// Existence checks against the sites owned by the inventory side.
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    async fn site_exists(&self, site_id: SiteId) -> Result<bool, StoreError>;

    /// Requested sites that do not exist, in request order.
    async fn missing_sites(&self, sites: &[SiteId]) -> Result<Vec<SiteId>, StoreError> {
        let mut missing = Vec::new();
        for site in sites {
            if !self.site_exists(*site).await? {
                missing.push(*site);
            }
        }
        Ok(missing)
    }
}

/// Reads the shared `sites` table.
#[derive(Clone)]
pub struct PgSiteRegistry {
    pool: PgPool,
}

impl PgSiteRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteRegistry for PgSiteRegistry {
    async fn site_exists(&self, site_id: SiteId) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sites WHERE id = $1)")
            .bind(site_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn missing_sites(&self, sites: &[SiteId]) -> Result<Vec<SiteId>, StoreError> {
        if sites.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = sites.iter().map(|s| s.0).collect();
        let found: Vec<i64> = sqlx::query_scalar("SELECT id FROM sites WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        let found: BTreeSet<i64> = found.into_iter().collect();
        Ok(sites
            .iter()
            .copied()
            .filter(|s| !found.contains(&s.0))
            .collect())
    }
}

/// Fixed set of sites.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteRegistry {
    sites: BTreeSet<SiteId>,
}

impl StaticSiteRegistry {
    pub fn new(sites: impl IntoIterator<Item = i64>) -> Self {
        Self {
            sites: sites.into_iter().map(SiteId).collect(),
        }
    }
}

#[async_trait]
impl SiteRegistry for StaticSiteRegistry {
    async fn site_exists(&self, site_id: SiteId) -> Result<bool, StoreError> {
        Ok(self.sites.contains(&site_id))
    }
}
