//! PostgreSQL implementation of the access store.
//!
//! Rows are read into private `*Row` structs and converted to domain records
//! immediately; loosely typed rows never leave this module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use super::store::{
    AccessStore, ConsumeEffect, ConsumeOutcome, MembershipDiff, StoreError, TokenRef,
};
use crate::models::{
    normalize_email, GlobalRole, Invitation, PasswordResetToken, SiteGrant, SiteId,
    SiteMembership, SiteRole, User,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_invitation_sites(
        &self,
        invitations: Vec<InvitationRow>,
    ) -> Result<Vec<Invitation>, StoreError> {
        if invitations.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = invitations.iter().map(|i| i.id).collect();
        let site_rows = sqlx::query_as::<_, InvitationSiteRow>(
            r#"
            SELECT invitation_id, site_id, site_role
            FROM invitation_sites
            WHERE invitation_id = ANY($1)
            ORDER BY invitation_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut sites_by_invitation: HashMap<Uuid, Vec<SiteGrant>> = HashMap::new();
        for row in site_rows {
            let invitation_id = row.invitation_id;
            sites_by_invitation
                .entry(invitation_id)
                .or_default()
                .push(row.try_into()?);
        }

        invitations
            .into_iter()
            .map(|row| {
                let sites = sites_by_invitation.remove(&row.id).unwrap_or_default();
                row.into_invitation(sites)
            })
            .collect()
    }
}

// ==================== Row types ====================

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    username: String,
    password_digest: String,
    global_role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            username: row.username,
            password_digest: row.password_digest,
            global_role: row.global_role.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MembershipRow {
    site_id: i64,
    user_id: Uuid,
    site_role: String,
}

impl TryFrom<MembershipRow> for SiteMembership {
    type Error = StoreError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(SiteMembership {
            site_id: SiteId(row.site_id),
            user_id: row.user_id,
            site_role: row.site_role.parse().map_err(StoreError::Corrupt)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct InvitationRow {
    id: Uuid,
    email: String,
    username: String,
    token_digest: String,
    invited_by: Uuid,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl InvitationRow {
    fn into_invitation(self, sites: Vec<SiteGrant>) -> Result<Invitation, StoreError> {
        Ok(Invitation {
            id: self.id,
            email: self.email,
            username: self.username,
            token_digest: self.token_digest,
            invited_by: self.invited_by,
            expires_at: self.expires_at,
            used_at: self.used_at,
            created_at: self.created_at,
            sites,
        })
    }
}

#[derive(Debug, FromRow)]
struct InvitationSiteRow {
    invitation_id: Uuid,
    site_id: i64,
    site_role: String,
}

impl TryFrom<InvitationSiteRow> for SiteGrant {
    type Error = StoreError;

    fn try_from(row: InvitationSiteRow) -> Result<Self, Self::Error> {
        let site_role: SiteRole = row.site_role.parse().map_err(StoreError::Corrupt)?;
        Ok(SiteGrant::new(row.site_id, site_role))
    }
}

#[derive(Debug, FromRow)]
struct PasswordResetRow {
    id: Uuid,
    user_id: Uuid,
    token_digest: String,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<PasswordResetRow> for PasswordResetToken {
    fn from(row: PasswordResetRow) -> Self {
        PasswordResetToken {
            id: row.id,
            user_id: row.user_id,
            token_digest: row.token_digest,
            expires_at: row.expires_at,
            used_at: row.used_at,
            created_at: row.created_at,
        }
    }
}

// ==================== Helpers ====================

/// Unique violations carry the constraint (or unique index) name so the
/// service layer can tell a duplicate email from anything else.
fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate(db_err.constraint().unwrap_or("unknown").to_string());
        }
    }
    StoreError::Database(e)
}

fn users_from_rows(rows: Vec<UserRow>) -> Result<Vec<User>, StoreError> {
    rows.into_iter().map(User::try_from).collect()
}

fn memberships_from_rows(rows: Vec<MembershipRow>) -> Result<Vec<SiteMembership>, StoreError> {
    rows.into_iter().map(SiteMembership::try_from).collect()
}

fn site_ids(sites: impl IntoIterator<Item = SiteId>) -> Vec<i64> {
    sites.into_iter().map(|s| s.0).collect()
}

async fn insert_user_with(conn: &mut PgConnection, user: &User) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO users (id, email, username, password_digest, global_role, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.username)
    .bind(&user.password_digest)
    .bind(user.global_role.as_str())
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn upsert_membership_with(
    conn: &mut PgConnection,
    membership: &SiteMembership,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO site_memberships (site_id, user_id, site_role)
        VALUES ($1, $2, $3)
        ON CONFLICT (site_id, user_id) DO UPDATE SET site_role = EXCLUDED.site_role
        "#,
    )
    .bind(membership.site_id.0)
    .bind(membership.user_id)
    .bind(membership.site_role.as_str())
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait]
impl AccessStore for Database {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                StoreError::Unavailable(e.to_string())
            })?;
        Ok(())
    }

    // ==================== User Operations ====================

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE lower(email) = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(User::try_from)
            .transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        insert_user_with(&mut conn, user).await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY email")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        users_from_rows(rows)
    }

    async fn list_users_in_sites(&self, sites: &BTreeSet<SiteId>) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.* FROM users u
            WHERE EXISTS (
                SELECT 1 FROM site_memberships m
                WHERE m.user_id = u.id AND m.site_id = ANY($1)
            )
            ORDER BY u.email
            "#,
        )
        .bind(site_ids(sites.iter().copied()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        users_from_rows(rows)
    }

    async fn update_global_role(
        &self,
        user_id: Uuid,
        role: GlobalRole,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE users SET global_role = $2, updated_at = $3 WHERE id = $1")
                .bind(user_id)
                .bind(role.as_str())
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool, StoreError> {
        // Memberships, reset tokens and issued invitations go with the user
        // through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Membership Operations ====================

    async fn memberships_for_user(&self, user_id: Uuid) -> Result<Vec<SiteMembership>, StoreError> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            "SELECT site_id, user_id, site_role FROM site_memberships WHERE user_id = $1 ORDER BY site_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        memberships_from_rows(rows)
    }

    async fn memberships_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<SiteMembership>, StoreError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT site_id, user_id, site_role FROM site_memberships
            WHERE user_id = ANY($1)
            ORDER BY user_id, site_id
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        memberships_from_rows(rows)
    }

    async fn apply_membership_diff(
        &self,
        user_id: Uuid,
        diff: &MembershipDiff,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for membership in &diff.upserts {
            upsert_membership_with(&mut tx, membership).await?;
        }

        if !diff.removals.is_empty() {
            sqlx::query("DELETE FROM site_memberships WHERE user_id = $1 AND site_id = ANY($2)")
                .bind(user_id)
                .bind(site_ids(diff.removals.iter().copied()))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    // ==================== Invitation Operations ====================

    async fn insert_invitation(
        &self,
        invitation: &Invitation,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "DELETE FROM invitations WHERE lower(email) = lower($1) AND used_at IS NULL AND expires_at <= $2",
        )
        .bind(&invitation.email)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO invitations (id, email, username, token_digest, invited_by, expires_at, used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(invitation.id)
        .bind(&invitation.email)
        .bind(&invitation.username)
        .bind(&invitation.token_digest)
        .bind(invitation.invited_by)
        .bind(invitation.expires_at)
        .bind(invitation.used_at)
        .bind(invitation.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for (position, site) in invitation.sites.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invitation_sites (invitation_id, position, site_id, site_role)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(invitation.id)
            .bind(position as i32)
            .bind(site.site_id.0)
            .bind(site.site_role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_invitation_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        let row = sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(self
            .load_invitation_sites(row.into_iter().collect())
            .await?
            .pop())
    }

    async fn find_invitation_by_digest(
        &self,
        token_digest: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let row = sqlx::query_as::<_, InvitationRow>(
            "SELECT * FROM invitations WHERE token_digest = $1",
        )
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(self
            .load_invitation_sites(row.into_iter().collect())
            .await?
            .pop())
    }

    async fn find_pending_invitation_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        let row = sqlx::query_as::<_, InvitationRow>(
            r#"
            SELECT * FROM invitations
            WHERE lower(email) = $1 AND used_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(normalize_email(email))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(self
            .load_invitation_sites(row.into_iter().collect())
            .await?
            .pop())
    }

    async fn list_pending_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, StoreError> {
        let rows = sqlx::query_as::<_, InvitationRow>(
            r#"
            SELECT * FROM invitations
            WHERE used_at IS NULL AND expires_at > $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.load_invitation_sites(rows).await
    }

    async fn delete_pending_invitation(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM invitations WHERE id = $1 AND used_at IS NULL AND expires_at > $2",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Password Reset Operations ====================

    async fn insert_password_reset(&self, token: &PasswordResetToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_digest, expires_at, used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_digest)
        .bind(token.expires_at)
        .bind(token.used_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_password_reset_by_digest(
        &self,
        token_digest: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        Ok(sqlx::query_as::<_, PasswordResetRow>(
            "SELECT * FROM password_reset_tokens WHERE token_digest = $1",
        )
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .map(PasswordResetToken::from))
    }

    // ==================== Token Consumption ====================

    async fn consume_token(
        &self,
        token: TokenRef,
        now: DateTime<Utc>,
        effect: ConsumeEffect,
    ) -> Result<ConsumeOutcome, StoreError> {
        // Dropping `tx` on any early return rolls everything back.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let (sql, id) = match token {
            TokenRef::Invitation(id) => (
                "UPDATE invitations SET used_at = $2 WHERE id = $1 AND used_at IS NULL AND expires_at > $2",
                id,
            ),
            TokenRef::PasswordReset(id) => (
                "UPDATE password_reset_tokens SET used_at = $2 WHERE id = $1 AND used_at IS NULL AND expires_at > $2",
                id,
            ),
        };

        let consumed = sqlx::query(sql)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(ConsumeOutcome::Dead);
        }

        match effect {
            ConsumeEffect::Nothing => {}
            ConsumeEffect::CreateAccount { user, memberships } => {
                insert_user_with(&mut tx, &user).await?;
                for membership in &memberships {
                    upsert_membership_with(&mut tx, membership).await?;
                }
            }
            ConsumeEffect::SetPassword {
                user_id,
                password_digest,
            } => {
                let updated = sqlx::query(
                    "UPDATE users SET password_digest = $2, updated_at = $3 WHERE id = $1",
                )
                .bind(user_id)
                .bind(&password_digest)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

                if updated.rows_affected() == 0 {
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    return Ok(ConsumeOutcome::Dead);
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ConsumeOutcome::Consumed)
    }
}
