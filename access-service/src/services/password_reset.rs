//! Admin-initiated password reset links.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::email::{MailError, MailSender};
use super::error::ServiceError;
use super::scope::Actor;
use super::store::{AccessStore, ConsumeEffect};
use super::token_vault::{TokenPurpose, TokenSecret, TokenSubject, TokenVault};
use crate::models::{SiteId, User};
use crate::utils::{validate_password, Password, PasswordHasher};

/// Outcome of the best-effort notification mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MailDelivery {
    Sent,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct IssuedReset {
    pub user_id: Uuid,
    pub token: TokenSecret,
    pub reset_url: String,
    pub expires_at: DateTime<Utc>,
    pub mail: MailDelivery,
}

pub fn reset_url(public_base_url: &str, token: &TokenSecret) -> String {
    format!(
        "{}/reset-password?token={}",
        public_base_url.trim_end_matches('/'),
        urlencoding::encode(token.expose())
    )
}

fn reset_mail_body(user: &User, url: &str, ttl: Duration) -> String {
    format!(
        "Hello {},\n\n\
         An administrator created a password reset link for your account:\n\n\
         {}\n\n\
         The link can be used once and expires in {} minutes.",
        user.username,
        url,
        ttl.num_minutes()
    )
}

#[derive(Clone)]
pub struct PasswordResetManager {
    store: Arc<dyn AccessStore>,
    vault: TokenVault,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn MailSender>,
    ttl: Duration,
    mail_timeout: std::time::Duration,
    public_base_url: String,
}

impl PasswordResetManager {
    pub fn new(
        store: Arc<dyn AccessStore>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn MailSender>,
        ttl: Duration,
        mail_timeout: std::time::Duration,
        public_base_url: String,
    ) -> Self {
        Self {
            vault: TokenVault::new(store.clone()),
            store,
            hasher,
            mailer,
            ttl,
            mail_timeout,
            public_base_url,
        }
    }

    /// Targets outside the actor's sites are reported as missing. Site admins
    /// only obtain links for users whose every membership lies within their
    /// administered sites, and never for a global admin.
    async fn visible_target(&self, actor: &Actor, user_id: Uuid) -> Result<User, ServiceError> {
        let scope = &actor.scope;
        scope.require_admin_scope()?;

        let target = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if scope.is_global_admin {
            return Ok(target);
        }

        let shared: Vec<SiteId> = self
            .store
            .memberships_for_user(user_id)
            .await?
            .into_iter()
            .map(|m| m.site_id)
            .collect();
        if !scope.intersects(&shared) {
            return Err(ServiceError::NotFound);
        }
        if target.is_global_admin() {
            return Err(ServiceError::Unauthorized);
        }
        // Taking over the account must not reach sites the actor does not run.
        if !scope.covers(&shared) {
            tracing::warn!(
                target_user_id = %user_id,
                "Reset refused: target holds access outside actor scope"
            );
            return Err(ServiceError::Unauthorized);
        }
        Ok(target)
    }

    /// Issues a reset token, then attempts delivery. The token is committed
    /// before the mail is sent; delivery problems only show up in `mail`.
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id()))]
    pub async fn create(
        &self,
        actor: &Actor,
        target_user_id: Uuid,
    ) -> Result<IssuedReset, ServiceError> {
        let target = self.visible_target(actor, target_user_id).await?;

        let now = Utc::now();
        let (token, record) = self
            .vault
            .issue(TokenSubject::Reset { user_id: target.id }, self.ttl, now)
            .await?;
        let url = reset_url(&self.public_base_url, &token);

        let body = reset_mail_body(&target, &url, self.ttl);
        let mail = match tokio::time::timeout(
            self.mail_timeout,
            self.mailer.send(&target.email, "Reset your password", &body),
        )
        .await
        {
            Ok(Ok(())) => MailDelivery::Sent,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, user_id = %target.id, "Password reset mail failed");
                MailDelivery::Failed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                let e = MailError::Timeout(self.mail_timeout);
                tracing::warn!(error = %e, user_id = %target.id, "Password reset mail failed");
                MailDelivery::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let expires_at = record
            .into_password_reset()
            .map(|r| r.expires_at)
            .unwrap_or(now + self.ttl);

        tracing::info!(user_id = %target.id, "Password reset link created");

        Ok(IssuedReset {
            user_id: target.id,
            token,
            reset_url: url,
            expires_at,
            mail,
        })
    }

    /// Public. Replaces the password digest and burns the token together.
    #[tracing::instrument(skip(self, token, new_password))]
    pub async fn redeem(&self, token: &str, new_password: Password) -> Result<Uuid, ServiceError> {
        validate_password(new_password.as_str()).map_err(ServiceError::ValidationFailed)?;

        let record = self
            .vault
            .verify(TokenPurpose::Reset, token, Utc::now())
            .await?;
        let token_ref = record.token_ref();
        let reset = record
            .into_password_reset()
            .ok_or(ServiceError::InvalidOrExpired)?;

        let digest = self.hasher.hash(&new_password).await?;
        self.vault
            .consume(
                token_ref,
                ConsumeEffect::SetPassword {
                    user_id: reset.user_id,
                    password_digest: digest.into_string(),
                },
                Utc::now(),
            )
            .await?;

        tracing::info!(user_id = %reset.user_id, "Password reset redeemed");
        Ok(reset.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_url_embeds_token_as_query() {
        let token = TokenSecret::generate();
        assert_eq!(
            reset_url("https://labels.example.com", &token),
            format!(
                "https://labels.example.com/reset-password?token={}",
                token.expose()
            )
        );
    }

    #[test]
    fn delivery_status_serializes_with_tag() {
        let failed = MailDelivery::Failed {
            reason: "timeout".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "timeout");
        assert_eq!(
            serde_json::to_value(MailDelivery::Sent).unwrap()["status"],
            "sent"
        );
    }
}
