//! Password reset token model.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::TokenRecord;

/// Reset token for an existing user.
#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord for PasswordResetToken {
    fn token_digest(&self) -> &str {
        &self.token_digest
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn used_at(&self) -> Option<DateTime<Utc>> {
        self.used_at
    }
}
