//! User model - accounts with a global role.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::GlobalRole;

/// User entity.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_digest: String,
    pub global_role: GlobalRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user. The email is normalised on the way in.
    pub fn new(
        email: &str,
        username: String,
        password_digest: String,
        global_role: GlobalRole,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            username,
            password_digest,
            global_role,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_global_admin(&self) -> bool {
        self.global_role == GlobalRole::GlobalAdmin
    }

    /// Convert to sanitized response (no password digest).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub global_role: GlobalRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            username: u.username,
            global_role: u.global_role,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Emails are unique case-insensitively; every lookup and write goes through
/// this.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
