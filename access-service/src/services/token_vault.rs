//! Opaque, single-use, expiring secrets shared by invitations and password
//! resets.
//!
//! The plaintext is 32 bytes from the OS RNG, hex encoded, and is handed to
//! the caller exactly once. Only its SHA-256 hex digest is persisted. All
//! subject data lives server-side next to the digest.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::error::ServiceError;
use super::store::{AccessStore, ConsumeEffect, ConsumeOutcome, TokenRef};
use crate::models::{normalize_email, Invitation, PasswordResetToken, SiteGrant, TokenRecord};

pub const TOKEN_BYTES: usize = 32;
const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

/// Plaintext token. Debug output is redacted so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(String);

impl TokenSecret {
    pub(crate) fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn digest(&self) -> String {
        digest_token(&self.0)
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

/// SHA-256 hex digest of a plaintext token.
pub fn digest_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

fn is_well_formed(plaintext: &str) -> bool {
    plaintext.len() == TOKEN_HEX_LEN && plaintext.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Invite,
    Reset,
}

/// What a token is issued for. Becomes the payload persisted beside the
/// digest.
#[derive(Debug, Clone)]
pub enum TokenSubject {
    Invite {
        email: String,
        username: String,
        invited_by: Uuid,
        sites: Vec<SiteGrant>,
    },
    Reset {
        user_id: Uuid,
    },
}

impl TokenSubject {
    pub fn purpose(&self) -> TokenPurpose {
        match self {
            TokenSubject::Invite { .. } => TokenPurpose::Invite,
            TokenSubject::Reset { .. } => TokenPurpose::Reset,
        }
    }
}

/// A persisted token record of either purpose.
#[derive(Debug, Clone)]
pub enum IssuedRecord {
    Invitation(Invitation),
    PasswordReset(PasswordResetToken),
}

impl IssuedRecord {
    pub fn token_ref(&self) -> TokenRef {
        match self {
            IssuedRecord::Invitation(i) => TokenRef::Invitation(i.id),
            IssuedRecord::PasswordReset(r) => TokenRef::PasswordReset(r.id),
        }
    }

    pub fn purpose(&self) -> TokenPurpose {
        match self {
            IssuedRecord::Invitation(_) => TokenPurpose::Invite,
            IssuedRecord::PasswordReset(_) => TokenPurpose::Reset,
        }
    }

    pub fn into_invitation(self) -> Option<Invitation> {
        match self {
            IssuedRecord::Invitation(i) => Some(i),
            IssuedRecord::PasswordReset(_) => None,
        }
    }

    pub fn into_password_reset(self) -> Option<PasswordResetToken> {
        match self {
            IssuedRecord::PasswordReset(r) => Some(r),
            IssuedRecord::Invitation(_) => None,
        }
    }
}

/// Checks a looked-up record against the derived digest and the clock.
/// Unknown, used and expired all collapse into one error.
fn accept_alive<R: TokenRecord>(
    record: Option<R>,
    derived_digest: &str,
    now: DateTime<Utc>,
) -> Result<R, ServiceError> {
    let record = record.ok_or(ServiceError::InvalidOrExpired)?;

    let matches: bool = record
        .token_digest()
        .as_bytes()
        .ct_eq(derived_digest.as_bytes())
        .into();

    if matches && record.is_alive_at(now) {
        Ok(record)
    } else {
        Err(ServiceError::InvalidOrExpired)
    }
}

#[derive(Clone)]
pub struct TokenVault {
    store: Arc<dyn AccessStore>,
}

impl TokenVault {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    /// Generates a secret and persists its digest with the subject payload.
    /// The returned secret is the only copy of the plaintext.
    #[tracing::instrument(skip(self, subject), fields(purpose = ?subject.purpose()))]
    pub async fn issue(
        &self,
        subject: TokenSubject,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(TokenSecret, IssuedRecord), ServiceError> {
        let secret = TokenSecret::generate();
        let token_digest = secret.digest();
        let expires_at = now + ttl;

        let record = match subject {
            TokenSubject::Invite {
                email,
                username,
                invited_by,
                sites,
            } => {
                let invitation = Invitation {
                    id: Uuid::new_v4(),
                    email: normalize_email(&email),
                    username,
                    token_digest,
                    invited_by,
                    expires_at,
                    used_at: None,
                    created_at: now,
                    sites,
                };
                self.store.insert_invitation(&invitation, now).await?;
                IssuedRecord::Invitation(invitation)
            }
            TokenSubject::Reset { user_id } => {
                let token = PasswordResetToken {
                    id: Uuid::new_v4(),
                    user_id,
                    token_digest,
                    expires_at,
                    used_at: None,
                    created_at: now,
                };
                self.store.insert_password_reset(&token).await?;
                IssuedRecord::PasswordReset(token)
            }
        };

        tracing::debug!(expires_at = %expires_at, "Token issued");
        Ok((secret, record))
    }

    /// Resolves a plaintext token to its live record.
    pub async fn verify(
        &self,
        purpose: TokenPurpose,
        plaintext: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedRecord, ServiceError> {
        match purpose {
            TokenPurpose::Invite => self
                .verify_invitation(plaintext, now)
                .await
                .map(IssuedRecord::Invitation),
            TokenPurpose::Reset => self
                .verify_reset(plaintext, now)
                .await
                .map(IssuedRecord::PasswordReset),
        }
    }

    pub async fn verify_invitation(
        &self,
        plaintext: &str,
        now: DateTime<Utc>,
    ) -> Result<Invitation, ServiceError> {
        if !is_well_formed(plaintext) {
            return Err(ServiceError::InvalidOrExpired);
        }
        let derived = digest_token(plaintext);
        let record = self.store.find_invitation_by_digest(&derived).await?;
        accept_alive(record, &derived, now)
    }

    pub async fn verify_reset(
        &self,
        plaintext: &str,
        now: DateTime<Utc>,
    ) -> Result<PasswordResetToken, ServiceError> {
        if !is_well_formed(plaintext) {
            return Err(ServiceError::InvalidOrExpired);
        }
        let derived = digest_token(plaintext);
        let record = self.store.find_password_reset_by_digest(&derived).await?;
        accept_alive(record, &derived, now)
    }

    /// Marks the token used and commits `effect` with it. A token that died
    /// since verification (concurrent redemption, expiry) yields
    /// `InvalidOrExpired` and nothing is written.
    #[tracing::instrument(skip(self, effect))]
    pub async fn consume(
        &self,
        token: TokenRef,
        effect: ConsumeEffect,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        match self.store.consume_token(token, now, effect).await? {
            ConsumeOutcome::Consumed => Ok(()),
            ConsumeOutcome::Dead => {
                tracing::info!("Token was already dead at consumption");
                Err(ServiceError::InvalidOrExpired)
            }
        }
    }
}
