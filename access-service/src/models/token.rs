//! Shared contract for single-use, expiring token records.

use chrono::{DateTime, Utc};

/// A persisted token: only the digest of the secret is ever stored.
pub trait TokenRecord {
    fn token_digest(&self) -> &str;
    fn expires_at(&self) -> DateTime<Utc>;
    fn used_at(&self) -> Option<DateTime<Utc>>;

    /// A token is alive while unused and strictly before its expiry.
    fn is_alive_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at().is_none() && now < self.expires_at()
    }

    fn is_alive(&self) -> bool {
        self.is_alive_at(Utc::now())
    }
}
