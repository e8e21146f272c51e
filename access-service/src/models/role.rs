//! Two-axis role model: a global role per user, and an independent role per
//! site membership. The axes are never collapsed into one ranking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account-wide role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalRole {
    GlobalAdmin,
    User,
}

impl GlobalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalRole::GlobalAdmin => "GLOBAL_ADMIN",
            GlobalRole::User => "USER",
        }
    }
}

impl FromStr for GlobalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GLOBAL_ADMIN" => Ok(GlobalRole::GlobalAdmin),
            "USER" => Ok(GlobalRole::User),
            _ => Err(format!("Invalid global role: {}", s)),
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role held within a single site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteRole {
    SiteAdmin,
    #[default]
    SiteUser,
}

impl SiteRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteRole::SiteAdmin => "SITE_ADMIN",
            SiteRole::SiteUser => "SITE_USER",
        }
    }
}

impl FromStr for SiteRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SITE_ADMIN" => Ok(SiteRole::SiteAdmin),
            "SITE_USER" => Ok(SiteRole::SiteUser),
            _ => Err(format!("Invalid site role: {}", s)),
        }
    }
}

impl fmt::Display for SiteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_role_defaults_to_least_privilege() {
        assert_eq!(SiteRole::default(), SiteRole::SiteUser);
    }

    #[test]
    fn roles_round_trip_through_their_codes() {
        for role in [GlobalRole::GlobalAdmin, GlobalRole::User] {
            assert_eq!(role.as_str().parse::<GlobalRole>(), Ok(role));
        }
        for role in [SiteRole::SiteAdmin, SiteRole::SiteUser] {
            assert_eq!(role.as_str().parse::<SiteRole>(), Ok(role));
        }
        assert!("ADMIN".parse::<GlobalRole>().is_err());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&SiteRole::SiteAdmin).unwrap(),
            "\"SITE_ADMIN\""
        );
        let role: GlobalRole = serde_json::from_str("\"GLOBAL_ADMIN\"").unwrap();
        assert_eq!(role, GlobalRole::GlobalAdmin);
    }
}
