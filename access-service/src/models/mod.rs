pub mod invitation;
pub mod password_reset;
pub mod role;
pub mod site;
pub mod token;
pub mod user;

pub use invitation::{Invitation, InvitationResponse, InvitationState};
pub use password_reset::PasswordResetToken;
pub use role::{GlobalRole, SiteRole};
pub use site::{SiteGrant, SiteId, SiteMembership};
pub use token::TokenRecord;
pub use user::{normalize_email, User, UserResponse};
