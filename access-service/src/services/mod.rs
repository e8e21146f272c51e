pub mod database;
pub mod email;
pub mod error;
pub mod invitation;
pub mod jwt;
pub mod membership_policy;
pub mod memory_store;
pub mod password_reset;
pub mod scope;
pub mod site_registry;
pub mod store;
pub mod token_vault;
pub mod users;

pub use database::Database;
pub use email::{MailError, MailSender, MockMailSender, SentMail, SmtpMailer};
pub use error::{ErrorKind, ServiceError};
pub use invitation::{
    AcceptedInvitation, CreatedInvitation, InvitationManager, InvitationPreview, NewInvitation,
};
pub use jwt::{AccessTokenClaims, JwtService, TokenResponse};
pub use membership_policy::{MembershipChange, MembershipPolicy};
pub use memory_store::MemoryStore;
pub use password_reset::{IssuedReset, MailDelivery, PasswordResetManager};
pub use scope::{Actor, Scope};
pub use site_registry::{PgSiteRegistry, SiteRegistry, StaticSiteRegistry};
pub use store::{AccessStore, StoreError};
pub use token_vault::{TokenPurpose, TokenSecret, TokenVault};
pub use users::{ScopedUser, UserDirectory};
