pub mod auth;
pub mod health;
pub mod invitations;
pub mod users;
