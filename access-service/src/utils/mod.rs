pub mod password;
pub mod validation;

pub use password::{
    validate_password, Argon2Hasher, Password, PasswordHashString, PasswordHasher,
    MAX_PASSWORD_LEN, MIN_PASSWORD_LEN,
};
pub use validation::ValidatedJson;
