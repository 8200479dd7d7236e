//! Credentials for the board API
//!
//! Signed HS256 bearer tokens and bcrypt password hashes.

pub mod password;
pub mod token;

pub use password::PasswordError;
pub use token::{Claims, TokenError, TokenSigner};
