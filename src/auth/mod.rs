//! Password hashing, access tokens and account management

pub mod password;
pub mod service;
pub mod token;

pub use service::{require_admin, AuthService, LoginResponse};
pub use token::{Claims, TokenCodec};
