//! Request middleware

pub mod jwt;

pub use jwt::{require_admin, require_auth, Claims};
