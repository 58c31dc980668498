//! Token verification.

pub mod jwt;

pub use jwt::{Claims, JwtConfig};
