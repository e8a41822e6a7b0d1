//! Token issuance and request authentication.

mod middleware;
mod tokens;

pub use middleware::AuthUser;
pub use tokens::{IssuedToken, TokenRegistry};
