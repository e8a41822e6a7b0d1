//! Request handlers for row access and sign-in.

mod auth;
mod rows;

pub use auth::*;
pub use rows::*;
