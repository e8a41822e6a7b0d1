//! Row persistence: PostgreSQL when configured, memory otherwise.

mod pool;
mod rows;

pub use pool::*;
pub use rows::*;
