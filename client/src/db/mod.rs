//! Local SQLite persistence: synchronized tables and the change queue.

mod pool;
mod queue;
mod records;

pub use pool::*;
pub use queue::*;
pub use records::*;
