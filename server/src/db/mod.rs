//! Database module for PostgreSQL persistence.

mod items;
mod pool;

pub use items::*;
pub use pool::*;
