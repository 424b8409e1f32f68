//! Database module for PostgreSQL persistence.

mod idempotency;
mod media;
mod pool;
mod recipes;

pub use idempotency::*;
pub use media::*;
pub use pool::*;
pub use recipes::*;
