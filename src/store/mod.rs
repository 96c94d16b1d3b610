//! Persistence for at-most-once effects.

pub mod idempotency;

pub use idempotency::{default_idempotency_db_path, IdempotencyStore};
