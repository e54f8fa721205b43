//! Distributed Lock Module
//!
//! Named, time-bounded mutual exclusion built on the store's set-if-absent lease primitive.
//!
//! ## Guarantees
//! - **Exclusion**: at most one live lease per `LockName`; the store's conditional set decides.
//! - **Crash safety**: every lease carries a TTL and self-expires if its holder disappears.
//! - **Bounded waiting**: acquisition gives up after a fixed number of attempts with random
//!   backoff and reports `LockError::Contended`; callers pick their own retry policy.
//! - **Safe release**: release deletes only a lease still owned by the caller's token and is
//!   a no-op when the lease is already gone.

pub mod manager;

pub use manager::{LockLease, LockManager, LockSettings};
