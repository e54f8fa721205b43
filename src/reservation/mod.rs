//! Reservation Module
//!
//! The state machine that takes one unit of stock for one requester.
//!
//! ```text
//! Start -> ShardChosen -> LockedShard -> [Decremented | depleted]
//! depleted -> LockedGlobal -> [Transferred -> Decremented | InsufficientStock]
//! ```
//!
//! Lock failures end the attempt as `LockFailure`; store failures while a lock is held end it
//! as `TransferFailure`. Locks are released before any terminal state is reported.
//!
//! ## Submodules
//! - **`types`**: outcomes, policy and attempt records.
//! - **`selector`**: deterministic and weighted shard selection strategies.
//! - **`coordinator`**: the attempt protocol itself.

pub mod coordinator;
pub mod selector;
pub mod types;

pub use coordinator::ReservationCoordinator;
pub use types::{Outcome, Reservation, ReservationAttempt, ReservationPolicy, SelectionStrategy};

#[cfg(test)]
mod tests;
