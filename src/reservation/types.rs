use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ReservationError;
use crate::lock::LockSettings;
use crate::storage::keys::ShardId;
use crate::storage::store::check_lease_ttl;

/// Terminal result of one reservation attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// One unit was taken.
    Success,
    /// The shard and, if consulted, the global reserve were empty. Not retried.
    InsufficientStock,
    /// A lock could not be taken in time (or the store was unreachable before any lock was
    /// held). No stock changed.
    LockFailure,
    /// The transfer script declined, or a store call failed while a lock was held.
    TransferFailure,
}

/// Steps of the per-attempt state machine, recorded for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptState {
    Start,
    ShardChosen,
    LockedShard,
    LockedGlobal,
    Transferred,
    Decremented,
}

/// How the coordinator picks a shard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Hash of the requester id; the same requester always lands on the same shard.
    #[default]
    Deterministic,
    /// Random, proportional to each shard's remaining stock in an unlocked snapshot.
    Weighted,
}

/// One policy covering the simple, weighted and global-fallback reservation flows.
#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub selection: SelectionStrategy,
    /// Refill a depleted shard from the global reserve.
    pub global_fallback: bool,
    /// Units moved from the global reserve per refill (clamped to what the reserve holds).
    pub batch_size: i64,
    pub lock: LockSettings,
    /// Upper bound on time spent waiting for locks within one attempt.
    pub attempt_deadline: Duration,
}

impl ReservationPolicy {
    pub fn simple() -> Self {
        Self {
            selection: SelectionStrategy::Deterministic,
            global_fallback: false,
            batch_size: 5,
            lock: LockSettings::default(),
            attempt_deadline: Duration::from_secs(5),
        }
    }

    pub fn weighted() -> Self {
        Self {
            selection: SelectionStrategy::Weighted,
            ..Self::simple()
        }
    }

    pub fn with_global_fallback(batch_size: i64) -> Self {
        Self {
            selection: SelectionStrategy::Weighted,
            global_fallback: true,
            batch_size,
            ..Self::simple()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size <= 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }
        check_lease_ttl(self.lock.ttl)?;
        if self.lock.attempts == 0 {
            return Err(anyhow::anyhow!("lock attempts must be at least 1"));
        }
        if self.attempt_deadline.is_zero() {
            return Err(anyhow::anyhow!("attempt deadline must be positive"));
        }
        Ok(())
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self::simple()
    }
}

/// A completed reservation: either a unit was taken or stock ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub shard: Option<ShardId>,
    pub outcome: Outcome,
    /// Units moved from the global reserve into the shard during this attempt.
    pub refilled: Option<i64>,
    /// Shard balance after the decrement, when one happened.
    pub remaining: Option<i64>,
}

impl Reservation {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Record of one attempt, whatever its outcome.
#[derive(Debug, Clone)]
pub struct ReservationAttempt {
    pub requester_id: String,
    pub product_id: String,
    pub chosen_shard: Option<ShardId>,
    pub outcome: Outcome,
    pub last_state: AttemptState,
    pub refilled: Option<i64>,
    pub error: Option<ReservationError>,
    pub elapsed: Duration,
}
