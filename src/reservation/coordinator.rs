//! Reservation Coordinator
//!
//! Runs one reservation attempt end to end:
//!
//! 1. **Select** a shard (deterministic hash or weighted snapshot).
//! 2. **Lock** the shard and re-read its balance under the lock.
//! 3. If the shard is empty and global fallback is on, **lock the global reserve** (always after
//!    the shard lock), move `min(global, batch_size)` units into the shard with the atomic
//!    transfer script, and release the global lock.
//! 4. **Decrement** the shard. A negative result is compensated immediately.
//! 5. **Release** every lock taken, on every path.
//!
//! Lock acquisition is bounded by the attempt deadline. Leases are recorded before they are
//! requested, so even an acquisition cut short by the deadline is released.

use std::sync::Arc;
use tokio::time::Instant;

use super::selector::{ShardSelector, build_selector};
use super::types::*;
use crate::error::{LockError, ReservationError, StoreError};
use crate::lock::{LockLease, LockManager};
use crate::storage::keys::{LockName, ShardId};
use crate::storage::shard_store::ShardStore;
use crate::storage::store::StockStore;

pub struct ReservationCoordinator {
    shards: ShardStore,
    locks: LockManager,
    selector: Arc<dyn ShardSelector>,
    policy: ReservationPolicy,
}

/// Mutable bookkeeping of one attempt, owned outside the fallible part so cleanup always runs.
struct AttemptContext {
    deadline: Instant,
    held: Vec<LockLease>,
    state: AttemptState,
    shard: Option<ShardId>,
    refilled: Option<i64>,
}

impl AttemptContext {
    fn advance(&mut self, state: AttemptState) {
        tracing::trace!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

fn locked(source: StoreError) -> ReservationError {
    ReservationError::Store {
        locked: true,
        source,
    }
}

impl ReservationCoordinator {
    pub fn new(
        store: Arc<dyn StockStore>,
        product_id: &str,
        shard_count: u32,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            shards: ShardStore::new(store.clone(), product_id, shard_count),
            locks: LockManager::new(store, policy.lock.clone()),
            selector: build_selector(policy.selection),
            policy,
        }
    }

    /// Replaces the selection strategy, e.g. with a custom [`ShardSelector`].
    pub fn with_selector(mut self, selector: Arc<dyn ShardSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn shards(&self) -> &ShardStore {
        &self.shards
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Runs one attempt and classifies the result, never returning an error.
    pub async fn attempt(&self, requester_id: &str) -> ReservationAttempt {
        let started = std::time::Instant::now();
        let mut ctx = self.new_context();
        let result = self.run_guarded(requester_id, &mut ctx).await;

        let (outcome, error) = match result {
            Ok(reservation) => (reservation.outcome, None),
            Err(e) => (e.outcome(), Some(e)),
        };

        ReservationAttempt {
            requester_id: requester_id.to_string(),
            product_id: self.shards.product().to_string(),
            chosen_shard: ctx.shard,
            outcome,
            last_state: ctx.state,
            refilled: ctx.refilled,
            error,
            elapsed: started.elapsed(),
        }
    }

    /// Tries to take one unit of stock for `requester_id`.
    pub async fn reserve(&self, requester_id: &str) -> Result<Reservation, ReservationError> {
        let mut ctx = self.new_context();
        self.run_guarded(requester_id, &mut ctx).await
    }

    fn new_context(&self) -> AttemptContext {
        AttemptContext {
            deadline: Instant::now() + self.policy.attempt_deadline,
            held: Vec::new(),
            state: AttemptState::Start,
            shard: None,
            refilled: None,
        }
    }

    async fn run_guarded(
        &self,
        requester_id: &str,
        ctx: &mut AttemptContext,
    ) -> Result<Reservation, ReservationError> {
        let result = self.run(requester_id, ctx).await;
        self.release_all(&mut ctx.held).await;

        match &result {
            Ok(reservation) => tracing::debug!(
                "Requester {} -> {:?} (shard {:?})",
                requester_id,
                reservation.outcome,
                reservation.shard
            ),
            Err(e) => tracing::debug!("Requester {} failed at {:?}: {}", requester_id, ctx.state, e),
        }
        result
    }

    async fn run(
        &self,
        requester_id: &str,
        ctx: &mut AttemptContext,
    ) -> Result<Reservation, ReservationError> {
        let shard = match self
            .selector
            .select(requester_id, &self.shards)
            .await
            .map_err(|source| ReservationError::Store {
                locked: false,
                source,
            })? {
            Some(shard) => shard,
            // Every shard looked empty. The reserve may still refill one.
            None if self.policy.global_fallback => {
                self.shards.shard_for(requester_id)
            }
            None => return Ok(self.insufficient(ctx)),
        };
        ctx.shard = Some(shard);
        ctx.advance(AttemptState::ShardChosen);

        let shard_key = self.shards.shard_key(shard);
        self.lock(LockName::shard(self.shards.product(), shard), ctx)
            .await?;
        ctx.advance(AttemptState::LockedShard);

        let remaining = self
            .shards
            .get_remaining(&shard_key)
            .await
            .map_err(locked)?;

        if remaining <= 0 {
            if !self.policy.global_fallback {
                return Ok(self.insufficient(ctx));
            }
            if !self.refill_from_global(shard, ctx).await? {
                return Ok(self.insufficient(ctx));
            }
        }

        self.ensure_shard_lease(ctx)?;
        let after = self.shards.decrement(&shard_key).await.map_err(locked)?;
        if after < 0 {
            tracing::warn!(
                "Shard {} went to {} under lock, compensating",
                shard_key,
                after
            );
            self.shards
                .increment(&shard_key, 1)
                .await
                .map_err(locked)?;
            return Ok(self.insufficient(ctx));
        }
        ctx.advance(AttemptState::Decremented);

        Ok(Reservation {
            shard: Some(shard),
            outcome: Outcome::Success,
            refilled: ctx.refilled,
            remaining: Some(after),
        })
    }

    /// Moves a batch from the global reserve into `shard`. Returns false if the reserve is empty.
    async fn refill_from_global(
        &self,
        shard: ShardId,
        ctx: &mut AttemptContext,
    ) -> Result<bool, ReservationError> {
        self.lock(LockName::global(self.shards.product()), ctx)
            .await?;
        ctx.advance(AttemptState::LockedGlobal);

        let global_key = self.shards.global_key();
        let shard_key = self.shards.shard_key(shard);
        let global = self
            .shards
            .get_remaining(&global_key)
            .await
            .map_err(locked)?;
        if global <= 0 {
            tracing::debug!("Global reserve of {} is empty", self.shards.product());
            return Ok(false);
        }

        let amount = global.min(self.policy.batch_size);
        let moved = self
            .shards
            .transfer(&global_key, &shard_key, amount)
            .await
            .map_err(locked)?;
        if !moved {
            return Err(ReservationError::TransferDeclined {
                from: global_key,
                to: shard_key,
                amount,
            });
        }

        ctx.refilled = Some(amount);
        ctx.advance(AttemptState::Transferred);
        tracing::info!("Moved {} units from {} to {}", amount, global_key, shard_key);

        // Done with the reserve; let other shards refill while we decrement.
        if let Some(global_lease) = ctx.held.pop() {
            if let Err(e) = self.locks.release(&global_lease).await {
                tracing::warn!("Early release of {} failed: {}", global_lease.name, e);
                ctx.held.push(global_lease);
            }
        }
        Ok(true)
    }

    /// Takes `name`, bounded by what is left of the attempt deadline.
    async fn lock(&self, name: LockName, ctx: &mut AttemptContext) -> Result<(), ReservationError> {
        let mut lease = self.locks.mint(&name, self.policy.lock.ttl);
        ctx.held.push(lease.clone());

        let budget = ctx.deadline.saturating_duration_since(Instant::now());
        if budget.is_zero() {
            return Err(ReservationError::DeadlineExceeded(self.policy.attempt_deadline));
        }

        match tokio::time::timeout(budget, self.locks.acquire_lease(&mut lease)).await {
            Ok(Ok(())) => {
                if let Some(recorded) = ctx.held.last_mut() {
                    *recorded = lease;
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::warn!("Deadline hit while waiting for {}", name);
                Err(ReservationError::DeadlineExceeded(self.policy.attempt_deadline))
            }
        }
    }

    /// Refuses to mutate the shard once its lease may have passed to someone else.
    fn ensure_shard_lease(&self, ctx: &AttemptContext) -> Result<(), ReservationError> {
        match ctx.held.first() {
            Some(lease) if lease.is_expired() => Err(LockError::Expired {
                name: lease.name.clone(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    async fn release_all(&self, held: &mut Vec<LockLease>) {
        while let Some(lease) = held.pop() {
            if let Err(e) = self.locks.release(&lease).await {
                // The TTL reclaims it.
                tracing::warn!("Failed to release {}: {}", lease.name, e);
            }
        }
    }

    fn insufficient(&self, ctx: &AttemptContext) -> Reservation {
        Reservation {
            shard: ctx.shard,
            outcome: Outcome::InsufficientStock,
            refilled: ctx.refilled,
            remaining: None,
        }
    }
}
