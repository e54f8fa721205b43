//! Shard selection strategies.
//!
//! Selection only decides where to try. Nothing read here authorizes a mutation; the
//! coordinator re-reads the chosen shard under its lock.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

use super::types::SelectionStrategy;
use crate::error::StoreError;
use crate::storage::keys::ShardId;
use crate::storage::shard_store::ShardStore;

#[async_trait]
pub trait ShardSelector: Send + Sync {
    /// Picks a shard for `requester_id`, or `None` when no shard looks like it has stock.
    async fn select(
        &self,
        requester_id: &str,
        shards: &ShardStore,
    ) -> Result<Option<ShardId>, StoreError>;

    fn name(&self) -> &'static str;
}

pub fn build_selector(strategy: SelectionStrategy) -> Arc<dyn ShardSelector> {
    match strategy {
        SelectionStrategy::Deterministic => Arc::new(DeterministicSelector),
        SelectionStrategy::Weighted => Arc::new(WeightedSelector),
    }
}

pub struct DeterministicSelector;

#[async_trait]
impl ShardSelector for DeterministicSelector {
    async fn select(
        &self,
        requester_id: &str,
        shards: &ShardStore,
    ) -> Result<Option<ShardId>, StoreError> {
        Ok(Some(shards.shard_for(requester_id)))
    }

    fn name(&self) -> &'static str {
        "deterministic"
    }
}

/// Reads every shard without locks and picks one with probability proportional to its
/// remaining stock. The snapshot can be stale by the time the pick is used; that is accepted
/// as best effort.
pub struct WeightedSelector;

#[async_trait]
impl ShardSelector for WeightedSelector {
    async fn select(
        &self,
        _requester_id: &str,
        shards: &ShardStore,
    ) -> Result<Option<ShardId>, StoreError> {
        let mut candidates = Vec::new();
        let mut last_error = None;

        for shard in shards.shard_ids() {
            match shards.get_remaining(&shards.shard_key(shard)).await {
                Ok(remaining) if remaining > 0 => candidates.push((shard, remaining)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Skipping shard {} in weighted pick: {}", shard, e);
                    last_error = Some(e);
                }
            }
        }

        if candidates.is_empty() {
            return match last_error {
                Some(e) => Err(e),
                None => Ok(None),
            };
        }

        let total: i64 = candidates.iter().map(|(_, remaining)| remaining).sum();
        let roll = rand::thread_rng().gen_range(0..total);
        Ok(pick_weighted(&candidates, roll))
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

/// Walks cumulative weights and returns the shard whose range contains `roll`.
///
/// `roll` is expected in `0..sum(weights)`; a roll past the end picks the last candidate.
pub fn pick_weighted(candidates: &[(ShardId, i64)], roll: i64) -> Option<ShardId> {
    let mut cumulative = 0;
    for (shard, weight) in candidates {
        cumulative += weight;
        if roll < cumulative {
            return Some(*shard);
        }
    }
    candidates.last().map(|(shard, _)| *shard)
}
