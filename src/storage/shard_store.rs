//! Segment counters of one product on top of a [`StockStore`].

use anyhow::Result;
use std::sync::Arc;

use super::keys::{CounterKey, ShardId};
use super::partitioner::PartitionManager;
use super::script::{AtomicScript, TRANSFER_DECLINED, TRANSFER_MOVED};
use super::store::StockStore;
use crate::error::StoreError;

/// How initial stock is laid out across shards and the global reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLayout {
    pub shard_count: u32,
    pub per_shard: i64,
    pub global: i64,
}

impl StockLayout {
    /// Splits `shard_stock` evenly over `shard_count` shards.
    ///
    /// The division remainder goes to the global reserve, so every unit of the requested
    /// stock ends up somewhere.
    pub fn split(shard_stock: i64, shard_count: u32, global_stock: i64) -> Result<Self> {
        if shard_count == 0 {
            return Err(anyhow::anyhow!("shard count must be at least 1"));
        }
        if shard_stock < 0 || global_stock < 0 {
            return Err(anyhow::anyhow!(
                "stock must be non-negative (shards: {}, global: {})",
                shard_stock,
                global_stock
            ));
        }

        let per_shard = shard_stock / shard_count as i64;
        let remainder = shard_stock % shard_count as i64;
        if remainder > 0 {
            tracing::info!(
                "{} units do not divide over {} shards, adding them to the global reserve",
                remainder,
                shard_count
            );
        }

        Ok(Self {
            shard_count,
            per_shard,
            global: global_stock + remainder,
        })
    }

    pub fn total(&self) -> i64 {
        self.per_shard * self.shard_count as i64 + self.global
    }
}

/// Point-in-time read of every counter. Reads are not taken under a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockSnapshot {
    pub shards: Vec<(ShardId, i64)>,
    pub global: i64,
}

impl StockSnapshot {
    pub fn shard_total(&self) -> i64 {
        self.shards.iter().map(|(_, remaining)| remaining).sum()
    }

    pub fn total(&self) -> i64 {
        self.shard_total() + self.global
    }

    pub fn min_counter(&self) -> i64 {
        self.shards
            .iter()
            .map(|(_, remaining)| *remaining)
            .chain(std::iter::once(self.global))
            .min()
            .unwrap_or(self.global)
    }
}

/// The `N` segment counters plus the global reserve of a single product.
#[derive(Clone)]
pub struct ShardStore {
    store: Arc<dyn StockStore>,
    product: String,
    partitions: PartitionManager,
}

impl ShardStore {
    pub fn new(store: Arc<dyn StockStore>, product: &str, shard_count: u32) -> Self {
        Self {
            store,
            product: product.to_string(),
            partitions: PartitionManager::new(shard_count),
        }
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn shard_count(&self) -> u32 {
        self.partitions.shard_count()
    }

    /// The requester's home shard, stable for a given shard count.
    pub fn shard_for(&self, requester_id: &str) -> ShardId {
        self.partitions.get_shard(requester_id)
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = ShardId> {
        (1..=self.shard_count()).map(ShardId)
    }

    pub fn shard_key(&self, shard: ShardId) -> CounterKey {
        CounterKey::shard(&self.product, shard)
    }

    pub fn global_key(&self) -> CounterKey {
        CounterKey::global(&self.product)
    }

    /// Writes all shard counters and the global counter in one batch.
    pub async fn init_segments(&self, per_shard: i64, global: i64) -> Result<(), StoreError> {
        let mut entries: Vec<(CounterKey, i64)> = self
            .shard_ids()
            .map(|shard| (self.shard_key(shard), per_shard))
            .collect();
        entries.push((self.global_key(), global));

        self.store.init_all(&entries).await?;
        tracing::info!(
            "Initialized {} shards x {} units + {} global for product {}",
            self.shard_count(),
            per_shard,
            global,
            self.product
        );
        Ok(())
    }

    pub async fn init_layout(&self, layout: &StockLayout) -> Result<(), StoreError> {
        if layout.shard_count != self.shard_count() {
            return Err(StoreError::Rejected(format!(
                "layout has {} shards, store expects {}",
                layout.shard_count,
                self.shard_count()
            )));
        }
        self.init_segments(layout.per_shard, layout.global).await
    }

    pub async fn get_remaining(&self, key: &CounterKey) -> Result<i64, StoreError> {
        self.store.get(key).await
    }

    /// Decrements by one and returns the new value. Call only while holding the counter's lock.
    pub async fn decrement(&self, key: &CounterKey) -> Result<i64, StoreError> {
        self.store.incr_by(key, -1).await
    }

    pub async fn increment(&self, key: &CounterKey, amount: i64) -> Result<i64, StoreError> {
        self.store.incr_by(key, amount).await
    }

    pub async fn decrement_by(&self, key: &CounterKey, amount: i64) -> Result<i64, StoreError> {
        self.store.incr_by(key, -amount).await
    }

    /// Moves `amount` from `from` to `to` in one indivisible step.
    ///
    /// Returns `false` without touching either counter when `from` holds less than `amount`.
    pub async fn transfer(
        &self,
        from: &CounterKey,
        to: &CounterKey,
        amount: i64,
    ) -> Result<bool, StoreError> {
        let keys = [from.clone(), to.clone()];
        match self
            .store
            .eval(&AtomicScript::Transfer { amount }, &keys)
            .await?
        {
            TRANSFER_MOVED => Ok(true),
            TRANSFER_DECLINED => Ok(false),
            other => Err(StoreError::Protocol(format!(
                "transfer script returned {}",
                other
            ))),
        }
    }

    pub async fn snapshot(&self) -> Result<StockSnapshot, StoreError> {
        let mut shards = Vec::with_capacity(self.shard_count() as usize);
        for shard in self.shard_ids() {
            let remaining = self.store.get(&self.shard_key(shard)).await?;
            shards.push((shard, remaining));
        }
        let global = self.store.get(&self.global_key()).await?;
        Ok(StockSnapshot { shards, global })
    }
}
