//! Typed keys for counters and locks.
//!
//! Keys are enums rather than formatted strings, so a shard lock and the global lock of the
//! same product can never render to the same name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 1-based shard identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stock counter held in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CounterKey {
    /// One segment of the product's stock.
    Shard { product: String, shard: ShardId },
    /// The product's global reserve used to refill depleted shards.
    Global { product: String },
}

impl CounterKey {
    pub fn shard(product: &str, shard: ShardId) -> Self {
        CounterKey::Shard {
            product: product.to_string(),
            shard,
        }
    }

    pub fn global(product: &str) -> Self {
        CounterKey::Global {
            product: product.to_string(),
        }
    }

    pub fn product(&self) -> &str {
        match self {
            CounterKey::Shard { product, .. } | CounterKey::Global { product } => product,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKey::Shard { product, shard } => write!(f, "stock[{}]/segment/{}", product, shard),
            CounterKey::Global { product } => write!(f, "stock[{}]/global", product),
        }
    }
}

/// What a lock protects within one product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "scope", content = "shard", rename_all = "snake_case")]
pub enum LockScope {
    Shard(ShardId),
    Global,
}

/// Name of a distributed lock: `(product, scope)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LockName {
    pub product: String,
    pub scope: LockScope,
}

impl LockName {
    pub fn shard(product: &str, shard: ShardId) -> Self {
        Self {
            product: product.to_string(),
            scope: LockScope::Shard(shard),
        }
    }

    pub fn global(product: &str) -> Self {
        Self {
            product: product.to_string(),
            scope: LockScope::Global,
        }
    }

    /// The counter this lock guards.
    pub fn guarded_counter(&self) -> CounterKey {
        match self.scope {
            LockScope::Shard(shard) => CounterKey::shard(&self.product, shard),
            LockScope::Global => CounterKey::global(&self.product),
        }
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            LockScope::Shard(shard) => write!(f, "lock[{}]/segment/{}", self.product, shard),
            LockScope::Global => write!(f, "lock[{}]/global", self.product),
        }
    }
}
