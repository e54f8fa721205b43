//! In-process implementation of [`StockStore`].
//!
//! Counters and leases live in `DashMap`s. Single-key operations rely on the map's per-entry
//! locking and take the script gate in shared mode; batch initialization and scripts take the
//! gate exclusively, which gives them the same "nothing interleaves" guarantee a single-threaded
//! store gives its server-side scripts.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::time::Duration;

use super::keys::{CounterKey, LockName};
use super::script::{AtomicScript, ScriptContext};
use super::store::{StockStore, check_lease_ttl};
use crate::error::StoreError;

/// A held lease on a lock name.
#[derive(Debug, Clone)]
struct Lease {
    token: String,
    expires_at: u64,
}

pub struct MemoryStore {
    counters: DashMap<CounterKey, i64>,
    leases: DashMap<LockName, Lease>,
    /// Shared for single-key ops, exclusive for multi-key ops.
    gate: RwLock<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            leases: DashMap::new(),
            gate: RwLock::new(()),
        }
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Number of leases that have not expired yet.
    pub fn live_lease_count(&self) -> usize {
        let now = now_ms();
        self.leases
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .count()
    }

    fn get_sync(&self, key: &CounterKey) -> Result<i64, StoreError> {
        let _shared = self.gate.read();
        self.counters
            .get(key)
            .map(|value| *value)
            .ok_or_else(|| StoreError::MissingKey(key.clone()))
    }

    fn init_all_sync(&self, entries: &[(CounterKey, i64)]) -> Result<(), StoreError> {
        if let Some((key, value)) = entries.iter().find(|(_, value)| *value < 0) {
            return Err(StoreError::Rejected(format!(
                "initial value for {} is negative ({})",
                key, value
            )));
        }

        let _exclusive = self.gate.write();
        for (key, value) in entries {
            self.counters.insert(key.clone(), *value);
        }
        Ok(())
    }

    fn incr_by_sync(&self, key: &CounterKey, delta: i64) -> Result<i64, StoreError> {
        let _shared = self.gate.read();
        let mut value = self
            .counters
            .get_mut(key)
            .ok_or_else(|| StoreError::MissingKey(key.clone()))?;
        let updated = value
            .checked_add(delta)
            .ok_or_else(|| StoreError::Rejected(format!("increment overflows {}", key)))?;
        *value = updated;
        Ok(updated)
    }

    fn eval_sync(&self, script: &AtomicScript, keys: &[CounterKey]) -> Result<i64, StoreError> {
        let _exclusive = self.gate.write();
        let mut ctx = ExclusiveCounters {
            counters: &self.counters,
        };
        script.execute(keys, &mut ctx)
    }

    fn try_lease_sync(&self, name: &LockName, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        check_lease_ttl(ttl)?;
        let now = now_ms();
        let lease = Lease {
            token: token.to_string(),
            expires_at: now.saturating_add(duration_ms(ttl)),
        };

        match self.leases.entry(name.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                // Same token means a retried acquire of a lease we already granted.
                if current.expires_at > now && current.token != token {
                    return Ok(false);
                }
                if current.token != token {
                    tracing::debug!("Lease on {} expired, taking over", name);
                }
                occupied.insert(lease);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease);
                Ok(true)
            }
        }
    }

    fn release_lease_sync(&self, name: &LockName, token: &str) -> bool {
        self.leases
            .remove_if(name, |_, lease| lease.token == token)
            .is_some()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct ExclusiveCounters<'a> {
    counters: &'a DashMap<CounterKey, i64>,
}

impl ScriptContext for ExclusiveCounters<'_> {
    fn read(&self, key: &CounterKey) -> Option<i64> {
        self.counters.get(key).map(|value| *value)
    }

    fn write(&mut self, key: &CounterKey, value: i64) {
        self.counters.insert(key.clone(), value);
    }
}

#[async_trait]
impl StockStore for MemoryStore {
    async fn get(&self, key: &CounterKey) -> Result<i64, StoreError> {
        self.get_sync(key)
    }

    async fn init_all(&self, entries: &[(CounterKey, i64)]) -> Result<(), StoreError> {
        self.init_all_sync(entries)
    }

    async fn incr_by(&self, key: &CounterKey, delta: i64) -> Result<i64, StoreError> {
        self.incr_by_sync(key, delta)
    }

    async fn eval(&self, script: &AtomicScript, keys: &[CounterKey]) -> Result<i64, StoreError> {
        self.eval_sync(script, keys)
    }

    async fn try_lease(
        &self,
        name: &LockName,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.try_lease_sync(name, token, ttl)
    }

    async fn release_lease(&self, name: &LockName, token: &str) -> Result<bool, StoreError> {
        Ok(self.release_lease_sync(name, token))
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
