//! The capability set the reservation core needs from a shared key-value store.
//!
//! Any backend that can offer these primitives atomically can stand in for the in-process
//! [`super::memory::MemoryStore`] or the HTTP-backed [`super::remote::RemoteStore`].

use async_trait::async_trait;
use std::time::Duration;

use super::keys::{CounterKey, LockName};
use super::script::AtomicScript;
use crate::error::StoreError;

/// Longest lease a store grants. Locks guard a single decrement, so anything near this is a
/// misconfiguration.
pub const MAX_LEASE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Rejects a zero TTL or one above [`MAX_LEASE_TTL`].
pub fn check_lease_ttl(ttl: Duration) -> Result<(), StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::Rejected("lease ttl must be positive".to_string()));
    }
    if ttl > MAX_LEASE_TTL {
        return Err(StoreError::Rejected(format!(
            "lease ttl {:?} exceeds the {:?} maximum",
            ttl, MAX_LEASE_TTL
        )));
    }
    Ok(())
}

#[async_trait]
pub trait StockStore: Send + Sync {
    /// Point read. Not authoritative unless the caller holds the counter's lock.
    async fn get(&self, key: &CounterKey) -> Result<i64, StoreError>;

    /// Writes every entry in one batch; either all become visible or none do.
    async fn init_all(&self, entries: &[(CounterKey, i64)]) -> Result<(), StoreError>;

    /// Atomically adds `delta` (may be negative) and returns the new value.
    async fn incr_by(&self, key: &CounterKey, delta: i64) -> Result<i64, StoreError>;

    /// Runs a script as one indivisible step inside the store.
    async fn eval(&self, script: &AtomicScript, keys: &[CounterKey]) -> Result<i64, StoreError>;

    /// Set-if-absent for a lease with expiry. Returns false if a live lease exists.
    ///
    /// `ttl` must pass [`check_lease_ttl`].
    async fn try_lease(&self, name: &LockName, token: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Deletes the lease only if `token` still owns it. Returns whether anything was deleted.
    async fn release_lease(&self, name: &LockName, token: &str) -> Result<bool, StoreError>;
}
