//! Application configuration.
//!
//! Loaded from an optional JSON file; every field has a default, so an empty file (or none)
//! gives the classic demo: 80 units over 10 shards plus a 20-unit global reserve, 200 requests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::harness::HarnessSettings;
use crate::lock::LockSettings;
use crate::reservation::types::{ReservationPolicy, SelectionStrategy};
use crate::storage::memory::MemoryStore;
use crate::storage::remote::RemoteStore;
use crate::storage::shard_store::StockLayout;
use crate::storage::store::StockStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub inventory: InventoryConfig,
    pub policy: PolicyConfig,
    pub harness: HarnessConfig,
}

/// Where the shared store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Address of a store node (`host:port` or URL). `None` keeps the store in-process.
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub database: u32,
    pub request_timeout_ms: u64,
    pub retry_attempts: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth_token: None,
            database: 0,
            request_timeout_ms: 500,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub product_id: String,
    /// Stock spread over the shards; the division remainder goes to the global reserve.
    pub total_stock: i64,
    pub shards: u32,
    pub global_stock: i64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            product_id: "product_1".to_string(),
            total_stock: 80,
            shards: 10,
            global_stock: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub selection: SelectionStrategy,
    pub global_fallback: bool,
    pub batch_size: i64,
    pub lock_ttl_ms: u64,
    pub lock_attempts: u32,
    pub lock_min_retry_ms: u64,
    pub lock_max_retry_ms: u64,
    pub attempt_deadline_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            selection: SelectionStrategy::Weighted,
            global_fallback: true,
            batch_size: 5,
            lock_ttl_ms: 200,
            lock_attempts: 32,
            lock_min_retry_ms: 5,
            lock_max_retry_ms: 50,
            attempt_deadline_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub requests: usize,
    pub workers: usize,
    pub max_jitter_ms: u64,
    pub monitor_interval_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            requests: 200,
            workers: 32,
            max_jitter_ms: 500,
            monitor_interval_ms: 10,
        }
    }
}

impl AppConfig {
    /// Reads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => AppConfig::default(),
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inventory.product_id.is_empty() {
            return Err(anyhow::anyhow!("product id must not be empty"));
        }
        if self.harness.workers == 0 {
            return Err(anyhow::anyhow!("harness needs at least one worker"));
        }
        self.layout()?;
        self.policy().validate()
    }

    pub fn layout(&self) -> Result<StockLayout> {
        StockLayout::split(
            self.inventory.total_stock,
            self.inventory.shards,
            self.inventory.global_stock,
        )
    }

    pub fn policy(&self) -> ReservationPolicy {
        let p = &self.policy;
        ReservationPolicy {
            selection: p.selection,
            global_fallback: p.global_fallback,
            batch_size: p.batch_size,
            lock: LockSettings {
                ttl: Duration::from_millis(p.lock_ttl_ms),
                attempts: p.lock_attempts,
                min_retry_delay: Duration::from_millis(p.lock_min_retry_ms),
                max_retry_delay: Duration::from_millis(p.lock_max_retry_ms),
            },
            attempt_deadline: Duration::from_millis(p.attempt_deadline_ms),
        }
    }

    pub fn harness_settings(&self) -> HarnessSettings {
        HarnessSettings {
            requests: self.harness.requests,
            workers: self.harness.workers,
            max_jitter: Duration::from_millis(self.harness.max_jitter_ms),
            monitor_interval: Duration::from_millis(self.harness.monitor_interval_ms),
        }
    }

    /// Opens the configured store: a remote node if an endpoint is set, else an in-process one.
    pub fn open_store(&self) -> Arc<dyn StockStore> {
        match &self.store.endpoint {
            Some(endpoint) => {
                tracing::info!("Using store node at {} (db {})", endpoint, self.store.database);
                Arc::new(RemoteStore::new(
                    endpoint,
                    self.store.database,
                    self.store.auth_token.clone(),
                    Duration::from_millis(self.store.request_timeout_ms),
                    self.store.retry_attempts,
                ))
            }
            None => {
                tracing::info!("Using in-process store");
                Arc::new(MemoryStore::new())
            }
        }
    }
}
