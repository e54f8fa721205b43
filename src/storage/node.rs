//! Store Node
//!
//! Serves one or more [`MemoryStore`] keyspaces over HTTP so independent processes share the
//! same counters and leases. Each database index gets its own keyspace, created on first use.
//!
//! Mutating requests go through [`StoreNode::apply_once`]: the first request for an `op_id`
//! claims a slot before touching the store, and any copy arriving later (or concurrently)
//! waits on that slot and gets the same reply.

use axum::{Extension, Router, routing::post};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;

use super::handlers::{
    handle_eval, handle_get, handle_incr, handle_init, handle_lease_acquire, handle_lease_release,
};
use super::memory::{MemoryStore, duration_ms, now_ms};
use super::protocol::*;
use crate::error::StoreError;

/// Replies older than this are dropped from the dedupe cache.
pub const OP_RETENTION: Duration = Duration::from_secs(60);
const OP_PRUNE_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_OP_CACHE_LIMIT: usize = 100_000;

/// Dedupe slot of one mutating request.
struct OpSlot {
    claimed_at: u64,
    seq: u64,
    reply: Arc<OnceCell<Result<i64, StoreError>>>,
}

pub struct StoreNode {
    databases: DashMap<u32, Arc<MemoryStore>>,
    processed_ops: DashMap<String, OpSlot>,
    op_seq: AtomicU64,
    op_cache_limit: usize,
    auth_token: Option<String>,
}

impl StoreNode {
    pub fn new(auth_token: Option<String>) -> Arc<Self> {
        Self::with_op_cache_limit(auth_token, DEFAULT_OP_CACHE_LIMIT)
    }

    /// Like [`StoreNode::new`], keeping at most `limit` completed replies for dedupe.
    pub fn with_op_cache_limit(auth_token: Option<String>, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            databases: DashMap::new(),
            processed_ops: DashMap::new(),
            op_seq: AtomicU64::new(0),
            op_cache_limit: limit.max(1),
            auth_token,
        })
    }

    pub fn database(&self, db: u32) -> Arc<MemoryStore> {
        self.databases
            .entry(db)
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone()
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    /// Checks the `authorization` header value against the configured token.
    pub fn authorize(&self, header: Option<&str>) -> Result<(), StoreError> {
        let Some(expected) = &self.auth_token else {
            return Ok(());
        };
        match header.and_then(|value| value.strip_prefix("Bearer ")) {
            Some(token) if token == expected => Ok(()),
            _ => Err(StoreError::Rejected("invalid or missing credential".to_string())),
        }
    }

    /// Runs `apply` at most once per `op_id` and returns its reply to every caller.
    ///
    /// The slot is claimed atomically before `apply` starts, so a duplicate that arrives while
    /// the first copy is still running waits for it instead of applying the mutation again.
    pub async fn apply_once<F, Fut>(&self, op_id: &str, apply: F) -> Result<i64, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<i64, StoreError>>,
    {
        let reply = self
            .processed_ops
            .entry(op_id.to_string())
            .or_insert_with(|| OpSlot {
                claimed_at: now_ms(),
                seq: self.op_seq.fetch_add(1, Ordering::Relaxed),
                reply: Arc::new(OnceCell::new()),
            })
            .reply
            .clone();

        if reply.initialized() {
            tracing::debug!("Replaying op {}", op_id);
        }
        let result = reply.get_or_init(apply).await.clone();

        if self.processed_ops.len() > self.op_cache_limit {
            self.prune_ops(now_ms());
        }
        result
    }

    pub fn op_count(&self) -> usize {
        self.processed_ops.len()
    }

    /// Drops completed replies older than [`OP_RETENTION`] as of `now`, then the earliest
    /// claimed completed replies until the cache is back under its limit. Slots still being applied
    /// are never dropped.
    pub fn prune_ops(&self, now: u64) {
        let cutoff = now.saturating_sub(duration_ms(OP_RETENTION));
        self.processed_ops
            .retain(|_, slot| slot.claimed_at >= cutoff || !slot.reply.initialized());

        let excess = self.processed_ops.len().saturating_sub(self.op_cache_limit);
        if excess == 0 {
            return;
        }

        let mut completed: Vec<(u64, String)> = self
            .processed_ops
            .iter()
            .filter(|entry| entry.value().reply.initialized())
            .map(|entry| (entry.value().seq, entry.key().clone()))
            .collect();
        completed.sort_unstable();
        for (_, op_id) in completed.into_iter().take(excess) {
            self.processed_ops.remove(&op_id);
        }
        tracing::debug!("Evicted up to {} dedupe entries over the cache limit", excess);
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(ENDPOINT_GET, post(handle_get))
            .route(ENDPOINT_INIT, post(handle_init))
            .route(ENDPOINT_INCR, post(handle_incr))
            .route(ENDPOINT_EVAL, post(handle_eval))
            .route(ENDPOINT_LEASE_ACQUIRE, post(handle_lease_acquire))
            .route(ENDPOINT_LEASE_RELEASE, post(handle_lease_release))
            .layer(Extension(self.clone()))
    }

    /// Serves the node on an already bound listener until the server stops.
    pub async fn serve(self: Arc<Self>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("Store node listening on {}", addr);

        let pruner = tokio::spawn(prune_loop(Arc::downgrade(&self)));
        let served = axum::serve(listener, self.router()).await;
        pruner.abort();
        served?;
        Ok(())
    }
}

async fn prune_loop(node: std::sync::Weak<StoreNode>) {
    let mut ticker = tokio::time::interval(OP_PRUNE_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(node) = node.upgrade() else {
            break;
        };
        node.prune_ops(now_ms());
    }
}
