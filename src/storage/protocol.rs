//! Store Node Network Protocol
//!
//! Endpoints and Data Transfer Objects exchanged between a [`super::remote::RemoteStore`]
//! client and a [`super::node::StoreNode`].
//!
//! Every request names a `db` index so one node can serve several independent keyspaces.
//! Mutating requests carry an `op_id`; the node remembers the reply for each `op_id`, which
//! makes a client-side retry of a lost reply safe.

use serde::{Deserialize, Serialize};

use super::keys::{CounterKey, LockName};
use super::script::AtomicScript;
use crate::error::StoreError;

// --- API Endpoints ---

pub const ENDPOINT_GET: &str = "/store/get";
pub const ENDPOINT_INIT: &str = "/store/init";
pub const ENDPOINT_INCR: &str = "/store/incr";
pub const ENDPOINT_EVAL: &str = "/store/eval";
pub const ENDPOINT_LEASE_ACQUIRE: &str = "/lease/acquire";
pub const ENDPOINT_LEASE_RELEASE: &str = "/lease/release";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub db: u32,
    pub key: CounterKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterEntry {
    pub key: CounterKey,
    pub value: i64,
}

/// Batch write of initial counter values.
#[derive(Debug, Serialize, Deserialize)]
pub struct InitRequest {
    pub db: u32,
    pub op_id: String,
    pub entries: Vec<CounterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrRequest {
    pub db: u32,
    pub op_id: String,
    pub key: CounterKey,
    pub delta: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvalRequest {
    pub db: u32,
    pub op_id: String,
    pub script: AtomicScript,
    pub keys: Vec<CounterKey>,
}

/// Acquire is keyed by `token`, so repeating it is harmless.
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseAcquireRequest {
    pub db: u32,
    pub name: LockName,
    pub token: String,
    pub ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseReleaseRequest {
    pub db: u32,
    pub name: LockName,
    pub token: String,
}

/// Reply shared by every endpoint.
///
/// Boolean results (lease granted, lease released) are encoded as `1` / `0`; batch init
/// replies with the number of counters written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReply {
    pub result: Result<i64, StoreError>,
}

impl StoreReply {
    pub fn flag(value: bool) -> Self {
        Self {
            result: Ok(value as i64),
        }
    }
}
