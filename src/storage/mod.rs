//! Shared Stock Storage Module
//!
//! Holds the inventory counters of every product and the leases behind the distributed locks.
//!
//! ## Core Concepts
//! - **Keys**: `CounterKey` and `LockName` are typed, so shard and global scopes never collide.
//! - **Store abstraction**: `StockStore` is the capability set the core consumes: point reads,
//!   atomic increments, batch initialization, server-side atomic scripts and leases.
//! - **Backends**: `MemoryStore` keeps everything in-process; `RemoteStore` talks to a
//!   `StoreNode` over HTTP so independent processes share one source of truth.
//! - **Partitioning**: `partitioner` maps a requester to one of the product's shards.
//! - **Segments**: `ShardStore` is the per-product view (init, read, decrement, transfer).

pub mod handlers;
pub mod keys;
pub mod memory;
pub mod node;
pub mod partitioner;
pub mod protocol;
pub mod remote;
pub mod script;
pub mod shard_store;
pub mod store;
