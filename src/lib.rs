//! Segmented Stock Reservation Library
//!
//! Safely takes units from a finite, contended stock counter under high concurrency. Stock of
//! a product is split into independently locked shards plus a global reserve, all held in a
//! shared key-value store that is the single source of truth.
//!
//! ## Architecture Modules
//! - **`storage`**: typed keys, the `StockStore` capability trait, the in-process and HTTP
//!   backends, the atomic transfer script and the requester-to-shard partitioner.
//! - **`lock`**: named, TTL-bounded distributed locks on top of the store's leases.
//! - **`reservation`**: the coordinator that selects a shard, locks, refills from the global
//!   reserve when a shard runs dry, and decrements.
//! - **`harness`**: a bounded worker pool that drives concurrent attempts and checks that no
//!   stock is created or destroyed.
//! - **`config`** / **`error`**: configuration and the error taxonomy.

pub mod config;
pub mod error;
pub mod harness;
pub mod lock;
pub mod reservation;
pub mod storage;
