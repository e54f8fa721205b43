use xxhash_rust::xxh32::xxh32;

use super::keys::ShardId;

/// Separator stripped from requester ids before hashing (`user_42` and `user42` are one requester).
const NOISE_SEPARATOR: char = '_';
const HASH_SEED: u32 = 0;

/// Maps requester identities onto `1..=shard_count`.
#[derive(Debug, Clone, Copy)]
pub struct PartitionManager {
    shard_count: u32,
}

impl PartitionManager {
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn get_shard(&self, requester_id: &str) -> ShardId {
        select_shard(requester_id, self.shard_count)
    }
}

/// Lowercases the id and removes the noise separator.
pub fn normalize_requester(requester_id: &str) -> String {
    requester_id
        .chars()
        .filter(|c| *c != NOISE_SEPARATOR)
        .flat_map(char::to_lowercase)
        .collect()
}

/// Deterministic shard for a requester: `xxh32(normalized) % shard_count + 1`.
///
/// A `shard_count` of zero is treated as one.
pub fn select_shard(requester_id: &str, shard_count: u32) -> ShardId {
    let shard_count = shard_count.max(1);
    let hash = xxh32(normalize_requester(requester_id).as_bytes(), HASH_SEED);
    ShardId(hash % shard_count + 1)
}
