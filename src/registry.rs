//! Shards registry: owns every [`ShardHandle`] and picks one for a key via
//! rendezvous hashing.

use std::sync::Arc;

use crate::hash::Hasher;
use crate::shard::ShardHandle;

/// Constructed once at startup from the configured shard count and shared
/// (cloned -- cheap, an `Arc` and a `Copy` hasher) by every Connection task.
#[derive(Clone)]
pub struct Registry {
    hasher: Hasher,
    shards: Arc<[ShardHandle]>,
}

impl Registry {
    pub fn new(hasher: Hasher, shards: Vec<ShardHandle>) -> Self {
        Self {
            hasher,
            shards: shards.into(),
        }
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// A reference-counted snapshot of every shard, used to seed the `KEYS`
    /// fan-out chain.
    pub fn shards(&self) -> Arc<[ShardHandle]> {
        Arc::clone(&self.shards)
    }

    /// Rendezvous hashing: scores every shard index against the key's
    /// precomputed hash and returns the shard with the highest score. Ties
    /// favor the lower index, since only a strictly greater score replaces
    /// the current best.
    pub fn select(&self, key_hash: i64) -> &ShardHandle {
        &self.shards[self.select_index(key_hash)]
    }

    fn select_index(&self, key_hash: i64) -> usize {
        debug_assert!(!self.shards.is_empty(), "registry constructed with zero shards");
        let mut best_index = 0;
        let mut best_score = self.hasher.hash_pair(0, key_hash);
        for i in 1..self.shards.len() {
            let score = self.hasher.hash_pair(i as i64, key_hash);
            if score > best_score {
                best_score = score;
                best_index = i;
            }
        }
        best_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::GracefulShutdown;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn selection_is_stable_across_independently_built_registries() {
        let hasher = Hasher::with_seed(11, 22);
        let key_hash = hasher.hash(b"rendezvous-key");

        let build = || {
            let shutdown = GracefulShutdown::new(CancellationToken::new());
            let handles: Vec<ShardHandle> =
                (0..8).map(|id| crate::shard::Shard::spawn(id, shutdown.clone())).collect();
            Registry::new(hasher, handles)
        };

        let a = build();
        let b = build();
        assert_eq!(a.select_index(key_hash), b.select_index(key_hash));
    }
}
