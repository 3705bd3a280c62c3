//! Shard placement and in-process shard locking
//!
//! Subscription and retained records are spread over `shard_count`
//! directories by a seedless xxh3 hash of the key, so placement computed at
//! write time is reproduced exactly by every later lookup, in this process or
//! the next.

use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// Number of lock stripes guarding shard directories
pub const SHARD_LOCK_STRIPES: usize = 64;

/// Stable key-to-shard mapping
pub struct ShardIndex;

impl ShardIndex {
    /// Shard for `key`, or `None` when sharding is disabled (`shard_count == 0`)
    pub fn shard(key: &str, shard_count: u32) -> Option<u32> {
        if shard_count == 0 {
            return None;
        }
        Some((xxh3_64(key.as_bytes()) % u64::from(shard_count)) as u32)
    }
}

/// Striped locks serializing read-then-write sequences within a shard
/// directory.
///
/// Only protects against writers in the same process; other processes
/// sharing the root still race (dedup is best effort across processes).
pub struct ShardLocks {
    stripes: Box<[Mutex<()>]>,
}

impl ShardLocks {
    /// Create the lock table
    pub fn new() -> Self {
        ShardLocks {
            stripes: (0..SHARD_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe owning `shard_dir`
    pub fn lock(&self, shard_dir: &Path) -> MutexGuard<'_, ()> {
        let hash = xxh3_64(shard_dir.to_string_lossy().as_bytes());
        self.stripes[(hash % self.stripes.len() as u64) as usize].lock()
    }
}

impl Default for ShardLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_shards_disables() {
        assert_eq!(ShardIndex::shard("a/b", 0), None);
    }

    #[test]
    fn test_single_shard() {
        assert_eq!(ShardIndex::shard("a/b", 1), Some(0));
        assert_eq!(ShardIndex::shard("", 1), Some(0));
    }

    #[test]
    fn test_known_placement_is_stable() {
        // Fixed expectation: placement must not change between releases.
        let expected = (xxh3_64(b"sensors/+/temp") % 4096) as u32;
        assert_eq!(ShardIndex::shard("sensors/+/temp", 4096), Some(expected));
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..256 {
            seen.insert(ShardIndex::shard(&format!("topic/{}", i), 16).unwrap());
        }
        assert!(seen.len() > 8);
    }

    #[test]
    fn test_shard_lock_serializes() {
        let locks = Arc::new(ShardLocks::new());
        let counter = Arc::new(Mutex::new(0u32));
        let dir = Path::new("/tmp/retained/7");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = locks.lock(dir);
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 400);
    }

    proptest! {
        #[test]
        fn prop_shard_in_range(key in ".{0,64}", count in 1u32..10_000) {
            let shard = ShardIndex::shard(&key, count).unwrap();
            prop_assert!(shard < count);
            prop_assert_eq!(ShardIndex::shard(&key, count), Some(shard));
        }
    }
}
