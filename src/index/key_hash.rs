use std::hash::{BuildHasher, Hash};

use ahash::RandomState;

/// Bucket counts the lock table moves through as it grows.
pub const TABLE_PRIMES: [usize; 26] = [
    53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241, 786433,
    1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611, 402653189,
    805306457, 1610612741,
];

pub const MIN_TABLE_SIZE: usize = TABLE_PRIMES[0];
pub const MAX_TABLE_SIZE: usize = TABLE_PRIMES[TABLE_PRIMES.len() - 1];

const HASH_SEEDS: [u64; 4] = [
    0x51_7c_c1_b7_27_22_0a_95,
    0x6c_62_27_2e_07_bb_01_42,
    0x9e_37_79_b9_7f_4a_7c_15,
    0xbf_58_47_6d_1c_e4_e5_b9,
];

/// Hashes lock targets into table indices.
///
/// The seeds are fixed so a target keeps its hash across resizes; only the
/// modulus changes.
#[derive(Clone)]
pub struct TargetHasher {
    state: RandomState,
}

impl TargetHasher {
    pub fn new() -> Self {
        Self {
            state: RandomState::with_seeds(
                HASH_SEEDS[0],
                HASH_SEEDS[1],
                HASH_SEEDS[2],
                HASH_SEEDS[3],
            ),
        }
    }

    #[inline]
    pub fn hash<K: Hash + ?Sized>(&self, key: &K) -> u64 {
        BuildHasher::hash_one(&self.state, key)
    }

    #[inline]
    pub fn table_index<K: Hash + ?Sized>(&self, key: &K, table_size: usize) -> usize {
        debug_assert!(table_size > 0);
        (self.hash(key) % table_size as u64) as usize
    }
}

impl Default for TargetHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest table prime not below `size`.
pub fn table_size_for(size: usize) -> usize {
    TABLE_PRIMES
        .iter()
        .copied()
        .find(|&prime| prime >= size)
        .unwrap_or(MAX_TABLE_SIZE)
}

/// The table prime after `size`, if any.
pub fn next_table_size(size: usize) -> Option<usize> {
    TABLE_PRIMES.iter().copied().find(|&prime| prime > size)
}
