//! Resizable lock hash table
//!
//! The bucket array sits behind a global reader-writer lock. Acquire and
//! release hold it shared for their bucket-level critical sections, which
//! lets them run in parallel on different buckets. A resize holds it
//! exclusively and rebuilds the whole array. Callers never keep a bucket
//! reference across a wait: after waking they hash the target again against
//! whatever array is current.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::common::{LockOwner, LockTarget};
use crate::index::key_hash::{self, TargetHasher};
use crate::index::lock_bucket::LockBucket;

pub(crate) type TableGuard<'a, O, T> = RwLockReadGuard<'a, Vec<LockBucket<O, T>>>;

pub(crate) struct LockTable<O, T> {
    buckets: RwLock<Vec<LockBucket<O, T>>>,
    /// Mirrors `buckets.len()` so the resize check needs no lock.
    bucket_count: AtomicUsize,
    item_count: AtomicUsize,
    hasher: TargetHasher,
    load_factor: f64,
    max_buckets: usize,
}

impl<O: LockOwner, T: LockTarget> LockTable<O, T> {
    pub fn new(initial_buckets: usize, load_factor: f64, max_buckets: usize) -> Self {
        let size = key_hash::table_size_for(initial_buckets);
        Self {
            buckets: RwLock::new(Self::empty_buckets(size)),
            bucket_count: AtomicUsize::new(size),
            item_count: AtomicUsize::new(0),
            hasher: TargetHasher::new(),
            load_factor,
            max_buckets: max_buckets.max(size),
        }
    }

    fn empty_buckets(size: usize) -> Vec<LockBucket<O, T>> {
        (0..size).map(|_| LockBucket::new()).collect()
    }

    /// Takes the global lock in shared mode.
    #[inline]
    pub fn read(&self) -> TableGuard<'_, O, T> {
        self.buckets.read()
    }

    /// Bucket `target` hashes to in the array behind `buckets`.
    #[inline]
    pub fn bucket<'g>(&self, buckets: &'g [LockBucket<O, T>], target: &T) -> &'g LockBucket<O, T> {
        &buckets[self.hasher.table_index(target, buckets.len())]
    }

    #[inline]
    pub fn item_added(&self) {
        self.item_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn item_removed(&self) {
        self.item_count.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn item_count(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.bucket_count.load(Ordering::Relaxed)
    }

    pub fn needs_grow(&self) -> bool {
        let buckets = self.bucket_count();
        buckets < self.max_buckets && self.item_count() as f64 > buckets as f64 * self.load_factor
    }

    /// Grows the table if the load factor is exceeded.
    /// Returns the new bucket count if the table was resized.
    pub fn grow_if_needed(&self) -> Option<usize> {
        if !self.needs_grow() {
            return None;
        }
        let mut buckets = self.buckets.write();
        // Another thread may have grown the table while we queued.
        if !self.needs_grow() {
            return None;
        }
        let next = key_hash::next_table_size(buckets.len())?.min(self.max_buckets);
        self.rehash(&mut buckets, next);
        Some(next)
    }

    /// Grows the table to the next size unconditionally.
    /// Returns the new bucket count, or None if already at the maximum.
    pub fn grow(&self) -> Option<usize> {
        let mut buckets = self.buckets.write();
        let next = key_hash::next_table_size(buckets.len())?;
        if next > self.max_buckets {
            return None;
        }
        self.rehash(&mut buckets, next);
        Some(next)
    }

    /// Relocates every item into a new array of `new_size` buckets.
    /// Requires exclusive access to the table.
    fn rehash(&self, buckets: &mut Vec<LockBucket<O, T>>, new_size: usize) {
        let start = Instant::now();
        let old_size = buckets.len();
        let new_buckets = Self::empty_buckets(new_size);

        let mut moved = 0usize;
        for bucket in std::mem::take(buckets) {
            for item in bucket.into_chain().into_items() {
                let index = self.hasher.table_index(item.target(), new_size);
                new_buckets[index].lock().insert(item);
                moved += 1;
            }
        }

        *buckets = new_buckets;
        self.bucket_count.store(new_size, Ordering::Relaxed);
        log::info!(
            "Resized lock table from {} to {} buckets, rehashed {} items in {:?}",
            old_size,
            new_size,
            moved,
            start.elapsed()
        );
    }

    #[cfg(test)]
    pub fn check_invariants(&self) {
        let buckets = self.read();
        assert_eq!(buckets.len(), self.bucket_count());
        let mut items = 0;
        for (index, bucket) in buckets.iter().enumerate() {
            let chain = bucket.lock();
            for item in chain.iter() {
                assert_eq!(
                    self.hasher.table_index(item.target(), buckets.len()),
                    index,
                    "{:?} chained to the wrong bucket",
                    item.target()
                );
                assert!(!item.is_empty(), "empty item {:?} left in table", item.target());
                item.check_invariants();
                items += 1;
            }
        }
        assert_eq!(items, self.item_count());
    }
}
