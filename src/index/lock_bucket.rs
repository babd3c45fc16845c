use parking_lot::{Mutex, MutexGuard};

use crate::common::{LockOwner, LockTarget};
use crate::core::item::LockItem;

/// Hash chain slot of the lock table. The mutex guards every lock item
/// chained here and all of their requests.
#[derive(Debug)]
pub(crate) struct LockBucket<O, T> {
    chain: Mutex<LockChain<O, T>>,
}

impl<O: LockOwner, T: LockTarget> LockBucket<O, T> {
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(LockChain::default()),
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, LockChain<O, T>> {
        self.chain.lock()
    }

    /// Moves the chain out; used while the table is held exclusively.
    pub fn into_chain(self) -> LockChain<O, T> {
        self.chain.into_inner()
    }
}

/// Lock items hashing to one bucket. Chains are short, lookups scan.
#[derive(Debug)]
pub(crate) struct LockChain<O, T> {
    items: Vec<LockItem<O, T>>,
}

impl<O, T> Default for LockChain<O, T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<O: LockOwner, T: LockTarget> LockChain<O, T> {
    pub fn find(&self, target: &T) -> Option<&LockItem<O, T>> {
        self.items.iter().find(|item| item.target() == target)
    }

    pub fn find_mut(&mut self, target: &T) -> Option<&mut LockItem<O, T>> {
        self.items.iter_mut().find(|item| item.target() == target)
    }

    pub fn insert(&mut self, item: LockItem<O, T>) {
        debug_assert!(self.find(item.target()).is_none());
        self.items.push(item);
    }

    /// Unlinks the item for `target` if it no longer has requests.
    /// Returns true if an item was unlinked.
    pub fn remove_if_empty(&mut self, target: &T) -> bool {
        match self.items.iter().position(|item| item.target() == target) {
            Some(pos) if self.items[pos].is_empty() => {
                self.items.swap_remove(pos);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_items(self) -> Vec<LockItem<O, T>> {
        self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &LockItem<O, T>> {
        self.items.iter()
    }
}
