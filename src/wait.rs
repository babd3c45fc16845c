//! Wait coordination
//!
//! A caller that cannot be granted a lock queues its request, registers
//! itself in the waiter registry and parks on a [`Waiter`] after dropping
//! every table lock. A releaser that grants the request wakes the waiter.
//! Whether the request was actually granted is decided afterwards under the
//! bucket mutex, which serialises a grant racing with a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::common::{LockOwner, LockTarget};
use crate::core::mode::LockMode;

/// How long an acquire may wait for an incompatible lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Fail with `LockDenied` instead of waiting
    NoWait,
    /// Fail with `LockTimeout` once the duration has elapsed
    Timeout(Duration),
    /// Wait until granted
    #[default]
    Forever,
}

impl WaitPolicy {
    pub fn from_millis(millis: u64) -> Self {
        WaitPolicy::Timeout(Duration::from_millis(millis))
    }

    #[inline]
    pub fn is_no_wait(&self) -> bool {
        matches!(self, WaitPolicy::NoWait) || matches!(self, WaitPolicy::Timeout(d) if d.is_zero())
    }

    pub(crate) fn deadline(&self, start: Instant) -> Option<Instant> {
        match self {
            WaitPolicy::NoWait => Some(start),
            WaitPolicy::Timeout(timeout) => start.checked_add(*timeout),
            WaitPolicy::Forever => None,
        }
    }
}

/// Suspension point of one parked caller.
///
/// The signal is sticky, so a wake that lands before the caller parks is
/// not lost.
#[derive(Debug, Default)]
pub struct Waiter {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wake(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_one();
    }

    /// Parks until woken or until `deadline` passes.
    /// Returns true if woken.
    pub fn park(&self, deadline: Option<Instant>) -> bool {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            match deadline {
                None => self.cond.wait(&mut signalled),
                Some(deadline) => {
                    if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *signalled
    }
}

/// A registered waiter, as seen by a deadlock detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitInfo<O, T> {
    pub owner: O,
    pub target: T,
    /// Mode being waited for
    pub mode: LockMode,
    /// Mode already held while converting
    pub held_mode: Option<LockMode>,
    pub since: Instant,
}

/// Observer of lock manager events
pub trait LockEventListener<O, T>: Send + Sync {
    /// Called after a request is queued, before the caller parks. No table
    /// lock is held.
    fn before_wait(&self, info: &WaitInfo<O, T>);
}

/// Callers currently parked, keyed by owner and target. Threads of one
/// owner may wait on different targets at the same time.
#[derive(Debug)]
pub(crate) struct WaiterRegistry<O: LockOwner, T: LockTarget> {
    waiters: DashMap<(O, T), WaitInfo<O, T>>,
}

impl<O: LockOwner, T: LockTarget> WaiterRegistry<O, T> {
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    pub fn register(&self, info: WaitInfo<O, T>) {
        let key = (info.owner.clone(), info.target.clone());
        if let Some(previous) = self.waiters.insert(key, info) {
            log::warn!(
                "{:?} registered a second wait on {:?}",
                previous.owner,
                previous.target
            );
        }
    }

    /// Removes the entry registered with `info`. An entry registered since
    /// by another wait of the same owner on the same target is kept.
    pub fn deregister(&self, info: &WaitInfo<O, T>) -> Option<WaitInfo<O, T>> {
        let key = (info.owner.clone(), info.target.clone());
        self.waiters
            .remove_if(&key, |_, registered| registered.since == info.since)
            .map(|(_, info)| info)
    }

    pub fn get(&self, owner: &O, target: &T) -> Option<WaitInfo<O, T>> {
        self.waiters
            .get(&(owner.clone(), target.clone()))
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, owner: &O) -> bool {
        self.waiters.iter().any(|entry| entry.key().0 == *owner)
    }

    pub fn snapshot(&self) -> Vec<WaitInfo<O, T>> {
        self.waiters.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wake_before_park_is_not_lost() {
        let waiter = Waiter::new();
        waiter.wake();
        assert!(waiter.park(None));
    }

    #[test]
    fn test_park_times_out() {
        let waiter = Waiter::new();
        let start = Instant::now();
        assert!(!waiter.park(Some(start + Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wake_from_other_thread() {
        let waiter = Waiter::new();
        let remote = Arc::clone(&waiter);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.wake();
        });
        assert!(waiter.park(Some(Instant::now() + Duration::from_secs(10))));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_policy() {
        let now = Instant::now();
        assert!(WaitPolicy::NoWait.is_no_wait());
        assert!(WaitPolicy::Timeout(Duration::ZERO).is_no_wait());
        assert!(!WaitPolicy::from_millis(5).is_no_wait());
        assert_eq!(WaitPolicy::Forever.deadline(now), None);
        assert_eq!(WaitPolicy::from_millis(5).deadline(now), Some(now + Duration::from_millis(5)));
        assert_eq!(WaitPolicy::default(), WaitPolicy::Forever);
    }

    fn wait_info(owner: u64, target: &'static str, since: Instant) -> WaitInfo<u64, &'static str> {
        WaitInfo {
            owner,
            target,
            mode: LockMode::Exclusive,
            held_mode: None,
            since,
        }
    }

    #[test]
    fn test_registry() {
        let registry: WaiterRegistry<u64, &str> = WaiterRegistry::new();
        let info = wait_info(1, "row-9", Instant::now());
        registry.register(info.clone());
        assert!(registry.contains(&1));
        assert!(!registry.contains(&2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&1, &"row-9").unwrap().mode, LockMode::Exclusive);
        assert!(registry.get(&1, &"row-8").is_none());
        assert_eq!(registry.snapshot().len(), 1);
        assert!(registry.deregister(&info).is_some());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_keeps_each_wait_of_one_owner() {
        let registry: WaiterRegistry<u64, &str> = WaiterRegistry::new();
        let start = Instant::now();
        let first = wait_info(1, "row-1", start);
        let second = wait_info(1, "row-2", start + Duration::from_millis(1));
        registry.register(first.clone());
        registry.register(second.clone());
        assert_eq!(registry.len(), 2);

        assert!(registry.deregister(&first).is_some());
        assert!(registry.contains(&1));
        assert_eq!(registry.get(&1, &"row-2"), Some(second.clone()));

        // A stale deregister leaves a newer wait on the same target alone.
        let newer = wait_info(1, "row-2", start + Duration::from_millis(2));
        registry.register(newer.clone());
        assert!(registry.deregister(&second).is_none());
        assert_eq!(registry.get(&1, &"row-2"), Some(newer));
    }
}
