//! The lock manager
//!
//! Every lock in the system is a [`LockItem`] holding a queue of requests:
//! granted requests first, waiting requests after them. Items are found
//! through a hash table of buckets, each guarded by its own mutex, behind a
//! global reader-writer lock that only a table resize takes exclusively.
//!
//! No table lock is ever held while a caller is parked. A woken caller
//! hashes its target again, since the table may have been resized in the
//! meantime, and decides the outcome of its wait under the bucket mutex.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::common::{LockError, LockManagerConfig, LockOwner, LockTarget, Result};
use crate::core::item::{LockInfo, LockItem};
use crate::core::mode::{LockDuration, LockMode};
use crate::core::request::RequestStatus;
use crate::index::lock_bucket::LockChain;
use crate::index::lock_table::LockTable;
use crate::metrics::{LockMetrics, LockMetricsSnapshot};
use crate::wait::{LockEventListener, WaitInfo, WaitPolicy, Waiter, WaiterRegistry};

/// Result of evaluating a request under the bucket mutex
enum Attempt {
    Granted(LockMode),
    Wait {
        waiter: Arc<Waiter>,
        wanted: LockMode,
        /// Mode held before a conversion
        held_mode: Option<LockMode>,
    },
}

/// How a wait ended, decided under the bucket mutex
enum WaitOutcome {
    Granted(LockMode),
    /// The deadline passed before a releaser granted the request
    TimedOut,
    /// The request was removed while its caller slept
    Discarded,
}

/// Memory-resident lock table shared by all transactions of one engine
pub struct LockManager<O: LockOwner, T: LockTarget> {
    config: LockManagerConfig,
    table: LockTable<O, T>,
    waiters: WaiterRegistry<O, T>,
    listeners: RwLock<Vec<Arc<dyn LockEventListener<O, T>>>>,
    metrics: LockMetrics,
}

impl<O: LockOwner, T: LockTarget> LockManager<O, T> {
    pub fn new(config: LockManagerConfig) -> Result<Self> {
        config.validate()?;
        let table = LockTable::new(config.initial_buckets, config.load_factor, config.max_buckets);
        log::info!(
            "Lock manager started with {} buckets, load factor {}",
            table.bucket_count(),
            config.load_factor
        );
        Ok(Self {
            config,
            table,
            waiters: WaiterRegistry::new(),
            listeners: RwLock::new(Vec::new()),
            metrics: LockMetrics::new(),
        })
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    /// Acquires a lock on `target` for `owner`.
    ///
    /// A first request is granted if it is compatible with the granted group
    /// and nobody is queued ahead of it. A request by an owner that already
    /// holds a grant is a conversion to the join of both modes; it is checked
    /// against the other grants only and keeps its current grant while it
    /// waits. Each successful acquisition adds one reference that a matching
    /// [`release`](Self::release) removes.
    pub fn acquire(
        &self,
        owner: O,
        target: T,
        mode: LockMode,
        duration: LockDuration,
        wait: WaitPolicy,
    ) -> Result<LockHandle<'_, O, T>> {
        if mode == LockMode::None {
            return Err(LockError::InvalidMode {
                mode: mode.to_string(),
            });
        }
        LockMetrics::record(&self.metrics.acquires);
        log::debug!(
            "Lock requested by {:?} for {:?}, mode={}, duration={:?}, wait={:?}",
            owner,
            target,
            mode,
            duration,
            wait
        );

        if self.config.auto_resize && self.table.grow_if_needed().is_some() {
            LockMetrics::record(&self.metrics.resizes);
        }

        let start = Instant::now();
        let attempt = {
            let buckets = self.table.read();
            let mut chain = self.table.bucket(&buckets, &target).lock();
            self.try_acquire(&mut chain, &owner, &target, mode, duration, wait)?
        };

        let granted = match attempt {
            Attempt::Granted(granted) => granted,
            Attempt::Wait {
                waiter,
                wanted,
                held_mode,
            } => self.wait_for_grant(
                &owner,
                &target,
                wanted,
                held_mode,
                duration,
                waiter,
                wait,
                start,
            )?,
        };

        Ok(LockHandle {
            manager: self,
            owner,
            target,
            mode: granted,
            duration,
        })
    }

    fn try_acquire(
        &self,
        chain: &mut LockChain<O, T>,
        owner: &O,
        target: &T,
        mode: LockMode,
        duration: LockDuration,
        wait: WaitPolicy,
    ) -> Result<Attempt> {
        let Some(item) = chain.find_mut(target) else {
            // Uncontended: nobody holds or waits for this target.
            if duration != LockDuration::Instant {
                chain.insert(LockItem::new(target.clone(), owner.clone(), mode, duration));
                self.table.item_added();
            }
            LockMetrics::record(&self.metrics.immediate_grants);
            log::trace!("New lock item for {:?} granted to {:?} in mode {}", target, owner, mode);
            return Ok(Attempt::Granted(mode));
        };

        let Some(pos) = item.position(owner) else {
            if !item.has_waiters() && item.group_mode().is_compatible(mode) {
                if duration != LockDuration::Instant {
                    item.push_granted(owner.clone(), mode, duration);
                }
                LockMetrics::record(&self.metrics.immediate_grants);
                return Ok(Attempt::Granted(mode));
            }
            if wait.is_no_wait() {
                LockMetrics::record(&self.metrics.denials);
                log::debug!(
                    "Lock on {:?} in mode {} denied to {:?}, group mode {}",
                    target,
                    mode,
                    owner,
                    item.group_mode()
                );
                return Err(LockError::denied(owner, target, mode));
            }
            let waiter = Waiter::new();
            item.push_waiting(owner.clone(), mode, duration, Arc::clone(&waiter));
            return Ok(Attempt::Wait {
                waiter,
                wanted: mode,
                held_mode: None,
            });
        };

        let request = item.request(pos);
        if request.is_waiting() {
            return Err(LockError::AlreadyWaiting {
                owner: format!("{owner:?}"),
                target: format!("{target:?}"),
            });
        }

        let held = request.mode;
        let wanted = held.join(mode);
        if wanted == held {
            if duration != LockDuration::Instant {
                let request = item.request_mut(pos);
                request.count += 1;
                if duration == LockDuration::Commit {
                    request.duration = LockDuration::Commit;
                }
            }
            LockMetrics::record(&self.metrics.reentrant_grants);
            return Ok(Attempt::Granted(held));
        }

        if item.other_granted_mode(pos).is_compatible(wanted) {
            if duration != LockDuration::Instant {
                let request = item.request_mut(pos);
                request.mode = wanted;
                request.convert_mode = wanted;
                request.count += 1;
                if duration == LockDuration::Commit {
                    request.duration = LockDuration::Commit;
                }
                item.recompute_group_mode();
            }
            LockMetrics::record(&self.metrics.conversions);
            log::trace!("{:?} converted {:?} from {} to {}", owner, target, held, wanted);
            return Ok(Attempt::Granted(wanted));
        }

        if wait.is_no_wait() {
            LockMetrics::record(&self.metrics.denials);
            return Err(LockError::denied(owner, target, wanted));
        }
        let waiter = Waiter::new();
        item.request_mut(pos).begin_conversion(wanted, Arc::clone(&waiter));
        Ok(Attempt::Wait {
            waiter,
            wanted,
            held_mode: Some(held),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn wait_for_grant(
        &self,
        owner: &O,
        target: &T,
        wanted: LockMode,
        held_mode: Option<LockMode>,
        duration: LockDuration,
        waiter: Arc<Waiter>,
        wait: WaitPolicy,
        start: Instant,
    ) -> Result<LockMode> {
        LockMetrics::record(&self.metrics.waits);
        let info = WaitInfo {
            owner: owner.clone(),
            target: target.clone(),
            mode: wanted,
            held_mode,
            since: start,
        };
        self.waiters.register(info.clone());
        for listener in self.listeners.read().iter() {
            listener.before_wait(&info);
        }

        log::debug!("{:?} waiting for {:?} in mode {}", owner, target, wanted);
        let signalled = waiter.park(wait.deadline(start));
        self.waiters.deregister(&info);

        let (outcome, woken) = {
            let buckets = self.table.read();
            let mut chain = self.table.bucket(&buckets, target).lock();
            self.resolve_wait(&mut chain, owner, target, duration, held_mode)
        };
        for waiter in woken {
            waiter.wake();
        }

        match outcome {
            WaitOutcome::Granted(granted) => {
                LockMetrics::record(&self.metrics.waited_grants);
                log::debug!(
                    "{:?} granted {:?} in mode {} after {:?}",
                    owner,
                    target,
                    granted,
                    start.elapsed()
                );
                Ok(granted)
            }
            WaitOutcome::TimedOut => {
                LockMetrics::record(&self.metrics.timeouts);
                log::warn!(
                    "{:?} timed out waiting for {:?} in mode {} (signalled={})",
                    owner,
                    target,
                    wanted,
                    signalled
                );
                Err(LockError::LockTimeout {
                    owner: format!("{owner:?}"),
                    target: format!("{target:?}"),
                    mode: wanted.to_string(),
                    waited_ms: start.elapsed().as_millis() as u64,
                })
            }
            WaitOutcome::Discarded => {
                LockMetrics::record(&self.metrics.denials);
                log::debug!("Wait of {:?} on {:?} was discarded", owner, target);
                Err(LockError::denied(owner, target, wanted))
            }
        }
    }

    /// Decides the outcome of a finished wait. The bucket mutex orders this
    /// against any releaser granting the request concurrently.
    fn resolve_wait(
        &self,
        chain: &mut LockChain<O, T>,
        owner: &O,
        target: &T,
        duration: LockDuration,
        held_mode: Option<LockMode>,
    ) -> (WaitOutcome, Vec<Arc<Waiter>>) {
        let Some(item) = chain.find_mut(target) else {
            return (WaitOutcome::Discarded, Vec::new());
        };
        let Some(pos) = item.position(owner) else {
            // Our own last reference was released, discarding the conversion.
            return (WaitOutcome::Discarded, Vec::new());
        };

        let request = item.request_mut(pos);
        let outcome = if request.status == RequestStatus::Granted {
            let granted = request.mode;
            if duration != LockDuration::Instant {
                return (WaitOutcome::Granted(granted), Vec::new());
            }
            // Give an instant grant back straight away.
            match held_mode {
                Some(previous) => {
                    request.mode = previous;
                    request.convert_mode = previous;
                    request.count -= 1;
                    item.recompute_group_mode();
                }
                None => {
                    item.remove(pos);
                }
            }
            WaitOutcome::Granted(granted)
        } else {
            // Deadline passed before any releaser granted the request.
            if request.converting {
                request.abandon_conversion();
            } else {
                item.remove(pos);
            }
            WaitOutcome::TimedOut
        };

        // Whatever left the queue may have been blocking the waiters behind it.
        let woken = item.grant_waiters();
        if item.is_empty() && chain.remove_if_empty(target) {
            self.table.item_removed();
        }
        (outcome, woken)
    }

    /// Releases one reference to the lock held by `owner` on `target`.
    ///
    /// Returns true if the lock was dropped, false if references remain.
    /// Fails with [`LockError::InvalidRelease`] if the owner holds no grant,
    /// leaving the table untouched.
    pub fn release(&self, owner: &O, target: &T) -> Result<bool> {
        self.release_internal(owner, target, false)
    }

    /// Drops the lock regardless of how many references are held.
    pub fn force_release(&self, owner: &O, target: &T) -> Result<()> {
        self.release_internal(owner, target, true).map(|_| ())
    }

    /// Releases one reference on each target, as at transaction end.
    ///
    /// Every target is attempted. Returns the number of locks dropped, or
    /// the first error encountered.
    pub fn release_all<'t, I>(&self, owner: &O, targets: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'t T>,
        T: 't,
    {
        let mut dropped = 0;
        let mut first_error = None;
        for target in targets {
            match self.release(owner, target) {
                Ok(true) => dropped += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(dropped),
        }
    }

    fn release_internal(&self, owner: &O, target: &T, force: bool) -> Result<bool> {
        log::debug!("Request by {:?} to release lock for {:?}", owner, target);

        let woken = {
            let buckets = self.table.read();
            let mut chain = self.table.bucket(&buckets, target).lock();

            let Some(item) = chain.find_mut(target) else {
                LockMetrics::record(&self.metrics.invalid_releases);
                return Err(LockError::invalid_release(owner, target));
            };
            let Some(pos) = item
                .position(owner)
                .filter(|&pos| item.request(pos).holds_grant())
            else {
                LockMetrics::record(&self.metrics.invalid_releases);
                return Err(LockError::invalid_release(owner, target));
            };

            LockMetrics::record(&self.metrics.releases);
            let request = item.request_mut(pos);
            request.count = if force { 0 } else { request.count.saturating_sub(1) };
            if request.count > 0 {
                log::trace!("{:?} still holds {} references on {:?}", owner, request.count, target);
                return Ok(false);
            }

            let removed = item.remove(pos);
            let mut woken = item.grant_waiters();
            if removed.converting {
                // The pending conversion goes with the request; let its
                // caller fail now rather than at its deadline.
                woken.extend(removed.waiter);
            }
            if item.is_empty() && chain.remove_if_empty(target) {
                self.table.item_removed();
            }
            woken
        };

        for waiter in woken {
            waiter.wake();
        }
        Ok(true)
    }

    /// Lowers the mode held by `owner` to `mode`, which the held mode must
    /// cover, and grants whatever waiters that unblocks.
    pub fn downgrade(&self, owner: &O, target: &T, mode: LockMode) -> Result<()> {
        let woken = {
            let buckets = self.table.read();
            let mut chain = self.table.bucket(&buckets, target).lock();
            let invalid = |held: LockMode| LockError::InvalidDowngrade {
                target: format!("{target:?}"),
                held: held.to_string(),
                requested: mode.to_string(),
            };

            let Some(item) = chain.find_mut(target) else {
                return Err(invalid(LockMode::None));
            };
            let Some(pos) = item
                .position(owner)
                .filter(|&pos| item.request(pos).status == RequestStatus::Granted)
            else {
                return Err(invalid(LockMode::None));
            };

            let held = item.request(pos).mode;
            if mode == LockMode::None || !held.covers(mode) {
                return Err(invalid(held));
            }
            if mode == held {
                return Ok(());
            }

            log::debug!("{:?} downgrading {:?} from {} to {}", owner, target, held, mode);
            let request = item.request_mut(pos);
            request.mode = mode;
            request.convert_mode = mode;
            item.recompute_group_mode();
            item.grant_waiters()
        };

        for waiter in woken {
            waiter.wake();
        }
        Ok(())
    }

    /// Mode granted to `owner` on `target`, if any. While a conversion is
    /// pending this is the mode held before it.
    pub fn held_mode(&self, owner: &O, target: &T) -> Option<LockMode> {
        let buckets = self.table.read();
        let chain = self.table.bucket(&buckets, target).lock();
        let item = chain.find(target)?;
        let pos = item.position(owner)?;
        let request = item.request(pos);
        request.holds_grant().then_some(request.mode)
    }

    /// Snapshot of the lock state of `target`, if anyone holds or waits for it.
    pub fn lock_info(&self, target: &T) -> Option<LockInfo<O>> {
        let buckets = self.table.read();
        let chain = self.table.bucket(&buckets, target).lock();
        chain.find(target).map(LockItem::info)
    }

    /// Callers currently parked, for an external deadlock detector.
    pub fn waiters(&self) -> Vec<WaitInfo<O, T>> {
        self.waiters.snapshot()
    }

    /// The wait of `owner` on `target`, if it is parked there.
    pub fn waiter(&self, owner: &O, target: &T) -> Option<WaitInfo<O, T>> {
        self.waiters.get(owner, target)
    }

    /// True if `owner` is parked on any target.
    pub fn is_waiting(&self, owner: &O) -> bool {
        self.waiters.contains(owner)
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn LockEventListener<O, T>>) {
        self.listeners.write().push(listener);
    }

    /// Number of targets with lock state
    pub fn item_count(&self) -> usize {
        self.table.item_count()
    }

    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Grows the table to the next size. Returns the new bucket count, or
    /// None if the table is already at its maximum.
    pub fn resize(&self) -> Option<usize> {
        let resized = self.table.grow();
        if resized.is_some() {
            LockMetrics::record(&self.metrics.resizes);
        }
        resized
    }

    pub fn metrics(&self) -> LockMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Checks that no locks remain before the owning engine shuts down.
    pub fn shutdown(&self) -> Result<()> {
        let count = self.table.item_count();
        if count > 0 {
            log::warn!("Lock manager shut down with {} lock items outstanding", count);
            return Err(LockError::LocksOutstanding { count });
        }
        log::info!("Lock manager shut down cleanly");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        self.table.check_invariants();
    }
}

impl<O: LockOwner, T: LockTarget> Default for LockManager<O, T> {
    fn default() -> Self {
        let config = LockManagerConfig::default();
        Self {
            table: LockTable::new(config.initial_buckets, config.load_factor, config.max_buckets),
            config,
            waiters: WaiterRegistry::new(),
            listeners: RwLock::new(Vec::new()),
            metrics: LockMetrics::new(),
        }
    }
}

impl<O: LockOwner, T: LockTarget> Drop for LockManager<O, T> {
    fn drop(&mut self) {
        let count = self.table.item_count();
        if count > 0 {
            log::warn!("Lock manager dropped with {} lock items outstanding", count);
        }
    }
}

impl<O: LockOwner, T: LockTarget> fmt::Debug for LockManager<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("buckets", &self.table.bucket_count())
            .field("items", &self.table.item_count())
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// A granted lock: identifies the (manager, target, owner) triple.
///
/// Dropping a handle does not release the lock; locks are held until the
/// transaction manager releases them.
pub struct LockHandle<'a, O: LockOwner, T: LockTarget> {
    manager: &'a LockManager<O, T>,
    owner: O,
    target: T,
    mode: LockMode,
    duration: LockDuration,
}

impl<'a, O: LockOwner, T: LockTarget> LockHandle<'a, O, T> {
    pub fn owner(&self) -> &O {
        &self.owner
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Mode granted by the acquire that produced this handle
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn duration(&self) -> LockDuration {
        self.duration
    }

    /// Mode held now, which later acquires or releases may have changed
    pub fn current_mode(&self) -> Option<LockMode> {
        self.manager.held_mode(&self.owner, &self.target)
    }

    pub fn release(&self) -> Result<bool> {
        self.manager.release(&self.owner, &self.target)
    }

    pub fn downgrade(&self, mode: LockMode) -> Result<()> {
        self.manager.downgrade(&self.owner, &self.target, mode)
    }
}

impl<O: LockOwner, T: LockTarget> fmt::Debug for LockHandle<'_, O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("owner", &self.owner)
            .field("target", &self.target)
            .field("mode", &self.mode)
            .field("duration", &self.duration)
            .finish()
    }
}
