//! Per-target lock state
//!
//! A lock item keeps the queue of requests for one target in arrival order.
//! Granted requests form a prefix of the queue; requests still waiting for
//! their first grant follow. A granted request waiting to convert keeps its
//! place in the granted prefix.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::{LockOwner, LockTarget};
use crate::core::mode::{LockDuration, LockMode};
use crate::core::request::{LockRequest, RequestStatus};
use crate::wait::Waiter;

/// All lock state for one target
#[derive(Debug)]
pub(crate) struct LockItem<O, T> {
    target: T,
    requests: Vec<LockRequest<O>>,
    /// Join of the modes of every request holding a grant.
    group_mode: LockMode,
}

impl<O: LockOwner, T: LockTarget> LockItem<O, T> {
    /// Creates an item whose first request is granted immediately.
    pub fn new(target: T, owner: O, mode: LockMode, duration: LockDuration) -> Self {
        Self {
            target,
            requests: vec![LockRequest::granted(owner, mode, duration)],
            group_mode: mode,
        }
    }

    #[inline]
    pub fn target(&self) -> &T {
        &self.target
    }

    #[inline]
    pub fn group_mode(&self) -> LockMode {
        self.group_mode
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn position(&self, owner: &O) -> Option<usize> {
        self.requests.iter().position(|r| &r.owner == owner)
    }

    #[inline]
    pub fn request(&self, pos: usize) -> &LockRequest<O> {
        &self.requests[pos]
    }

    #[inline]
    pub fn request_mut(&mut self, pos: usize) -> &mut LockRequest<O> {
        &mut self.requests[pos]
    }

    /// True if any request, including a pending conversion, is waiting.
    pub fn has_waiters(&self) -> bool {
        self.requests.iter().any(LockRequest::is_waiting)
    }

    /// Grants a new request without waiting.
    pub fn push_granted(&mut self, owner: O, mode: LockMode, duration: LockDuration) {
        self.requests.push(LockRequest::granted(owner, mode, duration));
        self.group_mode = self.group_mode.join(mode);
    }

    /// Queues a new request behind every existing one.
    pub fn push_waiting(
        &mut self,
        owner: O,
        mode: LockMode,
        duration: LockDuration,
        waiter: Arc<Waiter>,
    ) {
        self.requests.push(LockRequest::waiting(owner, mode, duration, waiter));
    }

    /// Join of the granted modes of every request except the one at `pos`.
    pub fn other_granted_mode(&self, pos: usize) -> LockMode {
        self.requests
            .iter()
            .enumerate()
            .filter(|(i, r)| *i != pos && r.holds_grant())
            .fold(LockMode::None, |group, (_, r)| group.join(r.mode))
    }

    pub fn recompute_group_mode(&mut self) {
        self.group_mode = self
            .requests
            .iter()
            .filter(|r| r.holds_grant())
            .fold(LockMode::None, |group, r| group.join(r.mode));
    }

    /// Removes the request at `pos` and recomputes the group mode.
    pub fn remove(&mut self, pos: usize) -> LockRequest<O> {
        let request = self.requests.remove(pos);
        self.recompute_group_mode();
        request
    }

    /// Grants waiting requests. Pending conversions go first: each one that
    /// fits the other grants is granted, the rest keep waiting. New requests
    /// follow in arrival order, stopping at the first one that cannot be
    /// granted, and only once no conversion is pending.
    /// Returns the waiters to wake.
    pub fn grant_waiters(&mut self) -> Vec<Arc<Waiter>> {
        let mut woken = Vec::new();
        let mut conversion_pending = false;
        for pos in 0..self.requests.len() {
            let request = &self.requests[pos];
            if !(request.is_waiting() && request.converting) {
                continue;
            }
            if self.other_granted_mode(pos).is_compatible(request.convert_mode) {
                self.grant_at(pos, &mut woken);
            } else {
                conversion_pending = true;
            }
        }
        if conversion_pending {
            return woken;
        }

        for pos in 0..self.requests.len() {
            let request = &self.requests[pos];
            if !request.is_waiting() {
                continue;
            }
            if !self.group_mode.is_compatible(request.mode) {
                break;
            }
            self.grant_at(pos, &mut woken);
        }
        woken
    }

    fn grant_at(&mut self, pos: usize, woken: &mut Vec<Arc<Waiter>>) {
        let request = &mut self.requests[pos];
        log::trace!(
            "Granting waiting request of {:?} on {:?} in mode {}",
            request.owner,
            self.target,
            request.wanted_mode()
        );
        if let Some(waiter) = request.grant() {
            woken.push(waiter);
        }
        self.group_mode = self.group_mode.join(request.mode);
    }

    /// Snapshot of this item for queries.
    pub fn info(&self) -> LockInfo<O> {
        LockInfo {
            group_mode: self.group_mode,
            requests: self
                .requests
                .iter()
                .map(|r| RequestInfo {
                    owner: r.owner.clone(),
                    mode: r.mode,
                    convert_mode: r.converting.then_some(r.convert_mode),
                    count: r.count,
                    status: r.status,
                    duration: r.duration,
                })
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn check_invariants(&self) {
        let expected = self
            .requests
            .iter()
            .filter(|r| r.holds_grant())
            .fold(LockMode::None, |group, r| group.join(r.mode));
        assert_eq!(self.group_mode, expected, "stale group mode on {:?}", self.target);

        let first_new_waiter = self
            .requests
            .iter()
            .position(|r| r.is_waiting() && !r.converting)
            .unwrap_or(self.requests.len());
        assert!(
            self.requests[first_new_waiter..]
                .iter()
                .all(|r| !r.holds_grant()),
            "granted request queued behind a waiter on {:?}",
            self.target
        );
    }
}

/// Read-only view of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo<O> {
    pub owner: O,
    /// Granted mode, or the requested mode while waiting for a first grant
    pub mode: LockMode,
    /// Target mode of a pending conversion
    pub convert_mode: Option<LockMode>,
    pub count: u32,
    pub status: RequestStatus,
    pub duration: LockDuration,
}

/// Read-only view of all lock state for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo<O> {
    pub group_mode: LockMode,
    /// Requests in queue order
    pub requests: Vec<RequestInfo<O>>,
}

impl<O: PartialEq> LockInfo<O> {
    pub fn request(&self, owner: &O) -> Option<&RequestInfo<O>> {
        self.requests.iter().find(|r| &r.owner == owner)
    }

    pub fn granted_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.status == RequestStatus::Granted || r.convert_mode.is_some())
            .count()
    }

    pub fn waiting_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.status == RequestStatus::Waiting)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> LockItem<u64, &'static str> {
        LockItem::new("page-1", 1, LockMode::Shared, LockDuration::Manual)
    }

    #[test]
    fn test_group_mode_tracks_grants() {
        let mut item = item();
        item.push_granted(2, LockMode::IntentionShared, LockDuration::Manual);
        assert_eq!(item.group_mode(), LockMode::Shared);

        let pos = item.position(&1).unwrap();
        item.remove(pos);
        assert_eq!(item.group_mode(), LockMode::IntentionShared);
        item.check_invariants();
    }

    #[test]
    fn test_waiters_are_not_part_of_group_mode() {
        let mut item = item();
        item.push_waiting(2, LockMode::Exclusive, LockDuration::Manual, Waiter::new());
        assert_eq!(item.group_mode(), LockMode::Shared);
        assert!(item.has_waiters());
        item.check_invariants();
    }

    #[test]
    fn test_grant_waiters_stops_at_first_blocked() {
        let mut item = item();
        item.push_waiting(2, LockMode::Exclusive, LockDuration::Manual, Waiter::new());
        item.push_waiting(3, LockMode::Shared, LockDuration::Manual, Waiter::new());

        assert!(item.grant_waiters().is_empty());
        assert!(item.request(item.position(&3).unwrap()).is_waiting());

        item.remove(item.position(&1).unwrap());
        let woken = item.grant_waiters();
        assert_eq!(woken.len(), 1);
        assert_eq!(item.group_mode(), LockMode::Exclusive);
        assert!(item.request(item.position(&3).unwrap()).is_waiting());
        item.check_invariants();
    }

    #[test]
    fn test_grant_waiters_grants_compatible_prefix() {
        let mut item = LockItem::new("page-1", 1u64, LockMode::Exclusive, LockDuration::Manual);
        item.push_waiting(2, LockMode::Shared, LockDuration::Manual, Waiter::new());
        item.push_waiting(3, LockMode::IntentionShared, LockDuration::Manual, Waiter::new());
        item.push_waiting(4, LockMode::IntentionExclusive, LockDuration::Manual, Waiter::new());
        item.push_waiting(5, LockMode::Shared, LockDuration::Manual, Waiter::new());

        item.remove(0);
        let woken = item.grant_waiters();
        assert_eq!(woken.len(), 2);
        assert_eq!(item.group_mode(), LockMode::Shared);
        assert_eq!(item.request(item.position(&2).unwrap()).count, 1);
        assert!(item.request(item.position(&4).unwrap()).is_waiting());
        assert!(item.request(item.position(&5).unwrap()).is_waiting());
        item.check_invariants();
    }

    #[test]
    fn test_conversion_checks_other_grants_only() {
        let mut item = item();
        item.push_granted(2, LockMode::Shared, LockDuration::Manual);
        item.request_mut(0).begin_conversion(LockMode::Exclusive, Waiter::new());

        assert_eq!(item.other_granted_mode(0), LockMode::Shared);
        assert!(item.grant_waiters().is_empty());

        item.remove(item.position(&2).unwrap());
        assert_eq!(item.other_granted_mode(0), LockMode::None);
        assert_eq!(item.grant_waiters().len(), 1);
        assert_eq!(item.group_mode(), LockMode::Exclusive);
        assert_eq!(item.request(0).count, 2);
        item.check_invariants();
    }

    #[test]
    fn test_blocked_conversion_does_not_hide_later_conversion() {
        let mut item =
            LockItem::new("page-1", 1u64, LockMode::IntentionShared, LockDuration::Manual);
        item.push_granted(2, LockMode::IntentionShared, LockDuration::Manual);
        item.push_granted(3, LockMode::Shared, LockDuration::Manual);
        item.push_waiting(4, LockMode::Shared, LockDuration::Manual, Waiter::new());
        item.request_mut(0).begin_conversion(LockMode::Exclusive, Waiter::new());
        item.request_mut(1).begin_conversion(LockMode::IntentionExclusive, Waiter::new());

        item.remove(item.position(&3).unwrap());
        let woken = item.grant_waiters();
        assert_eq!(woken.len(), 1);
        assert_eq!(item.request(1).mode, LockMode::IntentionExclusive);
        assert!(!item.request(1).converting);
        assert!(item.request(0).converting);
        // A new request never overtakes a pending conversion.
        assert!(item.request(item.position(&4).unwrap()).is_waiting());
        assert_eq!(item.group_mode(), LockMode::IntentionExclusive);
        item.check_invariants();
    }

    #[test]
    fn test_info_snapshot() {
        let mut item = item();
        item.push_waiting(2, LockMode::Exclusive, LockDuration::Commit, Waiter::new());
        let info = item.info();
        assert_eq!(info.group_mode, LockMode::Shared);
        assert_eq!(info.granted_count(), 1);
        assert_eq!(info.waiting_count(), 1);
        assert_eq!(info.request(&2).unwrap().duration, LockDuration::Commit);
        assert!(info.request(&9).is_none());
    }
}
