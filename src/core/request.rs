use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::mode::{LockDuration, LockMode};
use crate::wait::Waiter;

/// Status of a lock request in the queue.
///
/// A denied or timed-out request is removed from the queue under the same
/// bucket lock that decides it, so those outcomes surface only as
/// `LockDenied` and `LockTimeout` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Granted,
    Waiting,
}

/// One owner's request on one lock item.
///
/// While a conversion is pending the request keeps its granted `mode`, which
/// still takes part in compatibility checks, and waits for `convert_mode`.
#[derive(Debug)]
pub(crate) struct LockRequest<O> {
    pub owner: O,
    pub mode: LockMode,
    pub convert_mode: LockMode,
    pub count: u32,
    pub duration: LockDuration,
    pub status: RequestStatus,
    pub converting: bool,
    /// Set while a thread is parked on this request.
    pub waiter: Option<Arc<Waiter>>,
}

impl<O> LockRequest<O> {
    pub fn granted(owner: O, mode: LockMode, duration: LockDuration) -> Self {
        Self {
            owner,
            mode,
            convert_mode: mode,
            count: 1,
            duration,
            status: RequestStatus::Granted,
            converting: false,
            waiter: None,
        }
    }

    pub fn waiting(owner: O, mode: LockMode, duration: LockDuration, waiter: Arc<Waiter>) -> Self {
        Self {
            owner,
            mode,
            convert_mode: mode,
            count: 0,
            duration,
            status: RequestStatus::Waiting,
            converting: false,
            waiter: Some(waiter),
        }
    }

    /// True if this request currently holds a grant, including a granted
    /// request waiting to convert.
    #[inline]
    pub fn holds_grant(&self) -> bool {
        self.status == RequestStatus::Granted || self.converting
    }

    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.status == RequestStatus::Waiting
    }

    /// Marks a granted request as waiting to convert to `mode`.
    pub fn begin_conversion(&mut self, mode: LockMode, waiter: Arc<Waiter>) {
        debug_assert_eq!(self.status, RequestStatus::Granted);
        self.convert_mode = mode;
        self.converting = true;
        self.status = RequestStatus::Waiting;
        self.waiter = Some(waiter);
    }

    /// Abandons a pending conversion, keeping the original grant.
    pub fn abandon_conversion(&mut self) {
        self.convert_mode = self.mode;
        self.converting = false;
        self.status = RequestStatus::Granted;
        self.waiter = None;
    }

    /// Grants a waiting request, counting it as one more reference.
    /// Returns the waiter to wake.
    pub fn grant(&mut self) -> Option<Arc<Waiter>> {
        if self.converting {
            self.mode = self.convert_mode;
            self.converting = false;
        }
        self.count += 1;
        self.status = RequestStatus::Granted;
        self.waiter.take()
    }

    /// Mode this request is asking for: the conversion target while converting.
    #[inline]
    pub fn wanted_mode(&self) -> LockMode {
        if self.converting {
            self.convert_mode
        } else {
            self.mode
        }
    }
}
