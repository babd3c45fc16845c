//! # rslock: A Hierarchical Lock Manager in Rust
//!
//! `rslock` is the lock manager of a transactional storage engine. It grants,
//! converts and releases locks on opaque targets (containers, pages, tuples,
//! keys) on behalf of concurrently running transactions.
//!
//! ## Core Features
//!
//! - **Hierarchical Modes**: intention, shared, update and exclusive modes with
//!   a static compatibility matrix
//! - **FIFO Fairness**: waiters are granted strictly in arrival order, while
//!   conversions keep their existing grant
//! - **Bounded Waiting**: no-wait, timed and unbounded acquisition
//! - **Resizable Lock Table**: per-bucket mutexes behind a global lock that only
//!   a resize takes exclusively
//!
//! ## Example
//!
//! ```rust
//! use rslock::{LockDuration, LockManager, LockManagerConfig, LockMode, WaitPolicy};
//!
//! let manager: LockManager<u64, &str> = LockManager::new(LockManagerConfig::default()).unwrap();
//!
//! let handle = manager
//!     .acquire(1, "page-7", LockMode::Shared, LockDuration::Manual, WaitPolicy::NoWait)
//!     .unwrap();
//! assert_eq!(handle.mode(), LockMode::Shared);
//!
//! // An incompatible request from another transaction is denied without waiting.
//! assert!(manager
//!     .acquire(2, "page-7", LockMode::Exclusive, LockDuration::Manual, WaitPolicy::NoWait)
//!     .is_err());
//!
//! assert_eq!(handle.release(), Ok(true));
//! manager.shutdown().unwrap();
//! ```

pub mod adaptor;
pub mod common;
pub mod core;
pub mod index;
pub mod manager;
pub mod metrics;
pub mod wait;


// Re-export commonly used types
pub use common::{LockError, LockManagerConfig, LockOwner, LockTarget, Result};
pub use crate::core::item::{LockInfo, RequestInfo};
pub use crate::core::mode::{LockDuration, LockMode};
pub use crate::core::request::RequestStatus;

// Re-export main types
pub use adaptor::{DefaultLockAdaptor, LockAdaptor, Lockable, Location, PageId, TupleId};
pub use manager::{LockHandle, LockManager};
pub use metrics::{LockMetrics, LockMetricsSnapshot};
pub use wait::{LockEventListener, WaitInfo, WaitPolicy};
