//! Common types and error definitions for rslock
//!
//! This module contains the error type, the configuration of a lock manager
//! instance and the bounds every owner and target type must satisfy.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::key_hash;

/// Identity of the party holding locks, typically a transaction id.
pub trait LockOwner: Clone + Eq + Hash + fmt::Debug + Send + Sync {}

impl<X: Clone + Eq + Hash + fmt::Debug + Send + Sync> LockOwner for X {}

/// Opaque identity of a lockable resource. Only hashed and compared.
pub trait LockTarget: Clone + Eq + Hash + fmt::Debug + Send + Sync {}

impl<X: Clone + Eq + Hash + fmt::Debug + Send + Sync> LockTarget for X {}

/// Error types for lock manager operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Release without a matching granted request. Always a caller bug.
    #[error("Cannot release lock on {target}: {owner} holds no granted request")]
    InvalidRelease { owner: String, target: String },

    #[error("Lock request by {owner} on {target} for mode {mode} denied")]
    LockDenied {
        owner: String,
        target: String,
        mode: String,
    },

    #[error("Lock request by {owner} on {target} for mode {mode} timed out after {waited_ms} ms")]
    LockTimeout {
        owner: String,
        target: String,
        mode: String,
        waited_ms: u64,
    },

    /// The adaptor could not map a domain object to a lock target
    #[error("Invalid lock target: {message}")]
    InvalidTarget { message: String },

    #[error("Mode {mode} cannot be requested")]
    InvalidMode { mode: String },

    #[error("Cannot downgrade lock on {target} from {held} to {requested}")]
    InvalidDowngrade {
        target: String,
        held: String,
        requested: String,
    },

    #[error("{owner} is already waiting for a lock on {target}")]
    AlreadyWaiting { owner: String, target: String },

    #[error("{count} lock items still held at shutdown")]
    LocksOutstanding { count: usize },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl LockError {
    pub(crate) fn invalid_release(owner: &impl fmt::Debug, target: &impl fmt::Debug) -> Self {
        LockError::InvalidRelease {
            owner: format!("{owner:?}"),
            target: format!("{target:?}"),
        }
    }

    pub(crate) fn denied(
        owner: &impl fmt::Debug,
        target: &impl fmt::Debug,
        mode: impl fmt::Display,
    ) -> Self {
        LockError::LockDenied {
            owner: format!("{owner:?}"),
            target: format!("{target:?}"),
            mode: mode.to_string(),
        }
    }

    /// Check if retrying the operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LockError::LockDenied { .. } | LockError::LockTimeout { .. })
    }

    /// Check if this error indicates a misuse of the lock manager API
    pub fn is_caller_bug(&self) -> bool {
        matches!(
            self,
            LockError::InvalidRelease { .. }
                | LockError::InvalidMode { .. }
                | LockError::InvalidDowngrade { .. }
                | LockError::AlreadyWaiting { .. }
        )
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            LockError::InvalidRelease { .. } => "invalid_release",
            LockError::LockDenied { .. } => "denied",
            LockError::LockTimeout { .. } => "timeout",
            LockError::InvalidTarget { .. } => "target",
            LockError::InvalidMode { .. } | LockError::InvalidDowngrade { .. } => "mode",
            LockError::AlreadyWaiting { .. } => "already_waiting",
            LockError::LocksOutstanding { .. } => "shutdown",
            LockError::InvalidConfig { .. } => "configuration",
        }
    }
}

/// Result type alias for lock manager operations
pub type Result<T> = std::result::Result<T, LockError>;

/// Configuration for a lock manager instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockManagerConfig {
    /// Requested number of hash buckets, rounded up to the next table prime
    pub initial_buckets: usize,
    /// Lock items per bucket above which the table grows
    pub load_factor: f64,
    /// The table never grows beyond this many buckets
    pub max_buckets: usize,
    /// Whether acquire grows the table automatically
    pub auto_resize: bool,
}

impl LockManagerConfig {
    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.initial_buckets == 0 {
            return Err(LockError::InvalidConfig {
                message: "Initial bucket count must be at least 1".to_string(),
            });
        }

        if self.initial_buckets > key_hash::MAX_TABLE_SIZE {
            return Err(LockError::InvalidConfig {
                message: format!(
                    "Initial bucket count cannot exceed {}",
                    key_hash::MAX_TABLE_SIZE
                ),
            });
        }

        if !(self.load_factor > 0.0 && self.load_factor <= 16.0) {
            return Err(LockError::InvalidConfig {
                message: "Load factor must be in (0, 16]".to_string(),
            });
        }

        if self.max_buckets < self.initial_buckets {
            return Err(LockError::InvalidConfig {
                message: "Maximum bucket count cannot be below the initial bucket count"
                    .to_string(),
            });
        }

        if !self.auto_resize && self.load_factor < 1.0 {
            log::warn!(
                "Load factor {} has no effect while auto resize is disabled",
                self.load_factor
            );
        }

        Ok(())
    }

    /// Create a configuration starting from the given table size
    pub fn with_initial_buckets(initial_buckets: usize) -> Result<Self> {
        let config = Self {
            initial_buckets,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            initial_buckets: key_hash::MIN_TABLE_SIZE,
            load_factor: 0.75,
            max_buckets: key_hash::MAX_TABLE_SIZE,
            auto_resize: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LockManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let zero = LockManagerConfig {
            initial_buckets: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(LockError::InvalidConfig { .. })));

        let bad_load = LockManagerConfig {
            load_factor: 0.0,
            ..Default::default()
        };
        assert!(bad_load.validate().is_err());

        let nan_load = LockManagerConfig {
            load_factor: f64::NAN,
            ..Default::default()
        };
        assert!(nan_load.validate().is_err());

        let inverted = LockManagerConfig {
            initial_buckets: 1000,
            max_buckets: 100,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_with_initial_buckets() {
        let config = LockManagerConfig::with_initial_buckets(500).unwrap();
        assert_eq!(config.initial_buckets, 500);
        assert!(config.auto_resize);
    }

    #[test]
    fn test_error_classification() {
        let denied = LockError::denied(&1u64, &"page-7", "Exclusive");
        assert!(denied.is_recoverable());
        assert!(!denied.is_caller_bug());
        assert_eq!(denied.category(), "denied");

        let release = LockError::invalid_release(&1u64, &"page-7");
        assert!(release.is_caller_bug());
        assert!(!release.is_recoverable());
        assert_eq!(
            release.to_string(),
            "Cannot release lock on \"page-7\": 1 holds no granted request"
        );
    }
}
