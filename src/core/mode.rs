/// Lock modes, durations and the static compatibility/join matrices.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lock modes supported by the lock manager, including the hierarchical
/// intention modes used on containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LockMode {
    None = 0,
    IntentionShared = 1,
    IntentionExclusive = 2,
    Shared = 3,
    SharedIntentionExclusive = 4,
    Update = 5,
    Exclusive = 6,
}

const T: bool = true;
const F: bool = false;

/// `COMPATIBILITY[held][requested]`
const COMPATIBILITY: [[bool; 7]; 7] = [
    //  N  IS IX S  SIX U  X
    [T, T, T, T, T, T, T], // N
    [T, T, T, T, T, T, F], // IS
    [T, T, T, F, F, F, F], // IX
    [T, T, F, T, F, T, F], // S
    [T, T, F, F, F, F, F], // SIX
    [T, T, F, T, F, F, F], // U
    [T, F, F, F, F, F, F], // X
];

use LockMode::{
    Exclusive as X, IntentionExclusive as IX, IntentionShared as IS, None as N, Shared as S,
    SharedIntentionExclusive as SIX, Update as U,
};

/// `JOIN[a][b]` is the least mode covering both `a` and `b`.
const JOIN: [[LockMode; 7]; 7] = [
    //  N    IS   IX   S    SIX  U    X
    [N, IS, IX, S, SIX, U, X],       // N
    [IS, IS, IX, S, SIX, U, X],      // IS
    [IX, IX, IX, SIX, SIX, X, X],    // IX
    [S, S, SIX, S, SIX, U, X],       // S
    [SIX, SIX, SIX, SIX, SIX, X, X], // SIX
    [U, U, X, U, X, U, X],           // U
    [X, X, X, X, X, X, X],           // X
];

impl LockMode {
    pub const ALL: [LockMode; 7] = [N, IS, IX, S, SIX, U, X];

    /// True iff `requested` may be granted while `self` is granted.
    #[inline]
    pub fn is_compatible(self, requested: LockMode) -> bool {
        COMPATIBILITY[self as usize][requested as usize]
    }

    /// Group mode of two granted modes.
    #[inline]
    pub fn join(self, other: LockMode) -> LockMode {
        JOIN[self as usize][other as usize]
    }

    /// True if holding `self` already implies holding `other`.
    #[inline]
    pub fn covers(self, other: LockMode) -> bool {
        self.join(other) == self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::None => "NONE",
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::SharedIntentionExclusive => "SIX",
            LockMode::Update => "U",
            LockMode::Exclusive => "X",
        }
    }
}

impl Default for LockMode {
    fn default() -> Self {
        LockMode::None
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How long a granted lock is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockDuration {
    /// Released as soon as it is granted; tests availability.
    Instant,
    /// Held until explicitly released.
    Manual,
    /// Held until the transaction ends. Not interpreted by the lock manager.
    Commit,
}

impl Default for LockDuration {
    fn default() -> Self {
        LockDuration::Manual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Expected compatibility, written out pair by pair.
    fn expected_compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match (held, requested) {
            (None, _) | (_, None) => true,
            (Exclusive, _) | (_, Exclusive) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) | (Shared, Update) | (Update, Shared) => true,
            _ => false,
        }
    }

    #[test]
    fn test_compatibility_matrix_conformance() {
        for held in LockMode::ALL {
            for requested in LockMode::ALL {
                assert_eq!(
                    held.is_compatible(requested),
                    expected_compatible(held, requested),
                    "held={held} requested={requested}"
                );
            }
        }
    }

    #[test]
    fn test_compatibility_is_symmetric() {
        for a in LockMode::ALL {
            for b in LockMode::ALL {
                assert_eq!(a.is_compatible(b), b.is_compatible(a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_join_lattice_laws() {
        for a in LockMode::ALL {
            assert_eq!(a.join(a), a);
            assert_eq!(LockMode::None.join(a), a);
            assert_eq!(LockMode::Exclusive.join(a), LockMode::Exclusive);
            for b in LockMode::ALL {
                let j = a.join(b);
                assert_eq!(j, b.join(a), "join({a},{b}) not commutative");
                assert!(j.covers(a) && j.covers(b), "join({a},{b})={j} is not an upper bound");
                for c in LockMode::ALL {
                    assert_eq!(j.join(c), a.join(b.join(c)), "join not associative");
                }
            }
        }
    }

    #[test]
    fn test_group_mode_preserves_compatibility() {
        // For modes that can be granted together, testing against their join
        // must be the same as testing against each of them.
        for a in LockMode::ALL {
            for b in LockMode::ALL {
                if !a.is_compatible(b) {
                    continue;
                }
                let group = a.join(b);
                for r in LockMode::ALL {
                    assert_eq!(
                        group.is_compatible(r),
                        a.is_compatible(r) && b.is_compatible(r),
                        "group {group} of {a},{b} against {r}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_specific_joins() {
        assert_eq!(
            LockMode::IntentionExclusive.join(LockMode::Shared),
            LockMode::SharedIntentionExclusive
        );
        assert_eq!(LockMode::Shared.join(LockMode::Update), LockMode::Update);
        assert_eq!(LockMode::Update.join(LockMode::IntentionExclusive), LockMode::Exclusive);
        assert!(LockMode::Exclusive.covers(LockMode::Shared));
        assert!(!LockMode::Shared.covers(LockMode::IntentionExclusive));
    }

    #[test]
    fn test_display() {
        assert_eq!(LockMode::SharedIntentionExclusive.to_string(), "SIX");
        assert_eq!(LockMode::default(), LockMode::None);
        assert_eq!(LockDuration::default(), LockDuration::Manual);
    }
}
