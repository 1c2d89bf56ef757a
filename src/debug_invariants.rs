//! Contract checks that run only in debug builds or with the
//! `check-invariants` feature.
//!
//! Broken contracts here (asymmetric communication graphs, malformed exchange
//! layouts, inconsistent ownership) are programming errors. Release builds do
//! not pay for the checks and behavior is undefined when they would fail.

use crate::mesh_error::MeshError;

/// Types whose internal consistency can be validated on demand.
pub trait DebugInvariants {
    /// Panic if invariants are broken (no-op unless checks are enabled).
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first violation.
    fn validate_invariants(&self) -> Result<(), MeshError>;
}

/// Run a fallible check and panic with context when checks are enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}

/// `displs` must be the exclusive prefix sum of `counts`, one entry longer.
pub fn check_displacements(
    what: &'static str,
    counts: &[usize],
    displs: &[usize],
) -> Result<(), MeshError> {
    if displs.len() != counts.len() + 1 {
        return Err(MeshError::SizeMismatch {
            what,
            expected: counts.len() + 1,
            found: displs.len(),
        });
    }
    let mut acc = 0usize;
    for (i, &c) in counts.iter().enumerate() {
        if displs[i] != acc {
            return Err(MeshError::SizeMismatch {
                what,
                expected: acc,
                found: displs[i],
            });
        }
        acc += c;
    }
    if displs[counts.len()] != acc {
        return Err(MeshError::SizeMismatch {
            what,
            expected: acc,
            found: displs[counts.len()],
        });
    }
    Ok(())
}
