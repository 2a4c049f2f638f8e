//! Optimistic concurrency expectations for row updates.

use crate::error::{DomainError, DomainResult};

/// Version a caller expects a row to be at when it writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the row to be at an exact version.
    Exact(i32),
}

impl ExpectedVersion {
    pub fn matches(self, actual: i32) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    /// A mismatch means someone else updated the row first.
    pub fn check(self, actual: i32) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::EditConflict)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_mismatch_is_an_edit_conflict() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        assert_eq!(
            ExpectedVersion::Exact(3).check(4),
            Err(DomainError::EditConflict)
        );
        assert!(ExpectedVersion::Any.check(99).is_ok());
    }
}
