// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Engine error types.

/// Errors that can occur in engine operations.
///
/// `NotFound` is part of normal control flow for most commands (absent key,
/// dead incarnation, missing member) and is folded into operation semantics
/// by callers; everything else is a real failure. Substrate errors pass
/// through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found{}", .reason.map(|r| format!(": {r}")).unwrap_or_default())]
    NotFound { reason: Option<&'static str> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("incomplete: {0}")]
    Incomplete(String),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// A plain `NotFound` with no reason attached.
    #[inline]
    pub fn not_found() -> Self {
        Error::NotFound { reason: None }
    }

    /// A `NotFound` carrying a reason such as `"Stale"` or `"Deleted"`.
    #[inline]
    pub fn not_found_because(reason: &'static str) -> Self {
        Error::NotFound {
            reason: Some(reason),
        }
    }

    /// True if this error is any flavor of `NotFound`.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_reason_in_display() {
        let err = Error::not_found_because("Stale");
        assert_eq!(err.to_string(), "not found: Stale");
        assert!(err.is_not_found());

        let err = Error::not_found();
        assert_eq!(err.to_string(), "not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_errors_are_not_not_found() {
        assert!(!Error::Corruption("bad".into()).is_not_found());
        assert!(!Error::InvalidArgument("bad".into()).is_not_found());
    }
}
