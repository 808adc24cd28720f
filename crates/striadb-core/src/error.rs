//! Error types for `StriaDB`.
//!
//! This module provides a unified error type for all `StriaDB` operations.
//! Error codes follow the pattern `STRIA-XXX` for easy debugging; the
//! numeric codes of the legacy evaluator interface are preserved through
//! [`Error::legacy_code`].

use thiserror::Error;

/// Result type alias for `StriaDB` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `StriaDB` operations.
///
/// Each variant includes a descriptive error message suitable for end-users.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed metadata, unknown type, or missing column name (STRIA-001).
    ///
    /// Schema errors abort column construction.
    #[error("[STRIA-001] Schema error: {0}")]
    Schema(String),

    /// IO error (STRIA-002).
    #[error("[STRIA-002] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Short read or write (STRIA-003).
    #[error("[STRIA-003] Short {op}: expected {expected} bytes, got {actual} in '{path}'")]
    ShortTransfer {
        /// Either `"read"` or `"write"`.
        op: &'static str,
        /// Bytes expected.
        expected: u64,
        /// Bytes transferred.
        actual: u64,
        /// File involved.
        path: String,
    },

    /// Selection target incompatible with the column type (STRIA-004).
    #[error("[STRIA-004] Type mismatch: cannot read {column} column '{name}' as {requested}")]
    TypeMismatch {
        /// Column value type.
        column: &'static str,
        /// Column name.
        name: String,
        /// Requested element type.
        requested: &'static str,
    },

    /// Operator not meaningful on this column type (STRIA-005).
    #[error("[STRIA-005] Range condition is not applicable on column '{name}' of type {ctype}")]
    NotApplicable {
        /// Column name.
        name: String,
        /// Column value type.
        ctype: &'static str,
    },

    /// Index construction or evaluation failed (STRIA-006).
    ///
    /// Recoverable: the caller drops the index and falls back to a scan.
    #[error("[STRIA-006] Index fault: {0}")]
    IndexFault(String),

    /// File size inconsistent with the row count after reconciliation (STRIA-007).
    #[error("[STRIA-007] Size mismatch in '{path}': {message}")]
    SizeMismatch {
        /// File involved.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A mask / bitvector / row-count invariant was violated (STRIA-008).
    #[error("[STRIA-008] Invariant violation: {0}")]
    Invariant(String),

    /// The column is not attached to a data partition (STRIA-009).
    #[error("[STRIA-009] Column '{0}' does not belong to a data partition")]
    NoPartition(String),

    /// Invalid argument (STRIA-010).
    #[error("[STRIA-010] Invalid argument: {0}")]
    InvalidArgument(String),

    /// The sorted search path does not support this column type (STRIA-011).
    #[error("[STRIA-011] Sorted search does not support column type {0}")]
    UnsupportedSortedType(&'static str),

    /// A range condition with both operators undefined (STRIA-012).
    #[error("[STRIA-012] Range condition on '{0}' has no defined operator")]
    EmptyRange(String),

    /// Serialization error in an opaque sidecar blob (STRIA-013).
    #[error("[STRIA-013] Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the error code (e.g., "STRIA-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Schema(_) => "STRIA-001",
            Self::Io(_) => "STRIA-002",
            Self::ShortTransfer { .. } => "STRIA-003",
            Self::TypeMismatch { .. } => "STRIA-004",
            Self::NotApplicable { .. } => "STRIA-005",
            Self::IndexFault(_) => "STRIA-006",
            Self::SizeMismatch { .. } => "STRIA-007",
            Self::Invariant(_) => "STRIA-008",
            Self::NoPartition(_) => "STRIA-009",
            Self::InvalidArgument(_) => "STRIA-010",
            Self::UnsupportedSortedType(_) => "STRIA-011",
            Self::EmptyRange(_) => "STRIA-012",
            Self::Serialization(_) => "STRIA-013",
        }
    }

    /// Returns the negative return code of the legacy evaluator interface.
    ///
    /// −1 argument, −2 exception, −3 no partition, −4 not applicable,
    /// −5 unsupported type in the sorted path, −6 open failed, −7 write
    /// failed, −8 both operators undefined.
    #[must_use]
    pub fn legacy_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => -1,
            Self::IndexFault(_) => -2,
            Self::NoPartition(_) => -3,
            Self::NotApplicable { .. } | Self::TypeMismatch { .. } => -4,
            Self::UnsupportedSortedType(_) => -5,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => -6,
            Self::Io(_) | Self::ShortTransfer { op: "write", .. } => -7,
            Self::ShortTransfer { .. } => -6,
            Self::EmptyRange(_) => -8,
            _ => -2,
        }
    }

    /// Returns true if this error is recoverable by dropping the in-memory
    /// index and retrying with a scan.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ShortTransfer { .. } | Self::IndexFault(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::Schema("x".into()).code(), "STRIA-001");
        assert_eq!(
            Error::NotApplicable {
                name: "id".into(),
                ctype: "OID",
            }
            .code(),
            "STRIA-005"
        );
    }

    #[test]
    fn test_legacy_codes() {
        assert_eq!(
            Error::NotApplicable {
                name: "id".into(),
                ctype: "TEXT",
            }
            .legacy_code(),
            -4
        );
        assert_eq!(Error::EmptyRange("x".into()).legacy_code(), -8);
        assert_eq!(Error::NoPartition("x".into()).legacy_code(), -3);
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::IndexFault("boom".into()).is_recoverable());
        assert!(!Error::Schema("bad".into()).is_recoverable());
    }
}
