//! Error types for CipherLite core.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type DbResult<T> = Result<T, DbError>;

/// Why a database file was judged corrupt or unreadable.
///
/// Callers use this to tell a missing key apart from a wrong key apart from
/// genuine damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// The file does not start with the plaintext magic and no key was given.
    NotADatabase,
    /// The file is encrypted but was opened without a key.
    EncryptedNoKey,
    /// The header or a page failed authentication under the supplied key.
    WrongKey,
    /// A key was supplied for a plaintext database.
    NotEncrypted,
    /// A page checksum did not match its content.
    Checksum {
        /// Page that failed verification.
        page: u32,
    },
    /// A page lies beyond the end of the file.
    Truncated {
        /// Page that could not be read in full.
        page: u32,
    },
    /// A structure inside a page could not be decoded.
    Malformed,
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotADatabase => write!(f, "file is not a database"),
            Self::EncryptedNoKey => write!(f, "file is encrypted or is not a database"),
            Self::WrongKey => write!(f, "file is encrypted and the key does not match"),
            Self::NotEncrypted => write!(f, "key supplied for an unencrypted database"),
            Self::Checksum { page } => write!(f, "checksum mismatch on page {page}"),
            Self::Truncated { page } => write!(f, "page {page} lies past the end of the file"),
            Self::Malformed => write!(f, "database disk image is malformed"),
        }
    }
}

/// Errors that can occur in CipherLite core operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] cipherlite_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database file is corrupt, encrypted under another key, or not a
    /// database at all.
    #[error("database corrupt: {reason}{}", detail_suffix(.detail))]
    Corruption {
        /// Classified cause.
        reason: CorruptReason,
        /// Optional context.
        detail: Option<String>,
    },

    /// A lock could not be acquired within the busy timeout.
    #[error("database is locked: {mode} lock not granted after {waited:?}")]
    LockTimeout {
        /// The lock that was requested.
        mode: &'static str,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Another process has the database file open.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The SQL text could not be compiled.
    #[error("SQL compile error: {message}")]
    SqlCompile {
        /// Description of the problem.
        message: String,
    },

    /// A statement failed while running.
    #[error("SQL runtime error: {message}")]
    SqlRuntime {
        /// Description of the problem.
        message: String,
    },

    /// A constraint was violated.
    #[error("constraint failed: {message}")]
    Constraint {
        /// Description of the violated constraint.
        message: String,
    },

    /// A scalar statement produced zero or more than one row.
    #[error("scalar query returned {rows} rows, expected exactly one")]
    NotExactlyOneRow {
        /// Rows observed (capped at 2).
        rows: usize,
    },

    /// An API was used in a way that is not permitted in the current state.
    #[error("misuse: {message}")]
    Misuse {
        /// Description of why the call is invalid.
        message: String,
    },

    /// A key was supplied but this build has no page codec.
    #[error("encryption codec not available in this build")]
    CodecUnavailable,

    /// The connection is closed.
    #[error("connection is closed")]
    Closed,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl DbError {
    /// Creates a corruption error.
    pub fn corruption(reason: CorruptReason) -> Self {
        Self::Corruption {
            reason,
            detail: None,
        }
    }

    /// Creates a malformed-structure corruption error with context.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Corruption {
            reason: CorruptReason::Malformed,
            detail: Some(detail.into()),
        }
    }

    /// Creates a compile error.
    pub fn compile(message: impl Into<String>) -> Self {
        Self::SqlCompile {
            message: message.into(),
        }
    }

    /// Creates a runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::SqlRuntime {
            message: message.into(),
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a misuse error.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::Misuse {
            message: message.into(),
        }
    }

    /// Returns the corruption reason if this is a corruption error.
    #[must_use]
    pub fn corrupt_reason(&self) -> Option<CorruptReason> {
        match self {
            Self::Corruption { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Returns true for corruption errors.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }

    /// Returns true when the error came from lock contention.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::DatabaseLocked)
    }

    /// Produces an equivalent error for replaying a poisoned connection.
    pub(crate) fn replay(&self) -> Self {
        match self {
            Self::Corruption { reason, detail } => Self::Corruption {
                reason: *reason,
                detail: detail.clone(),
            },
            other => Self::misuse(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_reason_is_reported() {
        let err = DbError::corruption(CorruptReason::WrongKey);
        assert!(err.is_corruption());
        assert_eq!(err.corrupt_reason(), Some(CorruptReason::WrongKey));
        assert!(err.to_string().contains("key does not match"));
    }

    #[test]
    fn malformed_carries_detail() {
        let err = DbError::malformed("bad cell");
        assert_eq!(
            err.to_string(),
            "database corrupt: database disk image is malformed (bad cell)"
        );
    }

    #[test]
    fn busy_classification() {
        let err = DbError::LockTimeout {
            mode: "shared",
            waited: Duration::from_millis(10),
        };
        assert!(err.is_busy());
        assert!(!DbError::Closed.is_busy());
    }
}
