//! Error types for leasepool.
//!
//! Losing a claim race is not represented here: the store reports it as
//! `Ok(false)` and the acquisition loop simply moves on.

use crate::exit_codes;
use thiserror::Error;

/// Errors surfaced by lock manager operations.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// Bad CLI input, unreadable files, or an invalid configuration.
    #[error("{0}")]
    UserError(String),

    /// Malformed pool or conflicting count/range; rejected before any claim.
    #[error("Invalid lock request: {0}")]
    InvalidRequest(String),

    /// Lock store I/O failed (transient unless the retry budget is spent).
    #[error("Lock store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored record does not parse. Retrying will not help; an operator
    /// has to `clear --force` it.
    #[error("Corrupt lock record: {0}")]
    CorruptRecord(String),

    /// No machines became available before the deadline.
    #[error("Lock timeout: {0}")]
    Timeout(String),

    /// The lease is held by someone else, or no longer held at all.
    #[error("Lock conflict: {0}")]
    LockConflict(String),
}

impl LeaseError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LeaseError::UserError(_) => exit_codes::USER_ERROR,
            LeaseError::InvalidRequest(_) => exit_codes::USER_ERROR,
            LeaseError::StoreUnavailable(_) => exit_codes::STORE_FAILURE,
            LeaseError::CorruptRecord(_) => exit_codes::STORE_FAILURE,
            LeaseError::Timeout(_) => exit_codes::LOCK_TIMEOUT,
            LeaseError::LockConflict(_) => exit_codes::LOCK_CONFLICT,
        }
    }

    /// Whether the store retry loop should try the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, LeaseError::StoreUnavailable(_))
    }
}

/// Result type alias for leasepool operations.
pub type Result<T> = std::result::Result<T, LeaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_is_a_user_error() {
        let err = LeaseError::InvalidRequest("min > max".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    }

    #[test]
    fn timeout_has_its_own_exit_code() {
        let err = LeaseError::Timeout("no machines".to_string());
        assert_eq!(err.exit_code(), exit_codes::LOCK_TIMEOUT);
    }

    #[test]
    fn store_unavailable_is_transient() {
        let err = LeaseError::StoreUnavailable("disk full".to_string());
        assert!(err.is_transient());
        assert_eq!(err.exit_code(), exit_codes::STORE_FAILURE);
        assert!(!LeaseError::LockConflict("x".to_string()).is_transient());
    }

    #[test]
    fn corrupt_record_is_not_transient() {
        let err = LeaseError::CorruptRecord("expected value".to_string());
        assert!(!err.is_transient());
        assert_eq!(err.exit_code(), exit_codes::STORE_FAILURE);
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = LeaseError::InvalidRequest("count must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid lock request: count must be positive");

        let err = LeaseError::UserError("bad flag".to_string());
        assert_eq!(err.to_string(), "bad flag");
    }
}
