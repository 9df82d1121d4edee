//! Error types for the credits ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Three broad classes: validation failures (rejected before any store
/// access), conflicts (valid request, state disallows it), and transient
/// faults (retryable with backoff, see [`Error::is_retryable`]).
/// `Corruption` and `AccountFrozen` are fatal to the operation and halt
/// further mutation on the account until it is manually repaired.
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is non-positive or carries more than two decimal places
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Transfer amount outside the configured range
    #[error("Amount {amount} outside allowed range [{min}, {max}]")]
    AmountOutOfRange {
        /// Requested amount
        amount: rust_decimal::Decimal,
        /// Minimum per transfer
        min: rust_decimal::Decimal,
        /// Maximum per transfer
        max: rust_decimal::Decimal,
    },

    /// Entry kind not accepted through this operation
    #[error("Unsupported entry kind: {0}")]
    UnsupportedKind(String),

    /// Sender and recipient are the same account
    #[error("Transfers to the own account are not allowed")]
    SelfTransfer,

    /// Transfer recipient missing or inactive
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account already exists
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// Account is deactivated
    #[error("Account inactive: {0}")]
    AccountInactive(String),

    /// Account is frozen pending manual reconciliation
    #[error("Account frozen pending reconciliation: {0}")]
    AccountFrozen(String),

    /// Spendable balance does not cover the requested amount
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount the operation needs
        required: rust_decimal::Decimal,
        /// Spendable balance at evaluation time
        available: rust_decimal::Decimal,
    },

    /// Transfer rate limit window exceeded; retryable after backoff
    #[error("Rate limited: {0} transfers in the current window")]
    RateLimited(u32),

    /// Credit batch was already extended once
    #[error("Entry already extended: {0}")]
    AlreadyExtended(uuid::Uuid),

    /// Credit batch already passed its expiry
    #[error("Entry already expired: {0}")]
    AlreadyExpired(uuid::Uuid),

    /// Entry is not an extendable credit batch
    #[error("Entry not extendable: {0}")]
    NotExtendable(String),

    /// Extension feature is switched off in configuration
    #[error("Extensions are disabled")]
    ExtensionDisabled,

    /// Daily bonus feature is switched off in configuration
    #[error("Daily bonus is disabled")]
    BonusDisabled,

    /// A bonus was already granted for today's calendar date
    #[error("Daily bonus already claimed today")]
    AlreadyClaimedToday,

    /// Ledger entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Entry ID collision; the whole batch was aborted
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Idempotency key seen before with a different operation type
    #[error("Idempotency key reused for a different operation: {0}")]
    IdempotencyReuse(String),

    /// Cached balance disagrees with the log-derived balance
    #[error("Ledger corruption: {0}")]
    Corruption(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (lock registry, task channels)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors a caller may retry with backoff.
    ///
    /// Mutating operations must still be retried under the same
    /// idempotency key; the ledger never retries on the caller's behalf.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_) | Error::Storage(_) | Error::Concurrency(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_retryable_classes() {
        assert!(Error::RateLimited(3).is_retryable());
        assert!(Error::Storage("io".into()).is_retryable());
        assert!(!Error::SelfTransfer.is_retryable());
        assert!(!Error::InsufficientBalance {
            required: Decimal::ONE,
            available: Decimal::ZERO,
        }
        .is_retryable());
        assert!(!Error::Corruption("mismatch".into()).is_retryable());
    }
}
