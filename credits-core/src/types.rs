//! Core types for the credits ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for credit amounts)

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Validate a money amount: strictly positive, at most two decimal places.
///
/// All amounts are fixed-point decimals compared in minor units; anything
/// finer than cents is rejected at the boundary instead of being rounded.
pub fn validate_amount(amount: Decimal) -> crate::Result<()> {
    if amount <= Decimal::ZERO {
        return Err(crate::Error::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount != amount.round_dp(2) {
        return Err(crate::Error::InvalidAmount(format!(
            "amount must have at most two decimal places, got {}",
            amount
        )));
    }
    Ok(())
}

/// Account identifier (user id from the marketplace)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger entry kind (closed set; unknown kinds are rejected at the boundary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryKind {
    /// Credits bought through the payment provider
    Purchase = 1,
    /// Credits earned by selling an item
    Earn = 2,
    /// Referral reward
    Referral = 3,
    /// Recurring daily bonus
    DailyBonus = 4,
    /// Credits spent inside the marketplace
    Spend = 5,
    /// Incoming side of a peer-to-peer transfer
    TransferIn = 6,
    /// Outgoing side of a peer-to-peer transfer
    TransferOut = 7,
    /// Fee paid to extend an expiring credit batch
    ExtensionFee = 8,
    /// Rescued remainder of an extended credit batch
    ExtensionCredit = 9,
    /// Expired, unconsumed remainder materialized by the sweep
    ExpiryWriteoff = 10,
}

impl EntryKind {
    /// True for kinds that add spendable value (and carry an expiry)
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            EntryKind::Purchase
                | EntryKind::Earn
                | EntryKind::Referral
                | EntryKind::DailyBonus
                | EntryKind::TransferIn
                | EntryKind::ExtensionCredit
        )
    }

    /// True for kinds that consume value; debits never expire
    pub fn is_debit(&self) -> bool {
        !self.is_credit()
    }

    /// Stable string code
    pub fn code(&self) -> &'static str {
        match self {
            EntryKind::Purchase => "purchase",
            EntryKind::Earn => "earn",
            EntryKind::Referral => "referral",
            EntryKind::DailyBonus => "daily_bonus",
            EntryKind::Spend => "spend",
            EntryKind::TransferIn => "transfer_in",
            EntryKind::TransferOut => "transfer_out",
            EntryKind::ExtensionFee => "extension_fee",
            EntryKind::ExtensionCredit => "extension_credit",
            EntryKind::ExpiryWriteoff => "expiry_writeoff",
        }
    }

    /// Parse from string code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(EntryKind::Purchase),
            "earn" => Some(EntryKind::Earn),
            "referral" => Some(EntryKind::Referral),
            "daily_bonus" => Some(EntryKind::DailyBonus),
            "spend" => Some(EntryKind::Spend),
            "transfer_in" => Some(EntryKind::TransferIn),
            "transfer_out" => Some(EntryKind::TransferOut),
            "extension_fee" => Some(EntryKind::ExtensionFee),
            "extension_credit" => Some(EntryKind::ExtensionCredit),
            "expiry_writeoff" => Some(EntryKind::ExpiryWriteoff),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A single append-only ledger entry
///
/// Entries are never deleted or mutated once written; corrections are new
/// offsetting entries. The one sanctioned exception is the `extended` flag,
/// which flips false -> true exactly once, inside the same atomic batch that
/// writes the extension pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Account this entry belongs to
    pub account_id: AccountId,

    /// Entry kind; determines the sign of `amount`
    pub kind: EntryKind,

    /// Positive amount with two minor-unit digits
    pub amount: Decimal,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Expiration timestamp; only credit kinds carry one
    pub expires_at: Option<DateTime<Utc>>,

    /// Set once this credit batch has been extended
    pub extended: bool,

    /// Links extension entries and write-offs to their original credit,
    /// and the two legs of a transfer to each other
    pub related_entry_id: Option<Uuid>,

    /// Human-readable description for statements
    pub description: String,
}

impl LedgerEntry {
    /// Convenience constructor with a fresh UUIDv7
    pub fn new(
        account_id: AccountId,
        kind: EntryKind,
        amount: Decimal,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            account_id,
            kind,
            amount,
            created_at,
            expires_at,
            extended: false,
            related_entry_id: None,
            description: description.into(),
        }
    }

    /// Same, with a related entry link
    pub fn with_related(mut self, related: Uuid) -> Self {
        self.related_entry_id = Some(related);
        self
    }
}

/// Per-user account record, owned exclusively by the ledger engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub account_id: AccountId,

    /// Denormalized spendable balance, valid as of `balance_as_of`
    pub cached_balance: Decimal,

    /// Instant the cached balance was derived at; the reconciliation
    /// check replays the log at this same instant
    pub balance_as_of: DateTime<Utc>,

    /// Calendar date of the last daily bonus grant (no time component)
    pub last_bonus_date: Option<NaiveDate>,

    /// Soft deactivation flag; history survives deactivation
    pub active: bool,

    /// Set when reconciliation detected a cached/derived mismatch.
    /// All mutation is refused until the account is manually repaired.
    pub frozen: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account with zero balance and no bonus history
    pub fn new(account_id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            cached_balance: Decimal::ZERO,
            balance_as_of: now,
            last_bonus_date: None,
            active: true,
            frozen: false,
            created_at: now,
        }
    }
}

/// Result of an executed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Shared ID linking the two transfer legs
    pub transfer_id: Uuid,

    /// Debit entry on the sender
    pub out_entry_id: Uuid,

    /// Credit entry on the recipient
    pub in_entry_id: Uuid,

    /// Sender account
    pub sender_id: AccountId,

    /// Recipient account
    pub recipient_id: AccountId,

    /// Transferred amount
    pub amount: Decimal,

    /// Fresh expiry issued to the recipient's credit
    pub expires_at: DateTime<Utc>,

    /// Execution timestamp
    pub executed_at: DateTime<Utc>,
}

/// Result of extending an expiring credit batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionResult {
    /// The extended (original) credit entry
    pub entry_id: Uuid,

    /// Fee entry written for this extension
    pub fee_entry_id: Uuid,

    /// Rescued credit entry; absent when the rescue was zero
    pub new_entry_id: Option<Uuid>,

    /// Fee charged
    pub fee: Decimal,

    /// Amount moved to the new batch (`remaining - fee`)
    pub rescued: Decimal,

    /// Expiry of the rescued batch
    pub new_expires_at: DateTime<Utc>,
}

/// Result of a daily bonus claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResult {
    /// Bonus credit entry
    pub entry_id: Uuid,

    /// Granted amount
    pub amount: Decimal,

    /// Expiry of the bonus credit
    pub expires_at: DateTime<Utc>,

    /// Calendar date the grant was recorded under
    pub claimed_on: NaiveDate,
}

/// One soon-to-expire credit batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringCredit {
    /// Credit entry ID
    pub entry_id: Uuid,

    /// Entry kind
    pub kind: EntryKind,

    /// Unconsumed remainder that will be lost at expiry
    pub remaining: Decimal,

    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

/// Expiring-soon query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringSummary {
    /// Sum of the remainders below
    pub total_amount: Decimal,

    /// Batches expiring within the horizon, soonest first
    pub entries: Vec<ExpiringCredit>,
}

/// Outcome of a reconciliation pass over one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Account ID
    pub account_id: AccountId,

    /// Stored denormalized balance
    pub cached_balance: Decimal,

    /// Balance re-derived from the log at `balance_as_of`
    pub derived_balance: Decimal,

    /// True when the two agree
    pub consistent: bool,
}

/// Aggregate result of one sweep pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepStats {
    /// Accounts scanned
    pub accounts_scanned: usize,

    /// Write-off entries appended
    pub entries_written_off: usize,

    /// Total written-off amount
    pub amount_written_off: Decimal,

    /// Idempotency records purged
    pub idempotency_purged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_codes_round_trip() {
        for kind in [
            EntryKind::Purchase,
            EntryKind::Earn,
            EntryKind::Referral,
            EntryKind::DailyBonus,
            EntryKind::Spend,
            EntryKind::TransferIn,
            EntryKind::TransferOut,
            EntryKind::ExtensionFee,
            EntryKind::ExtensionCredit,
            EntryKind::ExpiryWriteoff,
        ] {
            assert_eq!(EntryKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(EntryKind::from_code("chargeback"), None);
    }

    #[test]
    fn test_credit_debit_partition() {
        assert!(EntryKind::Purchase.is_credit());
        assert!(EntryKind::TransferIn.is_credit());
        assert!(EntryKind::ExtensionCredit.is_credit());
        assert!(EntryKind::Spend.is_debit());
        assert!(EntryKind::TransferOut.is_debit());
        assert!(EntryKind::ExtensionFee.is_debit());
        assert!(EntryKind::ExpiryWriteoff.is_debit());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(Decimal::new(100, 2)).is_ok());
        assert!(validate_amount(Decimal::from(5)).is_ok());
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(Decimal::new(-100, 2)).is_err());
        assert!(validate_amount(Decimal::new(1001, 3)).is_err()); // 1.001
        assert!(validate_amount(Decimal::new(1100, 3)).is_ok()); // 1.100 == 1.10
    }

    #[test]
    fn test_new_account_is_empty() {
        let account = Account::new(AccountId::new("user-1"), Utc::now());
        assert_eq!(account.cached_balance, Decimal::ZERO);
        assert!(account.last_bonus_date.is_none());
        assert!(account.active);
        assert!(!account.frozen);
    }
}
