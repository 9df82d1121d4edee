//! Balance derivation over the entry log
//!
//! All balances are pure functions of the append-only log. A replay walks
//! the entries oldest-first and maintains per-credit batches:
//!
//! - credit entries open a batch with `remaining = amount`;
//! - `Spend` and `TransferOut` debits consume batches FIFO, skipping batches
//!   already expired at the debit's own `created_at`;
//! - `ExtensionFee` consumes from its related batch specifically (the fee is
//!   paid out of the expiring batch itself);
//! - `ExtensionCredit` opens the rescued batch and retires the related
//!   original, so an extended batch stops counting the moment it is extended;
//! - `ExpiryWriteoff` zeroes its related batch.
//!
//! The replay itself does not depend on the evaluation instant; expiry is
//! applied afterwards, which is what makes [`Derivation::spendable_at`]
//! evaluable at any instant, including the past (the reconciliation check
//! relies on this).

use crate::types::{EntryKind, ExpiringCredit, LedgerEntry};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// One credit batch with its consumption state
#[derive(Debug, Clone)]
pub struct CreditBatch {
    /// Originating credit entry
    pub entry_id: Uuid,

    /// Entry kind
    pub kind: EntryKind,

    /// Issued amount
    pub amount: Decimal,

    /// Unconsumed remainder
    pub remaining: Decimal,

    /// Expiration timestamp
    pub expires_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Extended flag of the originating entry
    pub extended: bool,

    /// Retired by extension: no longer counts toward anything
    pub retired: bool,

    /// Zeroed by a materialized write-off
    pub written_off: bool,
}

impl CreditBatch {
    fn expired_at(&self, t: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= t)
    }

    fn live_at(&self, t: DateTime<Utc>) -> bool {
        // An extended batch never counts, even before its fee/rescue entries
        // are replayed; the extension pair accounts for its full remainder
        !self.extended
            && !self.retired
            && !self.written_off
            && self.remaining > Decimal::ZERO
            && !self.expired_at(t)
    }
}

/// Replay result over one account's entries
#[derive(Debug, Clone, Default)]
pub struct Derivation {
    /// Credit batches in creation order
    pub batches: Vec<CreditBatch>,

    /// Total extension fees observed
    pub fees: Decimal,

    /// Total materialized write-offs
    pub writeoffs: Decimal,

    /// Debit amount that no eligible batch could cover. Nonzero shortfall
    /// means the log itself is inconsistent - a corruption signal, not a
    /// recoverable state.
    pub shortfall: Decimal,
}

/// Replay an account's entries (ordered by `created_at` ascending)
pub fn derive(entries: &[LedgerEntry]) -> Derivation {
    let mut d = Derivation::default();

    for entry in entries {
        match entry.kind {
            EntryKind::Purchase
            | EntryKind::Earn
            | EntryKind::Referral
            | EntryKind::DailyBonus
            | EntryKind::TransferIn => {
                d.batches.push(new_batch(entry));
            }

            EntryKind::ExtensionCredit => {
                d.batches.push(new_batch(entry));
                if let Some(original) = entry.related_entry_id {
                    if let Some(batch) = find_batch(&mut d.batches, original) {
                        batch.remaining = Decimal::ZERO;
                        batch.retired = true;
                    }
                }
            }

            EntryKind::ExtensionFee => {
                d.fees += entry.amount;
                if let Some(original) = entry.related_entry_id {
                    if let Some(batch) = find_batch(&mut d.batches, original) {
                        // Paid out of the expiring batch; a batch the rescue
                        // already retired absorbs the fee as a no-op
                        let take = batch.remaining.min(entry.amount);
                        batch.remaining -= take;
                    }
                }
            }

            EntryKind::ExpiryWriteoff => {
                d.writeoffs += entry.amount;
                if let Some(original) = entry.related_entry_id {
                    if let Some(batch) = find_batch(&mut d.batches, original) {
                        batch.remaining = Decimal::ZERO;
                        batch.written_off = true;
                    }
                }
            }

            EntryKind::Spend | EntryKind::TransferOut => {
                let mut due = entry.amount;
                for batch in d.batches.iter_mut() {
                    if due == Decimal::ZERO {
                        break;
                    }
                    if batch.retired
                        || batch.written_off
                        || batch.remaining == Decimal::ZERO
                        || batch.expired_at(entry.created_at)
                    {
                        continue;
                    }
                    let take = batch.remaining.min(due);
                    batch.remaining -= take;
                    due -= take;
                }
                d.shortfall += due;
            }
        }
    }

    d
}

fn new_batch(entry: &LedgerEntry) -> CreditBatch {
    CreditBatch {
        entry_id: entry.entry_id,
        kind: entry.kind,
        amount: entry.amount,
        remaining: entry.amount,
        expires_at: entry.expires_at,
        created_at: entry.created_at,
        extended: entry.extended,
        retired: false,
        written_off: false,
    }
}

fn find_batch(batches: &mut [CreditBatch], entry_id: Uuid) -> Option<&mut CreditBatch> {
    batches.iter_mut().find(|b| b.entry_id == entry_id)
}

impl Derivation {
    /// Spendable balance at instant `t`: unexpired, unretired remainders
    pub fn spendable_at(&self, t: DateTime<Utc>) -> Decimal {
        self.batches
            .iter()
            .filter(|b| b.live_at(t))
            .map(|b| b.remaining)
            .sum()
    }

    /// Batches with a positive remainder expiring in `(now, now + days]`,
    /// soonest first, with their total
    pub fn expiring_within(&self, now: DateTime<Utc>, days: i64) -> (Vec<ExpiringCredit>, Decimal) {
        let horizon = now + Duration::days(days);

        let mut expiring: Vec<ExpiringCredit> = self
            .batches
            .iter()
            .filter(|b| b.live_at(now))
            .filter(|b| matches!(b.expires_at, Some(exp) if exp <= horizon))
            .map(|b| ExpiringCredit {
                entry_id: b.entry_id,
                kind: b.kind,
                remaining: b.remaining,
                expires_at: b.expires_at.unwrap_or(now),
            })
            .collect();

        expiring.sort_by_key(|c| c.expires_at);
        let total = expiring.iter().map(|c| c.remaining).sum();
        (expiring, total)
    }

    /// Expired batches with an unconsumed remainder that were neither
    /// extended nor written off yet - the sweep's work list
    pub fn due_for_expiry(&self, now: DateTime<Utc>) -> Vec<ExpiringCredit> {
        self.batches
            .iter()
            .filter(|b| {
                !b.retired
                    && !b.written_off
                    && !b.extended
                    && b.remaining > Decimal::ZERO
                    && b.expired_at(now)
            })
            .map(|b| ExpiringCredit {
                entry_id: b.entry_id,
                kind: b.kind,
                remaining: b.remaining,
                expires_at: b.expires_at.unwrap_or(now),
            })
            .collect()
    }

    /// Remainder of one specific batch, if it exists
    pub fn remaining_of(&self, entry_id: Uuid) -> Option<&CreditBatch> {
        self.batches.iter().find(|b| b.entry_id == entry_id)
    }
}
