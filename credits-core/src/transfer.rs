//! Peer-to-peer transfer execution
//!
//! Validation order is fixed and the first violation wins: amount range,
//! self-transfer ban, account state, rate limit, balance sufficiency. The
//! two transfer legs share a `related_entry_id` and commit in one atomic
//! write set; the recipient's credit is issued a fresh expiry from the
//! default horizon - transfers reset the clock, they are not
//! expiry-preserving.

use crate::{
    balance::Derivation,
    config::Config,
    ratelimit::TransferRateLimiter,
    store::{IdempotencyPayload, IdempotencyRecord, TransactionStore, WriteSet},
    types::{validate_amount, Account, AccountId, EntryKind, LedgerEntry, TransferResult},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Transfer service
pub struct TransferService {
    store: Arc<TransactionStore>,
    ratelimit: Arc<TransferRateLimiter>,
}

impl TransferService {
    /// Create new transfer service
    pub fn new(store: Arc<TransactionStore>, ratelimit: Arc<TransferRateLimiter>) -> Self {
        Self { store, ratelimit }
    }

    /// Stateless validation that needs no store access
    pub fn validate_request(
        config: &Config,
        sender_id: &AccountId,
        recipient_id: &AccountId,
        amount: Decimal,
    ) -> Result<()> {
        validate_amount(amount)?;
        if amount < Decimal::ONE || amount > config.transfer.max_amount {
            return Err(Error::AmountOutOfRange {
                amount,
                min: Decimal::ONE,
                max: config.transfer.max_amount,
            });
        }
        if sender_id == recipient_id {
            return Err(Error::SelfTransfer);
        }
        Ok(())
    }

    /// Execute a validated transfer.
    ///
    /// Caller must hold both account locks and have passed the
    /// reconciliation check; `sender`/`recipient` and their derivations are
    /// the state observed under those locks.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        config: &Config,
        mut sender: Account,
        sender_derivation: &Derivation,
        mut recipient: Account,
        recipient_derivation: &Derivation,
        amount: Decimal,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<TransferResult> {
        self.ratelimit.check(
            &sender.account_id,
            now,
            config.transfer.rate_limit_count,
            config.transfer.rate_limit_window_secs,
        )?;

        let available = sender_derivation.spendable_at(now);
        if available < amount {
            return Err(Error::InsufficientBalance {
                required: amount,
                available,
            });
        }

        let transfer_id = Uuid::now_v7();
        let expires_at = now + Duration::days(config.default_expiry_days);

        let out_entry = LedgerEntry::new(
            sender.account_id.clone(),
            EntryKind::TransferOut,
            amount,
            now,
            None,
            format!("transfer to {}", recipient.account_id),
        )
        .with_related(transfer_id);

        let in_entry = LedgerEntry::new(
            recipient.account_id.clone(),
            EntryKind::TransferIn,
            amount,
            now,
            Some(expires_at),
            format!("transfer from {}", sender.account_id),
        )
        .with_related(transfer_id);

        let result = TransferResult {
            transfer_id,
            out_entry_id: out_entry.entry_id,
            in_entry_id: in_entry.entry_id,
            sender_id: sender.account_id.clone(),
            recipient_id: recipient.account_id.clone(),
            amount,
            expires_at,
            executed_at: now,
        };

        // A sufficient FIFO consumption removes exactly `amount`; the fresh
        // credit is unexpired at `now`
        sender.cached_balance = available - amount;
        sender.balance_as_of = now;
        recipient.cached_balance = recipient_derivation.spendable_at(now) + amount;
        recipient.balance_as_of = now;

        self.store.commit(WriteSet {
            entries: vec![out_entry, in_entry],
            accounts: vec![sender, recipient],
            idempotency: Some((
                idempotency_key.to_string(),
                IdempotencyRecord {
                    payload: IdempotencyPayload::Transfer(result.clone()),
                    created_at: now,
                },
            )),
            ..Default::default()
        })?;

        self.ratelimit.record(&result.sender_id, now);

        tracing::info!(
            transfer_id = %result.transfer_id,
            sender = %result.sender_id,
            recipient = %result.recipient_id,
            amount = %amount,
            "Transfer executed"
        );

        Ok(result)
    }
}
