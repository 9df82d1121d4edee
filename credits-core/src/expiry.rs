//! Expiry extension and the background write-off sweep
//!
//! Extending a batch converts its unconsumed remainder into a fee plus a
//! rescued batch with a later expiry, inside one atomic write set:
//!
//! - `ExtensionFee` debit of `max(round_half_up(remaining * fee%), 1.00)`;
//! - `ExtensionCredit` of `remaining - fee`, expiring `extra_days` after the
//!   original expiry (omitted when the rescue is zero);
//! - the original entry's `extended` flag flips, retiring its remainder.
//!
//! The sweep materializes expired, unconsumed, unextended remainders as
//! `ExpiryWriteoff` entries so the log stays a complete audit record and
//! balance reads stay cheap. It pages through accounts in small batches,
//! each under its own short-lived lock - a long scan never blocks
//! user-facing operations.

use crate::{
    balance::{derive, Derivation},
    config::{Config, ConfigHandle},
    locks::AccountLocks,
    metrics::Metrics,
    ratelimit::TransferRateLimiter,
    store::{TransactionStore, WriteSet},
    types::{Account, AccountId, EntryKind, ExpiringCredit, ExtensionResult, LedgerEntry, SweepStats},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tokio::sync::watch;

/// Minimum extension fee in credits
const MIN_FEE: Decimal = Decimal::ONE;

/// Expiration manager
pub struct ExpirationManager {
    store: Arc<TransactionStore>,
}

impl ExpirationManager {
    /// Create new expiration manager
    pub fn new(store: Arc<TransactionStore>) -> Self {
        Self { store }
    }

    /// Extension fee for a remainder: percentage rounded half-up to cents,
    /// floored at 1.00
    pub fn extension_fee(remaining: Decimal, fee_percent: Decimal) -> Decimal {
        let fee = (remaining * fee_percent / Decimal::from(100))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        fee.max(MIN_FEE)
    }

    /// Extend one credit batch.
    ///
    /// Caller must hold the account lock and have passed the reconciliation
    /// check; `entries`/`derivation` are the state observed under that lock.
    pub fn extend(
        &self,
        config: &Config,
        mut account: Account,
        entries: &[LedgerEntry],
        derivation: &Derivation,
        entry_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<ExtensionResult> {
        if !config.extension.enabled {
            return Err(Error::ExtensionDisabled);
        }

        let original = entries
            .iter()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;

        if !original.kind.is_credit() {
            return Err(Error::NotExtendable(format!(
                "{} entries carry no expiry",
                original.kind
            )));
        }
        let expires_at = original
            .expires_at
            .ok_or_else(|| Error::NotExtendable("entry has no expiry".to_string()))?;

        if original.extended {
            return Err(Error::AlreadyExtended(entry_id));
        }
        if expires_at <= now {
            return Err(Error::AlreadyExpired(entry_id));
        }

        let remaining = derivation
            .remaining_of(entry_id)
            .map(|b| b.remaining)
            .unwrap_or(Decimal::ZERO);
        if remaining == Decimal::ZERO {
            return Err(Error::NotExtendable("batch is fully consumed".to_string()));
        }

        let fee = Self::extension_fee(remaining, config.extension.fee_percent);
        if remaining < fee {
            return Err(Error::NotExtendable(format!(
                "remainder {} cannot cover the minimum fee {}",
                remaining, fee
            )));
        }

        let available = derivation.spendable_at(now);
        if available < fee {
            return Err(Error::InsufficientBalance {
                required: fee,
                available,
            });
        }

        let rescued = remaining - fee;
        let new_expires_at = expires_at + Duration::days(config.extension.extra_days);

        let fee_entry = LedgerEntry::new(
            account.account_id.clone(),
            EntryKind::ExtensionFee,
            fee,
            now,
            None,
            format!("extension fee for {}", entry_id),
        )
        .with_related(entry_id);
        let fee_entry_id = fee_entry.entry_id;

        let mut new_entries = vec![fee_entry];
        let mut new_entry_id = None;
        if rescued > Decimal::ZERO {
            let rescued_entry = LedgerEntry::new(
                account.account_id.clone(),
                EntryKind::ExtensionCredit,
                rescued,
                now,
                Some(new_expires_at),
                format!("rescued from {}", entry_id),
            )
            .with_related(entry_id);
            new_entry_id = Some(rescued_entry.entry_id);
            new_entries.push(rescued_entry);
        }

        // The original retires, the rescue comes back: net effect is -fee
        account.cached_balance = available - fee;
        account.balance_as_of = now;

        self.store.commit(WriteSet {
            entries: new_entries,
            accounts: vec![account],
            mark_extended: Some(entry_id),
            ..Default::default()
        })?;

        tracing::info!(
            entry_id = %entry_id,
            fee = %fee,
            rescued = %rescued,
            new_expires_at = %new_expires_at,
            "Credit batch extended"
        );

        Ok(ExtensionResult {
            entry_id,
            fee_entry_id,
            new_entry_id,
            fee,
            rescued,
            new_expires_at,
        })
    }

    /// Expired, unconsumed, unextended batches of one account
    pub fn due_for_expiry(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiringCredit>> {
        let entries = self.store.entries_for(account_id)?;
        Ok(derive(&entries).due_for_expiry(now))
    }
}

/// Background sweep task
///
/// Runs on a period, materializes expiry write-offs, purges expired
/// idempotency records and trims idle rate-limit windows. Every account is
/// processed as its own atomic unit, so cancellation mid-pass leaves no
/// partial state.
pub struct Sweeper {
    store: Arc<TransactionStore>,
    locks: Arc<AccountLocks>,
    config: ConfigHandle,
    ratelimit: Arc<TransferRateLimiter>,
    metrics: Metrics,
}

impl Sweeper {
    /// Create new sweeper
    pub fn new(
        store: Arc<TransactionStore>,
        locks: Arc<AccountLocks>,
        config: ConfigHandle,
        ratelimit: Arc<TransferRateLimiter>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            ratelimit,
            metrics,
        }
    }

    /// One full sweep pass
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let config = self.config.current();
        let mut stats = SweepStats::default();
        let mut cursor: Option<AccountId> = None;

        loop {
            let page = self
                .store
                .accounts_page(cursor.as_ref(), config.sweep.batch_size.max(1))?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|a| a.account_id.clone());

            for account in page {
                let _guard = self.locks.acquire(&account.account_id).await;
                stats.accounts_scanned += 1;

                // Re-read under the lock; the paged snapshot may be stale
                let mut account = self.store.get_account(&account.account_id)?;
                if account.frozen {
                    continue;
                }

                let entries = self.store.entries_for(&account.account_id)?;
                let derivation = derive(&entries);
                let due = derivation.due_for_expiry(now);
                if due.is_empty() {
                    continue;
                }

                let mut writeoffs = Vec::with_capacity(due.len());
                for item in &due {
                    stats.amount_written_off += item.remaining;
                    writeoffs.push(
                        LedgerEntry::new(
                            account.account_id.clone(),
                            EntryKind::ExpiryWriteoff,
                            item.remaining,
                            now,
                            None,
                            format!("expired remainder of {}", item.entry_id),
                        )
                        .with_related(item.entry_id),
                    );
                }
                stats.entries_written_off += writeoffs.len();

                account.cached_balance = derivation.spendable_at(now);
                account.balance_as_of = now;

                self.store.commit(WriteSet {
                    entries: writeoffs,
                    accounts: vec![account],
                    ..Default::default()
                })?;

                self.metrics.writeoffs_total.inc_by(due.len() as u64);
            }
        }

        stats.idempotency_purged = self
            .store
            .purge_idempotency(now, config.idempotency_ttl_secs)?;
        self.ratelimit
            .cleanup(now, config.transfer.rate_limit_window_secs);

        tracing::info!(
            accounts = stats.accounts_scanned,
            writeoffs = stats.entries_written_off,
            amount = %stats.amount_written_off,
            purged = stats.idempotency_purged,
            "Sweep pass completed"
        );

        Ok(stats)
    }

    /// Run the periodic loop until the shutdown signal flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let config = self.config.current();
            let period = std::time::Duration::from_secs(config.sweep.interval_secs.max(1));

            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if !self.config.current().sweep.enabled {
                        continue;
                    }
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        tracing::error!(error = %e, "Sweep pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sweeper stopped");
    }
}

/// Spawn the sweeper; flip the returned sender to `true` to stop it
pub fn spawn_sweeper(sweeper: Sweeper) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        sweeper.run(rx).await;
    });
    (handle, tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_arithmetic() {
        let pct = Decimal::from(20);

        // 10 at 20% -> 2
        assert_eq!(
            ExpirationManager::extension_fee(Decimal::from(10), pct),
            Decimal::from(2)
        );
        // 7 at 20% = 1.40, no rounding needed
        assert_eq!(
            ExpirationManager::extension_fee(Decimal::from(7), pct),
            Decimal::new(140, 2)
        );
        // 1 at 20% = 0.20, floored to the minimum fee
        assert_eq!(
            ExpirationManager::extension_fee(Decimal::ONE, pct),
            Decimal::ONE
        );
        // Half-up at the cent boundary: 0.125 at 20% = 0.025 -> 0.03,
        // then floored to 1.00
        assert_eq!(
            ExpirationManager::extension_fee(Decimal::new(125, 3), pct),
            Decimal::ONE
        );
        // 12.38 at 20% = 2.476 -> 2.48
        assert_eq!(
            ExpirationManager::extension_fee(Decimal::new(1238, 2), pct),
            Decimal::new(248, 2)
        );
    }
}
