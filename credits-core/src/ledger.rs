//! Ledger facade
//!
//! The single entry point collaborators (purchase webhook, marketplace
//! backend, admin tools) use to credit, debit, transfer, extend and query.
//! Every mutation runs under the owning account's lock, passes the
//! cached-balance reconciliation check, and commits through the store's
//! atomic write sets. No other component writes `cached_balance`.
//!
//! # Example
//!
//! ```no_run
//! use credits_core::{AccountId, Config, EntryKind, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> credits_core::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let buyer = AccountId::new("user-42");
//!     ledger.create_account(&buyer).await?;
//!     ledger
//!         .credit(&buyer, EntryKind::Purchase, Decimal::from(50), None, "pay-provider-tx-1")
//!         .await?;
//!
//!     let balance = ledger.get_balance(&buyer)?;
//!     assert_eq!(balance, Decimal::from(50));
//!     Ok(())
//! }
//! ```

use crate::{
    balance::{derive, Derivation},
    bonus::DailyBonusService,
    config::{Config, ConfigHandle},
    expiry::{ExpirationManager, Sweeper},
    locks::AccountLocks,
    metrics::Metrics,
    ratelimit::TransferRateLimiter,
    store::{IdempotencyPayload, IdempotencyRecord, TransactionStore, WriteSet},
    transfer::TransferService,
    types::{
        validate_amount, Account, AccountId, ClaimResult, EntryKind, ExpiringSummary,
        ExtensionResult, LedgerEntry, ReconcileReport, TransferResult,
    },
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Transaction store (source of truth)
    store: Arc<TransactionStore>,

    /// Live configuration
    config: ConfigHandle,

    /// Per-account serialization boundary
    locks: Arc<AccountLocks>,

    /// Transfer rate limiter
    ratelimit: Arc<TransferRateLimiter>,

    /// Transfer service
    transfers: TransferService,

    /// Daily bonus service
    bonus: DailyBonusService,

    /// Expiration manager
    expiry: ExpirationManager,

    /// Metrics collector
    metrics: Metrics,
}

impl Ledger {
    /// Open ledger with a fixed configuration
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        Self::with_config_handle(ConfigHandle::fixed(config))
    }

    /// Open ledger over a live configuration handle
    pub fn with_config_handle(config: ConfigHandle) -> Result<Self> {
        let current = config.current();
        let store = Arc::new(TransactionStore::open(&current)?);
        let locks = Arc::new(AccountLocks::new());
        let ratelimit = Arc::new(TransferRateLimiter::new());
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("metrics registry: {}", e)))?;

        Ok(Self {
            transfers: TransferService::new(store.clone(), ratelimit.clone()),
            bonus: DailyBonusService::new(store.clone()),
            expiry: ExpirationManager::new(store.clone()),
            store,
            config,
            locks,
            ratelimit,
            metrics,
        })
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Config {
        self.config.current()
    }

    /// Metrics collector (for export endpoints)
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Build the background sweeper for this ledger
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.store.clone(),
            self.locks.clone(),
            self.config.clone(),
            self.ratelimit.clone(),
            self.metrics.clone(),
        )
    }

    // Account lifecycle

    /// Create an account with zero balance and no bonus history
    pub async fn create_account(&self, account_id: &AccountId) -> Result<Account> {
        let _guard = self.locks.acquire(account_id).await;

        if self.store.get_account_opt(account_id)?.is_some() {
            return Err(Error::AccountExists(account_id.to_string()));
        }

        let account = Account::new(account_id.clone(), Utc::now());
        self.store.commit(WriteSet {
            accounts: vec![account.clone()],
            ..Default::default()
        })?;

        tracing::info!(account = %account_id, "Account created");
        Ok(account)
    }

    /// Soft-deactivate an account; its history survives for audit
    pub async fn deactivate_account(&self, account_id: &AccountId) -> Result<()> {
        let _guard = self.locks.acquire(account_id).await;

        let mut account = self.store.get_account(account_id)?;
        account.active = false;
        self.store.commit(WriteSet {
            accounts: vec![account],
            ..Default::default()
        })?;

        tracing::info!(account = %account_id, "Account deactivated");
        Ok(())
    }

    // Mutations

    /// Credit an account from an external flow (purchase, earn, referral)
    pub async fn credit(
        &self,
        account_id: &AccountId,
        kind: EntryKind,
        amount: Decimal,
        expires_at: Option<DateTime<Utc>>,
        idempotency_key: &str,
    ) -> Result<Uuid> {
        self.credit_at(account_id, kind, amount, expires_at, idempotency_key, Utc::now())
            .await
    }

    /// Credit with an explicit clock
    pub async fn credit_at(
        &self,
        account_id: &AccountId,
        kind: EntryKind,
        amount: Decimal,
        expires_at: Option<DateTime<Utc>>,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        if !matches!(kind, EntryKind::Purchase | EntryKind::Earn | EntryKind::Referral) {
            return Err(Error::UnsupportedKind(kind.code().to_string()));
        }
        validate_amount(amount)?;

        let config = self.config.current();
        let _guard = self.locks.acquire(account_id).await;

        if let Some(payload) = self.replay(idempotency_key, now, &config)? {
            return match payload {
                IdempotencyPayload::Credit { entry_id } => Ok(entry_id),
                _ => Err(Error::IdempotencyReuse(idempotency_key.to_string())),
            };
        }

        let account = self.guarded_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        let derivation = derive(&entries);
        self.verify_cached(&account, &derivation)?;

        let expires = expires_at.unwrap_or(now + Duration::days(config.default_expiry_days));
        let entry = LedgerEntry::new(
            account_id.clone(),
            kind,
            amount,
            now,
            Some(expires),
            format!("{} credit", kind),
        );
        let entry_id = entry.entry_id;

        let mut after = entries;
        after.push(entry.clone());
        let mut account = account;
        account.cached_balance = derive(&after).spendable_at(now);
        account.balance_as_of = now;

        let timer = self.metrics.commit_duration.start_timer();
        self.store.commit(WriteSet {
            entries: vec![entry],
            accounts: vec![account],
            idempotency: Some((
                idempotency_key.to_string(),
                IdempotencyRecord {
                    payload: IdempotencyPayload::Credit { entry_id },
                    created_at: now,
                },
            )),
            ..Default::default()
        })?;
        drop(timer);

        self.metrics.entries_total.inc();
        tracing::info!(account = %account_id, kind = %kind, amount = %amount, "Credit appended");
        Ok(entry_id)
    }

    /// Debit an account for a spend flow (e.g. paying for a listing)
    pub async fn debit(
        &self,
        account_id: &AccountId,
        amount: Decimal,
        description: &str,
        idempotency_key: &str,
    ) -> Result<Uuid> {
        self.debit_at(account_id, amount, description, idempotency_key, Utc::now())
            .await
    }

    /// Debit with an explicit clock
    pub async fn debit_at(
        &self,
        account_id: &AccountId,
        amount: Decimal,
        description: &str,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        validate_amount(amount)?;

        let config = self.config.current();
        let _guard = self.locks.acquire(account_id).await;

        if let Some(payload) = self.replay(idempotency_key, now, &config)? {
            return match payload {
                IdempotencyPayload::Debit { entry_id } => Ok(entry_id),
                _ => Err(Error::IdempotencyReuse(idempotency_key.to_string())),
            };
        }

        let account = self.guarded_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        let derivation = derive(&entries);
        self.verify_cached(&account, &derivation)?;

        let available = derivation.spendable_at(now);
        if available < amount {
            return Err(Error::InsufficientBalance {
                required: amount,
                available,
            });
        }

        let entry = LedgerEntry::new(
            account_id.clone(),
            EntryKind::Spend,
            amount,
            now,
            None,
            description,
        );
        let entry_id = entry.entry_id;

        let mut account = account;
        account.cached_balance = available - amount;
        account.balance_as_of = now;

        let timer = self.metrics.commit_duration.start_timer();
        self.store.commit(WriteSet {
            entries: vec![entry],
            accounts: vec![account],
            idempotency: Some((
                idempotency_key.to_string(),
                IdempotencyRecord {
                    payload: IdempotencyPayload::Debit { entry_id },
                    created_at: now,
                },
            )),
            ..Default::default()
        })?;
        drop(timer);

        self.metrics.entries_total.inc();
        tracing::info!(account = %account_id, amount = %amount, "Debit appended");
        Ok(entry_id)
    }

    /// Transfer credits between two accounts
    pub async fn transfer(
        &self,
        sender_id: &AccountId,
        recipient_id: &AccountId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<TransferResult> {
        self.transfer_at(sender_id, recipient_id, amount, idempotency_key, Utc::now())
            .await
    }

    /// Transfer with an explicit clock
    pub async fn transfer_at(
        &self,
        sender_id: &AccountId,
        recipient_id: &AccountId,
        amount: Decimal,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<TransferResult> {
        let config = self.config.current();
        TransferService::validate_request(&config, sender_id, recipient_id, amount)?;

        let _guards = self.locks.acquire_pair(sender_id, recipient_id).await;

        if let Some(payload) = self.replay(idempotency_key, now, &config)? {
            return match payload {
                IdempotencyPayload::Transfer(result) => Ok(result),
                _ => Err(Error::IdempotencyReuse(idempotency_key.to_string())),
            };
        }

        let sender = self.guarded_account(sender_id)?;
        let recipient = match self.store.get_account_opt(recipient_id)? {
            Some(account) if account.active => account,
            _ => return Err(Error::RecipientNotFound(recipient_id.to_string())),
        };
        if recipient.frozen {
            return Err(Error::AccountFrozen(recipient_id.to_string()));
        }

        let sender_entries = self.store.entries_for(sender_id)?;
        let sender_derivation = derive(&sender_entries);
        self.verify_cached(&sender, &sender_derivation)?;

        let recipient_entries = self.store.entries_for(recipient_id)?;
        let recipient_derivation = derive(&recipient_entries);
        self.verify_cached(&recipient, &recipient_derivation)?;

        let timer = self.metrics.commit_duration.start_timer();
        let result = self.transfers.execute(
            &config,
            sender,
            &sender_derivation,
            recipient,
            &recipient_derivation,
            amount,
            idempotency_key,
            now,
        )?;
        drop(timer);

        self.metrics.transfers_total.inc();
        self.metrics.entries_total.inc_by(2);
        Ok(result)
    }

    /// Extend a soon-to-expire credit batch
    pub async fn extend(&self, account_id: &AccountId, entry_id: Uuid) -> Result<ExtensionResult> {
        self.extend_at(account_id, entry_id, Utc::now()).await
    }

    /// Extend with an explicit clock
    pub async fn extend_at(
        &self,
        account_id: &AccountId,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ExtensionResult> {
        let config = self.config.current();
        let _guard = self.locks.acquire(account_id).await;

        let account = self.guarded_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        let derivation = derive(&entries);
        self.verify_cached(&account, &derivation)?;

        let timer = self.metrics.commit_duration.start_timer();
        let result = self
            .expiry
            .extend(&config, account, &entries, &derivation, entry_id, now)?;
        drop(timer);

        self.metrics.extensions_total.inc();
        self.metrics
            .entries_total
            .inc_by(if result.new_entry_id.is_some() { 2 } else { 1 });
        Ok(result)
    }

    /// Claim today's daily bonus
    pub async fn claim_daily_bonus(&self, account_id: &AccountId) -> Result<ClaimResult> {
        self.claim_daily_bonus_at(account_id, Utc::now()).await
    }

    /// Claim with an explicit clock
    pub async fn claim_daily_bonus_at(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult> {
        let config = self.config.current();
        let _guard = self.locks.acquire(account_id).await;

        let account = self.guarded_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        let derivation = derive(&entries);
        self.verify_cached(&account, &derivation)?;

        let timer = self.metrics.commit_duration.start_timer();
        let result = self.bonus.claim(&config, account, &derivation, now)?;
        drop(timer);

        self.metrics.bonus_claims_total.inc();
        self.metrics.entries_total.inc();
        Ok(result)
    }

    // Reads (lock-free against the committed store)

    /// Spendable balance now
    pub fn get_balance(&self, account_id: &AccountId) -> Result<Decimal> {
        self.balance_at(account_id, Utc::now())
    }

    /// Spendable balance at an explicit instant
    pub fn balance_at(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<Decimal> {
        self.store.get_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        Ok(derive(&entries).spendable_at(now))
    }

    /// Credit batches expiring within `days`, soonest first
    pub fn get_expiring_soon(&self, account_id: &AccountId, days: i64) -> Result<ExpiringSummary> {
        self.expiring_soon_at(account_id, days, Utc::now())
    }

    /// Expiring-soon query with an explicit clock
    pub fn expiring_soon_at(
        &self,
        account_id: &AccountId,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<ExpiringSummary> {
        self.store.get_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        let (entries, total_amount) = derive(&entries).expiring_within(now, days);
        Ok(ExpiringSummary {
            total_amount,
            entries,
        })
    }

    /// Full entry history, oldest first
    pub fn history(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.store.get_account(account_id)?;
        self.store.entries_for(account_id)
    }

    // Reconciliation

    /// Compare the cached balance against the log-derived balance
    pub async fn reconcile(&self, account_id: &AccountId) -> Result<ReconcileReport> {
        let _guard = self.locks.acquire(account_id).await;

        let account = self.store.get_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        let derivation = derive(&entries);

        let derived_balance = derivation.spendable_at(account.balance_as_of);
        let consistent =
            derived_balance == account.cached_balance && derivation.shortfall == Decimal::ZERO;

        if !consistent && !account.frozen {
            self.freeze(&account);
        }

        Ok(ReconcileReport {
            account_id: account_id.clone(),
            cached_balance: account.cached_balance,
            derived_balance,
            consistent,
        })
    }

    /// Manual repair path out of the frozen state: rewrite the cached
    /// balance from the log and clear the freeze flag
    pub async fn repair_cached_balance(&self, account_id: &AccountId) -> Result<Account> {
        let _guard = self.locks.acquire(account_id).await;

        let mut account = self.store.get_account(account_id)?;
        let entries = self.store.entries_for(account_id)?;
        let derivation = derive(&entries);

        if derivation.shortfall != Decimal::ZERO {
            return Err(Error::Corruption(format!(
                "account {} has an uncovered debit shortfall of {}; the log needs manual correction entries",
                account_id, derivation.shortfall
            )));
        }

        let now = Utc::now();
        account.cached_balance = derivation.spendable_at(now);
        account.balance_as_of = now;
        account.frozen = false;

        self.store.commit(WriteSet {
            accounts: vec![account.clone()],
            ..Default::default()
        })?;

        tracing::warn!(account = %account_id, balance = %account.cached_balance, "Cached balance repaired");
        Ok(account)
    }

    // Internal helpers

    fn guarded_account(&self, account_id: &AccountId) -> Result<Account> {
        let account = self.store.get_account(account_id)?;
        if account.frozen {
            return Err(Error::AccountFrozen(account_id.to_string()));
        }
        if !account.active {
            return Err(Error::AccountInactive(account_id.to_string()));
        }
        Ok(account)
    }

    /// Reconciliation check before any mutation: the cached balance must
    /// equal the log replayed at the instant it was cached. A mismatch
    /// freezes the account and aborts the operation.
    fn verify_cached(&self, account: &Account, derivation: &Derivation) -> Result<()> {
        let derived = derivation.spendable_at(account.balance_as_of);
        if derived == account.cached_balance && derivation.shortfall == Decimal::ZERO {
            return Ok(());
        }

        self.freeze(account);
        Err(Error::Corruption(format!(
            "account {}: cached balance {} != derived {} (shortfall {})",
            account.account_id, account.cached_balance, derived, derivation.shortfall
        )))
    }

    fn freeze(&self, account: &Account) {
        let mut frozen = account.clone();
        frozen.frozen = true;
        if let Err(e) = self.store.commit(WriteSet {
            accounts: vec![frozen],
            ..Default::default()
        }) {
            tracing::error!(account = %account.account_id, error = %e, "Failed to persist freeze flag");
        } else {
            tracing::error!(account = %account.account_id, "Account frozen pending reconciliation");
        }
    }

    fn replay(
        &self,
        idempotency_key: &str,
        now: DateTime<Utc>,
        config: &Config,
    ) -> Result<Option<IdempotencyPayload>> {
        match self.store.get_idempotency(idempotency_key)? {
            Some(record)
                if now.signed_duration_since(record.created_at).num_seconds()
                    <= config.idempotency_ttl_secs as i64 =>
            {
                self.metrics.idempotent_replays_total.inc();
                tracing::debug!(key = idempotency_key, "Idempotent replay");
                Ok(Some(record.payload))
            }
            _ => Ok(None),
        }
    }
}
