//! Daily bonus grants
//!
//! Eligibility compares calendar dates in the marketplace's configured
//! timezone, never elapsed hours: an hour-based window drifts with the time
//! of day a user claims and can fit two claims into one day. The last grant
//! date is persisted on the account record, so the once-per-day guarantee
//! survives process restarts.

use crate::{
    balance::Derivation,
    config::Config,
    store::{TransactionStore, WriteSet},
    types::{Account, ClaimResult, EntryKind, LedgerEntry},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Daily bonus service
pub struct DailyBonusService {
    store: Arc<TransactionStore>,
}

impl DailyBonusService {
    /// Create new daily bonus service
    pub fn new(store: Arc<TransactionStore>) -> Self {
        Self { store }
    }

    /// Grant today's bonus if it has not been granted yet.
    ///
    /// Caller must hold the account lock and have passed the reconciliation
    /// check.
    pub fn claim(
        &self,
        config: &Config,
        mut account: Account,
        derivation: &Derivation,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult> {
        if !config.daily_bonus.enabled {
            return Err(Error::BonusDisabled);
        }

        let tz = config
            .timezone()
            .ok_or_else(|| Error::Config("timezone offset out of range".to_string()))?;
        let today = now.with_timezone(&tz).date_naive();

        if let Some(last) = account.last_bonus_date {
            if last >= today {
                return Err(Error::AlreadyClaimedToday);
            }
        }

        let amount = config.daily_bonus.amount;
        let expires_at = now + Duration::hours(config.daily_bonus.validity_hours);

        let entry = LedgerEntry::new(
            account.account_id.clone(),
            EntryKind::DailyBonus,
            amount,
            now,
            Some(expires_at),
            "daily bonus",
        );

        let result = ClaimResult {
            entry_id: entry.entry_id,
            amount,
            expires_at,
            claimed_on: today,
        };

        account.last_bonus_date = Some(today);
        account.cached_balance = derivation.spendable_at(now) + amount;
        account.balance_as_of = now;

        self.store.commit(WriteSet {
            entries: vec![entry],
            accounts: vec![account],
            ..Default::default()
        })?;

        tracing::info!(
            entry_id = %result.entry_id,
            claimed_on = %today,
            amount = %amount,
            "Daily bonus granted"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;
    use chrono::TimeZone;

    fn service() -> (DailyBonusService, tempfile::TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        let store = Arc::new(TransactionStore::open(&config).unwrap());
        (DailyBonusService::new(store), temp)
    }

    fn stored_account(service: &DailyBonusService, now: DateTime<Utc>) -> Account {
        let account = Account::new(AccountId::new("user-1"), now);
        service
            .store
            .commit(WriteSet {
                accounts: vec![account.clone()],
                ..Default::default()
            })
            .unwrap();
        account
    }

    #[test]
    fn test_claim_and_same_day_rejection() {
        let (service, _temp) = service();
        let config = Config::default();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let account = stored_account(&service, now);

        let result = service
            .claim(&config, account.clone(), &Derivation::default(), now)
            .unwrap();
        assert_eq!(result.amount, config.daily_bonus.amount);
        assert_eq!(result.claimed_on, now.date_naive());

        // Late-evening retry on the same calendar date fails even though
        // more than zero hours elapsed
        let evening = Utc.with_ymd_and_hms(2025, 3, 10, 23, 30, 0).unwrap();
        let account = service.store.get_account(&account.account_id).unwrap();
        let retry = service.claim(&config, account, &Derivation::default(), evening);
        assert!(matches!(retry, Err(Error::AlreadyClaimedToday)));
    }

    #[test]
    fn test_next_calendar_day_is_claimable_regardless_of_hours() {
        let (service, _temp) = service();
        let config = Config::default();
        let late = Utc.with_ymd_and_hms(2025, 3, 10, 23, 50, 0).unwrap();
        let account = stored_account(&service, late);

        service
            .claim(&config, account.clone(), &Derivation::default(), late)
            .unwrap();

        // 20 minutes later, but a new calendar date
        let early_next = Utc.with_ymd_and_hms(2025, 3, 11, 0, 10, 0).unwrap();
        let account = service.store.get_account(&account.account_id).unwrap();
        let result = service.claim(&config, account, &Derivation::default(), early_next);
        assert!(result.is_ok());
    }

    #[test]
    fn test_timezone_offset_shifts_the_day_boundary() {
        let (service, _temp) = service();
        let mut config = Config::default();
        config.timezone_offset_minutes = -180; // UTC-3

        // 01:00 UTC on Mar 11 is still Mar 10 at UTC-3
        let now = Utc.with_ymd_and_hms(2025, 3, 11, 1, 0, 0).unwrap();
        let account = stored_account(&service, now);

        let result = service
            .claim(&config, account, &Derivation::default(), now)
            .unwrap();
        assert_eq!(result.claimed_on.to_string(), "2025-03-10");
    }

    #[test]
    fn test_disabled_flag() {
        let (service, _temp) = service();
        let mut config = Config::default();
        config.daily_bonus.enabled = false;
        let now = Utc::now();
        let account = stored_account(&service, now);

        let result = service.claim(&config, account, &Derivation::default(), now);
        assert!(matches!(result, Err(Error::BonusDisabled)));
    }
}
