//! Per-account serialization boundary
//!
//! Mutating operations on an account hold that account's async mutex so two
//! concurrent operations cannot both observe a stale balance and both
//! succeed. There is deliberately no global lock; reads stay lock-free
//! against the committed store.

use crate::types::AccountId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of account-keyed async mutexes
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl AccountLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn mutex_for(&self, account_id: &AccountId) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire one account's lock
    pub async fn acquire(&self, account_id: &AccountId) -> OwnedMutexGuard<()> {
        self.mutex_for(account_id).lock_owned().await
    }

    /// Acquire two accounts' locks in account-id order.
    ///
    /// Consistent ordering prevents deadlock when two transfers run between
    /// the same pair of accounts in opposite directions simultaneously.
    pub async fn acquire_pair(
        &self,
        a: &AccountId,
        b: &AccountId,
    ) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        debug_assert_ne!(a, b, "pair lock requires distinct accounts");

        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first_guard = self.acquire(first).await;
        let second_guard = self.acquire(second).await;
        (first_guard, second_guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_serializes_same_account() {
        let locks = Arc::new(AccountLocks::new());
        let id = AccountId::new("user-1");

        let guard = locks.acquire(&id).await;

        let locks2 = locks.clone();
        let id2 = id.clone();
        let contender = tokio::spawn(async move {
            let _g = locks2.acquire(&id2).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_opposed_pair_locks_do_not_deadlock() {
        let locks = Arc::new(AccountLocks::new());
        let a = AccountId::new("alice");
        let b = AccountId::new("bob");

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let locks = locks.clone();
            let (x, y) = (a.clone(), b.clone());
            tasks.push(tokio::spawn(async move {
                let _guards = locks.acquire_pair(&x, &y).await;
            }));
            let locks = locks.clone();
            let (x, y) = (b.clone(), a.clone());
            tasks.push(tokio::spawn(async move {
                let _guards = locks.acquire_pair(&x, &y).await;
            }));
        }

        for task in tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
