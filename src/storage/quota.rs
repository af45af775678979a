//! Per-account storage quota.
//!
//! Admission checks and reserves capacity under a single lock scope so two
//! concurrent admissions can never both pass against the same stale usage.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Account, AccountId, QuotaSummary, Result, StorageError};

/// 10 GiB, the capacity a new account starts with.
pub const DEFAULT_LIMIT_BYTES: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct QuotaLedger {
    accounts: Arc<Mutex<HashMap<AccountId, Account>>>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account, replacing any previous entry for the same id.
    pub async fn open(&self, id: AccountId, used_bytes: u64, limit_bytes: u64) {
        let mut accounts = self.accounts.lock().await;
        let mut account = Account::new(id, limit_bytes);
        account.used_bytes = used_bytes;
        accounts.insert(id, account);
    }

    pub async fn close(&self, id: AccountId) -> Option<Account> {
        let mut accounts = self.accounts.lock().await;
        accounts.remove(&id)
    }

    /// Reserves `requested` bytes if they fit. Unknown accounts are never admitted.
    pub async fn admit(&self, id: AccountId, requested: u64) -> bool {
        let mut accounts = self.accounts.lock().await;
        let Some(account) = accounts.get_mut(&id) else {
            warn!(account = %id, "admission for unknown account");
            return false;
        };

        if requested > account.available() {
            debug!(
                account = %id,
                requested,
                available = account.available(),
                "admission rejected"
            );
            return false;
        }

        account.reserved_bytes += requested;
        true
    }

    /// Same as [`admit`](Self::admit) but reports the shortfall as an error.
    pub async fn try_admit(&self, id: AccountId, requested: u64) -> Result<()> {
        if self.admit(id, requested).await {
            return Ok(());
        }
        let available = self.available_bytes(id).await.unwrap_or(0);
        Err(StorageError::QuotaExceeded {
            account: id,
            requested,
            available,
        })
    }

    /// Turns a reservation of `reserved` bytes into `actual` committed bytes.
    ///
    /// If `actual` does not fit, the reservation is dropped and nothing is
    /// committed.
    pub async fn commit(&self, id: AccountId, reserved: u64, actual: u64) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("account {}", id)))?;

        account.reserved_bytes = account.reserved_bytes.saturating_sub(reserved);
        let available = account.available();
        if actual > available {
            return Err(StorageError::QuotaExceeded {
                account: id,
                requested: actual,
                available,
            });
        }

        account.used_bytes += actual;
        Ok(())
    }

    pub async fn release(&self, id: AccountId, bytes: u64) {
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts.get_mut(&id) {
            account.reserved_bytes = account.reserved_bytes.saturating_sub(bytes);
        }
    }

    /// Gives back committed bytes, e.g. after a file is deleted.
    pub async fn reclaim(&self, id: AccountId, bytes: u64) {
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts.get_mut(&id) {
            account.used_bytes = account.used_bytes.saturating_sub(bytes);
        }
    }

    pub async fn set_limit(&self, id: AccountId, limit_bytes: u64) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("account {}", id)))?;

        let floor = account.used_bytes + account.reserved_bytes;
        if limit_bytes < floor {
            return Err(StorageError::Storage(format!(
                "limit {} is below the {} bytes already in use",
                limit_bytes, floor
            )));
        }

        account.limit_bytes = limit_bytes;
        Ok(())
    }

    pub async fn used_bytes(&self, id: AccountId) -> Option<u64> {
        let accounts = self.accounts.lock().await;
        accounts.get(&id).map(|a| a.used_bytes)
    }

    pub async fn limit_bytes(&self, id: AccountId) -> Option<u64> {
        let accounts = self.accounts.lock().await;
        accounts.get(&id).map(|a| a.limit_bytes)
    }

    pub async fn reserved_bytes(&self, id: AccountId) -> Option<u64> {
        let accounts = self.accounts.lock().await;
        accounts.get(&id).map(|a| a.reserved_bytes)
    }

    pub async fn available_bytes(&self, id: AccountId) -> Option<u64> {
        let accounts = self.accounts.lock().await;
        accounts.get(&id).map(Account::available)
    }

    pub async fn account(&self, id: AccountId) -> Option<Account> {
        let accounts = self.accounts.lock().await;
        accounts.get(&id).cloned()
    }

    pub async fn summary(&self, id: AccountId) -> Option<QuotaSummary> {
        let accounts = self.accounts.lock().await;
        accounts.get(&id).map(QuotaSummary::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: AccountId = AccountId(1);

    async fn ledger_with(limit: u64) -> QuotaLedger {
        let ledger = QuotaLedger::new();
        ledger.open(USER, 0, limit).await;
        ledger
    }

    #[tokio::test]
    async fn test_admit_commit_then_reject() {
        let ledger = ledger_with(1000).await;

        assert!(ledger.admit(USER, 500).await);
        ledger.commit(USER, 500, 500).await.unwrap();
        assert_eq!(ledger.used_bytes(USER).await, Some(500));

        assert!(!ledger.admit(USER, 600).await);
        assert_eq!(ledger.reserved_bytes(USER).await, Some(0));
    }

    #[tokio::test]
    async fn test_reservation_blocks_second_admission() {
        let ledger = ledger_with(1000).await;

        assert!(ledger.admit(USER, 700).await);
        assert!(!ledger.admit(USER, 400).await);
        // reservations are not visible as usage
        assert_eq!(ledger.used_bytes(USER).await, Some(0));

        ledger.release(USER, 700).await;
        assert!(ledger.admit(USER, 400).await);
    }

    #[tokio::test]
    async fn test_commit_smaller_than_reserved() {
        let ledger = ledger_with(1000).await;

        assert!(ledger.admit(USER, 800).await);
        ledger.commit(USER, 800, 120).await.unwrap();

        assert_eq!(ledger.used_bytes(USER).await, Some(120));
        assert_eq!(ledger.reserved_bytes(USER).await, Some(0));
        assert_eq!(ledger.available_bytes(USER).await, Some(880));
    }

    #[tokio::test]
    async fn test_commit_over_limit_drops_reservation() {
        let ledger = ledger_with(1000).await;

        assert!(ledger.admit(USER, 900).await);
        let err = ledger.commit(USER, 900, 1200).await.unwrap_err();

        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(ledger.used_bytes(USER).await, Some(0));
        assert_eq!(ledger.reserved_bytes(USER).await, Some(0));
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_admitted() {
        let ledger = QuotaLedger::new();
        assert!(!ledger.admit(AccountId(42), 1).await);
        assert!(ledger.try_admit(AccountId(42), 1).await.is_err());
    }

    #[tokio::test]
    async fn test_set_limit_below_usage_rejected() {
        let ledger = ledger_with(1000).await;
        assert!(ledger.admit(USER, 300).await);
        ledger.commit(USER, 300, 300).await.unwrap();

        assert!(ledger.set_limit(USER, 200).await.is_err());
        ledger.set_limit(USER, 300).await.unwrap();
        assert_eq!(ledger.limit_bytes(USER).await, Some(300));
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_overcommit() {
        let ledger = ledger_with(1000).await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.admit(USER, 100).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
        assert_eq!(ledger.reserved_bytes(USER).await, Some(1000));
    }
}
