//! Single-writer discipline per account

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::*;

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async mutex per account id
///
/// Runs against the same account queue up; runs against different accounts
/// never touch the same lock. Entries live only while a run holds or waits
/// for them.
#[derive(Debug, Clone, Default)]
pub struct AccountLocks {
    locks: LockTable,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an account
    ///
    /// The guard releases the account when dropped.
    pub async fn acquire(&self, account_id: &str) -> PipelineResult<AccountGuard> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| ImportError::Storage("account lock table poisoned".to_string()))?;
            locks.entry(account_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        Ok(AccountGuard {
            account_id: account_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        })
    }
}

/// Exclusive hold on one account
#[derive(Debug)]
pub struct AccountGuard {
    account_id: String,
    locks: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters hold their own clone of the mutex, so a count of one means
        // only the table still refers to it
        if let Ok(mut locks) = self.locks.lock() {
            let idle = matches!(
                locks.get(&self.account_id),
                Some(lock) if Arc::strong_count(lock) == 1
            );
            if idle {
                locks.remove(&self.account_id);
            }
        }
    }
}
