//! In-memory storage implementation for testing

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::identity::AccountIdentity;
use crate::traits::*;
use crate::types::*;

/// Everything stored for one account
#[derive(Debug, Clone, Default)]
struct AccountData {
    identity: AccountIdentity,
    raw_records: Vec<StoredRawRecord>,
    transactions: Vec<CanonicalTransaction>,
    batches: Vec<ImportBatch>,
}

/// In-memory storage implementation for testing and development
///
/// Each account lives behind its own `Arc`. A commit builds a new version of
/// the account from the current one and swaps it in, so readers see either
/// the whole run or none of it.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    accounts: Arc<RwLock<HashMap<String, Arc<AccountData>>>>,
}

fn poisoned<T>(_: T) -> ImportError {
    ImportError::Storage("memory storage lock poisoned".to_string())
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> PipelineResult<()> {
        self.accounts.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn account(&self, account_id: &str) -> PipelineResult<Arc<AccountData>> {
        Ok(self
            .accounts
            .read()
            .map_err(poisoned)?
            .get(account_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Bind an identity directly, bypassing the pipeline
    pub fn bind_identity(&self, account_id: &str, identity: &str) -> PipelineResult<()> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let current = accounts.get(account_id).cloned().unwrap_or_default();
        let mut next = (*current).clone();
        next.identity = next.identity.bind(identity);
        accounts.insert(account_id.to_string(), Arc::new(next));
        Ok(())
    }

    /// Number of canonical transactions stored for an account
    pub fn transaction_count(&self, account_id: &str) -> PipelineResult<usize> {
        Ok(self.account(account_id)?.transactions.len())
    }

    /// Number of raw records stored for an account
    pub fn raw_record_count(&self, account_id: &str) -> PipelineResult<usize> {
        Ok(self.account(account_id)?.raw_records.len())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject a version whose transactions break `(account, second, sequence)` uniqueness
fn check_unique_positions(
    account_id: &str,
    transactions: &[CanonicalTransaction],
) -> PipelineResult<()> {
    let mut seen: HashSet<(NaiveDateTime, u32)> = HashSet::with_capacity(transactions.len());
    for txn in transactions {
        if txn.account_id != account_id {
            return Err(ImportError::Storage(format!(
                "transaction {} belongs to '{}', not '{}'",
                txn.id, txn.account_id, account_id
            )));
        }
        if !seen.insert((truncate_to_second(txn.date), txn.sequence)) {
            return Err(ImportError::Storage(format!(
                "duplicate position ({}, {}) for account '{}'",
                txn.date, txn.sequence, account_id
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl ImportStorage for MemoryStorage {
    async fn load_identity(&self, account_id: &str) -> PipelineResult<AccountIdentity> {
        Ok(self.account(account_id)?.identity.clone())
    }

    async fn load_raw_records(&self, account_id: &str) -> PipelineResult<Vec<StoredRawRecord>> {
        Ok(self.account(account_id)?.raw_records.clone())
    }

    async fn load_transactions(
        &self,
        account_id: &str,
    ) -> PipelineResult<Vec<CanonicalTransaction>> {
        Ok(self.account(account_id)?.transactions.clone())
    }

    async fn load_batches(&self, account_id: &str) -> PipelineResult<Vec<ImportBatch>> {
        Ok(self.account(account_id)?.batches.clone())
    }

    async fn commit(&self, commit: ImportCommit) -> PipelineResult<()> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let current = accounts
            .get(&commit.account_id)
            .cloned()
            .unwrap_or_default();

        let mut next = (*current).clone();
        if let Some(identity) = &commit.identity {
            if let AccountIdentity::Set(stored) = &next.identity {
                if stored != identity {
                    return Err(ImportError::IdentityMismatch {
                        account_id: commit.account_id.clone(),
                        stored: stored.clone(),
                        received: identity.clone(),
                    });
                }
            }
            next.identity = next.identity.bind(identity);
        }
        next.raw_records.extend(commit.raw_records);
        next.transactions.extend(commit.transactions);
        next.batches.push(commit.batch);

        check_unique_positions(&commit.account_id, &next.transactions)?;

        accounts.insert(commit.account_id, Arc::new(next));
        Ok(())
    }
}
