//! Deterministic intra-bucket ordering of same-timestamp transactions
//!
//! Sources list transactions newest first, so within a bucket the first row
//! seen gets the lowest sequence number: a lower sequence means a later
//! real-world event. Re-imports continue from the highest sequence already
//! stored in a bucket and never renumber existing rows.

use chrono::NaiveDateTime;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::*;
use crate::types::*;

/// One bucket per wall-clock second
#[derive(Debug, Clone, Copy, Default)]
pub struct SecondBuckets;

impl BucketStrategy for SecondBuckets {
    fn bucket(&self, date: NaiveDateTime) -> NaiveDateTime {
        truncate_to_second(date)
    }

    fn name(&self) -> &'static str {
        "second"
    }
}

/// One bucket per calendar day, for sources that only report dates
#[derive(Debug, Clone, Copy, Default)]
pub struct DayBuckets;

impl BucketStrategy for DayBuckets {
    fn bucket(&self, date: NaiveDateTime) -> NaiveDateTime {
        truncate_to_day(date)
    }

    fn name(&self) -> &'static str {
        "day"
    }
}

/// Hands out sequence numbers per `(account, bucket)`
pub struct SequenceResolver {
    bucketing: Arc<dyn BucketStrategy>,
    counters: HashMap<NaiveDateTime, u32>,
}

impl SequenceResolver {
    /// Seed counters from the account's existing canonical transactions
    pub fn new(
        account_id: &str,
        bucketing: Arc<dyn BucketStrategy>,
        existing: &[CanonicalTransaction],
    ) -> Self {
        let mut counters: HashMap<NaiveDateTime, u32> = HashMap::new();
        for transaction in existing.iter().filter(|txn| txn.account_id == account_id) {
            let counter = counters
                .entry(bucketing.bucket(transaction.date))
                .or_insert(0);
            *counter = (*counter).max(transaction.sequence);
        }
        Self {
            bucketing,
            counters,
        }
    }

    /// Next sequence number for a timestamp
    ///
    /// Callers must present candidates newest first.
    pub fn assign(&mut self, date: NaiveDateTime) -> u32 {
        let counter = self
            .counters
            .entry(self.bucketing.bucket(truncate_to_second(date)))
            .or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Sort key placing transactions in real-world order, oldest first
pub fn chronological_key(
    bucketing: &dyn BucketStrategy,
    transaction: &CanonicalTransaction,
) -> (NaiveDateTime, Reverse<u32>) {
    (bucketing.bucket(transaction.date), Reverse(transaction.sequence))
}

/// Sort transactions oldest first
pub fn sort_chronologically(bucketing: &dyn BucketStrategy, transactions: &mut [CanonicalTransaction]) {
    transactions.sort_by_key(|txn| chronological_key(bucketing, txn));
}
