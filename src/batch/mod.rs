//! Import batch audit log and result aggregation

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::types::*;

/// Accumulates the counts of one run until it is committed
#[derive(Debug, Clone)]
pub struct BatchRecorder {
    id: Uuid,
    account_id: String,
    source: SourceDescriptor,
    seen: usize,
    accepted: usize,
    duplicates: usize,
    skipped: Vec<SkippedRow>,
    covered: Option<DateRange>,
}

impl BatchRecorder {
    /// Start recording a run over `seen` parser records
    pub fn new(account_id: &str, source: &SourceDescriptor, seen: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            source: source.clone(),
            seen,
            accepted: 0,
            duplicates: 0,
            skipped: Vec::new(),
            covered: None,
        }
    }

    /// Identifier the batch will be stored under
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn accept(&mut self) {
        self.accepted += 1;
    }

    pub fn duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn skip(&mut self, row: SkippedRow) {
        self.skipped.push(row);
    }

    /// Extend the covered range with a day
    pub fn cover(&mut self, day: NaiveDate) {
        self.covered = Some(match self.covered {
            None => DateRange::new(day, day),
            Some(range) => DateRange::new(range.start.min(day), range.end.max(day)),
        });
    }

    pub fn covered(&self) -> Option<DateRange> {
        self.covered
    }

    /// Close the batch; skipped rows come back sorted by source position
    pub fn finish(mut self, imported_at: NaiveDateTime) -> (ImportBatch, Vec<SkippedRow>) {
        self.skipped.sort_by_key(|row| row.index);
        let batch = ImportBatch {
            id: self.id,
            account_id: self.account_id,
            source: self.source,
            seen: self.seen,
            accepted: self.accepted,
            duplicates: self.duplicates,
            skipped: self.skipped.len(),
            covered: self.covered,
            imported_at,
        };
        (batch, self.skipped)
    }
}

/// Covered ranges of an account's earlier batches
pub fn prior_ranges(batches: &[ImportBatch], account_id: &str) -> Vec<DateRange> {
    batches
        .iter()
        .filter(|batch| batch.account_id == account_id)
        .filter_map(|batch| batch.covered)
        .collect()
}

/// Single range spanning every earlier batch of an account
pub fn covered_span(batches: &[ImportBatch], account_id: &str) -> Option<DateRange> {
    DateRange::covering(
        prior_ranges(batches, account_id)
            .into_iter()
            .flat_map(|range| [range.start, range.end]),
    )
}

/// Assemble the caller-facing result of a committed run
pub fn summarize(
    batch: ImportBatch,
    transactions: Vec<CanonicalTransaction>,
    skipped: Vec<SkippedRow>,
    balance: Option<BigDecimal>,
    prior_latest: Option<NaiveDateTime>,
) -> ImportResult {
    let latest_date = transactions
        .iter()
        .map(|txn| txn.date)
        .chain(prior_latest)
        .max();
    ImportResult {
        accepted: batch.accepted,
        duplicates: batch.duplicates,
        batch,
        transactions,
        skipped,
        balance,
        latest_date,
    }
}
