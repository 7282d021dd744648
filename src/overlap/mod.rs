//! Cross-check of re-imported date windows
//!
//! When a new source covers days an earlier import already covered, both
//! sides must agree day by day on row count and summed amount. A restated
//! statement would otherwise be absorbed silently as a pile of duplicates.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::*;

/// Row count and amount total of one day
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DaySummary {
    pub count: usize,
    pub total: BigDecimal,
}

impl DaySummary {
    fn add(&mut self, amount: &BigDecimal) {
        self.count += 1;
        self.total += amount;
    }
}

/// Days of `new_range` already covered by one of `prior_ranges`
pub fn overlapping_days(new_range: &DateRange, prior_ranges: &[DateRange]) -> BTreeSet<NaiveDate> {
    prior_ranges
        .iter()
        .filter_map(|prior| new_range.intersect(prior))
        .flat_map(|overlap| overlap.days())
        .collect()
}

/// Summaries for each day in `days`, zero-filled
pub fn summarize<'a, I>(entries: I, days: &BTreeSet<NaiveDate>) -> BTreeMap<NaiveDate, DaySummary>
where
    I: IntoIterator<Item = (NaiveDate, &'a BigDecimal)>,
{
    let mut summaries: BTreeMap<NaiveDate, DaySummary> =
        days.iter().map(|day| (*day, DaySummary::default())).collect();
    for (day, amount) in entries {
        if let Some(summary) = summaries.get_mut(&day) {
            summary.add(amount);
        }
    }
    summaries
}

/// Compares new and existing data over overlapping days
#[derive(Debug, Clone, Default)]
pub struct OverlapValidator;

impl OverlapValidator {
    pub fn new() -> Self {
        Self
    }

    /// Fail on the first overlapping day whose count or total diverges
    ///
    /// `incoming` holds the convertible rows of the new source with in-source
    /// repeats collapsed; `existing` is the account's canonical store.
    pub fn validate<'a, I>(
        &self,
        account_id: &str,
        days: &BTreeSet<NaiveDate>,
        incoming: I,
        existing: &[CanonicalTransaction],
    ) -> PipelineResult<()>
    where
        I: IntoIterator<Item = (NaiveDate, &'a BigDecimal)>,
    {
        if days.is_empty() {
            return Ok(());
        }

        let new_days = summarize(incoming, days);
        let old_days = summarize(
            existing
                .iter()
                .filter(|txn| txn.account_id == account_id)
                .map(|txn| (txn.date.date(), &txn.amount)),
            days,
        );

        for (day, new) in &new_days {
            let old = old_days.get(day).cloned().unwrap_or_default();
            if new.count != old.count || new.total != old.total {
                return Err(ImportError::OverlapMismatch {
                    account_id: account_id.to_string(),
                    day: *day,
                    existing_count: old.count,
                    new_count: new.count,
                    amount_delta: &new.total - &old.total,
                });
            }
        }
        Ok(())
    }
}
