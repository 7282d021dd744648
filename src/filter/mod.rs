//! Record filtering ahead of dedup and conversion

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Predicate that excludes noise records from an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionRule {
    /// Drop records whose status is listed (case-insensitive)
    StatusBlacklist(Vec<String>),
    /// Drop records whose amount is exactly zero
    ZeroAmount,
    /// Keep only the listed currencies; records without a currency pass
    CurrencyAllowList(Vec<String>),
}

impl ExclusionRule {
    /// Reason the record is excluded, or `None` if it passes
    pub fn check(&self, record: &RawTransactionRecord) -> Option<ExclusionReason> {
        match self {
            ExclusionRule::StatusBlacklist(statuses) => {
                let status = record.status.as_deref()?.trim();
                statuses
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(status))
                    .then(|| ExclusionReason::Status(status.to_string()))
            }
            ExclusionRule::ZeroAmount => match &record.amount {
                Some(amount) if *amount == BigDecimal::from(0) => {
                    Some(ExclusionReason::ZeroAmount)
                }
                _ => None,
            },
            ExclusionRule::CurrencyAllowList(allowed) => {
                let currency = record.currency.as_deref()?.trim();
                if allowed.is_empty() || allowed.iter().any(|c| c.eq_ignore_ascii_case(currency)) {
                    None
                } else {
                    Some(ExclusionReason::Currency(currency.to_string()))
                }
            }
        }
    }
}

/// Raw record tagged with its position in the parser output
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    pub index: usize,
    pub record: RawTransactionRecord,
}

/// Output of the filter stage
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilteredRecords {
    /// Records passing every rule, in source order
    pub kept: Vec<IndexedRecord>,
    /// Descriptors of the records that were dropped
    pub excluded: Vec<SkippedRow>,
}

/// Apply exclusion rules to a source's records
///
/// The first matching rule decides the reason. An empty result means the
/// upstream export or parser is broken, so it fails instead of returning
/// an empty success.
pub fn filter_records(
    source: &SourceDescriptor,
    records: Vec<RawTransactionRecord>,
    rules: &[ExclusionRule],
) -> PipelineResult<FilteredRecords> {
    let mut filtered = FilteredRecords::default();

    for (index, record) in records.into_iter().enumerate() {
        match rules.iter().find_map(|rule| rule.check(&record)) {
            Some(reason) => filtered.excluded.push(SkippedRow {
                index,
                order_id: record.order_id.clone(),
                reason: SkipReason::Excluded(reason),
            }),
            None => filtered.kept.push(IndexedRecord { index, record }),
        }
    }

    if filtered.kept.is_empty() {
        return Err(ImportError::SourceEmpty {
            descriptor: source.to_string(),
        });
    }

    Ok(filtered)
}
