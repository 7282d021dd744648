//! Conversion of raw records into canonical transactions

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use std::cmp::Reverse;
use uuid::Uuid;

use crate::config::SourceOrder;
use crate::dedup::mentions;
use crate::filter::IndexedRecord;
use crate::traits::*;
use crate::types::*;

/// A filtered record whose required fields are present
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Position in the parser output
    pub index: usize,
    /// Second-truncated timestamp
    pub date: NaiveDateTime,
    /// Amount with the direction flag applied
    pub amount: BigDecimal,
    pub record: RawTransactionRecord,
}

/// Check the fields a canonical transaction cannot do without
pub fn prepare(indexed: IndexedRecord) -> Result<Candidate, SkippedRow> {
    let IndexedRecord { index, record } = indexed;
    let skipped = |error: ConversionError| SkippedRow {
        index,
        order_id: record.order_id.clone(),
        reason: SkipReason::Conversion(error),
    };

    let date = match record.date {
        Some(date) => truncate_to_second(date),
        None => return Err(skipped(ConversionError::MissingDate)),
    };
    let amount = match record.signed_amount() {
        Some(amount) => amount,
        None => return Err(skipped(ConversionError::MissingAmount)),
    };

    Ok(Candidate {
        index,
        date,
        amount,
        record,
    })
}

/// Put candidates newest first, keeping source order inside a bucket
///
/// Oldest-first sources are reversed before the stable sort so the first
/// row of every bucket is its most recent event.
pub fn order_newest_first(
    mut candidates: Vec<Candidate>,
    source_order: SourceOrder,
    bucketing: &dyn BucketStrategy,
) -> Vec<Candidate> {
    if source_order == SourceOrder::OldestFirst {
        candidates.reverse();
    }
    candidates.sort_by_key(|candidate| Reverse(bucketing.bucket(candidate.date)));
    candidates
}

/// Memo followed by the source order id, so canonical dedup can find it
pub fn compose_note(record: &RawTransactionRecord) -> String {
    let memo = record.memo.as_deref().map(str::trim).unwrap_or_default();
    match record.dedup_key() {
        Some(order_id) if memo.is_empty() => order_id.to_string(),
        Some(order_id) if !mentions(memo, order_id) => format!("{} {}", memo, order_id),
        _ => memo.to_string(),
    }
}

/// Build the canonical transaction for an accepted candidate
pub fn to_canonical(
    account_id: &str,
    batch_id: Uuid,
    candidate: &Candidate,
    sequence: u32,
) -> CanonicalTransaction {
    CanonicalTransaction {
        id: Uuid::new_v4(),
        account_id: account_id.to_string(),
        date: candidate.date,
        amount: candidate.amount.clone(),
        counterparty: candidate
            .record
            .counterparty
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        note: compose_note(&candidate.record),
        balance: None,
        sequence,
        batch_id,
    }
}
