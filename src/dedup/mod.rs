//! Duplicate detection against prior raw records and canonical transactions

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Canonical string form of an amount, so `10.0` and `10.00` agree
fn amount_key(amount: &BigDecimal) -> String {
    amount.normalized().to_string()
}

fn digest(parts: &[&str]) -> Fingerprint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f_u8]);
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Whether `text` holds `token` delimited by whitespace or the text's ends
pub fn mentions(text: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    text.match_indices(token).any(|(start, _)| {
        let end = start + token.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        before.map_or(true, char::is_whitespace) && after.map_or(true, char::is_whitespace)
    })
}

/// First occurrence of every fingerprint in `items`, in order
///
/// Items the strategy cannot fingerprint are all kept. This is the view of a
/// source the dedup loop ends up accepting when nothing is stored yet.
pub fn first_occurrences<'a, T, F>(
    account_id: &str,
    strategy: &dyn FingerprintStrategy,
    items: &'a [T],
    record: F,
) -> Vec<&'a T>
where
    F: Fn(&T) -> &RawTransactionRecord,
{
    let mut seen: HashSet<Fingerprint> = HashSet::new();
    items
        .iter()
        .filter(|item| match strategy.fingerprint(account_id, record(item)) {
            Some(fingerprint) => seen.insert(fingerprint),
            None => true,
        })
        .collect()
}

/// Keys records on (date, amount, order id, account)
///
/// Records without an order id fall back to [`BalanceFingerprint`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderIdFingerprint;

impl FingerprintStrategy for OrderIdFingerprint {
    fn fingerprint(&self, account_id: &str, record: &RawTransactionRecord) -> Option<Fingerprint> {
        let order_id = match record.dedup_key() {
            Some(order_id) => order_id,
            None => return BalanceFingerprint.fingerprint(account_id, record),
        };
        let date = truncate_to_second(record.date?).to_string();
        let amount = amount_key(&record.signed_amount()?);
        Some(digest(&["order", account_id, &date, &amount, order_id]))
    }

    fn name(&self) -> &'static str {
        "order_id"
    }
}

/// Keys records on (second-truncated date, amount, balance)
///
/// Meant for sources without a stable order id. Two rows sharing all three
/// values are treated as the same transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceFingerprint;

impl FingerprintStrategy for BalanceFingerprint {
    fn fingerprint(&self, account_id: &str, record: &RawTransactionRecord) -> Option<Fingerprint> {
        let date = truncate_to_second(record.date?).to_string();
        let amount = amount_key(&record.signed_amount()?);
        let balance = record
            .balance
            .as_ref()
            .map(amount_key)
            .unwrap_or_else(|| "-".to_string());
        Some(digest(&["balance", account_id, &date, &amount, &balance]))
    }

    fn name(&self) -> &'static str {
        "balance"
    }
}

/// Why a candidate was classified as a duplicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateMatch {
    /// Fingerprint equals one of a stored (or earlier in-run) raw record
    RawRecord(Fingerprint),
    /// A canonical transaction with the same date and amount mentions the order id
    CanonicalTransaction(Uuid),
}

/// Membership index built once per run for one account
pub struct DuplicateIndex {
    account_id: String,
    strategy: Arc<dyn FingerprintStrategy>,
    raw: HashSet<Fingerprint>,
    canonical: HashMap<(NaiveDateTime, String), Vec<(Uuid, String)>>,
}

impl DuplicateIndex {
    /// Build the index from the account's stored raw records and transactions
    pub fn build(
        account_id: &str,
        strategy: Arc<dyn FingerprintStrategy>,
        raw_records: &[StoredRawRecord],
        transactions: &[CanonicalTransaction],
    ) -> Self {
        let raw = raw_records
            .iter()
            .filter(|stored| stored.account_id == account_id)
            .filter_map(|stored| strategy.fingerprint(account_id, &stored.record))
            .collect();

        let mut index = Self {
            account_id: account_id.to_string(),
            strategy,
            raw,
            canonical: HashMap::new(),
        };
        for transaction in transactions
            .iter()
            .filter(|txn| txn.account_id == account_id)
        {
            index.insert_canonical(transaction);
        }
        index
    }

    fn insert_canonical(&mut self, transaction: &CanonicalTransaction) {
        self.canonical
            .entry((transaction.date, amount_key(&transaction.amount)))
            .or_default()
            .push((transaction.id, transaction.note.clone()));
    }

    /// Check a candidate against both stores
    pub fn check(&self, record: &RawTransactionRecord) -> Option<DuplicateMatch> {
        if let Some(fingerprint) = self.strategy.fingerprint(&self.account_id, record) {
            if self.raw.contains(&fingerprint) {
                return Some(DuplicateMatch::RawRecord(fingerprint));
            }
        }

        let order_id = record.dedup_key()?;
        let key = (
            truncate_to_second(record.date?),
            amount_key(&record.signed_amount()?),
        );
        self.canonical
            .get(&key)?
            .iter()
            .find(|(_, note)| mentions(note, order_id))
            .map(|(id, _)| DuplicateMatch::CanonicalTransaction(*id))
    }

    /// Add an accepted record so later candidates in the same run see it
    pub fn remember(&mut self, record: &RawTransactionRecord, transaction: &CanonicalTransaction) {
        if let Some(fingerprint) = self.strategy.fingerprint(&self.account_id, record) {
            self.raw.insert(fingerprint);
        }
        self.insert_canonical(transaction);
    }

    /// Number of raw fingerprints currently indexed
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}
