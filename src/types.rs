//! Core types and data structures for the import pipeline

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SubsecRound};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Money direction reported by a source next to an unsigned amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Money entering the account (deposit, refund, repayment)
    Inflow,
    /// Money leaving the account (purchase, withdrawal, fee)
    Outflow,
}

/// Institution-native transaction data prior to normalization
///
/// Every field is optional because parsers hand over whatever the source
/// exposes; conversion decides which gaps are fatal for a row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionRecord {
    /// Parsed transaction timestamp
    pub date: Option<NaiveDateTime>,
    /// Amount as reported; signed unless `direction` is present
    pub amount: Option<BigDecimal>,
    /// Running balance embedded in the source row
    pub balance: Option<BigDecimal>,
    /// Direction flag for sources reporting unsigned amounts
    pub direction: Option<Direction>,
    /// Natural dedup key issued by the source (order id, reference number)
    pub order_id: Option<String>,
    /// Merchant or counterparty name
    pub counterparty: Option<String>,
    /// Free-form memo or description
    pub memo: Option<String>,
    /// Source status such as "posted", "pending" or "declined"
    pub status: Option<String>,
    /// ISO currency code, when the source reports one
    pub currency: Option<String>,
}

impl RawTransactionRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date(mut self, date: NaiveDateTime) -> Self {
        self.date = Some(date);
        self
    }

    pub fn amount(mut self, amount: BigDecimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn balance(mut self, balance: BigDecimal) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Amount with the direction flag applied
    pub fn signed_amount(&self) -> Option<BigDecimal> {
        let amount = self.amount.as_ref()?;
        Some(match self.direction {
            Some(Direction::Inflow) => amount.abs(),
            Some(Direction::Outflow) => -amount.abs(),
            None => amount.clone(),
        })
    }

    /// Non-empty order id, if any
    pub fn dedup_key(&self) -> Option<&str> {
        self.order_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Raw record as persisted in the append-only provenance store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRawRecord {
    /// Batch that accepted the record
    pub batch_id: Uuid,
    /// Internal account the record belongs to
    pub account_id: String,
    /// The record exactly as the parser produced it
    pub record: RawTransactionRecord,
}

/// Normalized, account-scoped entry in the unified ledger
///
/// Unique per `(account_id, date, sequence)`. Never mutated once written;
/// corrections arrive as new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    /// Unique identifier for the transaction
    pub id: Uuid,
    /// Internal account reference
    pub account_id: String,
    /// Transaction timestamp, truncated to the second
    pub date: NaiveDateTime,
    /// Signed amount; negative values leave the account
    pub amount: BigDecimal,
    /// Merchant or counterparty name
    pub counterparty: String,
    /// Memo, with the source order id appended when one exists
    pub note: String,
    /// Running balance after this transaction, when derivable
    pub balance: Option<BigDecimal>,
    /// Tie-break ordinal; lower means later within the same bucket
    pub sequence: u32,
    /// Batch that produced the transaction
    pub batch_id: Uuid,
}

/// Truncate a timestamp to whole seconds
pub fn truncate_to_second(date: NaiveDateTime) -> NaiveDateTime {
    date.trunc_subsecs(0)
}

/// Truncate a timestamp to midnight of its day
pub fn truncate_to_day(date: NaiveDateTime) -> NaiveDateTime {
    date.date().and_time(NaiveTime::MIN)
}

/// Where an import came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Source-format key used to look up the institution policy
    pub format: String,
    /// Human-readable origin (file name, export id)
    pub name: String,
}

impl SourceDescriptor {
    pub fn new(format: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.format, self.name)
    }
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, swapping the bounds if given in reverse
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Smallest range covering every given day
    pub fn covering<I: IntoIterator<Item = NaiveDate>>(days: I) -> Option<Self> {
        days.into_iter().fold(None, |range, day| match range {
            None => Some(Self::new(day, day)),
            Some(r) => Some(Self::new(r.start.min(day), r.end.max(day))),
        })
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Shared sub-range, if the two ranges touch
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(DateRange { start, end })
    }

    /// Every day in the range, in order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

/// Append-only audit record of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    /// Unique identifier for the batch
    pub id: Uuid,
    /// Internal account the run targeted
    pub account_id: String,
    /// Where the records came from
    pub source: SourceDescriptor,
    /// Records handed over by the parser
    pub seen: usize,
    /// Records that became canonical transactions
    pub accepted: usize,
    /// Records dropped as already known
    pub duplicates: usize,
    /// Records excluded by the filter or that failed conversion
    pub skipped: usize,
    /// Days covered by the convertible records of this run
    pub covered: Option<DateRange>,
    /// When the run was committed
    pub imported_at: NaiveDateTime,
}

/// Everything a caller hands to the pipeline for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Internal account the records belong to
    pub account_id: String,
    /// Where the records came from
    pub source: SourceDescriptor,
    /// Institution-issued identity (card or account number) found in the source
    pub account_identity: Option<String>,
    /// Balance before the earliest record, when the source states it
    pub opening_balance: Option<BigDecimal>,
    /// Balance after the latest record, when the source states it
    pub closing_balance: Option<BigDecimal>,
    /// Parser output, in source order
    pub records: Vec<RawTransactionRecord>,
}

impl ImportRequest {
    pub fn new(
        account_id: impl Into<String>,
        source: SourceDescriptor,
        records: Vec<RawTransactionRecord>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            source,
            account_identity: None,
            opening_balance: None,
            closing_balance: None,
            records,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.account_identity = Some(identity.into());
        self
    }

    pub fn with_opening_balance(mut self, balance: BigDecimal) -> Self {
        self.opening_balance = Some(balance);
        self
    }

    pub fn with_closing_balance(mut self, balance: BigDecimal) -> Self {
        self.closing_balance = Some(balance);
        self
    }
}

/// Why the filter excluded a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionReason {
    /// Status is on the institution's blacklist
    Status(String),
    /// Amount is exactly zero
    ZeroAmount,
    /// Currency is outside the allow-list
    Currency(String),
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::Status(status) => write!(f, "excluded status '{}'", status),
            ExclusionReason::ZeroAmount => write!(f, "zero amount"),
            ExclusionReason::Currency(currency) => {
                write!(f, "currency '{}' not allowed", currency)
            }
        }
    }
}

/// Why a row did not reach the canonical store (duplicates aside)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    Excluded(ExclusionReason),
    Conversion(ConversionError),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Excluded(reason) => write!(f, "{}", reason),
            SkipReason::Conversion(err) => write!(f, "{}", err),
        }
    }
}

/// Descriptor of a row the run left out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    /// Position of the row in the parser output
    pub index: usize,
    /// Source order id, when the row had one
    pub order_id: Option<String>,
    pub reason: SkipReason,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    /// Audit entry written for the run
    pub batch: ImportBatch,
    /// Newly accepted canonical transactions, newest first
    pub transactions: Vec<CanonicalTransaction>,
    pub accepted: usize,
    pub duplicates: usize,
    /// Excluded and unconvertible rows, in source order
    pub skipped: Vec<SkippedRow>,
    /// Account balance after the run, when derivable
    pub balance: Option<BigDecimal>,
    /// Latest transaction timestamp known for the account
    pub latest_date: Option<NaiveDateTime>,
}

/// Everything a run persists, handed to storage in one atomic call
#[derive(Debug, Clone, PartialEq)]
pub struct ImportCommit {
    pub account_id: String,
    /// Identity to bind when the account had none
    pub identity: Option<String>,
    pub raw_records: Vec<StoredRawRecord>,
    pub transactions: Vec<CanonicalTransaction>,
    pub batch: ImportBatch,
}

/// A single record could not be converted; the run continues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ConversionError {
    #[error("missing transaction date")]
    MissingDate,
    #[error("missing transaction amount")]
    MissingAmount,
}

/// Errors that abort an import run
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Source '{descriptor}' yielded no usable records after filtering")]
    SourceEmpty { descriptor: String },
    #[error(
        "Account identity mismatch for '{account_id}': stored '{stored}', source reports '{received}'"
    )]
    IdentityMismatch {
        account_id: String,
        stored: String,
        received: String,
    },
    #[error(
        "Overlapping import diverges for '{account_id}' on {day}: existing {existing_count} rows, new {new_count} rows, amount delta {amount_delta}"
    )]
    OverlapMismatch {
        account_id: String,
        day: NaiveDate,
        existing_count: usize,
        new_count: usize,
        amount_delta: BigDecimal,
    },
    #[error(
        "Embedded balance inconsistent at {date}: {previous} + {amount} does not reach reported {reported}"
    )]
    BalanceConsistency {
        date: NaiveDateTime,
        previous: BigDecimal,
        amount: BigDecimal,
        reported: BigDecimal,
    },
    #[error("Unknown source format: {0}")]
    UnknownSourceFormat(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, ImportError>;
