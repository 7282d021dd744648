//! Traits for storage abstraction and per-institution policies

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::identity::AccountIdentity;
use crate::types::*;

/// Storage abstraction for the import pipeline
///
/// Reads give the pipeline a full view of one account before it writes
/// anything. `commit` must apply the whole `ImportCommit` or nothing: a
/// backend appends to a copy of the account's data and atomically replaces
/// the live version, so a run abandoned mid-write never leaves partial rows.
#[async_trait]
pub trait ImportStorage: Send + Sync {
    /// Identity metadata bound to an account
    async fn load_identity(&self, account_id: &str) -> PipelineResult<AccountIdentity>;

    /// Every raw record previously accepted for an account
    async fn load_raw_records(&self, account_id: &str) -> PipelineResult<Vec<StoredRawRecord>>;

    /// Every canonical transaction of an account
    async fn load_transactions(&self, account_id: &str)
        -> PipelineResult<Vec<CanonicalTransaction>>;

    /// Audit log of previous runs for an account
    async fn load_batches(&self, account_id: &str) -> PipelineResult<Vec<ImportBatch>>;

    /// Persist the outcome of one run atomically
    async fn commit(&self, commit: ImportCommit) -> PipelineResult<()>;
}

/// Deterministic composite key identifying a raw record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an institution's raw records are fingerprinted for dedup
pub trait FingerprintStrategy: Send + Sync {
    /// Fingerprint for a record, or `None` when the record lacks the fields
    /// the strategy needs
    fn fingerprint(&self, account_id: &str, record: &RawTransactionRecord) -> Option<Fingerprint>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// How timestamps are grouped into sequence buckets
pub trait BucketStrategy: Send + Sync {
    /// Bucket a (second-truncated) timestamp belongs to
    fn bucket(&self, date: NaiveDateTime) -> NaiveDateTime;

    fn name(&self) -> &'static str;
}

/// Balance derivation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceMode {
    /// Walk forward from a known opening balance
    Forward,
    /// Walk backward from a known closing balance
    Backward,
    /// Verify balances embedded in each source row
    EmbeddedCheck,
    /// No balance can be derived
    Unavailable,
}

/// What a run knows about balances when choosing a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceCapabilities {
    pub has_opening_balance: bool,
    pub has_closing_balance: bool,
    /// Every candidate row carries an embedded balance
    pub rows_carry_balance: bool,
    /// The account already has a canonical balance to continue from
    pub has_prior_balance: bool,
}

/// Picks the balance mode for an institution
pub trait BalanceModeSelector: Send + Sync {
    fn select(&self, capabilities: &BalanceCapabilities) -> BalanceMode;
}
