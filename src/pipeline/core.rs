//! Main import pipeline that sequences every stage for one run

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use tracing::{debug, info, instrument, warn};

use crate::batch::{self, BatchRecorder};
use crate::config::PipelineConfig;
use crate::dedup::{first_occurrences, DuplicateIndex};
use crate::filter::filter_records;
use crate::identity::IdentityCheck;
use crate::overlap::{overlapping_days, OverlapValidator};
use crate::pipeline::convert::{order_newest_first, prepare, to_canonical, Candidate};
use crate::pipeline::lock::AccountLocks;
use crate::pipeline::policy::{InstitutionPolicy, PolicyRegistry};
use crate::reconciliation::{BalanceAnchors, BalanceReconciler, BalanceRow};
use crate::sequence::{chronological_key, SequenceResolver};
use crate::traits::*;
use crate::types::*;
use crate::utils::validate_request;

/// State read from storage before any processing
struct AccountSnapshot {
    raw_records: Vec<StoredRawRecord>,
    transactions: Vec<CanonicalTransaction>,
    batches: Vec<ImportBatch>,
}

/// Candidate after the dedup loop
struct Decided {
    candidate: Candidate,
    /// Position in the accepted list, `None` for duplicates
    accepted: Option<usize>,
}

/// Import pipeline orchestrating filter, identity, overlap, dedup,
/// sequencing, balance reconciliation and persistence
///
/// Per-institution behavior comes from the [`PolicyRegistry`]. Runs against
/// the same account are serialized through this pipeline's account locks;
/// share one pipeline (behind an `Arc`) between tasks that may import the
/// same account.
pub struct ImportPipeline<S: ImportStorage> {
    storage: S,
    registry: PolicyRegistry,
    reconciler: BalanceReconciler,
    overlap: OverlapValidator,
    validate_overlaps: bool,
    locks: AccountLocks,
}

impl<S: ImportStorage> ImportPipeline<S> {
    /// Create a pipeline with default settings
    pub fn new(storage: S, registry: PolicyRegistry) -> Self {
        Self::with_config(storage, registry, &PipelineConfig::default())
    }

    /// Create a pipeline with explicit settings and registry
    pub fn with_config(storage: S, registry: PolicyRegistry, config: &PipelineConfig) -> Self {
        Self {
            storage,
            registry,
            reconciler: BalanceReconciler::new(config.balance_tolerance.clone()),
            overlap: OverlapValidator::new(),
            validate_overlaps: config.validate_overlaps,
            locks: AccountLocks::new(),
        }
    }

    /// Create a pipeline whose registry is built from the config's institutions
    pub fn from_config(storage: S, config: &PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self::with_config(
            storage,
            PolicyRegistry::from_config(config),
            config,
        ))
    }

    /// Get the storage backend
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Run one import
    ///
    /// Either every artifact of the run (raw records, canonical transactions,
    /// batch entry, first-time identity) is committed together, or nothing is.
    #[instrument(
        skip(self, request),
        fields(
            account_id = %request.account_id,
            format = %request.source.format,
            records = request.records.len()
        )
    )]
    pub async fn import(&self, request: ImportRequest) -> PipelineResult<ImportResult> {
        validate_request(&request)?;
        let policy = self.registry.get(&request.source.format)?;
        let _guard = self.locks.acquire(&request.account_id).await?;

        match self.run(policy, request).await {
            Ok(result) => {
                info!(
                    batch_id = %result.batch.id,
                    accepted = result.accepted,
                    duplicates = result.duplicates,
                    skipped = result.skipped.len(),
                    "Import committed"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(error = %err, "Import aborted, nothing written");
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        policy: &InstitutionPolicy,
        request: ImportRequest,
    ) -> PipelineResult<ImportResult> {
        let ImportRequest {
            account_id,
            source,
            account_identity,
            opening_balance,
            closing_balance,
            records,
        } = request;
        let mut recorder = BatchRecorder::new(&account_id, &source, records.len());

        // Filter
        let filtered = filter_records(&source, records, &policy.rules)?;
        for row in filtered.excluded {
            debug!(index = row.index, reason = %row.reason, "Record excluded");
            recorder.skip(row);
        }

        // Verify identity
        let identity = self
            .storage
            .load_identity(&account_id)
            .await?
            .verify(&account_id, account_identity.as_deref())?;
        if let IdentityCheck::Bind(_) = identity {
            info!("Binding account identity");
        }

        let snapshot = self.load_snapshot(&account_id).await?;

        // Convert the fields every later stage depends on
        let mut candidates = Vec::with_capacity(filtered.kept.len());
        for indexed in filtered.kept {
            match prepare(indexed) {
                Ok(candidate) => {
                    recorder.cover(candidate.date.date());
                    candidates.push(candidate);
                }
                Err(row) => {
                    warn!(index = row.index, reason = %row.reason, "Record skipped");
                    recorder.skip(row);
                }
            }
        }
        let candidates =
            order_newest_first(candidates, policy.source_order, policy.bucketing.as_ref());

        // Overlap validation
        if self.validate_overlaps {
            self.validate_overlap(
                policy,
                &account_id,
                recorder.covered(),
                &candidates,
                &snapshot,
            )?;
        }

        // Dedup, sequence and convert
        let mut index = DuplicateIndex::build(
            &account_id,
            policy.fingerprint.clone(),
            &snapshot.raw_records,
            &snapshot.transactions,
        );
        debug!(
            fingerprints = index.len(),
            strategy = index.strategy_name(),
            "Duplicate index built"
        );
        let mut resolver =
            SequenceResolver::new(&account_id, policy.bucketing.clone(), &snapshot.transactions);
        let batch_id = recorder.id();
        let mut accepted: Vec<CanonicalTransaction> = Vec::new();
        let mut decided: Vec<Decided> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if let Some(found) = index.check(&candidate.record) {
                debug!(index = candidate.index, matched = ?found, "Duplicate record");
                recorder.duplicate();
                decided.push(Decided {
                    candidate,
                    accepted: None,
                });
                continue;
            }

            let sequence = resolver.assign(candidate.date);
            let transaction = to_canonical(&account_id, batch_id, &candidate, sequence);
            index.remember(&candidate.record, &transaction);
            recorder.accept();
            decided.push(Decided {
                candidate,
                accepted: Some(accepted.len()),
            });
            accepted.push(transaction);
        }

        // Reconcile balances once every row has its sequence
        let balance = self.reconcile_balances(
            policy,
            &snapshot.transactions,
            &decided,
            &mut accepted,
            opening_balance,
            closing_balance,
        )?;

        // Persist
        let prior_latest = latest_date(&snapshot.transactions);
        let raw_records = decided
            .iter()
            .filter(|d| d.accepted.is_some())
            .map(|d| StoredRawRecord {
                batch_id,
                account_id: account_id.clone(),
                record: d.candidate.record.clone(),
            })
            .collect();
        let (batch, skipped) = recorder.finish(chrono::Utc::now().naive_utc());

        self.storage
            .commit(ImportCommit {
                account_id: account_id.clone(),
                identity: identity.pending_write().map(str::to_string),
                raw_records,
                transactions: accepted.clone(),
                batch: batch.clone(),
            })
            .await?;

        Ok(batch::summarize(
            batch,
            accepted,
            skipped,
            balance,
            prior_latest,
        ))
    }

    /// Compare the days this source shares with earlier batches
    ///
    /// Rows repeated inside the source are counted once, the way the dedup
    /// loop would store them.
    fn validate_overlap(
        &self,
        policy: &InstitutionPolicy,
        account_id: &str,
        covered: Option<DateRange>,
        candidates: &[Candidate],
        snapshot: &AccountSnapshot,
    ) -> PipelineResult<()> {
        let (range, span) = match (covered, batch::covered_span(&snapshot.batches, account_id)) {
            (Some(range), Some(span)) => (range, span),
            _ => return Ok(()),
        };
        if range.intersect(&span).is_none() {
            return Ok(());
        }

        let prior = batch::prior_ranges(&snapshot.batches, account_id);
        let days = overlapping_days(&range, &prior);
        if days.is_empty() {
            return Ok(());
        }
        debug!(days = days.len(), "Validating overlapping window");

        let distinct =
            first_occurrences(account_id, policy.fingerprint.as_ref(), candidates, |candidate| {
                &candidate.record
            });
        self.overlap.validate(
            account_id,
            &days,
            distinct
                .into_iter()
                .map(|candidate| (candidate.date.date(), &candidate.amount)),
            &snapshot.transactions,
        )
    }

    async fn load_snapshot(&self, account_id: &str) -> PipelineResult<AccountSnapshot> {
        Ok(AccountSnapshot {
            raw_records: self.storage.load_raw_records(account_id).await?,
            transactions: self.storage.load_transactions(account_id).await?,
            batches: self.storage.load_batches(account_id).await?,
        })
    }

    /// Fill running balances on accepted transactions and return the
    /// account balance after the run
    ///
    /// Statement anchors (opening/closing) apply to the whole source, so the
    /// walk covers duplicates too. Continuing from a stored balance only walks
    /// the newly accepted rows, and only when all of them come after the
    /// account's latest stored transaction.
    fn reconcile_balances(
        &self,
        policy: &InstitutionPolicy,
        existing: &[CanonicalTransaction],
        decided: &[Decided],
        accepted: &mut [CanonicalTransaction],
        opening: Option<BigDecimal>,
        closing: Option<BigDecimal>,
    ) -> PipelineResult<Option<BigDecimal>> {
        let latest = latest_stored(policy, existing);
        let prior = latest.and_then(|txn| txn.balance.clone());
        let carried = match latest {
            Some(latest) => {
                let floor = chronological_key(policy.bucketing.as_ref(), latest);
                let after_latest = accepted
                    .iter()
                    .all(|txn| chronological_key(policy.bucketing.as_ref(), txn) > floor);
                if after_latest {
                    prior.clone()
                } else {
                    debug!("Accepted rows predate the stored balance, not carrying it");
                    None
                }
            }
            None => None,
        };
        let capabilities = BalanceCapabilities {
            has_opening_balance: opening.is_some(),
            has_closing_balance: closing.is_some(),
            rows_carry_balance: !decided.is_empty()
                && decided.iter().all(|d| d.candidate.record.balance.is_some()),
            has_prior_balance: carried.is_some(),
        };
        let mode = policy.balance_mode.select(&capabilities);
        debug!(?mode, "Balance mode selected");

        let from_prior = mode == BalanceMode::Forward && opening.is_none();
        let anchors = BalanceAnchors {
            opening: if from_prior { carried } else { opening },
            closing,
        };

        // Oldest first
        let walked: Vec<&Decided> = decided
            .iter()
            .rev()
            .filter(|d| !from_prior || d.accepted.is_some())
            .collect();
        let mut rows: Vec<BalanceRow> = walked
            .iter()
            .map(|d| {
                BalanceRow::new(
                    d.candidate.date,
                    d.candidate.amount.clone(),
                    d.candidate.record.balance.clone(),
                )
            })
            .collect();

        let derived = self.reconciler.reconcile(mode, &anchors, &mut rows)?;

        for (d, row) in walked.iter().zip(rows) {
            if let Some(position) = d.accepted {
                accepted[position].balance = row.balance;
            }
        }

        Ok(derived.or(prior))
    }
}

/// The account's most recent stored transaction
fn latest_stored<'a>(
    policy: &InstitutionPolicy,
    existing: &'a [CanonicalTransaction],
) -> Option<&'a CanonicalTransaction> {
    existing
        .iter()
        .max_by_key(|txn| chronological_key(policy.bucketing.as_ref(), txn))
}

fn latest_date(transactions: &[CanonicalTransaction]) -> Option<NaiveDateTime> {
    transactions.iter().map(|txn| txn.date).max()
}
