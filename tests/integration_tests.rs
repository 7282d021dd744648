//! Integration tests for ledger-import

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use ledger_import::{
    filter::ExclusionRule,
    reconciliation::FixedMode,
    sequence::{sort_chronologically, SecondBuckets},
    utils::MemoryStorage,
    AccountIdentity, BalanceMode, ConversionError, Direction, ImportError, ImportPipeline,
    ImportRequest, ImportStorage, InstitutionPolicy, PipelineConfig, PolicyRegistry,
    RawTransactionRecord, SkipReason, SourceDescriptor, SourceOrder,
};
use std::str::FromStr;
use std::sync::Arc;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::from_str(s).unwrap()
}

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn credit_source() -> SourceDescriptor {
    SourceDescriptor::new("cmb_credit", "2024-03.pdf")
}

fn registry() -> PolicyRegistry {
    PolicyRegistry::new()
        .with(
            "cmb_credit",
            InstitutionPolicy::new().rules(vec![
                ExclusionRule::StatusBlacklist(vec!["declined".to_string()]),
                ExclusionRule::ZeroAmount,
            ]),
        )
        .with(
            "checking",
            InstitutionPolicy::new()
                .source_order(SourceOrder::OldestFirst)
                .balance_mode(FixedMode(BalanceMode::Forward)),
        )
        .with(
            "bank_statement",
            InstitutionPolicy::new().source_order(SourceOrder::OldestFirst),
        )
}

fn pipeline() -> ImportPipeline<MemoryStorage> {
    init_logging();
    ImportPipeline::new(MemoryStorage::new(), registry())
}

/// Ten distinct card transactions on 2024-03-01..10, listed newest first
fn ten_records() -> Vec<RawTransactionRecord> {
    (0..10u32)
        .rev()
        .map(|i| {
            RawTransactionRecord::new()
                .date(ts(&format!("2024-03-{:02}T12:00:00", i + 1)))
                .amount(BigDecimal::from((i + 1) * 10))
                .direction(Direction::Outflow)
                .order_id(format!("ORD-{i}"))
                .counterparty(format!("Merchant {i}"))
        })
        .collect()
}

#[tokio::test]
async fn test_fresh_import_accepts_every_record() {
    let pipeline = pipeline();
    let request = ImportRequest::new("card", credit_source(), ten_records());

    let result = pipeline.import(request).await.unwrap();

    assert_eq!(result.accepted, 10);
    assert_eq!(result.duplicates, 0);
    assert!(result.skipped.is_empty());
    assert_eq!(result.transactions.len(), 10);
    assert_eq!(result.batch.seen, 10);
    assert_eq!(result.latest_date, Some(ts("2024-03-10T12:00:00")));
    assert_eq!(result.transactions[0].amount, dec("-100"));
    assert!(result.transactions[0].note.contains("ORD-9"));
    assert_eq!(pipeline.storage().transaction_count("card").unwrap(), 10);
    assert_eq!(pipeline.storage().raw_record_count("card").unwrap(), 10);
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let pipeline = pipeline();
    pipeline
        .import(ImportRequest::new("card", credit_source(), ten_records()))
        .await
        .unwrap();

    let result = pipeline
        .import(ImportRequest::new("card", credit_source(), ten_records()))
        .await
        .unwrap();

    assert_eq!(result.accepted, 0);
    assert_eq!(result.duplicates, 10);
    assert_eq!(result.batch.duplicates, 10);
    assert!(result.transactions.is_empty());
    assert_eq!(result.latest_date, Some(ts("2024-03-10T12:00:00")));

    let storage = pipeline.storage();
    assert_eq!(storage.transaction_count("card").unwrap(), 10);
    assert_eq!(storage.raw_record_count("card").unwrap(), 10);
    // Every run leaves an audit entry, even when nothing new arrived
    assert_eq!(storage.load_batches("card").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_reimport_with_colliding_rows_is_idempotent() {
    let pipeline = pipeline();
    // No order ids: the first two rows share a fingerprint
    let records = || {
        vec![
            RawTransactionRecord::new()
                .date(ts("2024-03-05T10:00:00"))
                .amount(dec("-3.50")),
            RawTransactionRecord::new()
                .date(ts("2024-03-05T10:00:00"))
                .amount(dec("-3.50")),
            RawTransactionRecord::new()
                .date(ts("2024-03-04T09:00:00"))
                .amount(dec("-1.00")),
        ]
    };

    let first = pipeline
        .import(ImportRequest::new("card", credit_source(), records()))
        .await
        .unwrap();
    assert_eq!((first.accepted, first.duplicates), (2, 1));

    let again = pipeline
        .import(ImportRequest::new("card", credit_source(), records()))
        .await
        .unwrap();
    assert_eq!(again.accepted, 0);
    assert_eq!(again.duplicates, 3);
    assert_eq!(pipeline.storage().transaction_count("card").unwrap(), 2);
}

#[tokio::test]
async fn test_canonical_note_match_without_raw_history() {
    // Transactions materialized by an earlier system, with no raw provenance
    let storage = MemoryStorage::new();
    let seed = ImportPipeline::new(storage.clone(), registry());
    seed.import(ImportRequest::new("card", credit_source(), ten_records()))
        .await
        .unwrap();
    let transactions = storage.load_transactions("card").await.unwrap();

    let fresh = MemoryStorage::new();
    fresh
        .commit(ledger_import::ImportCommit {
            account_id: "card".to_string(),
            identity: None,
            raw_records: Vec::new(),
            transactions,
            batch: storage.load_batches("card").await.unwrap().remove(0),
        })
        .await
        .unwrap();

    let pipeline = ImportPipeline::new(fresh, registry());
    let result = pipeline
        .import(ImportRequest::new("card", credit_source(), ten_records()))
        .await
        .unwrap();
    assert_eq!(result.accepted, 0);
    assert_eq!(result.duplicates, 10);
}

#[tokio::test]
async fn test_backward_reconciliation_from_closing_balance() {
    let pipeline = pipeline();
    // Same second, newest first: -50 is the most recent
    let records = vec![
        RawTransactionRecord::new()
            .date(ts("2024-03-31T10:00:00"))
            .amount(dec("-50.00"))
            .order_id("A"),
        RawTransactionRecord::new()
            .date(ts("2024-03-31T10:00:00"))
            .amount(dec("-20.00"))
            .order_id("B"),
        RawTransactionRecord::new()
            .date(ts("2024-03-31T10:00:00"))
            .amount(dec("-30.00"))
            .order_id("C"),
    ];
    let request = ImportRequest::new("card", credit_source(), records)
        .with_closing_balance(dec("1000.00"));

    let result = pipeline.import(request).await.unwrap();

    let mut by_sequence: Vec<(u32, BigDecimal, BigDecimal)> = result
        .transactions
        .iter()
        .map(|t| (t.sequence, t.amount.clone(), t.balance.clone().unwrap()))
        .collect();
    by_sequence.sort_by_key(|(sequence, _, _)| *sequence);

    assert_eq!(
        by_sequence,
        vec![
            (1, dec("-50.00"), dec("1000.00")),
            (2, dec("-20.00"), dec("1050.00")),
            (3, dec("-30.00"), dec("1070.00")),
        ]
    );
    assert_eq!(result.balance, Some(dec("1000.00")));
}

#[tokio::test]
async fn test_identity_mismatch_writes_nothing() {
    let pipeline = pipeline();
    pipeline
        .import(
            ImportRequest::new("card", credit_source(), ten_records()).with_identity("6222-0001"),
        )
        .await
        .unwrap();
    assert_eq!(
        pipeline.storage().load_identity("card").await.unwrap(),
        AccountIdentity::Set("6222-0001".to_string())
    );

    let april = vec![RawTransactionRecord::new()
        .date(ts("2024-04-02T09:00:00"))
        .amount(dec("-5"))
        .order_id("APR-1")];
    let err = pipeline
        .import(
            ImportRequest::new("card", SourceDescriptor::new("cmb_credit", "2024-04.pdf"), april)
                .with_identity("6222-9999"),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ImportError::IdentityMismatch { ref stored, ref received, .. }
            if stored == "6222-0001" && received == "6222-9999"
    ));
    let storage = pipeline.storage();
    assert_eq!(storage.transaction_count("card").unwrap(), 10);
    assert_eq!(storage.raw_record_count("card").unwrap(), 10);
    assert_eq!(storage.load_batches("card").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overlap_divergence_raises_before_any_write() {
    let pipeline = pipeline();
    pipeline
        .import(ImportRequest::new("card", credit_source(), ten_records()))
        .await
        .unwrap();

    // Restated export: 2024-03-06 now reads 65 instead of 60
    let mut restated = ten_records();
    for record in restated.iter_mut() {
        if record.order_id.as_deref() == Some("ORD-5") {
            record.amount = Some(dec("65"));
        }
    }
    restated.insert(
        0,
        RawTransactionRecord::new()
            .date(ts("2024-03-12T08:00:00"))
            .amount(dec("-1"))
            .order_id("NEW-1"),
    );

    let err = pipeline
        .import(ImportRequest::new(
            "card",
            SourceDescriptor::new("cmb_credit", "restated.pdf"),
            restated,
        ))
        .await
        .unwrap_err();

    match err {
        ImportError::OverlapMismatch {
            day,
            existing_count,
            new_count,
            amount_delta,
            ..
        } => {
            assert_eq!(day, ts("2024-03-06T00:00:00").date());
            assert_eq!(existing_count, 1);
            assert_eq!(new_count, 1);
            assert_eq!(amount_delta, dec("-5"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pipeline.storage().transaction_count("card").unwrap(), 10);
    assert_eq!(
        pipeline.storage().load_batches("card").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_same_second_ordering_survives_reimport() {
    init_logging();
    let config = PipelineConfig {
        validate_overlaps: false,
        ..PipelineConfig::default()
    };
    let pipeline = ImportPipeline::with_config(MemoryStorage::new(), registry(), &config);

    let first = vec![
        RawTransactionRecord::new()
            .date(ts("2024-03-05T10:00:00.900"))
            .amount(dec("-3"))
            .order_id("late"),
        RawTransactionRecord::new()
            .date(ts("2024-03-05T10:00:00.500"))
            .amount(dec("-2"))
            .order_id("middle"),
        RawTransactionRecord::new()
            .date(ts("2024-03-05T10:00:00.100"))
            .amount(dec("-1"))
            .order_id("early"),
    ];
    let result = pipeline
        .import(ImportRequest::new("card", credit_source(), first.clone()))
        .await
        .unwrap();
    let sequences: Vec<(String, u32)> = result
        .transactions
        .iter()
        .map(|t| (t.note.clone(), t.sequence))
        .collect();
    assert_eq!(
        sequences,
        vec![
            ("late".to_string(), 1),
            ("middle".to_string(), 2),
            ("early".to_string(), 3),
        ]
    );

    // An overlapping export with one more row in the same second
    let mut second = first;
    second.push(
        RawTransactionRecord::new()
            .date(ts("2024-03-05T10:00:00.050"))
            .amount(dec("-4"))
            .order_id("earliest"),
    );
    let result = pipeline
        .import(ImportRequest::new("card", credit_source(), second))
        .await
        .unwrap();
    assert_eq!(result.accepted, 1);
    assert_eq!(result.duplicates, 3);
    assert_eq!(result.transactions[0].sequence, 4);

    let mut stored = pipeline.storage().load_transactions("card").await.unwrap();
    sort_chronologically(&SecondBuckets, &mut stored);
    let notes: Vec<&str> = stored.iter().map(|t| t.note.as_str()).collect();
    assert_eq!(notes, vec!["earliest", "early", "middle", "late"]);
}

#[tokio::test]
async fn test_forward_balances_for_oldest_first_source() {
    let pipeline = pipeline();
    let records = vec![
        RawTransactionRecord::new()
            .date(ts("2024-03-01T09:00:00"))
            .amount(dec("250.00"))
            .direction(Direction::Inflow)
            .memo("salary"),
        RawTransactionRecord::new()
            .date(ts("2024-03-02T09:00:00"))
            .amount(dec("-40.25"))
            .memo("groceries"),
        RawTransactionRecord::new()
            .date(ts("2024-03-03T09:00:00"))
            .amount(dec("-9.75"))
            .memo("bus"),
    ];
    let request = ImportRequest::new(
        "checking-1",
        SourceDescriptor::new("checking", "march.xlsx"),
        records,
    )
    .with_opening_balance(dec("100.00"));

    let result = pipeline.import(request).await.unwrap();

    // Newest first in the result
    let balances: Vec<(String, BigDecimal)> = result
        .transactions
        .iter()
        .map(|t| (t.note.clone(), t.balance.clone().unwrap()))
        .collect();
    assert_eq!(
        balances,
        vec![
            ("bus".to_string(), dec("300.00")),
            ("groceries".to_string(), dec("309.75")),
            ("salary".to_string(), dec("350.00")),
        ]
    );
    assert_eq!(result.balance, Some(dec("300.00")));

    // The next month continues from the stored balance
    let april = vec![RawTransactionRecord::new()
        .date(ts("2024-04-01T09:00:00"))
        .amount(dec("-100"))
        .memo("rent")];
    let result = pipeline
        .import(ImportRequest::new(
            "checking-1",
            SourceDescriptor::new("checking", "april.xlsx"),
            april,
        ))
        .await
        .unwrap();
    assert_eq!(result.transactions[0].balance, Some(dec("200.00")));
    assert_eq!(result.balance, Some(dec("200.00")));
}

#[tokio::test]
async fn test_stored_balance_not_carried_onto_older_rows() {
    let pipeline = pipeline();
    let source = |name: &str| SourceDescriptor::new("checking", name);

    let later = vec![RawTransactionRecord::new()
        .date(ts("2024-03-10T09:00:00"))
        .amount(dec("-10"))];
    let result = pipeline
        .import(
            ImportRequest::new("checking-1", source("late.xlsx"), later)
                .with_opening_balance(dec("100")),
        )
        .await
        .unwrap();
    assert_eq!(result.balance, Some(dec("90")));

    // A row that predates everything stored cannot continue from 90
    let earlier = vec![RawTransactionRecord::new()
        .date(ts("2024-03-01T09:00:00"))
        .amount(dec("5"))];
    let result = pipeline
        .import(ImportRequest::new("checking-1", source("early.xlsx"), earlier))
        .await
        .unwrap();
    assert_eq!(result.accepted, 1);
    assert_eq!(result.transactions[0].balance, None);
    assert_eq!(result.balance, Some(dec("90")));
}

#[tokio::test]
async fn test_embedded_balances_are_checked() {
    let pipeline = pipeline();
    let consistent = vec![
        RawTransactionRecord::new()
            .date(ts("2024-03-01T00:00:00"))
            .amount(dec("-10"))
            .balance(dec("90")),
        RawTransactionRecord::new()
            .date(ts("2024-03-02T00:00:00"))
            .amount(dec("-15"))
            .balance(dec("75")),
    ];
    let result = pipeline
        .import(ImportRequest::new(
            "loan",
            SourceDescriptor::new("bank_statement", "march.pdf"),
            consistent,
        ))
        .await
        .unwrap();
    assert_eq!(result.accepted, 2);
    assert_eq!(result.balance, Some(dec("75")));
    assert_eq!(result.transactions[0].balance, Some(dec("75")));

    let broken = vec![
        RawTransactionRecord::new()
            .date(ts("2024-04-01T00:00:00"))
            .amount(dec("-10"))
            .balance(dec("65")),
        RawTransactionRecord::new()
            .date(ts("2024-04-02T00:00:00"))
            .amount(dec("-15"))
            .balance(dec("40")),
    ];
    let err = pipeline
        .import(ImportRequest::new(
            "loan",
            SourceDescriptor::new("bank_statement", "april.pdf"),
            broken,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::BalanceConsistency { .. }));
    assert_eq!(pipeline.storage().transaction_count("loan").unwrap(), 2);
}

#[tokio::test]
async fn test_conversion_errors_are_collected() {
    let pipeline = pipeline();
    let records = vec![
        RawTransactionRecord::new()
            .date(ts("2024-03-03T10:00:00"))
            .amount(dec("-1"))
            .order_id("ok-1"),
        RawTransactionRecord::new().amount(dec("-2")).order_id("no-date"),
        RawTransactionRecord::new()
            .date(ts("2024-03-02T10:00:00"))
            .amount(dec("-3"))
            .status("Declined"),
        RawTransactionRecord::new()
            .date(ts("2024-03-01T10:00:00"))
            .order_id("no-amount"),
    ];

    let result = pipeline
        .import(ImportRequest::new("card", credit_source(), records))
        .await
        .unwrap();

    assert_eq!(result.accepted, 1);
    assert_eq!(result.batch.skipped, 3);
    let reasons: Vec<(usize, SkipReason)> = result
        .skipped
        .iter()
        .map(|row| (row.index, row.reason.clone()))
        .collect();
    assert_eq!(reasons[0], (1, SkipReason::Conversion(ConversionError::MissingDate)));
    assert!(matches!(reasons[1], (2, SkipReason::Excluded(_))));
    assert_eq!(reasons[2], (3, SkipReason::Conversion(ConversionError::MissingAmount)));
}

#[tokio::test]
async fn test_fatal_request_errors() {
    let pipeline = pipeline();

    let declined_only = vec![RawTransactionRecord::new()
        .date(ts("2024-03-01T10:00:00"))
        .amount(dec("-1"))
        .status("declined")];
    let err = pipeline
        .import(ImportRequest::new("card", credit_source(), declined_only))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::SourceEmpty { .. }));

    let err = pipeline
        .import(ImportRequest::new(
            "card",
            SourceDescriptor::new("unknown_bank", "x.csv"),
            ten_records(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::UnknownSourceFormat(ref f) if f == "unknown_bank"));

    assert_eq!(pipeline.storage().load_batches("card").await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_pipeline_from_toml_config() {
    init_logging();
    let config = PipelineConfig::from_toml_str(
        r#"
        [institutions.alipay]
        fingerprint = "balance"
        excluded_statuses = ["closed"]
        "#,
    )
    .unwrap();
    let pipeline = ImportPipeline::from_config(MemoryStorage::new(), &config).unwrap();

    // No order ids: the balance fingerprint tells these two apart
    let records = vec![
        RawTransactionRecord::new()
            .date(ts("2024-03-01T10:00:00"))
            .amount(dec("-5"))
            .balance(dec("95")),
        RawTransactionRecord::new()
            .date(ts("2024-03-01T10:00:00"))
            .amount(dec("-5"))
            .balance(dec("100")),
        RawTransactionRecord::new()
            .date(ts("2024-03-01T09:00:00"))
            .amount(dec("-5"))
            .balance(dec("100"))
            .status("closed"),
    ];
    let result = pipeline
        .import(ImportRequest::new(
            "wallet",
            SourceDescriptor::new("alipay", "bill.csv"),
            records.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(result.accepted, 2);
    assert_eq!(result.skipped.len(), 1);

    let result = pipeline
        .import(ImportRequest::new(
            "wallet",
            SourceDescriptor::new("alipay", "bill-again.csv"),
            records,
        ))
        .await
        .unwrap();
    assert_eq!(result.accepted, 0);
    assert_eq!(result.duplicates, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_imports() {
    let pipeline = Arc::new(pipeline());

    let mut handles = Vec::new();
    for account in ["card-a", "card-a", "card-b"] {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline
                .import(ImportRequest::new(account, credit_source(), ten_records()))
                .await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    let same_account: Vec<_> = results
        .iter()
        .filter(|r| r.batch.account_id == "card-a")
        .collect();
    assert_eq!(same_account.iter().map(|r| r.accepted).sum::<usize>(), 10);
    assert_eq!(same_account.iter().map(|r| r.duplicates).sum::<usize>(), 10);

    let storage = pipeline.storage();
    assert_eq!(storage.transaction_count("card-a").unwrap(), 10);
    assert_eq!(storage.transaction_count("card-b").unwrap(), 10);
}
